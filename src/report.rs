// src/report.rs - JSON responses and status reports
use serde::Serialize;
use serde_json::{json, Value};

use krusty_shared::gcode::UnitsMode;
use krusty_shared::{Flow, StatusCode};

use crate::canonical::state::MachineStatus;
use crate::executor::Runtime;

/// Footer checksums are taken modulo this.
const CHECKSUM_MODULUS: u32 = 9999;

/// Java `String.hashCode` over the bytes, as the footer checksum.
pub fn checksum(text: &str) -> u32 {
    let hash = text
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
    hash % CHECKSUM_MODULUS
}

/// Numeric status for the footer.
pub fn status_code(result: &Result<Flow, StatusCode>) -> u8 {
    match result {
        Ok(Flow::Ok) => StatusCode::OK,
        Ok(Flow::Eagain) => StatusCode::EAGAIN,
        Ok(Flow::Noop) => StatusCode::NOOP,
        Err(e) => e.code(),
    }
}

/// `{"r":{...},"f":[1,status,depth,checksum]}`. The checksum covers
/// everything before it.
pub fn response(body: &Value, status: u8, depth: usize) -> String {
    let head = format!("{{\"r\":{},\"f\":[1,{},{}", body, status, depth);
    let sum = checksum(&head);
    format!("{},{}]}}", head, sum)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Runtime snapshot reported as `sr`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub line: u32,
    pub posx: f64,
    pub posy: f64,
    pub posz: f64,
    pub posa: f64,
    pub posb: f64,
    pub posc: f64,
    pub vel: f64,
    pub stat: u8,
    /// 0 inches, 1 millimeters
    pub unit: u8,
    pub coor: u8,
    pub momo: u8,
    pub hold: u8,
}

impl StatusReport {
    /// Positions are in work coordinates and the runtime's units.
    pub fn capture(runtime: &Runtime, status: &MachineStatus) -> Self {
        let gm = runtime.gm();
        let units = gm.units_mode;
        let work = runtime.work_position();
        let linear = |v: f64| round3(units.from_millimeters(v));
        Self {
            line: gm.line_number,
            posx: linear(work[0]),
            posy: linear(work[1]),
            posz: linear(work[2]),
            posa: round3(work[3]),
            posb: round3(work[4]),
            posc: round3(work[5]),
            vel: linear(runtime.velocity()),
            stat: status.combined_state(),
            unit: match units {
                UnitsMode::Inches => 0,
                UnitsMode::Millimeters => 1,
            },
            coor: gm.coord_system.index() as u8,
            momo: gm.motion_mode.report_code(),
            hold: status.hold_state.code(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// `{"sr":{...}}`
    pub fn to_json(&self) -> String {
        json!({ "sr": self.to_value() }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krusty_shared::Config;

    #[test]
    fn test_checksum_matches_java_hash() {
        // "abc".hashCode() == 96354
        assert_eq!(checksum("abc"), 96354 % 9999);
        assert_eq!(checksum(""), 0);
    }

    #[test]
    fn test_response_footer() {
        let text = response(&json!({ "gc": "G1X10" }), 0, 24);
        assert!(text.starts_with("{\"r\":{\"gc\":\"G1X10\"},\"f\":[1,0,24,"));
        let parsed: Value = serde_json::from_str(&text).unwrap();
        let footer = parsed["f"].as_array().unwrap();
        assert_eq!(footer.len(), 4);
        let head = &text[..text.rfind(',').unwrap()];
        assert_eq!(footer[3].as_u64().unwrap() as u32, checksum(head));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(&Ok(Flow::Ok)), 0);
        assert_eq!(status_code(&Ok(Flow::Noop)), 3);
        assert_eq!(status_code(&Err(StatusCode::BufferFull)), StatusCode::BufferFull.code());
    }

    #[test]
    fn test_status_report_fields() {
        let config = Config::default();
        let runtime = Runtime::new(&config);
        let status = MachineStatus::default();
        let sr = StatusReport::capture(&runtime, &status);
        let value: Value = serde_json::from_str(&sr.to_json()).unwrap();
        let body = &value["sr"];
        for key in ["line", "posx", "posy", "posz", "posa", "posb", "posc", "vel", "stat", "unit", "coor", "momo", "hold"] {
            assert!(body.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(body["unit"], 1);
        assert_eq!(body["momo"], 4);
    }
}
