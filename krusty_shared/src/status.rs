// krusty_shared/src/status.rs - caller-visible status codes

use thiserror::Error;

/// Outcome of a controller handler that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ok,
    /// Nothing to do this pass.
    Noop,
    /// Blocked; the rest of the dispatcher cycle is skipped.
    Eagain,
}

pub type StatResult = Result<Flow, StatusCode>;

/// Error statuses reported back to the sender of a command, each with a
/// stable numeric code for the JSON footer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    #[error("Internal error")]
    InternalError,
    #[error("Unrecognized command")]
    UnrecognizedCommand,
    #[error("Bad number format")]
    MalformedNumber,
    #[error("Input value out of range")]
    ValueOutOfRange,
    #[error("Command not accepted in current state")]
    CommandNotAccepted,
    #[error("Machine is alarmed - use $clear to reset")]
    MachineAlarmed,
    #[error("Machine is locked after panic - reset required")]
    MachineLocked,
    #[error("Planner buffer full")]
    BufferFull,
    #[error("Move is shorter than the minimum length")]
    MinimumLengthMove,
    #[error("Zero length move")]
    ZeroLengthMove,
    #[error("Soft limit exceeded")]
    SoftLimitExceeded,
    #[error("Feed rate not specified")]
    GcodeFeedrateError,
    #[error("Axis word missing")]
    GcodeAxisWordMissing,
    #[error("Modal group violation")]
    GcodeModalGroupViolation,
    #[error("Arc specification error")]
    ArcSpecificationError,
    #[error("Arc radius differs from start to end beyond tolerance")]
    ArcRadiusOutOfTolerance,
    #[error("Planner assertion failure")]
    PlannerAssertionFailure,
    #[error("Runtime assertion failure")]
    RuntimeAssertionFailure,
}

impl StatusCode {
    pub const OK: u8 = 0;
    pub const EAGAIN: u8 = 2;
    pub const NOOP: u8 = 3;

    pub fn code(self) -> u8 {
        match self {
            StatusCode::InternalError => 8,
            StatusCode::UnrecognizedCommand => 40,
            StatusCode::MalformedNumber => 44,
            StatusCode::ValueOutOfRange => 47,
            StatusCode::CommandNotAccepted => 48,
            StatusCode::MachineAlarmed => 60,
            StatusCode::MachineLocked => 61,
            StatusCode::BufferFull => 62,
            StatusCode::MinimumLengthMove => 63,
            StatusCode::ZeroLengthMove => 64,
            StatusCode::SoftLimitExceeded => 65,
            StatusCode::GcodeFeedrateError => 70,
            StatusCode::GcodeAxisWordMissing => 71,
            StatusCode::GcodeModalGroupViolation => 72,
            StatusCode::ArcSpecificationError => 73,
            StatusCode::ArcRadiusOutOfTolerance => 74,
            StatusCode::PlannerAssertionFailure => 100,
            StatusCode::RuntimeAssertionFailure => 101,
        }
    }

    /// Errors that require a reset rather than `$clear`.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            StatusCode::InternalError
                | StatusCode::PlannerAssertionFailure
                | StatusCode::RuntimeAssertionFailure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_from_flow_codes() {
        for code in [
            StatusCode::BufferFull,
            StatusCode::SoftLimitExceeded,
            StatusCode::GcodeFeedrateError,
        ] {
            assert_ne!(code.code(), StatusCode::OK);
            assert_ne!(code.code(), StatusCode::EAGAIN);
            assert_ne!(code.code(), StatusCode::NOOP);
        }
        assert_eq!(StatusCode::GcodeFeedrateError.to_string(), "Feed rate not specified");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(StatusCode::PlannerAssertionFailure.is_fatal());
        assert!(!StatusCode::SoftLimitExceeded.is_fatal());
    }
}
