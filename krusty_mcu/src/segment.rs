// krusty_mcu/src/segment.rs - segment records and the EXEC -> LOAD hand-off slot

use krusty_shared::MOTORS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentKind {
    /// Nothing to step; LOAD just hands the slot back to EXEC.
    #[default]
    Null,
    Line,
    /// Zero steps over a non-zero tick count.
    Dwell,
}

/// One constant-time slice of motion, already in step units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Signed step count per motor.
    pub steps: [i64; MOTORS],
    pub ticks: u64,
}

impl Segment {
    pub fn major_axis_steps(&self) -> u64 {
        self.steps.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Exec,
    Loader,
}

/// Single-element hand-off between the EXEC and LOAD stages. The owner flag is
/// the ready flag: EXEC writes only while it owns the slot, LOAD reads only
/// while it does, and each side flips ownership when done.
#[derive(Debug, Clone)]
pub struct PrepBuffer {
    owner: Owner,
    segment: Segment,
}

impl PrepBuffer {
    pub fn new() -> Self {
        Self {
            owner: Owner::Exec,
            segment: Segment::default(),
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn is_free(&self) -> bool {
        self.owner == Owner::Exec
    }

    pub fn is_ready(&self) -> bool {
        self.owner == Owner::Loader
    }

    /// EXEC side. Returns false if LOAD still owns the slot.
    pub fn publish(&mut self, segment: Segment) -> bool {
        if self.owner != Owner::Exec {
            return false;
        }
        self.segment = segment;
        self.owner = Owner::Loader;
        true
    }

    /// LOAD side.
    pub fn take(&mut self) -> Option<Segment> {
        if self.owner != Owner::Loader {
            return None;
        }
        self.owner = Owner::Exec;
        Some(self.segment)
    }

    pub fn clear(&mut self) {
        self.owner = Owner::Exec;
        self.segment = Segment::default();
    }
}

impl Default for PrepBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_alternates_ownership() {
        let mut prep = PrepBuffer::new();
        assert!(prep.take().is_none());
        let seg = Segment {
            kind: SegmentKind::Line,
            steps: [3, -7, 0, 0, 0, 0],
            ticks: 250,
        };
        assert!(prep.publish(seg));
        assert!(!prep.publish(Segment::default()));
        assert_eq!(prep.take(), Some(seg));
        assert!(prep.is_free());
        assert_eq!(seg.major_axis_steps(), 7);
    }
}
