// src/planner/buffer.rs - planner buffers and the fixed ring they live in

use krusty_shared::gcode::{CoordSystem, GCodeState, SpindleState};
use krusty_shared::vector::AxisVector;
use krusty_shared::{StatusCode, AXES};

use super::arc::ArcGeometry;
use super::zoid::ZoidCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    #[default]
    Empty,
    /// Handed to the producer, not yet committed.
    Loading,
    Queued,
    /// Next to run after the running buffer.
    Pending,
    Running,
}

impl BufferState {
    pub fn is_occupied(self) -> bool {
        !matches!(self, BufferState::Empty | BufferState::Loading)
    }
}

/// Whether the runtime has started a buffer. A held buffer goes back to
/// `New` so the runtime re-reads it on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Off,
    New,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    Null,
    Aline,
    Arc,
    Dwell,
    Command,
    Stop,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coolant {
    Mist,
    Flood,
}

/// Side effects that must happen in order with motion.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    /// Coordinate system selection, G10 or G92 family: the runtime picks up
    /// the resolved work offset.
    SetWorkOffset {
        coord: CoordSystem,
        offset: AxisVector,
    },
    /// G28.3: runtime position of flagged axes is redefined without motion.
    SetAbsolutePosition {
        position: AxisVector,
        flags: [bool; AXES],
    },
    Spindle {
        state: SpindleState,
        speed: f64,
    },
    Coolant {
        coolant: Coolant,
        on: bool,
    },
    /// M9
    CoolantOff,
    ToolChange(u8),
    ProgramStop,
    OptionalStop,
    ProgramEnd,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Null,
    Line,
    Arc(ArcGeometry),
    Dwell {
        seconds: f64,
    },
    Sync(SyncOp),
}

impl Payload {
    pub fn move_type(&self) -> MoveType {
        match self {
            Payload::Null => MoveType::Null,
            Payload::Line => MoveType::Aline,
            Payload::Arc(_) => MoveType::Arc,
            Payload::Dwell { .. } => MoveType::Dwell,
            Payload::Sync(SyncOp::ProgramStop | SyncOp::OptionalStop) => MoveType::Stop,
            Payload::Sync(SyncOp::ProgramEnd) => MoveType::End,
            Payload::Sync(_) => MoveType::Command,
        }
    }

    pub fn is_motion(&self) -> bool {
        matches!(self, Payload::Line | Payload::Arc(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub state: BufferState,
    pub move_state: MoveState,
    pub payload: Payload,
    /// Model state captured when the move was queued.
    pub gm: GCodeState,
    pub replannable: bool,

    /// Path length (mm or degrees).
    pub length: f64,
    /// Direction at the start of the move (equal to the chord for lines).
    pub unit: AxisVector,
    /// Direction at the end of the move, used for the next junction.
    pub exit_unit: AxisVector,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,
    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    pub delta_vmax: f64,
    pub braking_velocity: f64,

    pub jerk: f64,
    pub recip_jerk: f64,
    pub cbrt_jerk: f64,

    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub zoid: ZoidCase,
}

impl Buffer {
    pub fn move_type(&self) -> MoveType {
        self.payload.move_type()
    }

    pub fn set_jerk(&mut self, jerk: f64) {
        self.jerk = jerk;
        self.recip_jerk = 1.0 / jerk;
        self.cbrt_jerk = jerk.cbrt();
    }

    /// Drop the first `travelled` units of the move. Used when a feedhold
    /// stops partway and the remainder must run again from rest.
    pub fn trim_front(&mut self, travelled: f64) {
        let travelled = travelled.clamp(0.0, self.length);
        if let Payload::Arc(arc) = &mut self.payload {
            let fraction = if self.length > 0.0 { travelled / self.length } else { 1.0 };
            arc.advance(fraction, &self.gm.target);
            self.unit = arc.start_tangent(&self.gm.target);
        }
        self.length -= travelled;
    }

    fn reset(&mut self) {
        *self = Buffer::default();
    }
}

/// Fixed ring of planner buffers. `write` hands out buffers to the producer,
/// `queue` marks where the next commit lands, and `run` is the head of the
/// queue owned by the runtime. Only the producer moves `write` and `queue`;
/// only the runtime moves `run`.
#[derive(Debug, Clone)]
pub struct BufferPool {
    buffers: Vec<Buffer>,
    write: usize,
    queue: usize,
    run: usize,
}

impl BufferPool {
    pub fn new(size: usize) -> Self {
        Self {
            buffers: vec![Buffer::default(); size],
            write: 0,
            queue: 0,
            run: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.buffers.len()
    }

    pub fn next(&self, index: usize) -> usize {
        (index + 1) % self.buffers.len()
    }

    pub fn prev(&self, index: usize) -> usize {
        (index + self.buffers.len() - 1) % self.buffers.len()
    }

    pub fn get(&self, index: usize) -> &Buffer {
        &self.buffers[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.buffers[index]
    }

    pub fn available(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.state == BufferState::Empty)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(|b| b.state == BufferState::Empty)
    }

    /// Claim the next free buffer for loading.
    pub fn get_write_buffer(&mut self) -> Option<usize> {
        let index = self.write;
        if self.buffers[index].state != BufferState::Empty {
            return None;
        }
        self.buffers[index].reset();
        self.buffers[index].state = BufferState::Loading;
        self.write = self.next(index);
        Some(index)
    }

    /// Give back a buffer that was claimed but never committed.
    pub fn unget_write_buffer(&mut self) {
        let index = self.prev(self.write);
        if self.buffers[index].state == BufferState::Loading {
            self.buffers[index].reset();
            self.write = index;
        }
    }

    /// Commit the oldest loading buffer to the queue.
    pub fn commit_write_buffer(&mut self) -> usize {
        let index = self.queue;
        let buffer = &mut self.buffers[index];
        buffer.state = BufferState::Queued;
        buffer.move_state = MoveState::New;
        self.queue = self.next(index);
        index
    }

    /// Head of the queue, promoted to running.
    pub fn get_run_buffer(&mut self) -> Option<usize> {
        let buffer = &mut self.buffers[self.run];
        match buffer.state {
            BufferState::Queued | BufferState::Pending => {
                buffer.state = BufferState::Running;
                Some(self.run)
            }
            BufferState::Running => Some(self.run),
            _ => None,
        }
    }

    pub fn run_index(&self) -> Option<usize> {
        self.buffers[self.run].state.is_occupied().then_some(self.run)
    }

    /// Release the running buffer. Returns true when the queue is now empty.
    pub fn free_run_buffer(&mut self) -> bool {
        let index = self.run;
        self.buffers[index].reset();
        self.run = self.next(index);
        let next = &mut self.buffers[self.run];
        if next.state == BufferState::Queued {
            next.state = BufferState::Pending;
        }
        !next.state.is_occupied()
    }

    /// Most recently committed buffer still in the queue.
    pub fn last_buffer(&self) -> Option<usize> {
        let index = self.prev(self.queue);
        self.buffers[index].state.is_occupied().then_some(index)
    }

    /// Occupied buffers from the head of the queue to the newest.
    pub fn queued_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut index = self.run;
        for _ in 0..self.buffers.len() {
            if !self.buffers[index].state.is_occupied() {
                break;
            }
            out.push(index);
            index = self.next(index);
        }
        out
    }

    pub fn flush(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.reset();
        }
        self.write = 0;
        self.queue = 0;
        self.run = 0;
    }

    /// Walk the ring and verify the cursors bracket a contiguous queue.
    pub fn check_integrity(&self) -> Result<(), StatusCode> {
        let size = self.buffers.len();
        let mut index = self.run;
        let mut seen = 0;
        while self.buffers[index].state.is_occupied() && seen < size {
            let state = self.buffers[index].state;
            if seen > 0 && state == BufferState::Running {
                tracing::error!("Planner buffer {} running out of order", index);
                return Err(StatusCode::PlannerAssertionFailure);
            }
            index = self.next(index);
            seen += 1;
        }
        if seen < size && index != self.queue {
            tracing::error!("Planner queue cursor {} does not follow buffer {}", self.queue, index);
            return Err(StatusCode::PlannerAssertionFailure);
        }
        let occupied = self.buffers.iter().filter(|b| b.state.is_occupied()).count();
        if occupied != seen {
            tracing::error!("Planner has {} occupied buffers outside the queue", occupied - seen);
            return Err(StatusCode::PlannerAssertionFailure);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(pool: &mut BufferPool) -> usize {
        let index = pool.get_write_buffer().unwrap();
        pool.get_mut(index).payload = Payload::Line;
        pool.commit_write_buffer()
    }

    #[test]
    fn test_ring_fills_and_drains_in_order() {
        let mut pool = BufferPool::new(28);
        let indices: Vec<usize> = (0..28).map(|_| commit(&mut pool)).collect();
        assert_eq!(indices, (0..28).collect::<Vec<_>>());
        assert!(pool.get_write_buffer().is_none());
        assert_eq!(pool.available(), 0);
        assert!(pool.check_integrity().is_ok());

        assert_eq!(pool.get_run_buffer(), Some(0));
        assert_eq!(pool.get(0).state, BufferState::Running);
        assert!(!pool.free_run_buffer());
        assert_eq!(pool.get(1).state, BufferState::Pending);
        assert_eq!(pool.available(), 1);
        // the freed slot is reused after wrap-around
        assert_eq!(commit(&mut pool), 0);
        assert_eq!(pool.last_buffer(), Some(0));
        assert!(pool.check_integrity().is_ok());
    }

    #[test]
    fn test_free_last_buffer_reports_empty_queue() {
        let mut pool = BufferPool::new(28);
        commit(&mut pool);
        assert_eq!(pool.get_run_buffer(), Some(0));
        assert!(pool.free_run_buffer());
        assert!(pool.is_empty());
        assert!(pool.get_run_buffer().is_none());
    }

    #[test]
    fn test_unget_returns_buffer() {
        let mut pool = BufferPool::new(28);
        pool.get_write_buffer().unwrap();
        pool.unget_write_buffer();
        assert_eq!(pool.available(), 28);
        assert_eq!(pool.get_write_buffer(), Some(0));
    }

    #[test]
    fn test_move_types() {
        assert_eq!(Payload::Line.move_type(), MoveType::Aline);
        assert_eq!(Payload::Sync(SyncOp::ProgramEnd).move_type(), MoveType::End);
        assert_eq!(Payload::Sync(SyncOp::OptionalStop).move_type(), MoveType::Stop);
        assert_eq!(Payload::Sync(SyncOp::CoolantOff).move_type(), MoveType::Command);
        assert_eq!(Payload::Dwell { seconds: 1.0 }.move_type(), MoveType::Dwell);
    }

    #[test]
    fn test_integrity_detects_stray_buffer() {
        let mut pool = BufferPool::new(28);
        commit(&mut pool);
        pool.get_mut(10).state = BufferState::Queued;
        assert_eq!(pool.check_integrity(), Err(StatusCode::PlannerAssertionFailure));
    }
}
