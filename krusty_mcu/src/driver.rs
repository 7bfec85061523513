// krusty_mcu/src/driver.rs - the pin-level seam between the pipeline and hardware

/// Output side of the step pipeline. Calls arrive from interrupt context, so
/// implementations must not block.
pub trait StepDriver {
    /// Set a motor's direction pin. Only called between segments.
    fn set_direction(&mut self, motor: usize, reverse: bool);
    /// Raise a motor's STEP line.
    fn step(&mut self, motor: usize);
    /// Pulse-release timer: drop every raised STEP line.
    fn release(&mut self) {}
    fn enable(&mut self, motor: usize, energized: bool);
}

/// Driver that discards every output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

impl StepDriver for NullDriver {
    fn set_direction(&mut self, _motor: usize, _reverse: bool) {}
    fn step(&mut self, _motor: usize) {}
    fn enable(&mut self, _motor: usize, _energized: bool) {}
}
