// src/canonical/offsets.rs - coordinate system and origin offsets
use krusty_shared::gcode::CoordSystem;
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::COORDS;

/// `coord[0]` is the machine system and stays zero.
#[derive(Debug, Clone, Default)]
pub struct Offsets {
    coord: [AxisVector; COORDS],
    origin: AxisVector,
    origin_enabled: bool,
}

impl Offsets {
    pub fn coord(&self, coord: CoordSystem) -> &AxisVector {
        &self.coord[coord.index()]
    }

    pub fn set_coord(&mut self, coord: CoordSystem, axis: usize, value: f64) {
        if coord != CoordSystem::MACHINE {
            self.coord[coord.index()][axis] = value;
        }
    }

    pub fn origin(&self) -> &AxisVector {
        &self.origin
    }

    pub fn origin_enabled(&self) -> bool {
        self.origin_enabled
    }

    /// G92: set one axis and enable the origin offsets.
    pub fn set_origin(&mut self, axis: usize, value: f64) {
        self.origin[axis] = value;
        self.origin_enabled = true;
    }

    /// G92.1
    pub fn reset_origin(&mut self) {
        self.origin = vector::zero();
        self.origin_enabled = false;
    }

    /// G92.2
    pub fn suspend_origin(&mut self) {
        self.origin_enabled = false;
    }

    /// G92.3
    pub fn resume_origin(&mut self) {
        self.origin_enabled = true;
    }

    pub fn active_axis(&self, coord: CoordSystem, absolute_override: bool, axis: usize) -> f64 {
        if absolute_override {
            return 0.0;
        }
        let origin = if self.origin_enabled { self.origin[axis] } else { 0.0 };
        self.coord[coord.index()][axis] + origin
    }

    pub fn active(&self, coord: CoordSystem, absolute_override: bool) -> AxisVector {
        std::array::from_fn(|axis| self.active_axis(coord, absolute_override, axis))
    }
}
