// krusty_shared/src/axis.rs - axis and motor indexing shared by every layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of coordinated axes (X, Y, Z, A, B, C).
pub const AXES: usize = 6;

/// Number of motor channels driven by the step pipeline.
pub const MOTORS: usize = 6;

/// Number of addressable coordinate systems: machine (G53) plus G54..G59.
pub const COORDS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    A,
    B,
    C,
}

impl Axis {
    pub const ALL: [Axis; AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Axis> {
        Self::ALL.get(index).copied()
    }

    pub fn from_letter(letter: char) -> Option<Axis> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            'B' => Some(Axis::B),
            'C' => Some(Axis::C),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
            Axis::A => 'a',
            Axis::B => 'b',
            Axis::C => 'c',
        }
    }

    /// Rotary axes carry degrees; linear axes carry millimeters.
    pub fn is_rotary(self) -> bool {
        matches!(self, Axis::A | Axis::B | Axis::C)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter().to_ascii_uppercase())
    }
}

/// How an axis participates in motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisMode {
    /// Axis words are ignored.
    Disabled,
    #[default]
    Standard,
    /// Position is tracked but the mapped motors never step.
    Inhibited,
    /// Rotary axis programmed in linear units, converted through `radius`.
    Radius,
}

impl AxisMode {
    pub fn is_enabled(self) -> bool {
        self != AxisMode::Disabled
    }
}
