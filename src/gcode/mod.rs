// src/gcode/mod.rs
//! G-code front end: word tokenizer, block parser and the interpreter that
//! drives the canonical machine.

pub mod block;
pub mod interpreter;
pub mod parser;

pub use block::GCodeBlock;
pub use interpreter::execute_block;
pub use parser::{is_block_deleted, GCodeCommand, GCodeError, GCodeParser, GCodeSpan};
