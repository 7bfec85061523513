//! G-code word tokenizer with span tracking.
//!
//! Splits one block into letter/number words and comments. Numbers are
//! parsed here so later stages only see typed values; every error carries
//! the span of the offending text.

use std::ops::Range;

use krusty_shared::StatusCode;
use thiserror::Error;

/// Span in the source block text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCodeSpan {
    pub range: Range<usize>,
}

/// One token of a block
#[derive(Debug, Clone, PartialEq)]
pub enum GCodeCommand<'a> {
    Word { letter: char, value: f64, span: GCodeSpan },
    Comment(&'a str, GCodeSpan),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GCodeError {
    #[error("Unexpected character '{ch}' at {}", span.range.start)]
    UnexpectedCharacter { ch: char, span: GCodeSpan },
    #[error("Bad number '{text}' at {}", span.range.start)]
    MalformedNumber { text: String, span: GCodeSpan },
    #[error("Unclosed comment at {}", span.range.start)]
    UnclosedComment { span: GCodeSpan },
    #[error("Unsupported {letter}{value}")]
    UnsupportedCode { letter: char, value: f64 },
    #[error("{letter}{value} conflicts with another word of its modal group")]
    ModalGroupViolation { letter: char, value: f64 },
    #[error("{letter}{value} out of range")]
    ValueOutOfRange { letter: char, value: f64 },
}

impl GCodeError {
    /// Status reported back to the sender.
    pub fn status(&self) -> StatusCode {
        match self {
            GCodeError::UnexpectedCharacter { .. } | GCodeError::UnsupportedCode { .. } => {
                StatusCode::UnrecognizedCommand
            }
            GCodeError::MalformedNumber { .. } | GCodeError::UnclosedComment { .. } => {
                StatusCode::MalformedNumber
            }
            GCodeError::ModalGroupViolation { .. } => StatusCode::GcodeModalGroupViolation,
            GCodeError::ValueOutOfRange { .. } => StatusCode::ValueOutOfRange,
        }
    }
}

/// Word iterator over one block.
pub struct GCodeParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> GCodeParser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Parse the next word or comment.
    pub fn next_command(&mut self) -> Option<Result<GCodeCommand<'a>, GCodeError>> {
        let bytes = self.src.as_bytes();
        let len = bytes.len();
        while self.pos < len && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= len {
            return None;
        }
        let start = self.pos;
        let c = bytes[self.pos] as char;

        // ; comment runs to end of line
        if c == ';' {
            self.pos = len;
            let span = GCodeSpan { range: start..len };
            return Some(Ok(GCodeCommand::Comment(self.src[start + 1..].trim(), span)));
        }
        if c == '(' {
            let Some(close) = self.src[start..].find(')') else {
                self.pos = len;
                return Some(Err(GCodeError::UnclosedComment { span: GCodeSpan { range: start..len } }));
            };
            let end = start + close;
            self.pos = end + 1;
            let span = GCodeSpan { range: start..self.pos };
            return Some(Ok(GCodeCommand::Comment(self.src[start + 1..end].trim(), span)));
        }
        if c.is_ascii_alphabetic() {
            let letter = c.to_ascii_uppercase();
            self.pos += 1;
            // whitespace between letter and number is tolerated
            while self.pos < len && bytes[self.pos] == b' ' {
                self.pos += 1;
            }
            let value_start = self.pos;
            while self.pos < len
                && (bytes[self.pos].is_ascii_digit() || matches!(bytes[self.pos], b'.' | b'-' | b'+'))
            {
                self.pos += 1;
            }
            let text = &self.src[value_start..self.pos];
            let span = GCodeSpan { range: start..self.pos };
            return Some(match text.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(GCodeCommand::Word { letter, value, span }),
                _ => Err(GCodeError::MalformedNumber { text: text.to_string(), span }),
            });
        }
        // skip the rest of the token so the next call makes progress
        let span = GCodeSpan { range: start..start + c.len_utf8() };
        self.pos += c.len_utf8();
        while self.pos < len && !bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        Some(Err(GCodeError::UnexpectedCharacter { ch: c, span }))
    }
}

impl<'a> Iterator for GCodeParser<'a> {
    type Item = Result<GCodeCommand<'a>, GCodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command()
    }
}

/// A leading `/` deletes the block.
pub fn is_block_deleted(block: &str) -> bool {
    block.trim_start().starts_with('/')
}
