//! Parse errors
//!
//! A session records at most one error; it is terminal and is handed back
//! unchanged on every later feed.

use std::fmt;

use crate::parser::location::ParseLocation;

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown or inconsistent encoding, malformed byte sequence
    Encoding,
    /// Invalid token shape: bad name, bad character, unterminated construct
    Syntax,
    /// Well-formed tokens in an illegal arrangement: mismatched or unclosed
    /// tags, duplicate attributes, misplaced DOCTYPE, namespace violations
    Structural,
    /// Undefined, recursive or illegal entity reference
    Entity,
    /// The session already consumed its final chunk
    Finished,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Encoding => "encoding",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Structural => "structural",
            ErrorKind::Entity => "entity",
            ErrorKind::Finished => "finished",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse error with its kind, message and location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: ParseLocation,
}

impl ParseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: ParseLocation) -> Self {
        ParseError {
            kind,
            message: message.into(),
            location,
        }
    }

    pub fn encoding(message: impl Into<String>, location: ParseLocation) -> Self {
        Self::new(ErrorKind::Encoding, message, location)
    }

    pub fn syntax(message: impl Into<String>, location: ParseLocation) -> Self {
        Self::new(ErrorKind::Syntax, message, location)
    }

    pub fn structural(message: impl Into<String>, location: ParseLocation) -> Self {
        Self::new(ErrorKind::Structural, message, location)
    }

    pub fn entity(message: impl Into<String>, location: ParseLocation) -> Self {
        Self::new(ErrorKind::Entity, message, location)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn location(&self) -> ParseLocation {
        self.location
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error: {} at {}",
            self.kind, self.message, self.location
        )
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let location = ParseLocation {
            line: 3,
            column: 7,
            byte_offset: 42,
            byte_count: 0,
        };
        let err = ParseError::structural("mismatched tag", location);
        assert_eq!(
            err.to_string(),
            "structural error: mismatched tag at line 3, column 7 (byte 42)"
        );
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}
