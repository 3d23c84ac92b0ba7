//! Cursor tracking
//!
//! `Position` is the running cursor owned by the tokenizer. `ParseLocation`
//! is the immutable snapshot handed out with events and errors, and
//! `Locator` is the shared, always-current view handlers can hold on to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of where an event or error happened.
///
/// `line` and `column` are 1-based; `byte_offset` and `byte_count` are
/// 0-based raw input bytes counted from the start of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParseLocation {
    pub line: u64,
    pub column: u64,
    pub byte_offset: u64,
    pub byte_count: u64,
}

impl ParseLocation {
    /// Location of the very first byte of a document
    pub const START: ParseLocation = ParseLocation {
        line: 1,
        column: 1,
        byte_offset: 0,
        byte_count: 0,
    };
}

impl Default for ParseLocation {
    fn default() -> Self {
        Self::START
    }
}

impl std::fmt::Display for ParseLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}, column {} (byte {})",
            self.line, self.column, self.byte_offset
        )
    }
}

/// Running cursor over the decoded character stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u64,
    pub column: u64,
    pub byte_offset: u64,
    /// Last character was `\r`, so a following `\n` does not start a new line
    after_cr: bool,
}

impl Position {
    /// Cursor at line 1, column 1, after `byte_offset` raw bytes (e.g. a BOM)
    pub fn start(byte_offset: u64) -> Self {
        Position {
            line: 1,
            column: 1,
            byte_offset,
            after_cr: false,
        }
    }

    /// Step over one raw character occupying `width` input bytes
    #[inline]
    pub fn advance(&mut self, c: char, width: usize) {
        self.byte_offset += width as u64;
        match c {
            '\r' => {
                self.line += 1;
                self.column = 1;
                self.after_cr = true;
            }
            '\n' => {
                if !self.after_cr {
                    self.line += 1;
                    self.column = 1;
                }
                self.after_cr = false;
            }
            _ => {
                self.column += 1;
                self.after_cr = false;
            }
        }
    }

    /// Snapshot of this cursor spanning `byte_count` bytes
    pub fn location(&self, byte_count: u64) -> ParseLocation {
        ParseLocation {
            line: self.line,
            column: self.column,
            byte_offset: self.byte_offset,
            byte_count,
        }
    }

    /// Snapshot covering everything from `self` up to `end`
    pub fn span_to(&self, end: &Position) -> ParseLocation {
        self.location(end.byte_offset.saturating_sub(self.byte_offset))
    }
}

#[derive(Debug)]
struct LocatorInner {
    line: AtomicU64,
    column: AtomicU64,
    byte_offset: AtomicU64,
    byte_count: AtomicU64,
}

/// Shared view of the current parse location.
///
/// The session updates it right before every callback, so a handler that
/// keeps a clone (see `Handler::set_locator`) always reads the location of
/// the event being delivered.
#[derive(Debug, Clone)]
pub struct Locator(Arc<LocatorInner>);

impl Locator {
    pub fn new() -> Self {
        Locator(Arc::new(LocatorInner {
            line: AtomicU64::new(1),
            column: AtomicU64::new(1),
            byte_offset: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }))
    }

    pub fn line(&self) -> u64 {
        self.0.line.load(Ordering::Acquire)
    }

    pub fn column(&self) -> u64 {
        self.0.column.load(Ordering::Acquire)
    }

    pub fn byte_offset(&self) -> u64 {
        self.0.byte_offset.load(Ordering::Acquire)
    }

    pub fn byte_count(&self) -> u64 {
        self.0.byte_count.load(Ordering::Acquire)
    }

    pub fn location(&self) -> ParseLocation {
        ParseLocation {
            line: self.line(),
            column: self.column(),
            byte_offset: self.byte_offset(),
            byte_count: self.byte_count(),
        }
    }

    pub(crate) fn set(&self, location: ParseLocation) {
        self.0.line.store(location.line, Ordering::Release);
        self.0.column.store(location.column, Ordering::Release);
        self.0.byte_offset.store(location.byte_offset, Ordering::Release);
        self.0.byte_count.store(location.byte_count, Ordering::Release);
    }
}

impl Default for Locator {
    fn default() -> Self {
        Self::new()
    }
}
