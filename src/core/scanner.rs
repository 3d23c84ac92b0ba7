//! SIMD-accelerated scanning over decoded text using memchr
//!
//! The tokenizer uses it to skip over runs of plain character data, comment
//! bodies and CDATA bodies in one step; the DTD reader uses it as a cursor
//! over the internal subset.

use memchr::{memchr, memchr2, memchr3, memmem};

use super::unicode::{is_name_char, is_name_start_char, is_whitespace};

/// Cursor over decoded XML text
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    #[inline]
    pub fn new(input: &'a str) -> Self {
        Scanner { input, pos: 0 }
    }

    /// Scanner starting at byte offset `pos`
    #[inline]
    pub fn at(input: &'a str, pos: usize) -> Self {
        Scanner { input, pos }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    #[inline]
    pub fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    #[inline]
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.input[start..end]
    }

    /// Peek at the current character without advancing
    #[inline]
    pub fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    /// Consume one character
    #[inline]
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Advance by n bytes; callers keep `pos` on a char boundary
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    #[inline]
    pub fn starts_with(&self, needle: &str) -> bool {
        self.remaining().starts_with(needle)
    }

    /// Consume `needle` if the input continues with it
    #[inline]
    pub fn eat(&mut self, needle: &str) -> bool {
        if self.starts_with(needle) {
            self.pos += needle.len();
            true
        } else {
            false
        }
    }

    /// Move past the next occurrence of `needle`; false if it never occurs
    pub fn skip_past(&mut self, needle: &str) -> bool {
        match self.find_str(needle) {
            Some(at) => {
                self.pos = at + needle.len();
                true
            }
            None => false,
        }
    }

    /// Skip XML whitespace; returns whether anything was skipped
    #[inline]
    pub fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_whitespace(c) {
                break;
            }
            self.pos += 1;
        }
        self.pos > start
    }

    /// Find the next occurrence of a byte
    #[inline]
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        memchr(byte, self.remaining().as_bytes()).map(|i| self.pos + i)
    }

    /// Find the next occurrence of a substring
    #[inline]
    pub fn find_str(&self, needle: &str) -> Option<usize> {
        memmem::find(self.remaining().as_bytes(), needle.as_bytes()).map(|i| self.pos + i)
    }

    /// Length of the run before the first of two ASCII stop bytes (or the end)
    #[inline]
    pub fn run_until2(&self, b1: u8, b2: u8) -> usize {
        let rest = self.remaining().as_bytes();
        memchr2(b1, b2, rest).unwrap_or(rest.len())
    }

    /// Length of the run before the first of three ASCII stop bytes (or the end)
    #[inline]
    pub fn run_until3(&self, b1: u8, b2: u8, b3: u8) -> usize {
        let rest = self.remaining().as_bytes();
        memchr3(b1, b2, b3, rest).unwrap_or(rest.len())
    }

    /// Read an XML name (NameStartChar NameChar*)
    pub fn read_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        let first = self.peek()?;
        if !is_name_start_char(first) {
            return None;
        }
        self.pos += first.len_utf8();
        while let Some(c) = self.peek() {
            if !is_name_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        Some(&self.input[start..self.pos])
    }

    /// Read a quoted literal, returning its body and advancing past the
    /// closing quote
    pub fn read_quoted(&mut self) -> Option<&'a str> {
        let quote = match self.peek()? {
            q @ ('"' | '\'') => q,
            _ => return None,
        };
        let body_start = self.pos + 1;
        let end = memchr(quote as u8, &self.input.as_bytes()[body_start..])? + body_start;
        self.pos = end + 1;
        Some(&self.input[body_start..end])
    }
}
