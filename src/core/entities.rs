//! XML Entity Decoding
//!
//! Handles the parts of entity processing that need no declarations:
//! - Built-in entities: &lt; &gt; &amp; &quot; &apos;
//! - Numeric character references: &#123; &#x7B;
//!
//! Uses Cow for zero-copy when no references are present.

use memchr::memchr;
use std::borrow::Cow;

use super::unicode::is_name;

/// Replacement text of a predefined entity
#[inline]
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => None,
    }
}

/// Check if a code point is a valid XML 1.0 Char
/// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
#[inline]
pub fn is_valid_xml_char(codepoint: u32) -> bool {
    matches!(codepoint,
        0x9 | 0xA | 0xD
        | 0x20..=0xD7FF
        | 0xE000..=0xFFFD
        | 0x10000..=0x10FFFF)
}

/// Resolve the digits of a character reference (`65` in `&#65;`, `41` in `&#x41;`)
pub fn char_from_reference(digits: &str, hex: bool) -> Option<char> {
    let well_formed = if hex {
        digits.bytes().all(|b| b.is_ascii_hexdigit())
    } else {
        digits.bytes().all(|b| b.is_ascii_digit())
    };
    if digits.is_empty() || !well_formed {
        return None;
    }
    let radix = if hex { 16 } else { 10 };
    let codepoint = u32::from_str_radix(digits, radix).ok()?;
    if !is_valid_xml_char(codepoint) {
        return None;
    }
    char::from_u32(codepoint)
}

/// Expand character references in a literal, keeping general entity
/// references verbatim.
///
/// This is how entity values are stored: `&#60;` becomes `<` at declaration
/// time while `&name;` is only resolved where the entity is used.
pub fn expand_char_refs(input: &str) -> Result<Cow<'_, str>, &'static str> {
    // Fast path: no references at all
    if memchr(b'&', input.as_bytes()).is_none() {
        return Ok(Cow::Borrowed(input));
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = memchr(b'&', rest.as_bytes()) {
        result.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let semi = memchr(b';', rest.as_bytes()).ok_or("unterminated reference")?;
        let body = &rest[1..semi];
        if let Some(digits) = body.strip_prefix('#') {
            let c = match digits.strip_prefix('x') {
                Some(hex) => char_from_reference(hex, true),
                None => char_from_reference(digits, false),
            }
            .ok_or("invalid character reference")?;
            result.push(c);
        } else if is_name(body) {
            result.push_str(&rest[..=semi]);
        } else {
            return Err("invalid entity reference");
        }
        rest = &rest[semi + 1..];
    }
    result.push_str(rest);
    Ok(Cow::Owned(result))
}
