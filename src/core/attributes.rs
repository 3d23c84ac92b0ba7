//! XML Attribute Values
//!
//! The tokenizer delivers attribute values as a list of parts so that
//! references can be resolved later against the DOCTYPE's declarations.

use memchr::{memchr, memchr2};

use super::entities::char_from_reference;
use super::unicode::is_name;

/// One piece of an attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePart {
    /// Literal text, whitespace already normalized to spaces
    Text(String),
    /// `&#...;`, already validated
    CharRef(char),
    /// `&name;`
    EntityRef(String),
}

/// An attribute as written in a start tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Attribute name (may include namespace prefix)
    pub name: String,
    pub value: Vec<ValuePart>,
}

impl RawAttribute {
    /// The value when it contains no references
    pub fn literal(&self) -> Option<&str> {
        match self.value.as_slice() {
            [] => Some(""),
            [ValuePart::Text(text)] => Some(text),
            _ => None,
        }
    }
}

/// Split a name into prefix and local name at the colon
pub fn split_name(name: &str) -> (Option<&str>, &str) {
    if let Some(colon_pos) = memchr(b':', name.as_bytes()) {
        (Some(&name[..colon_pos]), &name[colon_pos + 1..])
    } else {
        (None, name)
    }
}

/// Whether a name is a valid qualified name under namespace processing:
/// at most one colon, with non-empty parts on both sides
pub fn is_qname(name: &str) -> bool {
    match split_name(name) {
        (Some(prefix), local) => !prefix.is_empty() && !local.is_empty() && !local.contains(':'),
        (None, local) => !local.is_empty(),
    }
}

/// Attribute-value normalization of a single character
#[inline]
pub fn normalize_value_char(c: char) -> char {
    match c {
        '\t' | '\n' | '\r' => ' ',
        other => other,
    }
}

/// Split entity replacement text used inside an attribute value into parts
pub fn parse_value_text(text: &str) -> Result<Vec<ValuePart>, &'static str> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(at) = memchr2(b'&', b'<', rest.as_bytes()) {
        literal.extend(rest[..at].chars().map(normalize_value_char));
        if rest.as_bytes()[at] == b'<' {
            return Err("'<' not allowed in attribute value");
        }
        rest = &rest[at..];
        let semi = memchr(b';', rest.as_bytes()).ok_or("unterminated reference in attribute value")?;
        let body = &rest[1..semi];
        let part = if let Some(digits) = body.strip_prefix('#') {
            let c = match digits.strip_prefix('x') {
                Some(hex) => char_from_reference(hex, true),
                None => char_from_reference(digits, false),
            }
            .ok_or("invalid character reference")?;
            ValuePart::CharRef(c)
        } else if is_name(body) {
            ValuePart::EntityRef(body.to_string())
        } else {
            return Err("invalid entity reference");
        };
        if !literal.is_empty() {
            parts.push(ValuePart::Text(std::mem::take(&mut literal)));
        }
        parts.push(part);
        rest = &rest[semi + 1..];
    }

    literal.extend(rest.chars().map(normalize_value_char));
    if !literal.is_empty() {
        parts.push(ValuePart::Text(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("xlink:href"), (Some("xlink"), "href"));
        assert_eq!(split_name("id"), (None, "id"));
    }

    #[test]
    fn test_is_qname() {
        assert!(is_qname("a:b"));
        assert!(is_qname("b"));
        assert!(!is_qname("a:b:c"));
        assert!(!is_qname(":b"));
        assert!(!is_qname("a:"));
    }

    #[test]
    fn test_literal() {
        let attr = RawAttribute {
            name: "id".to_string(),
            value: vec![ValuePart::Text("x".to_string())],
        };
        assert_eq!(attr.literal(), Some("x"));
        let attr = RawAttribute {
            name: "id".to_string(),
            value: vec![ValuePart::CharRef('A')],
        };
        assert_eq!(attr.literal(), None);
    }

    #[test]
    fn test_parse_value_text() {
        let parts = parse_value_text("a\tb&amp;&#67;&e;").unwrap();
        assert_eq!(
            parts,
            vec![
                ValuePart::Text("a b".to_string()),
                ValuePart::EntityRef("amp".to_string()),
                ValuePart::CharRef('C'),
                ValuePart::EntityRef("e".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_value_text_rejects_markup() {
        assert!(parse_value_text("a<b").is_err());
        assert!(parse_value_text("a&b").is_err());
    }
}
