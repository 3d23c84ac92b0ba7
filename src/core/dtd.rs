//! DTD Entity Declarations
//!
//! Reads `<!ENTITY>` declarations out of a DOCTYPE internal subset or an
//! external DTD. Element, attribute-list and notation declarations are
//! skipped over; only entities matter for expansion.

use std::collections::HashMap;

use super::entities::expand_char_refs;
use super::scanner::Scanner;
use super::unicode::{is_name, is_pubid_char};

/// An `<!ENTITY>` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    pub name: String,
    /// Replacement text for internal entities (character references expanded)
    pub value: Option<String>,
    pub system_id: Option<String>,
    pub public_id: Option<String>,
    /// Notation name of an unparsed entity (`NDATA`)
    pub notation: Option<String>,
    pub is_parameter: bool,
}

impl EntityDecl {
    /// Internal general entity with the given replacement text
    pub fn internal(name: impl Into<String>, value: impl Into<String>) -> Self {
        EntityDecl {
            name: name.into(),
            value: Some(value.into()),
            system_id: None,
            public_id: None,
            notation: None,
            is_parameter: false,
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.value.is_none()
    }

    #[inline]
    pub fn is_unparsed(&self) -> bool {
        self.notation.is_some()
    }
}

/// Declared entities, first declaration wins
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    general: HashMap<String, EntityDecl>,
    parameter: HashMap<String, EntityDecl>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declaration; returns false when the name was already declared
    pub fn declare(&mut self, decl: EntityDecl) -> bool {
        let map = if decl.is_parameter {
            &mut self.parameter
        } else {
            &mut self.general
        };
        if map.contains_key(&decl.name) {
            return false;
        }
        map.insert(decl.name.clone(), decl);
        true
    }

    /// General entity by name
    pub fn get(&self, name: &str) -> Option<&EntityDecl> {
        self.general.get(name)
    }

    pub fn len(&self) -> usize {
        self.general.len() + self.parameter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parameter_values(&self) -> HashMap<String, String> {
        self.parameter
            .iter()
            .filter_map(|(name, decl)| decl.value.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}

/// Read entity declarations from DTD text.
///
/// `external` selects external-subset rules: parameter entity references
/// are allowed inside entity values (substituted from `known` and earlier
/// declarations) and conditional sections are tolerated.
pub fn parse_declarations(
    text: &str,
    external: bool,
    known: &EntityTable,
) -> Result<Vec<EntityDecl>, &'static str> {
    let mut reader = DtdReader {
        scanner: Scanner::new(text),
        external,
        parameters: known.parameter_values(),
    };
    let mut decls = Vec::new();

    loop {
        reader.scanner.skip_whitespace();
        if reader.scanner.is_eof() {
            break;
        }
        let scanner = &mut reader.scanner;
        if scanner.eat("<!--") {
            if !scanner.skip_past("-->") {
                return Err("unterminated comment in DTD");
            }
        } else if scanner.eat("<?") {
            if !scanner.skip_past("?>") {
                return Err("unterminated processing instruction in DTD");
            }
        } else if scanner.eat("<!ENTITY") {
            let decl = reader.entity_decl()?;
            if let (true, Some(value)) = (decl.is_parameter, decl.value.as_ref()) {
                reader
                    .parameters
                    .entry(decl.name.clone())
                    .or_insert_with(|| value.clone());
            }
            decls.push(decl);
        } else if scanner.eat("<![") {
            if !external {
                return Err("conditional section in internal subset");
            }
            if !scanner.skip_past("]]>") {
                return Err("unterminated conditional section");
            }
        } else if scanner.starts_with("<!ELEMENT")
            || scanner.starts_with("<!ATTLIST")
            || scanner.starts_with("<!NOTATION")
        {
            reader.skip_markup_decl()?;
        } else if scanner.eat("%") {
            let named = scanner.read_name().is_some();
            if !named || !scanner.eat(";") {
                return Err("invalid parameter entity reference");
            }
        } else {
            return Err("syntax error in DTD");
        }
    }

    Ok(decls)
}

struct DtdReader<'a> {
    scanner: Scanner<'a>,
    external: bool,
    parameters: HashMap<String, String>,
}

impl<'a> DtdReader<'a> {
    /// Body of `<!ENTITY ...>` after the keyword
    fn entity_decl(&mut self) -> Result<EntityDecl, &'static str> {
        if !self.scanner.skip_whitespace() {
            return Err("whitespace required after ENTITY");
        }
        let is_parameter = self.scanner.eat("%");
        if is_parameter && !self.scanner.skip_whitespace() {
            return Err("whitespace required after '%'");
        }
        let name = self.scanner.read_name().ok_or("invalid entity name")?.to_string();
        if !self.scanner.skip_whitespace() {
            return Err("whitespace required after entity name");
        }

        let mut decl = EntityDecl {
            name,
            value: None,
            system_id: None,
            public_id: None,
            notation: None,
            is_parameter,
        };

        if matches!(self.scanner.peek(), Some('"' | '\'')) {
            let literal = self.scanner.read_quoted().ok_or("unterminated entity value")?;
            decl.value = Some(self.entity_value(literal)?);
        } else {
            let (public_id, system_id) = self.external_id()?;
            decl.public_id = public_id;
            decl.system_id = Some(system_id);
            let had_space = self.scanner.skip_whitespace();
            if self.scanner.eat("NDATA") {
                if is_parameter {
                    return Err("NDATA not allowed on parameter entities");
                }
                if !had_space || !self.scanner.skip_whitespace() {
                    return Err("whitespace required around NDATA");
                }
                let notation = self.scanner.read_name().ok_or("invalid notation name")?;
                decl.notation = Some(notation.to_string());
            }
        }

        self.scanner.skip_whitespace();
        if !self.scanner.eat(">") {
            return Err("'>' expected at end of entity declaration");
        }
        Ok(decl)
    }

    /// `SYSTEM "sys"` or `PUBLIC "pub" "sys"`
    fn external_id(&mut self) -> Result<(Option<String>, String), &'static str> {
        if self.scanner.eat("SYSTEM") {
            if !self.scanner.skip_whitespace() {
                return Err("whitespace required after SYSTEM");
            }
            let system = self.scanner.read_quoted().ok_or("system literal expected")?;
            Ok((None, system.to_string()))
        } else if self.scanner.eat("PUBLIC") {
            if !self.scanner.skip_whitespace() {
                return Err("whitespace required after PUBLIC");
            }
            let public = self.scanner.read_quoted().ok_or("public identifier expected")?;
            if !public.chars().all(is_pubid_char) {
                return Err("invalid character in public identifier");
            }
            if !self.scanner.skip_whitespace() {
                return Err("whitespace required after public identifier");
            }
            let system = self.scanner.read_quoted().ok_or("system literal expected")?;
            Ok((Some(public.to_string()), system.to_string()))
        } else {
            Err("entity value or external identifier expected")
        }
    }

    /// Replacement text of an entity literal
    fn entity_value(&self, literal: &str) -> Result<String, &'static str> {
        let substituted = if literal.contains('%') {
            if !self.external {
                return Err("parameter entity reference in internal subset");
            }
            self.substitute_parameters(literal)?
        } else {
            literal.to_string()
        };
        Ok(expand_char_refs(&substituted)?.into_owned())
    }

    fn substitute_parameters(&self, literal: &str) -> Result<String, &'static str> {
        let mut out = String::with_capacity(literal.len());
        let mut rest = literal;
        while let Some(at) = rest.find('%') {
            out.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            let semi = after.find(';').ok_or("unterminated parameter entity reference")?;
            let name = &after[..semi];
            if !is_name(name) {
                return Err("invalid parameter entity reference");
            }
            let value = self.parameters.get(name).ok_or("undefined parameter entity")?;
            out.push_str(value);
            rest = &after[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Skip an element, attribute-list or notation declaration
    fn skip_markup_decl(&mut self) -> Result<(), &'static str> {
        let mut quote: Option<char> = None;
        while let Some(c) = self.scanner.bump() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(c),
                (None, '>') => return Ok(()),
                (None, _) => {}
            }
        }
        Err("unterminated markup declaration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_entities() {
        let decls = parse_declarations(
            r#"<!ENTITY e "x&#60;y&f;"> <!ENTITY f 'z'>"#,
            false,
            &EntityTable::new(),
        )
        .unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].value.as_deref(), Some("x<y&f;"));
        assert_eq!(decls[1], EntityDecl::internal("f", "z"));
    }

    #[test]
    fn test_external_and_unparsed() {
        let decls = parse_declarations(
            r#"<!ENTITY ext SYSTEM "ext.xml">
               <!ENTITY pub PUBLIC "-//Example//EN" "pub.xml">
               <!ENTITY pic SYSTEM "pic.png" NDATA png>"#,
            false,
            &EntityTable::new(),
        )
        .unwrap();
        assert!(decls[0].is_external());
        assert_eq!(decls[0].system_id.as_deref(), Some("ext.xml"));
        assert_eq!(decls[1].public_id.as_deref(), Some("-//Example//EN"));
        assert!(decls[2].is_unparsed());
        assert_eq!(decls[2].notation.as_deref(), Some("png"));
    }

    #[test]
    fn test_skips_other_declarations() {
        let decls = parse_declarations(
            r#"<!-- c --> <?pi x?> <!ELEMENT a (#PCDATA)>
               <!ATTLIST a b CDATA "x>y"> <!NOTATION png SYSTEM "image/png">
               <!ENTITY e "v">"#,
            false,
            &EntityTable::new(),
        )
        .unwrap();
        assert_eq!(decls, vec![EntityDecl::internal("e", "v")]);
    }

    #[test]
    fn test_parameter_entities() {
        let err = parse_declarations(r#"<!ENTITY % p "a"> <!ENTITY e "%p;">"#, false, &EntityTable::new());
        assert_eq!(err, Err("parameter entity reference in internal subset"));

        let decls = parse_declarations(r#"<!ENTITY % p "a"> <!ENTITY e "%p;b">"#, true, &EntityTable::new())
            .unwrap();
        assert!(decls[0].is_parameter);
        assert_eq!(decls[1].value.as_deref(), Some("ab"));
    }

    #[test]
    fn test_first_declaration_wins() {
        let mut table = EntityTable::new();
        assert!(table.declare(EntityDecl::internal("e", "first")));
        assert!(!table.declare(EntityDecl::internal("e", "second")));
        assert_eq!(table.get("e").and_then(|d| d.value.as_deref()), Some("first"));
    }

    #[test]
    fn test_malformed() {
        let known = EntityTable::new();
        assert!(parse_declarations("<!ENTITY e>", false, &known).is_err());
        assert!(parse_declarations("<!ENTITY e 'v'", false, &known).is_err());
        assert!(parse_declarations("junk", false, &known).is_err());
    }
}
