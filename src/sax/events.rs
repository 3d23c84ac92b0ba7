//! SAX Event Types
//!
//! Data handed to `Handler` callbacks. Everything is borrowed by the
//! callback for the duration of the call; `OwnedEvent` is the recorded form.

pub use crate::core::dtd::EntityDecl;

/// Element or attribute name after namespace processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    /// Reported name: `uri + separator + local` when namespace processing
    /// is on and the name is bound to a namespace, otherwise the name as
    /// written (the local part for unbound names under namespace processing)
    pub name: String,
    /// Name exactly as written, including any prefix
    pub qualified: String,
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl Name {
    /// A name with no namespace processing applied
    pub fn plain(qualified: &str) -> Self {
        let (prefix, local) = crate::core::attributes::split_name(qualified);
        Name {
            name: qualified.to_string(),
            qualified: qualified.to_string(),
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            namespace: None,
        }
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A resolved attribute: references expanded, value normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: Name,
    pub value: String,
}

/// Start of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: Name,
    /// Attributes in document order; namespace declarations are not included
    pub attributes: Vec<Attribute>,
    /// Written as `<name/>`
    pub empty: bool,
}

impl StartElement {
    /// Value of the attribute whose reported or written name is `name`
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.name == name || a.name.qualified == name)
            .map(|a| a.value.as_str())
    }
}

/// End of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndElement {
    pub name: Name,
}

/// XML declaration, or text declaration of an external entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDecl {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// DOCTYPE declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctype {
    pub name: String,
    pub system_id: Option<String>,
    pub public_id: Option<String>,
    pub has_internal_subset: bool,
}

/// Processing instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingInstruction {
    pub target: String,
    pub data: String,
}

/// Reference to an external entity, handed to `Handler::external_entity_ref`.
///
/// All fields are `None` for the foreign DTD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalEntity<'a> {
    pub name: Option<&'a str>,
    pub base: Option<&'a str>,
    pub system_id: Option<&'a str>,
    pub public_id: Option<&'a str>,
}

/// A single dispatched event
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    XmlDecl(&'a XmlDecl),
    StartDoctype(&'a Doctype),
    EndDoctype,
    EntityDecl(&'a EntityDecl),
    StartNamespaceDecl {
        prefix: Option<&'a str>,
        uri: Option<&'a str>,
    },
    EndNamespaceDecl {
        prefix: Option<&'a str>,
    },
    StartElement(&'a StartElement),
    EndElement(&'a EndElement),
    Characters(&'a str),
    StartCData,
    EndCData,
    Comment(&'a str),
    ProcessingInstruction(&'a ProcessingInstruction),
}

/// Event kinds, one per callback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    XmlDecl,
    StartDoctype,
    EndDoctype,
    EntityDecl,
    StartNamespaceDecl,
    EndNamespaceDecl,
    StartElement,
    EndElement,
    Characters,
    StartCData,
    EndCData,
    Comment,
    ProcessingInstruction,
    ExternalEntityRef,
}

/// Owned copy of an event, as recorded by `EventCollector`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedEvent {
    XmlDecl(XmlDecl),
    StartDoctype(Doctype),
    EndDoctype,
    EntityDecl(EntityDecl),
    StartNamespaceDecl {
        prefix: Option<String>,
        uri: Option<String>,
    },
    EndNamespaceDecl {
        prefix: Option<String>,
    },
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    EndElement {
        name: String,
    },
    Characters(String),
    StartCData,
    EndCData,
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl OwnedEvent {
    #[inline]
    pub fn is_start_element(&self) -> bool {
        matches!(self, OwnedEvent::StartElement { .. })
    }

    #[inline]
    pub fn is_end_element(&self) -> bool {
        matches!(self, OwnedEvent::EndElement { .. })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            OwnedEvent::XmlDecl(_) => EventKind::XmlDecl,
            OwnedEvent::StartDoctype(_) => EventKind::StartDoctype,
            OwnedEvent::EndDoctype => EventKind::EndDoctype,
            OwnedEvent::EntityDecl(_) => EventKind::EntityDecl,
            OwnedEvent::StartNamespaceDecl { .. } => EventKind::StartNamespaceDecl,
            OwnedEvent::EndNamespaceDecl { .. } => EventKind::EndNamespaceDecl,
            OwnedEvent::StartElement { .. } => EventKind::StartElement,
            OwnedEvent::EndElement { .. } => EventKind::EndElement,
            OwnedEvent::Characters(_) => EventKind::Characters,
            OwnedEvent::StartCData => EventKind::StartCData,
            OwnedEvent::EndCData => EventKind::EndCData,
            OwnedEvent::Comment(_) => EventKind::Comment,
            OwnedEvent::ProcessingInstruction { .. } => EventKind::ProcessingInstruction,
        }
    }
}

impl<'a> From<Event<'a>> for OwnedEvent {
    fn from(event: Event<'a>) -> Self {
        match event {
            Event::XmlDecl(decl) => OwnedEvent::XmlDecl(decl.clone()),
            Event::StartDoctype(doctype) => OwnedEvent::StartDoctype(doctype.clone()),
            Event::EndDoctype => OwnedEvent::EndDoctype,
            Event::EntityDecl(decl) => OwnedEvent::EntityDecl(decl.clone()),
            Event::StartNamespaceDecl { prefix, uri } => OwnedEvent::StartNamespaceDecl {
                prefix: prefix.map(str::to_string),
                uri: uri.map(str::to_string),
            },
            Event::EndNamespaceDecl { prefix } => OwnedEvent::EndNamespaceDecl {
                prefix: prefix.map(str::to_string),
            },
            Event::StartElement(start) => OwnedEvent::StartElement {
                name: start.name.name.clone(),
                attributes: start
                    .attributes
                    .iter()
                    .map(|a| (a.name.name.clone(), a.value.clone()))
                    .collect(),
            },
            Event::EndElement(end) => OwnedEvent::EndElement {
                name: end.name.name.clone(),
            },
            Event::Characters(text) => OwnedEvent::Characters(text.to_string()),
            Event::StartCData => OwnedEvent::StartCData,
            Event::EndCData => OwnedEvent::EndCData,
            Event::Comment(text) => OwnedEvent::Comment(text.to_string()),
            Event::ProcessingInstruction(pi) => OwnedEvent::ProcessingInstruction {
                target: pi.target.clone(),
                data: pi.data.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        let name = Name::plain("svg:rect");
        assert_eq!(name.prefix.as_deref(), Some("svg"));
        assert_eq!(name.local, "rect");
        assert_eq!(name.name, "svg:rect");
        assert_eq!(name.namespace, None);
    }

    #[test]
    fn test_attribute_lookup() {
        let start = StartElement {
            name: Name::plain("a"),
            attributes: vec![Attribute {
                name: Name {
                    name: "urn:x|id".to_string(),
                    qualified: "x:id".to_string(),
                    prefix: Some("x".to_string()),
                    local: "id".to_string(),
                    namespace: Some("urn:x".to_string()),
                },
                value: "7".to_string(),
            }],
            empty: true,
        };
        assert_eq!(start.attribute("x:id"), Some("7"));
        assert_eq!(start.attribute("urn:x|id"), Some("7"));
        assert_eq!(start.attribute("id"), None);
    }

    #[test]
    fn test_owned_from_event() {
        let owned = OwnedEvent::from(Event::Characters("hi"));
        assert_eq!(owned, OwnedEvent::Characters("hi".to_string()));
        assert_eq!(owned.kind(), EventKind::Characters);
        assert!(!owned.is_start_element());
    }
}
