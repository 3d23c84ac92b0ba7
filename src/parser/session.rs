//! Parser sessions
//!
//! A `Parser` owns one document parse: bytes go in through `feed`, events
//! come out through the handler. An `EntityParser` is the same machinery
//! for an external entity, created for `Handler::external_entity_ref` or
//! from an `EntityContext` snapshot.

use std::sync::Arc;

use super::engine::{Engine, EngineMode};
use super::location::{Locator, ParseLocation};
use super::namespace::Binding;
use crate::config::ParserConfig;
use crate::core::dtd::EntityTable;
use crate::core::encoding::XmlEncoding;
use crate::error::ParseError;
use crate::sax::dispatch::Halt;
use crate::sax::handler::Handler;

/// Outcome of a successful `feed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Chunk consumed, more input expected
    Parsing,
    /// Final chunk consumed, document complete
    Finished,
    /// A handler (or `stop`) ended the parse early
    Stopped,
}

/// Lifecycle of a session. `Stopped`, `Errored` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Running,
    Stopped,
    Errored,
    Exhausted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Errored | SessionState::Exhausted
        )
    }
}

/// What an external entity inherits from the point where it is referenced
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub(crate) config: Arc<ParserConfig>,
    pub(crate) namespaces: Vec<Binding>,
    pub(crate) entities: EntityTable,
    pub(crate) locator: Locator,
    /// Entities open around the reference, outermost first
    pub(crate) open_entities: Vec<String>,
}

impl EntityContext {
    pub fn base(&self) -> Option<&str> {
        self.config.base()
    }

    /// Namespace bindings in scope at the reference
    pub fn namespace_bindings(&self) -> impl Iterator<Item = (Option<&str>, Option<&str>)> {
        self.namespaces
            .iter()
            .map(|(prefix, uri)| (prefix.as_deref(), uri.as_deref()))
    }
}

/// A streaming XML parser driving handler `H`
pub struct Parser<H: Handler> {
    engine: Engine,
    handler: H,
}

impl<H: Handler> Parser<H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(ParserConfig::default(), handler)
    }

    pub fn with_config(config: ParserConfig, handler: H) -> Self {
        Parser {
            engine: Engine::document(Arc::new(config), Locator::new()),
            handler,
        }
    }

    /// Parse the next chunk of the document. `is_final` marks the last chunk.
    pub fn feed(&mut self, bytes: &[u8], is_final: bool) -> Result<Status, ParseError> {
        if self.engine.state() == SessionState::Fresh {
            self.handler.set_locator(self.engine.locator().clone());
        }
        self.engine.feed(&mut self.handler, bytes, is_final)
    }

    /// Signal end of input
    pub fn finish(&mut self) -> Result<Status, ParseError> {
        self.feed(&[], true)
    }

    /// Parse a complete document in one call
    pub fn parse(&mut self, bytes: &[u8]) -> Result<Status, ParseError> {
        self.feed(bytes, true)
    }

    /// Stop between feeds; later feeds return `Status::Stopped`
    pub fn stop(&mut self) {
        self.engine.stop();
    }

    /// Return a used session to `Fresh`, keeping handler and configuration
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    /// The error that ended the session, if any
    pub fn error(&self) -> Option<&ParseError> {
        self.engine.error()
    }

    /// Location of the event being dispatched, or of the error after one
    pub fn current_location(&self) -> ParseLocation {
        self.engine.current_location()
    }

    pub fn locator(&self) -> Locator {
        self.engine.locator().clone()
    }

    /// Input encoding, once detected
    pub fn encoding(&self) -> Option<XmlEncoding> {
        self.engine.encoding()
    }

    pub fn config(&self) -> &ParserConfig {
        self.engine.config()
    }

    /// Base URI reported to external entity handlers
    pub fn set_base(&mut self, base: impl Into<String>) {
        self.engine.config_mut().base = Some(base.into());
    }

    pub fn base(&self) -> Option<&str> {
        self.engine.config().base()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Swap the handler, returning the previous one
    pub fn set_handler(&mut self, mut handler: H) -> H {
        if self.engine.state() != SessionState::Fresh {
            handler.set_locator(self.engine.locator().clone());
        }
        std::mem::replace(&mut self.handler, handler)
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Snapshot of the current namespace and entity context
    pub fn entity_context(&self) -> EntityContext {
        self.engine.entity_context()
    }

    /// Sub-parser for an external entity referenced in `context`.
    /// `encoding` overrides the entity's own encoding detection.
    pub fn external_entity_parser(context: EntityContext, encoding: Option<&str>) -> EntityParser {
        EntityParser::new(context, encoding)
    }
}

impl<H: Handler + std::fmt::Debug> std::fmt::Debug for Parser<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("state", &self.state())
            .field("config", self.config())
            .field("handler", &self.handler)
            .finish()
    }
}

/// Parser for the content of one external entity.
///
/// The handler is passed to every `feed`, so the parser can run inside
/// `Handler::external_entity_ref` with the very handler being called.
pub struct EntityParser {
    engine: Engine,
}

impl EntityParser {
    pub fn new(context: EntityContext, encoding: Option<&str>) -> Self {
        Self::with_mode(context, encoding, EngineMode::ExternalEntity)
    }

    pub(crate) fn with_mode(context: EntityContext, encoding: Option<&str>, mode: EngineMode) -> Self {
        EntityParser {
            engine: Engine::entity(context, encoding, mode),
        }
    }

    pub fn feed<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<Status, ParseError> {
        self.engine.feed(handler, bytes, is_final)
    }

    /// Context for entities referenced from inside this one
    pub fn context(&self) -> EntityContext {
        self.engine.entity_context()
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn current_location(&self) -> ParseLocation {
        self.engine.current_location()
    }

    /// Finish a sub-parse the handler left open and surface its outcome
    pub(crate) fn complete<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<(), Halt> {
        match self.engine.state() {
            SessionState::Fresh | SessionState::Running => match self.engine.feed(handler, &[], true) {
                Ok(Status::Stopped) => Err(Halt::Stopped),
                Ok(_) => Ok(()),
                Err(err) => Err(Halt::Failed(err)),
            },
            SessionState::Stopped => Err(Halt::Stopped),
            SessionState::Errored => match self.engine.error() {
                Some(err) => Err(Halt::Failed(err.clone())),
                None => Err(Halt::Stopped),
            },
            SessionState::Exhausted => Ok(()),
        }
    }

    pub(crate) fn into_entities(self) -> EntityTable {
        self.engine.into_entities()
    }
}

impl std::fmt::Debug for EntityParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityParser")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sax::collector::EventCollector;
    use crate::sax::events::{EventKind, OwnedEvent};
    use crate::sax::handler::{Callbacks, ExternalEntityAction, Flow};
    use std::sync::Mutex;

    fn collect(
        config: ParserConfig,
        collector: EventCollector,
        input: &[u8],
    ) -> (Result<Status, ParseError>, Vec<OwnedEvent>) {
        let mut parser = Parser::with_config(config, collector);
        let result = parser.feed(input, true);
        let mut collector = parser.into_handler();
        (result, collector.take_events())
    }

    fn events(input: &str) -> Vec<OwnedEvent> {
        let (result, events) = collect(ParserConfig::default(), EventCollector::coalescing(), input.as_bytes());
        assert_eq!(result.unwrap(), Status::Finished);
        events
    }

    fn ns_events(input: &str) -> Result<Vec<OwnedEvent>, ParseError> {
        let config = ParserConfig::new().with_namespace_separator('|');
        let (result, events) = collect(config, EventCollector::coalescing(), input.as_bytes());
        result.map(|_| events)
    }

    fn error(input: &[u8]) -> ParseError {
        let (result, _) = collect(ParserConfig::default(), EventCollector::new(), input);
        result.unwrap_err()
    }

    fn start(name: &str) -> OwnedEvent {
        OwnedEvent::StartElement {
            name: name.to_string(),
            attributes: Vec::new(),
        }
    }

    fn end(name: &str) -> OwnedEvent {
        OwnedEvent::EndElement {
            name: name.to_string(),
        }
    }

    fn chars(text: &str) -> OwnedEvent {
        OwnedEvent::Characters(text.to_string())
    }

    const COMPLEX: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n\
        <!DOCTYPE r [\n<!ENTITY e \"<b>&#233;</b>\">\n]>\r\n\
        <!-- c -->\n\
        <r xmlns:p=\"urn:p\" a=\"x&amp;y\">text &e; &#x41;<![CDATA[<raw>]]><p:q/><?pi data?>\u{e9}\r\n</r>\n";

    fn assert_chunking_invariant(config: ParserConfig, input: &[u8]) {
        let (whole, expected) = collect(config.clone(), EventCollector::new(), input);
        assert_eq!(whole.unwrap(), Status::Finished);

        for size in [1, 2, 3, 4, 5, 6, 7, 64] {
            let mut parser = Parser::with_config(config.clone(), EventCollector::new());
            for chunk in input.chunks(size) {
                assert_eq!(parser.feed(chunk, false).unwrap(), Status::Parsing);
            }
            assert_eq!(parser.finish().unwrap(), Status::Finished);
            assert_eq!(parser.handler().events(), expected.as_slice(), "chunk size {size}");
        }
    }

    #[test]
    fn test_chunking_does_not_change_events() {
        assert_chunking_invariant(ParserConfig::new().with_namespace_separator('|'), COMPLEX.as_bytes());
    }

    #[test]
    fn test_chunking_across_encodings() {
        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "<r a='x'>h\u{e9}llo &amp; \u{1F600}\r\n</r>".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        assert_chunking_invariant(ParserConfig::default(), &utf16);

        let latin1 = b"<?xml version='1.0' encoding='ISO-8859-1'?><r>caf\xe9 \xe0 l\xe0</r>";
        assert_chunking_invariant(ParserConfig::default(), latin1);

        let shift_jis = b"<?xml version='1.0' encoding='Shift_JIS'?><r>\x93\xfa\x96\x7b</r>";
        assert_chunking_invariant(ParserConfig::default(), shift_jis);
    }

    #[test]
    fn test_chunking_splits_line_breaks() {
        let input = b"<r>a\r\nb\r\n\r\nc\rd<x\r\ny='1\r\n2'/></r>";
        assert_chunking_invariant(ParserConfig::default(), input);

        let (_, events) = collect(ParserConfig::default(), EventCollector::coalescing(), input);
        assert_eq!(events[1], chars("a\nb\n\nc\nd"));
    }

    #[test]
    fn test_complex_document_events() {
        let events = ns_events(COMPLEX).unwrap();
        assert!(matches!(events[0], OwnedEvent::XmlDecl(_)));
        assert!(events.contains(&OwnedEvent::Comment(" c ".to_string())));
        assert!(events.contains(&OwnedEvent::StartElement {
            name: "r".to_string(),
            attributes: vec![("a".to_string(), "x&y".to_string())],
        }));
        assert!(events.contains(&start("b")));
        assert!(events.contains(&chars("<raw>")));
        assert!(events.contains(&start("urn:p|q")));
        assert!(events.contains(&chars("\u{e9}\n")));
        assert!(events.contains(&OwnedEvent::ProcessingInstruction {
            target: "pi".to_string(),
            data: "data".to_string(),
        }));
    }

    #[test]
    fn test_balanced_nesting() {
        let events = events("<a><b><c/></b><d></d></a>");
        let names: Vec<_> = events
            .iter()
            .map(|e| match e {
                OwnedEvent::StartElement { name, .. } => format!("+{name}"),
                OwnedEvent::EndElement { name } => format!("-{name}"),
                other => format!("{other:?}"),
            })
            .collect();
        assert_eq!(names, ["+a", "+b", "+c", "-c", "-b", "+d", "-d", "-a"]);
    }

    #[test]
    fn test_mismatched_tag() {
        let (result, events) = collect(ParserConfig::default(), EventCollector::new(), b"<a><b></a>");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Structural);
        assert!(err.message.contains("mismatched"));
        assert_eq!(err.location.column, 7);
        assert_eq!(events, vec![start("a"), start("b")]);
    }

    #[test]
    fn test_duplicate_attribute_rejected_before_start() {
        let (result, events) = collect(
            ParserConfig::default(),
            EventCollector::new(),
            br#"<r><a x="1" x="2"/></r>"#,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::Structural);
        assert_eq!(events, vec![start("r")]);
    }

    #[test]
    fn test_duplicate_expanded_attribute() {
        let err = ns_events(r#"<r xmlns:a="urn:x" xmlns:b="urn:x" a:n="1" b:n="2"/>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Structural);
        // Without namespace processing the names differ
        events(r#"<r xmlns:a="urn:x" xmlns:b="urn:x" a:n="1" b:n="2"/>"#);
    }

    #[test]
    fn test_namespace_scoping_order() {
        let events =
            ns_events(r#"<r xmlns="urn:d" xmlns:p="urn:p"><p:c p:a="1" b="2"/></r>"#).unwrap();
        assert_eq!(
            events,
            vec![
                OwnedEvent::StartNamespaceDecl {
                    prefix: None,
                    uri: Some("urn:d".to_string()),
                },
                OwnedEvent::StartNamespaceDecl {
                    prefix: Some("p".to_string()),
                    uri: Some("urn:p".to_string()),
                },
                start("urn:d|r"),
                OwnedEvent::StartElement {
                    name: "urn:p|c".to_string(),
                    attributes: vec![
                        ("urn:p|a".to_string(), "1".to_string()),
                        ("b".to_string(), "2".to_string()),
                    ],
                },
                end("urn:p|c"),
                end("urn:d|r"),
                OwnedEvent::EndNamespaceDecl {
                    prefix: Some("p".to_string()),
                },
                OwnedEvent::EndNamespaceDecl { prefix: None },
            ]
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let events = ns_events(r#"<r xmlns="urn:d"><c xmlns=""/></r>"#).unwrap();
        assert!(events.contains(&OwnedEvent::StartNamespaceDecl {
            prefix: None,
            uri: None,
        }));
        assert!(events.contains(&start("c")));
    }

    #[test]
    fn test_xml_prefix_is_prebound() {
        let events = ns_events(r#"<r xml:lang="en"/>"#).unwrap();
        assert_eq!(
            events[0],
            OwnedEvent::StartElement {
                name: "r".to_string(),
                attributes: vec![(
                    "http://www.w3.org/XML/1998/namespace|lang".to_string(),
                    "en".to_string()
                )],
            }
        );
    }

    #[test]
    fn test_namespace_errors() {
        for doc in [
            "<p:r/>",
            r#"<r xmlns:p=""/>"#,
            r#"<r xmlns:xml="urn:x"/>"#,
            r#"<r xmlns:xmlns="urn:x"/>"#,
            "<a:b:c/>",
        ] {
            let err = ns_events(doc).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Structural, "{doc}");
        }
        // Prefixes are just name characters without namespace processing
        assert_eq!(events("<p:r/>")[0], start("p:r"));
    }

    #[test]
    fn test_builtin_and_char_refs() {
        let events = events("<r>&amp;&#65;</r>");
        assert_eq!(events, vec![start("r"), chars("&A"), end("r")]);
    }

    #[test]
    fn test_attribute_value_references() {
        let events = events(
            "<!DOCTYPE r [<!ENTITY e \"a&amp;b\">]><r v=\"&e;&#x20;&lt;\" w=\"x&#10;y\tz\"/>",
        );
        let attributes = events.iter().find_map(|e| match e {
            OwnedEvent::StartElement { attributes, .. } => Some(attributes.clone()),
            _ => None,
        });
        assert_eq!(
            attributes.unwrap(),
            vec![
                ("v".to_string(), "a&b <".to_string()),
                ("w".to_string(), "x\ny z".to_string()),
            ]
        );
    }

    #[test]
    fn test_internal_entity_with_markup() {
        let events = events(r#"<!DOCTYPE r [<!ENTITY e "<b>x</b>">]><r>&e;</r>"#);
        assert_eq!(
            events,
            vec![
                OwnedEvent::StartDoctype(crate::sax::events::Doctype {
                    name: "r".to_string(),
                    system_id: None,
                    public_id: None,
                    has_internal_subset: true,
                }),
                OwnedEvent::EntityDecl(crate::core::dtd::EntityDecl::internal("e", "<b>x</b>")),
                OwnedEvent::EndDoctype,
                start("r"),
                start("b"),
                chars("x"),
                end("b"),
                end("r"),
            ]
        );
    }

    #[test]
    fn test_entity_events_report_reference_location() {
        let mut parser = Parser::new(EventCollector::new());
        parser
            .feed(b"<!DOCTYPE r [<!ENTITY e \"<b/>\">]>\n<r>\n&e;</r>", true)
            .unwrap();
        let collector = parser.handler();
        let at = collector
            .events()
            .iter()
            .position(|e| *e == start("b"))
            .unwrap();
        assert_eq!(collector.locations()[at].line, 3);
        assert_eq!(collector.locations()[at].column, 1);
    }

    #[test]
    fn test_entity_errors() {
        let recursive = error(br#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r>&a;</r>"#);
        assert_eq!(recursive.kind, ErrorKind::Entity);

        let unbalanced = error(br#"<!DOCTYPE r [<!ENTITY e "<b>">]><r>&e;</b></r>"#);
        assert_eq!(unbalanced.kind, ErrorKind::Structural);

        let undefined = error(b"<r>&nope;</r>");
        assert_eq!(undefined.kind, ErrorKind::Entity);

        let in_attribute = error(br#"<!DOCTYPE r [<!ENTITY e "<x/>">]><r a="&e;"/>"#);
        assert_eq!(in_attribute.kind, ErrorKind::Entity);

        let external_in_attribute = error(br#"<!DOCTYPE r [<!ENTITY e SYSTEM "e.xml">]><r a="&e;"/>"#);
        assert_eq!(external_in_attribute.kind, ErrorKind::Entity);

        let unparsed = error(br#"<!DOCTYPE r [<!ENTITY e SYSTEM "e.png" NDATA png>]><r>&e;</r>"#);
        assert_eq!(unparsed.kind, ErrorKind::Entity);
    }

    fn entity_chain(len: usize) -> String {
        let mut subset = String::new();
        for i in 0..len {
            subset.push_str(&format!("<!ENTITY e{i} \"&e{};\">", i + 1));
        }
        subset.push_str(&format!("<!ENTITY e{len} \"x\">"));
        subset
    }

    #[test]
    fn test_entity_nesting_depth() {
        let shallow = format!("<!DOCTYPE r [{}]><r a=\"&e0;\">&e0;</r>", entity_chain(10));
        let (result, events) = collect(ParserConfig::default(), EventCollector::coalescing(), shallow.as_bytes());
        assert_eq!(result.unwrap(), Status::Finished);
        assert!(events.contains(&OwnedEvent::StartElement {
            name: "r".to_string(),
            attributes: vec![("a".to_string(), "x".to_string())],
        }));
        assert!(events.contains(&chars("x")));

        let config = ParserConfig::new().with_entity_depth(5);
        let (result, _) = collect(config, EventCollector::new(), shallow.as_bytes());
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Entity);
        assert!(err.message.contains("nested too deeply"), "{}", err.message);

        let deep = entity_chain(20_000);
        for body in ["<r>&e0;</r>", "<r a=\"&e0;\"/>"] {
            let doc = format!("<!DOCTYPE r [{deep}]>{body}");
            let err = error(doc.as_bytes());
            assert_eq!(err.kind, ErrorKind::Entity, "{body}");
            assert!(err.message.contains("nested too deeply"), "{}", err.message);
        }
    }

    #[test]
    fn test_external_entity_recursion() {
        let collector = EventCollector::new().with_entity("e.xml", "<i>&e;</i>");
        let (result, _) = collect(
            ParserConfig::default(),
            collector,
            br#"<!DOCTYPE r [<!ENTITY e SYSTEM "e.xml">]><r>&e;</r>"#,
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Entity);
        assert!(err.message.contains("recursive"), "{}", err.message);

        // Through another external entity and an internal one
        let collector = EventCollector::new()
            .with_entity("a.xml", "<i>&b;</i>")
            .with_entity("b.xml", "&loop;");
        let (result, _) = collect(
            ParserConfig::default(),
            collector,
            br#"<!DOCTYPE r [<!ENTITY a SYSTEM "a.xml"><!ENTITY b SYSTEM "b.xml"><!ENTITY loop "&a;">]><r>&a;</r>"#,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::Entity);

        // Undeclared names resolved by the handler
        let collector = EventCollector::new().with_entity("self", "&self;");
        let (result, _) = collect(ParserConfig::default(), collector, b"<r>&self;</r>");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Entity);

        // Repeated, non-nested use is fine
        let collector = EventCollector::new().with_entity("e.xml", "<i/>");
        let (result, events) = collect(
            ParserConfig::default(),
            collector,
            br#"<!DOCTYPE r [<!ENTITY e SYSTEM "e.xml">]><r>&e;&e;</r>"#,
        );
        assert_eq!(result.unwrap(), Status::Finished);
        assert_eq!(events.iter().filter(|e| **e == start("i")).count(), 2);
    }

    #[test]
    fn test_expansion_limit() {
        let doc = br#"<!DOCTYPE r [<!ENTITY a "0123456789"><!ENTITY b "&a;&a;&a;&a;">]><r>&b;&b;</r>"#;
        let config = ParserConfig::new().with_expansion_limit(50);
        let (result, _) = collect(config, EventCollector::new(), doc);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Entity);

        let config = ParserConfig::new().with_expansion_limit(200);
        let (result, _) = collect(config, EventCollector::new(), doc);
        assert_eq!(result.unwrap(), Status::Finished);
    }

    #[test]
    fn test_entity_lookup() {
        let config = ParserConfig::new()
            .with_entity_lookup(|name| (name == "nbsp").then(|| "\u{a0}".to_string()));
        let (result, events) = collect(config, EventCollector::coalescing(), b"<r>a&nbsp;b</r>");
        result.unwrap();
        assert_eq!(events[1], chars("a\u{a0}b"));
    }

    #[test]
    fn test_external_entity() {
        let collector = EventCollector::coalescing()
            .with_entity("ext.xml", "<?xml encoding='UTF-8'?><i>in</i> tail");
        let (result, events) = collect(
            ParserConfig::default(),
            collector,
            br#"<!DOCTYPE r [<!ENTITY ext SYSTEM "ext.xml">]><r>&ext;</r>"#,
        );
        assert_eq!(result.unwrap(), Status::Finished);
        let body: Vec<_> = events
            .into_iter()
            .skip_while(|e| *e != start("r"))
            .collect();
        assert_eq!(
            body,
            vec![
                start("r"),
                OwnedEvent::XmlDecl(crate::sax::events::XmlDecl {
                    version: None,
                    encoding: Some("UTF-8".to_string()),
                    standalone: None,
                }),
                start("i"),
                chars("in"),
                end("i"),
                chars(" tail"),
                end("r"),
            ]
        );
    }

    #[test]
    fn test_external_entity_declined() {
        let err = error(br#"<!DOCTYPE r [<!ENTITY ext SYSTEM "ext.xml">]><r>&ext;</r>"#);
        assert_eq!(err.kind, ErrorKind::Entity);
    }

    #[test]
    fn test_external_entity_error_propagates() {
        let collector = EventCollector::new().with_entity("bad.xml", "<i>");
        let (result, _) = collect(
            ParserConfig::default(),
            collector,
            br#"<!DOCTYPE r [<!ENTITY bad SYSTEM "bad.xml">]><r>&bad;</r>"#,
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::Structural);
    }

    #[test]
    fn test_external_entity_sees_namespaces() {
        let collector = EventCollector::new().with_entity("ext", "<p:i/>");
        let config = ParserConfig::new().with_namespace_separator('|');
        let (result, events) = collect(config, collector, br#"<r xmlns:p="urn:p">&ext;</r>"#);
        result.unwrap();
        assert!(events.contains(&start("urn:p|i")));
    }

    #[test]
    fn test_foreign_dtd() {
        let collector = EventCollector::coalescing().with_foreign_dtd("<!ENTITY greet 'hi'>");
        let config = ParserConfig::new().with_foreign_dtd(true);
        let (result, events) = collect(config, collector, b"<r>&greet;</r>");
        result.unwrap();
        assert_eq!(
            events,
            vec![
                OwnedEvent::EntityDecl(crate::core::dtd::EntityDecl::internal("greet", "hi")),
                start("r"),
                chars("hi"),
                end("r"),
            ]
        );
    }

    #[test]
    fn test_external_entity_base_and_ids() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut callbacks = Callbacks::new();
        callbacks.on_external_entity_ref(move |entity, parser, callbacks| {
            sink.lock().unwrap().push((
                entity.name.map(str::to_string),
                entity.base.map(str::to_string),
                entity.system_id.map(str::to_string),
                entity.public_id.map(str::to_string),
            ));
            match parser.feed(callbacks, b"x", true) {
                Ok(_) => ExternalEntityAction::Handled,
                Err(_) => ExternalEntityAction::Decline,
            }
        });

        let mut parser = Parser::new(callbacks);
        parser.set_base("http://example.com/docs/");
        parser
            .feed(
                br#"<!DOCTYPE r [<!ENTITY e PUBLIC "-//X//EN" "e.xml">]><r>&e;</r>"#,
                true,
            )
            .unwrap();

        assert_eq!(parser.base(), Some("http://example.com/docs/"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(
                Some("e".to_string()),
                Some("http://example.com/docs/".to_string()),
                Some("e.xml".to_string()),
                Some("-//X//EN".to_string()),
            )]
        );
    }

    #[test]
    fn test_stop_from_handler() {
        let mut parser = Parser::new(EventCollector::new().stop_on(EventKind::StartElement));
        assert_eq!(parser.feed(b"<a><b/></a>", true).unwrap(), Status::Stopped);
        assert_eq!(parser.state(), SessionState::Stopped);
        assert_eq!(parser.handler().events(), &[start("a")]);

        assert_eq!(parser.feed(b"<c/>", true).unwrap(), Status::Stopped);
        assert_eq!(parser.handler().event_count(), 1);
    }

    #[test]
    fn test_stop_takes_precedence_over_later_error() {
        let mut parser = Parser::new(EventCollector::new().stop_on(EventKind::StartElement));
        assert_eq!(parser.feed(b"<a></b>", true).unwrap(), Status::Stopped);
        assert!(parser.error().is_none());
    }

    #[test]
    fn test_stop_between_feeds() {
        let mut parser = Parser::new(EventCollector::new());
        assert_eq!(parser.feed(b"<a>", false).unwrap(), Status::Parsing);
        parser.stop();
        assert_eq!(parser.feed(b"</a>", true).unwrap(), Status::Stopped);
        assert_eq!(parser.handler().events(), &[start("a")]);
    }

    #[test]
    fn test_session_lifecycle() {
        let mut parser = Parser::new(EventCollector::new());
        assert_eq!(parser.state(), SessionState::Fresh);
        assert_eq!(parser.feed(b"<a/>", true).unwrap(), Status::Finished);
        assert_eq!(parser.state(), SessionState::Exhausted);
        assert!(parser.state().is_terminal());
        assert_eq!(parser.feed(b"<a/>", true).unwrap_err().kind, ErrorKind::Finished);

        parser.reset();
        assert_eq!(parser.state(), SessionState::Fresh);
        assert_eq!(parser.feed(b"<b/>", true).unwrap(), Status::Finished);
    }

    #[test]
    fn test_error_is_sticky() {
        let mut parser = Parser::new(EventCollector::new());
        let first = parser.feed(b"<a></b>", false).unwrap_err();
        assert_eq!(parser.state(), SessionState::Errored);
        let again = parser.feed(b"<c/>", true).unwrap_err();
        assert_eq!(first, again);
        assert_eq!(parser.error(), Some(&first));
        assert_eq!(parser.current_location(), first.location);
    }

    #[test]
    fn test_document_structure_errors() {
        assert_eq!(error(b"").message, "no element found");
        assert_eq!(error(b"<a>").kind, ErrorKind::Structural);
        assert_eq!(error(b"<a/>x").kind, ErrorKind::Structural);
        assert_eq!(error(b"x<a/>").kind, ErrorKind::Structural);
        assert_eq!(error(b"<a/><b/>").kind, ErrorKind::Structural);
        assert_eq!(error(b"<a/><!DOCTYPE a>").kind, ErrorKind::Structural);
        assert_eq!(error(b"<!DOCTYPE a><!DOCTYPE a><a/>").kind, ErrorKind::Structural);
        assert_eq!(error(b"<a><!-- x").kind, ErrorKind::Syntax);

        // Whitespace, comments and PIs are fine around the root
        let events = events(" <!--c--> <a/> <?pi?>\n");
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_utf16_with_bom() {
        let bytes: Vec<u8> = "\u{feff}<a>h\u{e9}</a>"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        let mut parser = Parser::new(EventCollector::new());
        parser.feed(&bytes, true).unwrap();
        assert_eq!(parser.encoding(), Some(XmlEncoding::Utf16Le));
        assert_eq!(parser.handler().text(), "h\u{e9}");
    }

    #[test]
    fn test_declared_latin1() {
        let mut parser = Parser::new(EventCollector::new());
        parser
            .feed(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>\xE9</a>", true)
            .unwrap();
        assert_eq!(parser.encoding(), Some(XmlEncoding::Latin1));
        assert_eq!(parser.handler().text(), "\u{e9}");
    }

    #[test]
    fn test_encoding_override() {
        let config = ParserConfig::new().with_encoding("ISO-8859-1");
        let (result, events) = collect(config, EventCollector::new(), b"<a>\xE9</a>");
        result.unwrap();
        assert_eq!(events[1], chars("\u{e9}"));
    }

    #[test]
    fn test_encoding_errors() {
        let mismatch = error(b"\xEF\xBB\xBF<?xml version=\"1.0\" encoding=\"UTF-16\"?><a/>");
        assert_eq!(mismatch.kind, ErrorKind::Encoding);

        let (result, events) = collect(ParserConfig::default(), EventCollector::new(), b"<a>\xFF</a>");
        let invalid = result.unwrap_err();
        assert_eq!(invalid.kind, ErrorKind::Encoding);
        assert_eq!(invalid.location.byte_offset, 3);
        assert_eq!(events, vec![start("a")]);

        let config = ParserConfig::new().with_encoding("no-such-encoding");
        let (result, _) = collect(config, EventCollector::new(), b"<a/>");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Encoding);
    }

    #[test]
    fn test_locator_tracks_events() {
        struct Lines {
            locator: Option<Locator>,
            lines: Vec<u64>,
        }
        impl Handler for Lines {
            fn set_locator(&mut self, locator: Locator) {
                self.locator = Some(locator);
            }
            fn start_element(&mut self, _element: &crate::sax::events::StartElement) -> Flow {
                if let Some(locator) = &self.locator {
                    self.lines.push(locator.line());
                }
                Flow::Continue
            }
        }

        let mut parser = Parser::new(Lines {
            locator: None,
            lines: Vec::new(),
        });
        parser.feed(b"<a>\n  <b/>\r\n<c/></a>", true).unwrap();
        assert_eq!(parser.handler().lines, vec![1, 2, 3]);
    }

    #[test]
    fn test_callbacks_handler() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let mut callbacks = Callbacks::new();
        callbacks.on_start_element(move |element| {
            sink.lock().unwrap().push(element.name.local.clone());
            Flow::Continue
        });

        let mut parser = Parser::new(callbacks);
        parser.feed(b"<a><b>", false).unwrap();
        parser.handler_mut().clear(EventKind::StartElement);
        parser.feed(b"<c/></b></a>", true).unwrap();
        assert_eq!(*names.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_set_handler_mid_parse() {
        let mut parser = Parser::new(EventCollector::new());
        parser.feed(b"<a>", false).unwrap();
        let first = parser.set_handler(EventCollector::new());
        parser.feed(b"<b/></a>", true).unwrap();
        assert_eq!(first.events(), &[start("a")]);
        assert_eq!(parser.handler().events(), &[start("b"), end("b"), end("a")]);
    }

    #[test]
    fn test_entity_parser_from_context() {
        let config = ParserConfig::new().with_namespace_separator('|');
        let mut parser = Parser::with_config(config, EventCollector::new());
        parser.feed(br#"<r xmlns="urn:d">"#, false).unwrap();

        let context = parser.entity_context();
        assert!(context
            .namespace_bindings()
            .any(|(prefix, uri)| prefix.is_none() && uri == Some("urn:d")));

        let mut sub = Parser::<EventCollector>::external_entity_parser(context, None);
        let mut collector = EventCollector::new();
        assert_eq!(sub.feed(&mut collector, b"<x/>", true).unwrap(), Status::Finished);
        assert_eq!(collector.events(), &[start("urn:d|x"), end("urn:d|x")]);
    }

    #[test]
    fn test_parser_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Parser<EventCollector>>();
        assert_send::<Parser<Callbacks>>();
        assert_send::<EntityParser>();
    }
}
