//! Well-formedness, namespace and entity engine
//!
//! Turns the tokenizer's output into handler events. One `Engine` backs a
//! document parser; external entities and the foreign DTD each get their
//! own engine, built from an `EntityContext` of the referencing one.

use std::collections::HashSet;
use std::sync::Arc;

use super::location::{Locator, ParseLocation};
use super::namespace::{ns, NamespaceScope};
use super::session::{EntityContext, EntityParser, SessionState, Status};
use crate::config::ParserConfig;
use crate::core::attributes::{is_qname, parse_value_text, split_name, RawAttribute, ValuePart};
use crate::core::dtd::{self, EntityDecl, EntityTable};
use crate::core::encoding::{DecodeError, EncodingSource, StreamDecoder, XmlEncoding};
use crate::core::entities;
use crate::core::tokenizer::{DoctypeToken, Token, TokenKind, Tokenizer, TokenizerMode, XmlDeclToken};
use crate::core::unicode::{is_ncname, is_whitespace};
use crate::error::{ErrorKind, ParseError};
use crate::sax::dispatch::{Dispatcher, Halt};
use crate::sax::events::{
    Attribute, Doctype, EndElement, Event, ExternalEntity, Name, ProcessingInstruction,
    StartElement, XmlDecl,
};
use crate::sax::handler::{ExternalEntityAction, Handler};

/// What the engine is parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineMode {
    Document,
    /// External parsed entity, included as element content
    ExternalEntity,
    /// Foreign DTD: collected whole, then read for entity declarations
    ExternalDtd,
}

struct OpenElement {
    qualified: String,
    name: Name,
    /// Prefixes declared on this element, in declaration order
    declared: Vec<Option<String>>,
}

pub(crate) struct Engine {
    config: Arc<ParserConfig>,
    mode: EngineMode,
    encoding_override: Option<String>,
    input: StreamDecoder,
    tokenizer: Tokenizer,
    configured: bool,
    dispatcher: Dispatcher,
    namespaces: NamespaceScope,
    inherited: Vec<super::namespace::Binding>,
    entities: EntityTable,
    elements: Vec<OpenElement>,
    /// Internal entities being expanded, with the element depth at entry
    expanding: Vec<(String, usize)>,
    /// Entities open in the engines this one was started from
    enclosing: Vec<String>,
    /// Location reported for everything produced by replacement text
    reference_location: Option<ParseLocation>,
    expanded_chars: usize,
    state: SessionState,
    error: Option<ParseError>,
    seen_root: bool,
    seen_doctype: bool,
    foreign_dtd_done: bool,
    dtd_text: String,
    scratch: String,
}

impl Engine {
    pub fn document(config: Arc<ParserConfig>, locator: Locator) -> Self {
        let encoding = config.encoding.clone();
        Self::build(
            config,
            EngineMode::Document,
            encoding,
            locator,
            Vec::new(),
            EntityTable::new(),
            Vec::new(),
        )
    }

    pub fn entity(context: EntityContext, encoding: Option<&str>, mode: EngineMode) -> Self {
        let EntityContext {
            config,
            namespaces,
            entities,
            locator,
            open_entities,
        } = context;
        Self::build(
            config,
            mode,
            encoding.map(str::to_string),
            locator,
            namespaces,
            entities,
            open_entities,
        )
    }

    fn build(
        config: Arc<ParserConfig>,
        mode: EngineMode,
        encoding_override: Option<String>,
        locator: Locator,
        inherited: Vec<super::namespace::Binding>,
        entities: EntityTable,
        enclosing: Vec<String>,
    ) -> Self {
        let tokenizer_mode = match mode {
            EngineMode::Document => TokenizerMode::Document,
            EngineMode::ExternalEntity | EngineMode::ExternalDtd => TokenizerMode::ExternalEntity,
        };
        Engine {
            input: StreamDecoder::new(encoding_override.as_deref()),
            tokenizer: Tokenizer::new(tokenizer_mode),
            configured: false,
            dispatcher: Dispatcher::new(locator),
            namespaces: NamespaceScope::from_bindings(&inherited),
            inherited,
            entities,
            elements: Vec::new(),
            expanding: Vec::new(),
            enclosing,
            reference_location: None,
            expanded_chars: 0,
            state: SessionState::Fresh,
            error: None,
            seen_root: false,
            seen_doctype: false,
            foreign_dtd_done: false,
            dtd_text: String::new(),
            scratch: String::new(),
            config,
            mode,
            encoding_override,
        }
    }

    /// Back to `Fresh`, keeping configuration, locator and inherited context
    pub fn reset(&mut self) {
        let entities = if self.mode == EngineMode::Document {
            EntityTable::new()
        } else {
            std::mem::take(&mut self.entities)
        };
        *self = Self::build(
            Arc::clone(&self.config),
            self.mode,
            self.encoding_override.take(),
            self.dispatcher.locator().clone(),
            std::mem::take(&mut self.inherited),
            entities,
            std::mem::take(&mut self.enclosing),
        );
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    pub fn locator(&self) -> &Locator {
        self.dispatcher.locator()
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ParserConfig {
        Arc::make_mut(&mut self.config)
    }

    pub fn encoding(&self) -> Option<XmlEncoding> {
        self.input.info().map(|info| info.encoding)
    }

    pub fn current_location(&self) -> ParseLocation {
        match &self.error {
            Some(err) => err.location,
            None => self.dispatcher.locator().location(),
        }
    }

    pub fn into_entities(self) -> EntityTable {
        self.entities
    }

    /// Snapshot handed to sub-parsers of entities referenced from here
    pub fn entity_context(&self) -> EntityContext {
        EntityContext {
            config: Arc::clone(&self.config),
            namespaces: self.namespaces.bindings(),
            entities: self.entities.clone(),
            locator: self.dispatcher.locator().clone(),
            open_entities: self.open_entities().cloned().collect(),
        }
    }

    /// Entities this engine is inside of, outermost first
    fn open_entities(&self) -> impl Iterator<Item = &String> {
        self.enclosing
            .iter()
            .chain(self.expanding.iter().map(|(name, _)| name))
    }

    /// Refuse to open `name` when it is already open or nesting is too deep.
    /// `nested` lists entities open within an attribute value.
    fn check_open(
        &self,
        name: &str,
        nested: &[String],
        location: ParseLocation,
    ) -> Result<(), ParseError> {
        if self.open_entities().chain(nested).any(|open| open == name) {
            return Err(ParseError::entity(
                format!("recursive reference to entity '{name}'"),
                location,
            ));
        }
        let depth = self.enclosing.len() + self.expanding.len() + nested.len();
        if depth >= self.config.entity_depth {
            return Err(ParseError::entity(
                format!("entity '{name}' nested too deeply"),
                location,
            ));
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if matches!(self.state, SessionState::Fresh | SessionState::Running) {
            log::debug!("parser stopped by caller");
            self.state = SessionState::Stopped;
        }
    }

    pub fn feed<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<Status, ParseError> {
        match self.state {
            SessionState::Errored => {
                let location = self.current_location();
                return Err(self.error.clone().unwrap_or_else(|| {
                    ParseError::new(ErrorKind::Finished, "parser is in an error state", location)
                }));
            }
            SessionState::Stopped => return Ok(Status::Stopped),
            SessionState::Exhausted => {
                return Err(ParseError::new(
                    ErrorKind::Finished,
                    "parsing already finished",
                    self.current_location(),
                ))
            }
            SessionState::Fresh => {
                log::debug!("{:?} parse started", self.mode);
                self.state = SessionState::Running;
            }
            SessionState::Running => {}
        }

        match self.run(handler, bytes, is_final) {
            Ok(()) if is_final => {
                log::debug!("{:?} parse finished", self.mode);
                self.state = SessionState::Exhausted;
                Ok(Status::Finished)
            }
            Ok(()) => Ok(Status::Parsing),
            Err(Halt::Stopped) => {
                self.state = SessionState::Stopped;
                Ok(Status::Stopped)
            }
            Err(Halt::Failed(err)) => {
                log::debug!("{:?} parse failed: {err}", self.mode);
                self.state = SessionState::Errored;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn run<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<(), Halt> {
        let mut text = std::mem::take(&mut self.scratch);
        text.clear();
        let decoded = self.input.decode(bytes, is_final, &mut text);
        if !self.configured {
            if let Some(info) = self.input.info() {
                self.tokenizer.configure(info.encoding, info.bom_len as u64);
                self.configured = true;
            }
        }
        let result = self.consume(handler, &text, is_final, decoded);
        self.scratch = text;
        result
    }

    /// Tokenize and dispatch decoded text. Text decoded ahead of a decoding
    /// error is dispatched before the error is reported.
    fn consume<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        text: &str,
        is_final: bool,
        decoded: Result<(), DecodeError>,
    ) -> Result<(), Halt> {
        if self.mode == EngineMode::ExternalDtd {
            self.dtd_text.push_str(text);
            decoded.map_err(|err| self.decode_error(err))?;
            if is_final {
                self.finish_dtd(handler)?;
            }
            return Ok(());
        }

        self.tokenizer.push_str(text);
        while let Some(token) = self.tokenizer.next_token()? {
            self.process(handler, token)?;
        }
        decoded.map_err(|err| self.decode_error(err))?;

        if is_final {
            if let Some(token) = self.tokenizer.finish()? {
                self.process(handler, token)?;
            }
            self.check_complete()?;
        }
        Ok(())
    }

    fn decode_error(&self, err: DecodeError) -> Halt {
        let position = self.tokenizer.position();
        let location = ParseLocation {
            line: position.line,
            column: position.column,
            byte_offset: err.byte_offset,
            byte_count: 0,
        };
        Halt::Failed(ParseError::encoding(err.message, location))
    }

    fn check_complete(&self) -> Result<(), ParseError> {
        let location = self.tokenizer.position().location(0);
        if let Some(open) = self.elements.last() {
            return Err(ParseError::structural(
                format!("unclosed element '{}'", open.qualified),
                location,
            ));
        }
        if self.mode == EngineMode::Document && !self.seen_root {
            return Err(ParseError::structural("no element found", location));
        }
        Ok(())
    }

    fn emit<H: Handler + ?Sized>(
        &self,
        handler: &mut H,
        location: ParseLocation,
        event: Event<'_>,
    ) -> Result<(), Halt> {
        self.dispatcher.emit(handler, location, event)
    }

    /// Outside the root element of a document, where only markup is allowed
    fn outside_root(&self) -> bool {
        self.mode == EngineMode::Document && self.elements.is_empty()
    }

    fn require_content(&self, location: ParseLocation) -> Result<(), ParseError> {
        if !self.outside_root() {
            return Ok(());
        }
        let message = if self.seen_root {
            "junk after document element"
        } else {
            "content before the root element"
        };
        Err(ParseError::structural(message, location))
    }

    fn process<H: Handler + ?Sized>(&mut self, handler: &mut H, token: Token) -> Result<(), Halt> {
        let location = self.reference_location.unwrap_or_else(|| token.location());
        match token.kind {
            TokenKind::XmlDecl(decl) => self.xml_decl(handler, decl, location),
            TokenKind::Doctype(doctype) => self.doctype(handler, doctype, location),
            TokenKind::StartTag {
                name,
                attributes,
                empty,
            } => self.start_tag(handler, name, attributes, empty, location),
            TokenKind::EndTag { name } => self.end_tag(handler, &name, location),
            TokenKind::Text(text) => {
                if self.outside_root() && text.chars().all(is_whitespace) {
                    return Ok(());
                }
                self.require_content(location)?;
                self.emit(handler, location, Event::Characters(&text))
            }
            TokenKind::CharRef(c) => {
                self.require_content(location)?;
                let mut buf = [0u8; 4];
                self.emit(handler, location, Event::Characters(c.encode_utf8(&mut buf)))
            }
            TokenKind::EntityRef(name) => {
                self.require_content(location)?;
                self.entity_reference(handler, &name, location)
            }
            TokenKind::CData(body) => {
                self.require_content(location)?;
                self.emit(handler, location, Event::StartCData)?;
                if !body.is_empty() {
                    self.emit(handler, location, Event::Characters(&body))?;
                }
                self.emit(handler, location, Event::EndCData)
            }
            TokenKind::Comment(body) => self.emit(handler, location, Event::Comment(&body)),
            TokenKind::Pi { target, data } => {
                let pi = ProcessingInstruction { target, data };
                self.emit(handler, location, Event::ProcessingInstruction(&pi))
            }
        }
    }

    fn xml_decl<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        decl: XmlDeclToken,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        if let (Some(label), Some(info)) = (decl.encoding.as_deref(), self.input.info()) {
            if !matches!(info.source, EncodingSource::Override | EncodingSource::Declaration) {
                let declared = XmlEncoding::from_label(label).ok_or_else(|| {
                    ParseError::encoding(format!("unknown encoding '{label}'"), location)
                })?;
                if !info.encoding.accepts_declaration(&declared) {
                    return Err(ParseError::encoding(
                        format!(
                            "encoding declaration '{label}' does not match detected {}",
                            info.encoding
                        ),
                        location,
                    )
                    .into());
                }
            }
        }
        let decl = XmlDecl {
            version: decl.version,
            encoding: decl.encoding,
            standalone: decl.standalone,
        };
        self.emit(handler, location, Event::XmlDecl(&decl))
    }

    fn doctype<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        doctype: DoctypeToken,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        if self.mode != EngineMode::Document || self.reference_location.is_some() {
            return Err(ParseError::structural("DOCTYPE not allowed here", location).into());
        }
        if self.seen_doctype {
            return Err(ParseError::structural("duplicate DOCTYPE declaration", location).into());
        }
        if self.seen_root {
            return Err(ParseError::structural("DOCTYPE after the root element", location).into());
        }
        self.seen_doctype = true;

        let event = Doctype {
            name: doctype.name,
            system_id: doctype.system_id,
            public_id: doctype.public_id,
            has_internal_subset: doctype.internal_subset.is_some(),
        };
        self.emit(handler, location, Event::StartDoctype(&event))?;
        if let Some(subset) = doctype.internal_subset.as_deref() {
            let decls = dtd::parse_declarations(subset, false, &self.entities)
                .map_err(|message| ParseError::syntax(message, location))?;
            self.declare_entities(handler, decls, location)?;
        }
        self.emit(handler, location, Event::EndDoctype)?;

        // A document naming its own external subset does not get the foreign one
        if event.system_id.is_some() {
            self.foreign_dtd_done = true;
        }
        self.request_foreign_dtd(handler, location)
    }

    fn declare_entities<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        decls: Vec<EntityDecl>,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        for decl in decls {
            self.emit(handler, location, Event::EntityDecl(&decl))?;
            self.entities.declare(decl);
        }
        Ok(())
    }

    fn request_foreign_dtd<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        if !self.config.use_foreign_dtd || self.foreign_dtd_done || self.mode != EngineMode::Document {
            return Ok(());
        }
        self.foreign_dtd_done = true;
        // Declining is fine: the foreign DTD is optional
        self.external_entity(handler, None, None, None, EngineMode::ExternalDtd, location)?;
        Ok(())
    }

    fn start_tag<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        qualified: String,
        raw: Vec<RawAttribute>,
        empty: bool,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        if self.outside_root() {
            if self.seen_root {
                return Err(ParseError::structural("junk after document element", location).into());
            }
            self.request_foreign_dtd(handler, location)?;
            self.seen_root = true;
        }

        let mut seen = HashSet::with_capacity(raw.len());
        for attr in &raw {
            if !seen.insert(attr.name.as_str()) {
                return Err(ParseError::structural(
                    format!("duplicate attribute '{}'", attr.name),
                    location,
                )
                .into());
            }
        }

        let mut values = Vec::with_capacity(raw.len());
        for attr in &raw {
            values.push(self.attribute_value(&attr.value, location)?);
        }

        match self.config.namespace_separator {
            None => {
                let attributes = raw
                    .iter()
                    .zip(values)
                    .map(|(attr, value)| Attribute {
                        name: Name::plain(&attr.name),
                        value,
                    })
                    .collect();
                let start = StartElement {
                    name: Name::plain(&qualified),
                    attributes,
                    empty,
                };
                self.elements.push(OpenElement {
                    qualified,
                    name: start.name.clone(),
                    declared: Vec::new(),
                });
                self.emit(handler, location, Event::StartElement(&start))?;
            }
            Some(sep) => self.start_namespaced(handler, qualified, raw, values, empty, sep, location)?,
        }

        if empty {
            self.close_element(handler, location)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn start_namespaced<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        qualified: String,
        raw: Vec<RawAttribute>,
        values: Vec<String>,
        empty: bool,
        sep: char,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        let mut declarations: Vec<(Option<String>, Option<String>)> = Vec::new();
        let mut plain: Vec<(String, String)> = Vec::new();
        for (attr, value) in raw.into_iter().zip(values) {
            let declared_prefix = attr.name.strip_prefix("xmlns:").map(str::to_string);
            if attr.name == "xmlns" {
                declarations.push((None, (!value.is_empty()).then_some(value)));
            } else if let Some(prefix) = declared_prefix {
                declarations.push((Some(prefix), Some(value)));
            } else {
                plain.push((attr.name, value));
            }
        }

        for (prefix, uri) in &declarations {
            check_declaration(prefix.as_deref(), uri.as_deref(), location)?;
        }

        self.namespaces.push_scope();
        for (prefix, uri) in &declarations {
            self.namespaces.declare(prefix.as_deref(), uri.as_deref());
        }

        let name = self.resolve_name(&qualified, true, sep, location)?;
        let mut attributes = Vec::with_capacity(plain.len());
        let mut expanded = HashSet::new();
        for (attr_name, value) in plain {
            let name = self.resolve_name(&attr_name, false, sep, location)?;
            if let Some(uri) = &name.namespace {
                if !expanded.insert((uri.clone(), name.local.clone())) {
                    return Err(ParseError::structural(
                        format!("duplicate attribute '{}'", name.name),
                        location,
                    )
                    .into());
                }
            }
            attributes.push(Attribute { name, value });
        }

        let start = StartElement {
            name,
            attributes,
            empty,
        };
        self.elements.push(OpenElement {
            qualified,
            name: start.name.clone(),
            declared: declarations.iter().map(|(prefix, _)| prefix.clone()).collect(),
        });
        for (prefix, uri) in &declarations {
            let event = Event::StartNamespaceDecl {
                prefix: prefix.as_deref(),
                uri: uri.as_deref(),
            };
            self.emit(handler, location, event)?;
        }
        self.emit(handler, location, Event::StartElement(&start))
    }

    fn resolve_name(
        &self,
        qualified: &str,
        is_element: bool,
        sep: char,
        location: ParseLocation,
    ) -> Result<Name, ParseError> {
        if !is_qname(qualified) {
            return Err(ParseError::structural(
                format!("invalid qualified name '{qualified}'"),
                location,
            ));
        }
        let (prefix, local) = split_name(qualified);
        let namespace = match prefix {
            Some(p) => Some(
                self.namespaces
                    .resolve(Some(p))
                    .ok_or_else(|| {
                        ParseError::structural(format!("unbound prefix '{p}'"), location)
                    })?
                    .to_string(),
            ),
            None if is_element => self.namespaces.resolve(None).map(str::to_string),
            None => None,
        };
        let name = match &namespace {
            Some(uri) => format!("{uri}{sep}{local}"),
            None => local.to_string(),
        };
        Ok(Name {
            name,
            qualified: qualified.to_string(),
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            namespace,
        })
    }

    fn end_tag<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        qualified: &str,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        if let Some((entity, depth)) = self.expanding.last() {
            if self.elements.len() <= *depth {
                return Err(ParseError::structural(
                    format!("end tag '</{qualified}>' closes an element opened outside entity '{entity}'"),
                    location,
                )
                .into());
            }
        }
        match self.elements.last() {
            None => {
                return Err(ParseError::structural(
                    format!("unexpected end tag '</{qualified}>'"),
                    location,
                )
                .into())
            }
            Some(open) if open.qualified != qualified => {
                return Err(ParseError::structural(
                    format!(
                        "mismatched tag: expected '</{}>', found '</{qualified}>'",
                        open.qualified
                    ),
                    location,
                )
                .into())
            }
            Some(_) => {}
        }
        self.close_element(handler, location)
    }

    fn close_element<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        let Some(open) = self.elements.pop() else {
            return Ok(());
        };
        if self.config.namespace_separator.is_some() {
            self.namespaces.pop_scope();
        }
        let end = EndElement { name: open.name };
        self.emit(handler, location, Event::EndElement(&end))?;
        for prefix in open.declared.iter().rev() {
            self.emit(
                handler,
                location,
                Event::EndNamespaceDecl {
                    prefix: prefix.as_deref(),
                },
            )?;
        }
        Ok(())
    }

    fn entity_reference<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        name: &str,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        if let Some(text) = entities::builtin(name) {
            return self.emit(handler, location, Event::Characters(text));
        }

        if let Some(decl) = self.entities.get(name) {
            if decl.is_unparsed() {
                return Err(ParseError::entity(
                    format!("reference to unparsed entity '{name}'"),
                    location,
                )
                .into());
            }
            if let Some(value) = decl.value.clone() {
                return self.expand_internal(handler, name, &value, location);
            }
            let system_id = decl.system_id.clone();
            let public_id = decl.public_id.clone();
            self.check_open(name, &[], location)?;
            let handled = self.external_entity(
                handler,
                Some(name),
                system_id.as_deref(),
                public_id.as_deref(),
                EngineMode::ExternalEntity,
                location,
            )?;
            if !handled {
                return Err(ParseError::entity(
                    format!("external entity '{name}' was not handled"),
                    location,
                )
                .into());
            }
            return Ok(());
        }

        if let Some(value) = self.config.lookup_entity(name) {
            return self.expand_internal(handler, name, &value, location);
        }

        self.check_open(name, &[], location)?;
        let handled = self.external_entity(
            handler,
            Some(name),
            None,
            None,
            EngineMode::ExternalEntity,
            location,
        )?;
        if !handled {
            return Err(ParseError::entity(format!("undefined entity '{name}'"), location).into());
        }
        Ok(())
    }

    fn count_expansion(&mut self, len: usize, location: ParseLocation) -> Result<(), ParseError> {
        self.expanded_chars = self.expanded_chars.saturating_add(len);
        if self.expanded_chars > self.config.expansion_limit {
            return Err(ParseError::entity("entity expansion limit exceeded", location));
        }
        Ok(())
    }

    fn expand_internal<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        name: &str,
        value: &str,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        self.check_open(name, &[], location)?;
        self.count_expansion(value.len(), location)?;

        let depth = self.elements.len();
        self.expanding.push((name.to_string(), depth));
        let outer = self.reference_location;
        if outer.is_none() {
            self.reference_location = Some(location);
        }
        let result = self.run_replacement(handler, value, location);
        self.reference_location = outer;
        self.expanding.pop();
        result?;

        if self.elements.len() != depth {
            return Err(ParseError::structural(
                format!("entity '{name}' contains unbalanced markup"),
                location,
            )
            .into());
        }
        Ok(())
    }

    fn run_replacement<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        value: &str,
        location: ParseLocation,
    ) -> Result<(), Halt> {
        let relocate = |err: ParseError| ParseError::new(err.kind, err.message, location);
        let mut tokenizer = Tokenizer::new(TokenizerMode::Replacement);
        tokenizer.push_str(value);
        while let Some(token) = tokenizer.next_token().map_err(relocate)? {
            self.process(handler, token)?;
        }
        if let Some(token) = tokenizer.finish().map_err(relocate)? {
            self.process(handler, token)?;
        }
        Ok(())
    }

    fn attribute_value(
        &mut self,
        parts: &[ValuePart],
        location: ParseLocation,
    ) -> Result<String, ParseError> {
        if let [ValuePart::Text(text)] = parts {
            return Ok(text.clone());
        }
        let mut out = String::new();
        let mut open = Vec::new();
        self.append_value(parts, &mut out, &mut open, location)?;
        Ok(out)
    }

    fn append_value(
        &mut self,
        parts: &[ValuePart],
        out: &mut String,
        open: &mut Vec<String>,
        location: ParseLocation,
    ) -> Result<(), ParseError> {
        for part in parts {
            let name = match part {
                ValuePart::Text(text) => {
                    out.push_str(text);
                    continue;
                }
                ValuePart::CharRef(c) => {
                    out.push(*c);
                    continue;
                }
                ValuePart::EntityRef(name) => name,
            };
            if let Some(text) = entities::builtin(name) {
                out.push_str(text);
                continue;
            }

            let value = match self.entities.get(name) {
                Some(decl) if decl.is_external() => {
                    return Err(ParseError::entity(
                        format!("reference to external entity '{name}' in attribute value"),
                        location,
                    ))
                }
                Some(decl) => decl.value.clone().unwrap_or_default(),
                None => self.config.lookup_entity(name).ok_or_else(|| {
                    ParseError::entity(format!("undefined entity '{name}'"), location)
                })?,
            };
            self.check_open(name, open.as_slice(), location)?;
            self.count_expansion(value.len(), location)?;

            let nested = parse_value_text(&value)
                .map_err(|message| ParseError::entity(format!("entity '{name}': {message}"), location))?;
            open.push(name.clone());
            self.append_value(&nested, out, open, location)?;
            open.pop();
        }
        Ok(())
    }

    /// Hand an external entity (or the foreign DTD) to the handler.
    /// Returns whether the handler took it.
    fn external_entity<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        name: Option<&str>,
        system_id: Option<&str>,
        public_id: Option<&str>,
        mode: EngineMode,
        location: ParseLocation,
    ) -> Result<bool, Halt> {
        let mut context = self.entity_context();
        context.open_entities.extend(name.map(str::to_string));
        let mut parser = EntityParser::with_mode(context, None, mode);
        let config = Arc::clone(&self.config);
        let reference = ExternalEntity {
            name,
            base: config.base.as_deref(),
            system_id,
            public_id,
        };
        self.dispatcher.locator().set(location);
        log::trace!("external entity {:?} ({:?})", name, system_id);

        match handler.external_entity_ref(&reference, &mut parser) {
            ExternalEntityAction::Decline => Ok(false),
            ExternalEntityAction::Stop => Err(Halt::Stopped),
            ExternalEntityAction::Handled => {
                if let Err(halt) = parser.complete(handler) {
                    if let Halt::Failed(err) = &halt {
                        log::warn!("external entity {:?} failed: {err}", name);
                    }
                    return Err(halt);
                }
                if mode == EngineMode::ExternalDtd {
                    self.entities = parser.into_entities();
                }
                Ok(true)
            }
        }
    }

    fn finish_dtd<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<(), Halt> {
        let text = std::mem::take(&mut self.dtd_text);
        let location = self.tokenizer.position().location(0);
        let decls = dtd::parse_declarations(&text, true, &self.entities)
            .map_err(|message| ParseError::syntax(message, location))?;
        self.declare_entities(handler, decls, location)
    }
}

/// Reserved-prefix rules for one `xmlns` / `xmlns:p` attribute
fn check_declaration(
    prefix: Option<&str>,
    uri: Option<&str>,
    location: ParseLocation,
) -> Result<(), ParseError> {
    let fail = |message: String| Err(ParseError::structural(message, location));
    match prefix {
        Some("xmlns") => fail("the 'xmlns' prefix must not be declared".to_string()),
        Some("xml") if uri != Some(ns::XML) => {
            fail("the 'xml' prefix must be bound to its reserved namespace".to_string())
        }
        Some("xml") => Ok(()),
        Some(p) if !is_ncname(p) => fail(format!("invalid namespace prefix '{p}'")),
        Some(p) if uri.map_or(true, str::is_empty) => {
            fail(format!("prefix '{p}' cannot be bound to an empty namespace"))
        }
        _ if uri == Some(ns::XML) => {
            fail("the XML namespace is reserved for the 'xml' prefix".to_string())
        }
        _ if uri == Some(ns::XMLNS) => fail("the xmlns namespace cannot be declared".to_string()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> ParseLocation {
        ParseLocation::START
    }

    #[test]
    fn test_check_declaration() {
        assert!(check_declaration(Some("a"), Some("urn:a"), loc()).is_ok());
        assert!(check_declaration(None, None, loc()).is_ok());
        assert!(check_declaration(Some("xml"), Some(ns::XML), loc()).is_ok());
        assert!(check_declaration(Some("xml"), Some("urn:x"), loc()).is_err());
        assert!(check_declaration(Some("xmlns"), Some("urn:x"), loc()).is_err());
        assert!(check_declaration(Some("a"), Some(""), loc()).is_err());
        assert!(check_declaration(Some("a"), Some(ns::XML), loc()).is_err());
        assert!(check_declaration(None, Some(ns::XMLNS), loc()).is_err());
    }
}
