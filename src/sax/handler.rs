//! SAX Handler
//!
//! Callbacks invoked by the parser. Every method has a no-op default, so a
//! handler only implements the events it cares about. Returning
//! `Flow::Stop` from any callback stops the parse without an error.

use super::events::{
    Doctype, EndElement, EntityDecl, EventKind, ExternalEntity, ProcessingInstruction,
    StartElement, XmlDecl,
};
use crate::parser::location::Locator;
use crate::parser::session::EntityParser;

/// Whether parsing continues after a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    Stop,
}

/// Outcome of `Handler::external_entity_ref`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExternalEntityAction {
    /// Not handled; the reference is an entity error
    #[default]
    Decline,
    /// Handled, usually by feeding the entity's bytes to the sub-parser
    Handled,
    /// Stop the whole parse
    Stop,
}

/// Receiver of parse events
#[allow(unused_variables)]
pub trait Handler {
    /// Called once, before the first event, with a locator that always
    /// reports the position of the event being dispatched
    fn set_locator(&mut self, locator: Locator) {}

    fn xml_decl(&mut self, decl: &XmlDecl) -> Flow {
        Flow::Continue
    }

    fn start_doctype(&mut self, doctype: &Doctype) -> Flow {
        Flow::Continue
    }

    fn end_doctype(&mut self) -> Flow {
        Flow::Continue
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> Flow {
        Flow::Continue
    }

    /// A namespace declaration coming into scope, before its element's
    /// `start_element`. `uri` is `None` when the default namespace is undeclared.
    fn start_namespace_decl(&mut self, prefix: Option<&str>, uri: Option<&str>) -> Flow {
        Flow::Continue
    }

    /// A namespace declaration going out of scope, after its element's `end_element`
    fn end_namespace_decl(&mut self, prefix: Option<&str>) -> Flow {
        Flow::Continue
    }

    fn start_element(&mut self, element: &StartElement) -> Flow {
        Flow::Continue
    }

    fn end_element(&mut self, element: &EndElement) -> Flow {
        Flow::Continue
    }

    /// Character data. A run of text may arrive in several calls.
    fn characters(&mut self, text: &str) -> Flow {
        Flow::Continue
    }

    fn start_cdata(&mut self) -> Flow {
        Flow::Continue
    }

    fn end_cdata(&mut self) -> Flow {
        Flow::Continue
    }

    fn comment(&mut self, text: &str) -> Flow {
        Flow::Continue
    }

    fn processing_instruction(&mut self, pi: &ProcessingInstruction) -> Flow {
        Flow::Continue
    }

    /// An external entity needs its content. Feed the entity's bytes to
    /// `parser` (passing `self` as the handler) and return `Handled`.
    /// A sub-parse left unfinished is finished when this returns.
    fn external_entity_ref(
        &mut self,
        entity: &ExternalEntity<'_>,
        parser: &mut EntityParser,
    ) -> ExternalEntityAction {
        ExternalEntityAction::Decline
    }
}

type Slot<F> = Option<Box<F>>;

type ExternalEntityCallback =
    dyn FnMut(&ExternalEntity<'_>, &mut EntityParser, &mut Callbacks) -> ExternalEntityAction + Send;

/// Handler built from individually registered closures.
///
/// Each slot can be set and cleared independently, also between feeds.
#[derive(Default)]
pub struct Callbacks {
    xml_decl: Slot<dyn FnMut(&XmlDecl) -> Flow + Send>,
    start_doctype: Slot<dyn FnMut(&Doctype) -> Flow + Send>,
    end_doctype: Slot<dyn FnMut() -> Flow + Send>,
    entity_decl: Slot<dyn FnMut(&EntityDecl) -> Flow + Send>,
    start_namespace_decl: Slot<dyn FnMut(Option<&str>, Option<&str>) -> Flow + Send>,
    end_namespace_decl: Slot<dyn FnMut(Option<&str>) -> Flow + Send>,
    start_element: Slot<dyn FnMut(&StartElement) -> Flow + Send>,
    end_element: Slot<dyn FnMut(&EndElement) -> Flow + Send>,
    characters: Slot<dyn FnMut(&str) -> Flow + Send>,
    start_cdata: Slot<dyn FnMut() -> Flow + Send>,
    end_cdata: Slot<dyn FnMut() -> Flow + Send>,
    comment: Slot<dyn FnMut(&str) -> Flow + Send>,
    processing_instruction: Slot<dyn FnMut(&ProcessingInstruction) -> Flow + Send>,
    external_entity_ref: Slot<ExternalEntityCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_xml_decl<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&XmlDecl) -> Flow + Send + 'static,
    {
        self.xml_decl = Some(Box::new(f));
        self
    }

    pub fn on_start_doctype<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&Doctype) -> Flow + Send + 'static,
    {
        self.start_doctype = Some(Box::new(f));
        self
    }

    pub fn on_end_doctype<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut() -> Flow + Send + 'static,
    {
        self.end_doctype = Some(Box::new(f));
        self
    }

    pub fn on_entity_decl<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&EntityDecl) -> Flow + Send + 'static,
    {
        self.entity_decl = Some(Box::new(f));
        self
    }

    pub fn on_start_namespace_decl<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(Option<&str>, Option<&str>) -> Flow + Send + 'static,
    {
        self.start_namespace_decl = Some(Box::new(f));
        self
    }

    pub fn on_end_namespace_decl<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(Option<&str>) -> Flow + Send + 'static,
    {
        self.end_namespace_decl = Some(Box::new(f));
        self
    }

    pub fn on_start_element<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&StartElement) -> Flow + Send + 'static,
    {
        self.start_element = Some(Box::new(f));
        self
    }

    pub fn on_end_element<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&EndElement) -> Flow + Send + 'static,
    {
        self.end_element = Some(Box::new(f));
        self
    }

    pub fn on_characters<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&str) -> Flow + Send + 'static,
    {
        self.characters = Some(Box::new(f));
        self
    }

    pub fn on_start_cdata<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut() -> Flow + Send + 'static,
    {
        self.start_cdata = Some(Box::new(f));
        self
    }

    pub fn on_end_cdata<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut() -> Flow + Send + 'static,
    {
        self.end_cdata = Some(Box::new(f));
        self
    }

    pub fn on_comment<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&str) -> Flow + Send + 'static,
    {
        self.comment = Some(Box::new(f));
        self
    }

    pub fn on_processing_instruction<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&ProcessingInstruction) -> Flow + Send + 'static,
    {
        self.processing_instruction = Some(Box::new(f));
        self
    }

    /// The closure receives the callback table itself so it can feed the
    /// sub-parser with the same callbacks.
    pub fn on_external_entity_ref<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&ExternalEntity<'_>, &mut EntityParser, &mut Callbacks) -> ExternalEntityAction
            + Send
            + 'static,
    {
        self.external_entity_ref = Some(Box::new(f));
        self
    }

    /// Remove the callback for one kind of event
    pub fn clear(&mut self, kind: EventKind) -> &mut Self {
        match kind {
            EventKind::XmlDecl => self.xml_decl = None,
            EventKind::StartDoctype => self.start_doctype = None,
            EventKind::EndDoctype => self.end_doctype = None,
            EventKind::EntityDecl => self.entity_decl = None,
            EventKind::StartNamespaceDecl => self.start_namespace_decl = None,
            EventKind::EndNamespaceDecl => self.end_namespace_decl = None,
            EventKind::StartElement => self.start_element = None,
            EventKind::EndElement => self.end_element = None,
            EventKind::Characters => self.characters = None,
            EventKind::StartCData => self.start_cdata = None,
            EventKind::EndCData => self.end_cdata = None,
            EventKind::Comment => self.comment = None,
            EventKind::ProcessingInstruction => self.processing_instruction = None,
            EventKind::ExternalEntityRef => self.external_entity_ref = None,
        }
        self
    }

    pub fn is_set(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::XmlDecl => self.xml_decl.is_some(),
            EventKind::StartDoctype => self.start_doctype.is_some(),
            EventKind::EndDoctype => self.end_doctype.is_some(),
            EventKind::EntityDecl => self.entity_decl.is_some(),
            EventKind::StartNamespaceDecl => self.start_namespace_decl.is_some(),
            EventKind::EndNamespaceDecl => self.end_namespace_decl.is_some(),
            EventKind::StartElement => self.start_element.is_some(),
            EventKind::EndElement => self.end_element.is_some(),
            EventKind::Characters => self.characters.is_some(),
            EventKind::StartCData => self.start_cdata.is_some(),
            EventKind::EndCData => self.end_cdata.is_some(),
            EventKind::Comment => self.comment.is_some(),
            EventKind::ProcessingInstruction => self.processing_instruction.is_some(),
            EventKind::ExternalEntityRef => self.external_entity_ref.is_some(),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const KINDS: [EventKind; 14] = [
            EventKind::XmlDecl,
            EventKind::StartDoctype,
            EventKind::EndDoctype,
            EventKind::EntityDecl,
            EventKind::StartNamespaceDecl,
            EventKind::EndNamespaceDecl,
            EventKind::StartElement,
            EventKind::EndElement,
            EventKind::Characters,
            EventKind::StartCData,
            EventKind::EndCData,
            EventKind::Comment,
            EventKind::ProcessingInstruction,
            EventKind::ExternalEntityRef,
        ];
        f.debug_set()
            .entries(KINDS.iter().filter(|kind| self.is_set(**kind)))
            .finish()
    }
}

macro_rules! call_slot {
    ($slot:expr $(, $arg:expr)*) => {
        match $slot.as_mut() {
            Some(callback) => callback($($arg),*),
            None => Flow::Continue,
        }
    };
}

impl Handler for Callbacks {
    fn xml_decl(&mut self, decl: &XmlDecl) -> Flow {
        call_slot!(self.xml_decl, decl)
    }

    fn start_doctype(&mut self, doctype: &Doctype) -> Flow {
        call_slot!(self.start_doctype, doctype)
    }

    fn end_doctype(&mut self) -> Flow {
        call_slot!(self.end_doctype)
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> Flow {
        call_slot!(self.entity_decl, decl)
    }

    fn start_namespace_decl(&mut self, prefix: Option<&str>, uri: Option<&str>) -> Flow {
        call_slot!(self.start_namespace_decl, prefix, uri)
    }

    fn end_namespace_decl(&mut self, prefix: Option<&str>) -> Flow {
        call_slot!(self.end_namespace_decl, prefix)
    }

    fn start_element(&mut self, element: &StartElement) -> Flow {
        call_slot!(self.start_element, element)
    }

    fn end_element(&mut self, element: &EndElement) -> Flow {
        call_slot!(self.end_element, element)
    }

    fn characters(&mut self, text: &str) -> Flow {
        call_slot!(self.characters, text)
    }

    fn start_cdata(&mut self) -> Flow {
        call_slot!(self.start_cdata)
    }

    fn end_cdata(&mut self) -> Flow {
        call_slot!(self.end_cdata)
    }

    fn comment(&mut self, text: &str) -> Flow {
        call_slot!(self.comment, text)
    }

    fn processing_instruction(&mut self, pi: &ProcessingInstruction) -> Flow {
        call_slot!(self.processing_instruction, pi)
    }

    fn external_entity_ref(
        &mut self,
        entity: &ExternalEntity<'_>,
        parser: &mut EntityParser,
    ) -> ExternalEntityAction {
        // Taken out for the call so the closure can borrow the table mutably
        let Some(mut callback) = self.external_entity_ref.take() else {
            return ExternalEntityAction::Decline;
        };
        let action = callback(entity, parser, self);
        if self.external_entity_ref.is_none() {
            self.external_entity_ref = Some(callback);
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_default_handler_continues() {
        struct Nothing;
        impl Handler for Nothing {}

        let mut handler = Nothing;
        assert_eq!(handler.characters("x"), Flow::Continue);
        assert_eq!(handler.end_cdata(), Flow::Continue);
    }

    #[test]
    fn test_callbacks_set_and_clear() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut callbacks = Callbacks::new();
        callbacks.on_characters(move |text| {
            sink.lock().unwrap().push(text.to_string());
            Flow::Stop
        });
        assert!(callbacks.is_set(EventKind::Characters));
        assert_eq!(callbacks.characters("a"), Flow::Stop);

        callbacks.clear(EventKind::Characters);
        assert!(!callbacks.is_set(EventKind::Characters));
        assert_eq!(callbacks.characters("b"), Flow::Continue);
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_debug_lists_registered_slots() {
        let mut callbacks = Callbacks::new();
        callbacks.on_comment(|_| Flow::Continue);
        assert_eq!(format!("{callbacks:?}"), "{Comment}");
    }
}
