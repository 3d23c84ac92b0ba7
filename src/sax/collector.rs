//! SAX Collector
//!
//! Handler that records every event as an `OwnedEvent` for batch return,
//! and resolves external entities from bytes registered up front.

use std::collections::HashMap;

use super::events::{
    Doctype, EndElement, EntityDecl, Event, EventKind, ExternalEntity, OwnedEvent,
    ProcessingInstruction, StartElement, XmlDecl,
};
use super::handler::{ExternalEntityAction, Flow, Handler};
use crate::parser::location::{Locator, ParseLocation};
use crate::parser::session::{EntityParser, Status};

/// Collector that gathers events during parsing
#[derive(Debug, Default)]
pub struct EventCollector {
    /// Collected events
    events: Vec<OwnedEvent>,
    /// Location of each event, parallel to `events`
    locations: Vec<ParseLocation>,
    locator: Option<Locator>,
    /// External entity content by system id or entity name
    entities: HashMap<String, Vec<u8>>,
    foreign_dtd: Option<Vec<u8>>,
    /// Event kind that makes the collector stop the parse
    stop_on: Option<EventKind>,
    /// Adjacent character data is merged into one event
    coalesce: bool,
}

impl EventCollector {
    /// Create a new collector
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(256),
            ..Self::default()
        }
    }

    /// Merge adjacent `Characters` events
    pub fn coalescing() -> Self {
        Self {
            coalesce: true,
            ..Self::new()
        }
    }

    /// Content served for external entities whose system id (or, failing
    /// that, name) is `key`
    pub fn with_entity(mut self, key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.entities.insert(key.into(), content.into());
        self
    }

    /// Content served for the foreign DTD request
    pub fn with_foreign_dtd(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.foreign_dtd = Some(content.into());
        self
    }

    /// Stop the parse right after recording the first event of `kind`
    pub fn stop_on(mut self, kind: EventKind) -> Self {
        self.stop_on = Some(kind);
        self
    }

    /// Take the collected events
    pub fn take_events(&mut self) -> Vec<OwnedEvent> {
        self.locations.clear();
        std::mem::take(&mut self.events)
    }

    /// Get the collected events as a slice
    pub fn events(&self) -> &[OwnedEvent] {
        &self.events
    }

    pub fn locations(&self) -> &[ParseLocation] {
        &self.locations
    }

    /// Get number of collected events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// All character data, concatenated
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                OwnedEvent::Characters(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, event: Event<'_>) -> Flow {
        let location = self
            .locator
            .as_ref()
            .map(Locator::location)
            .unwrap_or_default();

        if let (true, Event::Characters(text), Some(OwnedEvent::Characters(last))) =
            (self.coalesce, event, self.events.last_mut())
        {
            last.push_str(text);
        } else {
            let owned = OwnedEvent::from(event);
            let kind = owned.kind();
            self.events.push(owned);
            self.locations.push(location);
            if self.stop_on == Some(kind) {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn content_for(&self, entity: &ExternalEntity<'_>) -> Option<Vec<u8>> {
        if entity.name.is_none() && entity.system_id.is_none() {
            return self.foreign_dtd.clone();
        }
        entity
            .system_id
            .and_then(|id| self.entities.get(id))
            .or_else(|| entity.name.and_then(|name| self.entities.get(name)))
            .cloned()
    }
}

impl Handler for EventCollector {
    fn set_locator(&mut self, locator: Locator) {
        self.locator = Some(locator);
    }

    fn xml_decl(&mut self, decl: &XmlDecl) -> Flow {
        self.record(Event::XmlDecl(decl))
    }

    fn start_doctype(&mut self, doctype: &Doctype) -> Flow {
        self.record(Event::StartDoctype(doctype))
    }

    fn end_doctype(&mut self) -> Flow {
        self.record(Event::EndDoctype)
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> Flow {
        self.record(Event::EntityDecl(decl))
    }

    fn start_namespace_decl(&mut self, prefix: Option<&str>, uri: Option<&str>) -> Flow {
        self.record(Event::StartNamespaceDecl { prefix, uri })
    }

    fn end_namespace_decl(&mut self, prefix: Option<&str>) -> Flow {
        self.record(Event::EndNamespaceDecl { prefix })
    }

    fn start_element(&mut self, element: &StartElement) -> Flow {
        self.record(Event::StartElement(element))
    }

    fn end_element(&mut self, element: &EndElement) -> Flow {
        self.record(Event::EndElement(element))
    }

    fn characters(&mut self, text: &str) -> Flow {
        self.record(Event::Characters(text))
    }

    fn start_cdata(&mut self) -> Flow {
        self.record(Event::StartCData)
    }

    fn end_cdata(&mut self) -> Flow {
        self.record(Event::EndCData)
    }

    fn comment(&mut self, text: &str) -> Flow {
        self.record(Event::Comment(text))
    }

    fn processing_instruction(&mut self, pi: &ProcessingInstruction) -> Flow {
        self.record(Event::ProcessingInstruction(pi))
    }

    fn external_entity_ref(
        &mut self,
        entity: &ExternalEntity<'_>,
        parser: &mut EntityParser,
    ) -> ExternalEntityAction {
        let Some(content) = self.content_for(entity) else {
            return ExternalEntityAction::Decline;
        };
        match parser.feed(self, &content, true) {
            Ok(Status::Stopped) => ExternalEntityAction::Stop,
            // Errors stay in the sub-parser and surface when it is completed
            Ok(_) | Err(_) => ExternalEntityAction::Handled,
        }
    }
}
