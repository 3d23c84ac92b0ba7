//! Event dispatch
//!
//! Routes an `Event` to the matching `Handler` method after publishing its
//! location through the shared locator.

use super::events::Event;
use super::handler::{Flow, Handler};
use crate::error::ParseError;
use crate::parser::location::{Locator, ParseLocation};

/// Why the engine unwound: the handler asked to stop, or the input is bad
#[derive(Debug)]
pub(crate) enum Halt {
    Stopped,
    Failed(ParseError),
}

impl From<ParseError> for Halt {
    fn from(err: ParseError) -> Self {
        Halt::Failed(err)
    }
}

pub(crate) struct Dispatcher {
    locator: Locator,
}

impl Dispatcher {
    pub fn new(locator: Locator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn emit<H: Handler + ?Sized>(
        &self,
        handler: &mut H,
        location: ParseLocation,
        event: Event<'_>,
    ) -> Result<(), Halt> {
        self.locator.set(location);
        match deliver(handler, event) {
            Flow::Continue => Ok(()),
            Flow::Stop => {
                log::debug!("handler stopped the parse at {location}");
                Err(Halt::Stopped)
            }
        }
    }
}

/// Invoke the handler method for one event
pub fn deliver<H: Handler + ?Sized>(handler: &mut H, event: Event<'_>) -> Flow {
    match event {
        Event::XmlDecl(decl) => handler.xml_decl(decl),
        Event::StartDoctype(doctype) => handler.start_doctype(doctype),
        Event::EndDoctype => handler.end_doctype(),
        Event::EntityDecl(decl) => handler.entity_decl(decl),
        Event::StartNamespaceDecl { prefix, uri } => handler.start_namespace_decl(prefix, uri),
        Event::EndNamespaceDecl { prefix } => handler.end_namespace_decl(prefix),
        Event::StartElement(element) => handler.start_element(element),
        Event::EndElement(element) => handler.end_element(element),
        Event::Characters(text) => handler.characters(text),
        Event::StartCData => handler.start_cdata(),
        Event::EndCData => handler.end_cdata(),
        Event::Comment(text) => handler.comment(text),
        Event::ProcessingInstruction(pi) => handler.processing_instruction(pi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StopOnComment {
        comments: usize,
    }

    impl Handler for StopOnComment {
        fn comment(&mut self, _text: &str) -> Flow {
            self.comments += 1;
            Flow::Stop
        }
    }

    #[test]
    fn test_emit_publishes_location() {
        let locator = Locator::new();
        let dispatcher = Dispatcher::new(locator.clone());
        let mut handler = StopOnComment { comments: 0 };
        let location = ParseLocation {
            line: 3,
            column: 7,
            byte_offset: 40,
            byte_count: 5,
        };

        assert!(dispatcher
            .emit(&mut handler, location, Event::Characters("x"))
            .is_ok());
        assert_eq!(locator.line(), 3);
        assert_eq!(locator.byte_offset(), 40);

        let halted = dispatcher.emit(&mut handler, location, Event::Comment("c"));
        assert!(matches!(halted, Err(Halt::Stopped)));
        assert_eq!(handler.comments, 1);
    }
}
