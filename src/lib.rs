//! RustySax - Streaming, event-driven XML parsing
//!
//! Bytes are fed in chunks of any size; the parser reports what it finds
//! to a `Handler` as it goes:
//!
//! ```ignore
//! use rustysax::{Parser, EventCollector};
//!
//! let mut parser = Parser::new(EventCollector::new());
//! parser.feed(b"<greeting>hel", false)?;
//! parser.feed(b"lo</greeting>", true)?;
//! assert_eq!(parser.handler().text(), "hello");
//! ```
//!
//! Layers:
//! - `core`: encoding detection, tokenizer, entity and DTD primitives
//! - `parser`: sessions, well-formedness and namespace engine
//! - `sax`: handler trait, callback table, events and the recording collector
//! - `strategy::worker`: process-wide worker thread for hosts that must not
//!   run callbacks on their own threads
//!
//! With the `nif` feature the crate also builds the `RustySax.Native`
//! Erlang NIF.

pub mod config;
pub mod core;
pub mod error;
pub mod parser;
pub mod sax;
pub mod strategy;

#[cfg(feature = "nif")]
mod nif;
#[cfg(feature = "nif")]
mod resource;
#[cfg(feature = "nif")]
mod term;

pub use config::ParserConfig;
pub use crate::core::encoding::XmlEncoding;
pub use error::{ErrorKind, ParseError};
pub use parser::{EntityContext, EntityParser, Locator, ParseLocation, Parser, SessionState, Status};
pub use sax::events::{
    Attribute, Doctype, EndElement, EntityDecl, ExternalEntity, Name, ProcessingInstruction,
    StartElement, XmlDecl,
};
pub use sax::{Callbacks, Event, EventCollector, EventKind, ExternalEntityAction, Flow, Handler, OwnedEvent};

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
