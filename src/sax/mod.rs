//! SAX (Simple API for XML) Module
//!
//! Event-based interface of the parser:
//!
//! ```text
//! Parser::feed ---> Engine ---> Dispatcher ---> Handler
//!                                                 |
//!                                    Callbacks / EventCollector / your type
//! ```
//!
//! ## Event Types
//!
//! - `StartElement` / `EndElement` - with namespace-resolved names
//! - `Characters` - character data, possibly split across calls
//! - `StartCData` / `EndCData` - brackets around CDATA character data
//! - `Comment`, `ProcessingInstruction`
//! - `XmlDecl`, `StartDoctype` / `EndDoctype`, `EntityDecl`
//! - `StartNamespaceDecl` / `EndNamespaceDecl`

pub mod collector;
pub(crate) mod dispatch;
pub mod events;
pub mod handler;

pub use collector::EventCollector;
pub use events::{Event, EventKind, OwnedEvent};
pub use handler::{Callbacks, ExternalEntityAction, Flow, Handler};
