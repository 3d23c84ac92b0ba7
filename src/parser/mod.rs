//! Streaming parser
//!
//! - `session`: `Parser` / `EntityParser`, the public feed API and lifecycle
//! - `engine`: well-formedness, namespaces and entity expansion
//! - `namespace`: prefix scope stack
//! - `location`: positions, snapshots and the shared `Locator`

pub(crate) mod engine;
pub mod location;
pub mod namespace;
pub mod session;

pub use location::{Locator, ParseLocation};
pub use session::{EntityContext, EntityParser, Parser, SessionState, Status};
