//! ResourceArc Wrappers
//!
//! Persistent state for parser sessions driven from Elixir.

use rustler::ResourceArc;
use std::sync::Mutex;

use crate::config::ParserConfig;
use crate::parser::session::Parser;
use crate::sax::collector::EventCollector;

/// Wrapper for a parser session that can be stored in a ResourceArc.
/// Events are recorded by the collector and drained after every feed.
pub struct ParserResource {
    pub inner: Mutex<Parser<EventCollector>>,
}

impl ParserResource {
    pub fn new(config: ParserConfig) -> Self {
        ParserResource {
            inner: Mutex::new(Parser::with_config(config, EventCollector::new())),
        }
    }
}

#[rustler::resource_impl]
impl rustler::Resource for ParserResource {}

impl Default for ParserResource {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

/// Type alias for the ResourceArc
pub type ParserRef = ResourceArc<ParserResource>;
