//! Erlang NIF entry points
//!
//! `RustySax.Native` drives a parser session from Elixir. Each feed returns
//! the events it produced, so callbacks never run on a BEAM scheduler thread;
//! feeds run on dirty CPU schedulers.

use rustler::{Binary, Encoder, Env, NifResult, ResourceArc, Term};

use crate::config::ParserConfig;
use crate::parser::session::{Parser, Status};
use crate::resource::{ParserRef, ParserResource};
use crate::sax::collector::EventCollector;
use crate::term::{self, error_to_term, events_to_term};

fn build_config(encoding: Option<String>, namespace_separator: Option<String>) -> ParserConfig {
    let mut config = ParserConfig::new();
    if let Some(label) = encoding {
        config = config.with_encoding(label);
    }
    if let Some(sep) = namespace_separator.and_then(|s| s.chars().next()) {
        config = config.with_namespace_separator(sep);
    }
    config
}

fn status_atom(status: Status) -> rustler::Atom {
    match status {
        Status::Parsing => term::parsing(),
        Status::Finished => term::finished(),
        Status::Stopped => term::stopped(),
    }
}

/// `{:ok, status, events}` or `{:error, reason, events}`
fn feed_to_term<'a>(env: Env<'a>, parser: &mut Parser<EventCollector>, chunk: &[u8], is_final: bool) -> Term<'a> {
    let result = parser.feed(chunk, is_final);
    let events = events_to_term(env, parser.handler_mut().take_events());
    match result {
        Ok(status) => (term::ok(), status_atom(status), events).encode(env),
        Err(err) => (term::error(), error_to_term(env, &err), events).encode(env),
    }
}

/// Create a parser session
#[rustler::nif]
fn parser_new(encoding: Option<String>, namespace_separator: Option<String>) -> ParserRef {
    ResourceArc::new(ParserResource::new(build_config(encoding, namespace_separator)))
}

/// Feed a chunk of data to the parser
#[rustler::nif(schedule = "DirtyCpu")]
fn parser_feed<'a>(env: Env<'a>, parser: ParserRef, chunk: Binary<'a>, is_final: bool) -> NifResult<Term<'a>> {
    let mut inner = parser
        .inner
        .lock()
        .map_err(|_| rustler::Error::Term(Box::new("mutex_poisoned")))?;
    Ok(feed_to_term(env, &mut inner, chunk.as_slice(), is_final))
}

/// Stop the session; later feeds report `:stopped`
#[rustler::nif]
fn parser_stop(parser: ParserRef) -> NifResult<rustler::Atom> {
    let mut inner = parser
        .inner
        .lock()
        .map_err(|_| rustler::Error::Term(Box::new("mutex_poisoned")))?;
    inner.stop();
    Ok(term::ok())
}

/// Current `{line, column, byte_offset}`
#[rustler::nif]
fn parser_location(parser: ParserRef) -> NifResult<(u64, u64, u64)> {
    let inner = parser
        .inner
        .lock()
        .map_err(|_| rustler::Error::Term(Box::new("mutex_poisoned")))?;
    let location = inner.current_location();
    Ok((location.line, location.column, location.byte_offset))
}

/// Parse a complete document in one call
#[rustler::nif(schedule = "DirtyCpu")]
fn parse<'a>(
    env: Env<'a>,
    input: Binary<'a>,
    encoding: Option<String>,
    namespace_separator: Option<String>,
) -> Term<'a> {
    let config = build_config(encoding, namespace_separator);
    let mut parser = Parser::with_config(config, EventCollector::new());
    feed_to_term(env, &mut parser, input.as_slice(), true)
}

rustler::init!("Elixir.RustySax.Native");
