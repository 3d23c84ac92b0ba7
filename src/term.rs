//! Elixir Term Conversion Utilities
//!
//! Converts recorded parse events and errors to Elixir terms.

use rustler::{Encoder, Env, NewBinary, Term};

use crate::error::ParseError;
use crate::sax::events::OwnedEvent;

// Pre-defined atoms for efficiency - created once at compile time
rustler::atoms! {
    ok,
    error,
    parsing,
    finished,
    stopped,
    xml_decl,
    start_doctype,
    end_doctype,
    entity_decl,
    start_namespace_decl,
    end_namespace_decl,
    start_element,
    end_element,
    characters,
    start_cdata,
    end_cdata,
    comment,
    processing_instruction,
    encoding,
    syntax,
    structural,
    entity,
}

/// Convert a string to a binary term (more efficient than .encode())
#[inline]
pub fn str_to_binary<'a>(env: Env<'a>, s: &str) -> Term<'a> {
    let bytes = s.as_bytes();
    let mut binary = NewBinary::new(env, bytes.len());
    binary.as_mut_slice().copy_from_slice(bytes);
    binary.into()
}

fn opt_binary<'a>(env: Env<'a>, s: Option<&str>) -> Term<'a> {
    match s {
        Some(s) => str_to_binary(env, s),
        None => rustler::types::atom::nil().encode(env),
    }
}

/// Convert recorded events to an Elixir list
pub fn events_to_term<'a>(env: Env<'a>, events: Vec<OwnedEvent>) -> Term<'a> {
    let mut list = Term::list_new_empty(env);
    for event in events.into_iter().rev() {
        let event_term = event_to_term(env, event);
        list = list.list_prepend(event_term);
    }
    list
}

/// Convert a single event to an Elixir term
pub fn event_to_term<'a>(env: Env<'a>, event: OwnedEvent) -> Term<'a> {
    match event {
        OwnedEvent::StartElement { name, attributes } => {
            let name_term = str_to_binary(env, &name);

            let mut attrs = Term::list_new_empty(env);
            for (key, value) in attributes.iter().rev() {
                let pair = (str_to_binary(env, key), str_to_binary(env, value)).encode(env);
                attrs = attrs.list_prepend(pair);
            }

            (start_element(), name_term, attrs).encode(env)
        }
        OwnedEvent::EndElement { name } => (end_element(), str_to_binary(env, &name)).encode(env),
        OwnedEvent::Characters(text) => (characters(), str_to_binary(env, &text)).encode(env),
        OwnedEvent::StartCData => start_cdata().encode(env),
        OwnedEvent::EndCData => end_cdata().encode(env),
        OwnedEvent::Comment(text) => (comment(), str_to_binary(env, &text)).encode(env),
        OwnedEvent::ProcessingInstruction { target, data } => (
            processing_instruction(),
            str_to_binary(env, &target),
            str_to_binary(env, &data),
        )
            .encode(env),
        OwnedEvent::XmlDecl(decl) => (
            xml_decl(),
            opt_binary(env, decl.version.as_deref()),
            opt_binary(env, decl.encoding.as_deref()),
            decl.standalone,
        )
            .encode(env),
        OwnedEvent::StartDoctype(doctype) => (
            start_doctype(),
            str_to_binary(env, &doctype.name),
            opt_binary(env, doctype.system_id.as_deref()),
            opt_binary(env, doctype.public_id.as_deref()),
            doctype.has_internal_subset,
        )
            .encode(env),
        OwnedEvent::EndDoctype => end_doctype().encode(env),
        OwnedEvent::EntityDecl(decl) => (
            entity_decl(),
            str_to_binary(env, &decl.name),
            opt_binary(env, decl.value.as_deref()),
            opt_binary(env, decl.system_id.as_deref()),
            opt_binary(env, decl.public_id.as_deref()),
            opt_binary(env, decl.notation.as_deref()),
        )
            .encode(env),
        OwnedEvent::StartNamespaceDecl { prefix, uri } => (
            start_namespace_decl(),
            opt_binary(env, prefix.as_deref()),
            opt_binary(env, uri.as_deref()),
        )
            .encode(env),
        OwnedEvent::EndNamespaceDecl { prefix } => {
            (end_namespace_decl(), opt_binary(env, prefix.as_deref())).encode(env)
        }
    }
}

/// `{kind, message, line, column, byte_offset}`
pub fn error_to_term<'a>(env: Env<'a>, err: &ParseError) -> Term<'a> {
    use crate::error::ErrorKind;

    let kind = match err.kind {
        ErrorKind::Encoding => encoding(),
        ErrorKind::Syntax => syntax(),
        ErrorKind::Structural => structural(),
        ErrorKind::Entity => entity(),
        ErrorKind::Finished => finished(),
    };
    (
        kind,
        str_to_binary(env, &err.message),
        err.location.line,
        err.location.column,
        err.location.byte_offset,
    )
        .encode(env)
}
