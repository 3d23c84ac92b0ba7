//! Core XML parsing primitives
//!
//! This module contains the fundamental building blocks for XML parsing:
//! - Scanner: memchr-accelerated cursor over decoded text
//! - Tokenizer: resumable state machine for XML token extraction
//! - Entities: built-in entities and character references (Cow, zero-copy when possible)
//! - Attributes: attribute value parts and qualified-name helpers
//! - Encoding: encoding detection and streaming decoders
//! - Unicode: XML 1.0 Unicode character class validation
//! - DTD: entity declarations from internal and external subsets

pub mod attributes;
pub mod dtd;
pub mod encoding;
pub mod entities;
pub mod scanner;
pub mod tokenizer;
pub mod unicode;
