//! Parser configuration

use std::sync::Arc;

/// Caller-supplied resolver for entities not declared in the document
pub type EntityLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Default cap on characters produced by entity expansion in one document
pub const DEFAULT_EXPANSION_LIMIT: usize = 8 * 1024 * 1024;

/// Default cap on entities open inside one another, internal and external
pub const DEFAULT_ENTITY_DEPTH: usize = 64;

/// Settings fixed at parser creation.
///
/// ```ignore
/// let config = ParserConfig::new()
///     .with_encoding("ISO-8859-1")
///     .with_namespace_separator('|');
/// ```
#[derive(Clone)]
pub struct ParserConfig {
    pub(crate) encoding: Option<String>,
    pub(crate) namespace_separator: Option<char>,
    pub(crate) use_foreign_dtd: bool,
    pub(crate) base: Option<String>,
    pub(crate) entity_lookup: Option<EntityLookup>,
    pub(crate) expansion_limit: usize,
    pub(crate) entity_depth: usize,
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoding label that overrides the BOM and the XML declaration
    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    /// Turn on namespace processing; expanded names are `uri + sep + local`
    pub fn with_namespace_separator(mut self, sep: char) -> Self {
        self.namespace_separator = Some(sep);
        self
    }

    /// Ask the external entity handler for a DTD even when the document has none
    pub fn with_foreign_dtd(mut self, enabled: bool) -> Self {
        self.use_foreign_dtd = enabled;
        self
    }

    /// Base URI passed along with external entity references
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_entity_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.entity_lookup = Some(Arc::new(lookup));
        self
    }

    pub fn with_expansion_limit(mut self, limit: usize) -> Self {
        self.expansion_limit = limit;
        self
    }

    /// How many entity references may be open inside one another
    pub fn with_entity_depth(mut self, depth: usize) -> Self {
        self.entity_depth = depth;
        self
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn namespace_separator(&self) -> Option<char> {
        self.namespace_separator
    }

    pub fn use_foreign_dtd(&self) -> bool {
        self.use_foreign_dtd
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn expansion_limit(&self) -> usize {
        self.expansion_limit
    }

    pub fn entity_depth(&self) -> usize {
        self.entity_depth
    }

    pub(crate) fn lookup_entity(&self, name: &str) -> Option<String> {
        self.entity_lookup.as_ref().and_then(|lookup| lookup(name))
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            encoding: None,
            namespace_separator: None,
            use_foreign_dtd: false,
            base: None,
            entity_lookup: None,
            expansion_limit: DEFAULT_EXPANSION_LIMIT,
            entity_depth: DEFAULT_ENTITY_DEPTH,
        }
    }
}

impl std::fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserConfig")
            .field("encoding", &self.encoding)
            .field("namespace_separator", &self.namespace_separator)
            .field("use_foreign_dtd", &self.use_foreign_dtd)
            .field("base", &self.base)
            .field("entity_lookup", &self.entity_lookup.is_some())
            .field("expansion_limit", &self.expansion_limit)
            .field("entity_depth", &self.entity_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ParserConfig::new()
            .with_encoding("UTF-16")
            .with_namespace_separator('|')
            .with_base("http://example.com/")
            .with_entity_lookup(|name| (name == "nbsp").then(|| "\u{a0}".to_string()));

        assert_eq!(config.encoding(), Some("UTF-16"));
        assert_eq!(config.namespace_separator(), Some('|'));
        assert_eq!(config.base(), Some("http://example.com/"));
        assert!(!config.use_foreign_dtd());
        assert_eq!(config.lookup_entity("nbsp").as_deref(), Some("\u{a0}"));
        assert_eq!(config.lookup_entity("other"), None);
        assert_eq!(config.expansion_limit(), DEFAULT_EXPANSION_LIMIT);
        assert_eq!(config.entity_depth(), DEFAULT_ENTITY_DEPTH);
        assert_eq!(config.with_entity_depth(8).entity_depth(), 8);
    }

    #[test]
    fn test_debug_hides_lookup() {
        let config = ParserConfig::new().with_entity_lookup(|_| None);
        assert!(format!("{config:?}").contains("entity_lookup: true"));
    }
}
