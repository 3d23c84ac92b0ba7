//! Namespace Resolution
//!
//! Stack-based namespace scope for the streaming parser.

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
}

/// Visible binding: `(prefix, uri)`; `None` prefix is the default namespace,
/// `None` uri an undeclared default
pub type Binding = (Option<String>, Option<String>);

#[derive(Debug, Clone)]
struct NsBinding {
    prefix: Option<String>,
    uri: Option<String>,
    depth: u32,
}

/// Stack-based namespace resolver
#[derive(Debug, Clone)]
pub struct NamespaceScope {
    bindings: Vec<NsBinding>,
    depth: u32,
}

impl NamespaceScope {
    /// Scope with only the `xml` prefix bound
    pub fn new() -> Self {
        NamespaceScope {
            bindings: vec![NsBinding {
                prefix: Some("xml".to_string()),
                uri: Some(ns::XML.to_string()),
                depth: 0,
            }],
            depth: 0,
        }
    }

    /// Scope seeded with bindings inherited from an enclosing document
    pub fn from_bindings(inherited: &[Binding]) -> Self {
        let mut scope = Self::new();
        for (prefix, uri) in inherited {
            if prefix.as_deref() != Some("xml") {
                scope.declare(prefix.as_deref(), uri.as_deref());
            }
        }
        scope
    }

    /// Enter a new element scope
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave an element scope, removing any bindings declared in it
    pub fn pop_scope(&mut self) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Declare a binding for the current scope
    pub fn declare(&mut self, prefix: Option<&str>, uri: Option<&str>) {
        self.bindings.push(NsBinding {
            prefix: prefix.map(str::to_string),
            uri: uri.map(str::to_string),
            depth: self.depth,
        });
    }

    /// Resolve a prefix (`None` for the default namespace) to its URI
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.as_deref() == prefix)
            .and_then(|b| b.uri.as_deref())
    }

    /// Bindings currently in effect, most recent declaration per prefix
    pub fn bindings(&self) -> Vec<Binding> {
        let mut seen = std::collections::HashSet::new();
        let mut active: Vec<Binding> = self
            .bindings
            .iter()
            .rev()
            .filter(|b| seen.insert(b.prefix.clone()))
            .map(|b| (b.prefix.clone(), b.uri.clone()))
            .collect();
        active.reverse();
        active
    }
}

impl Default for NamespaceScope {
    fn default() -> Self {
        Self::new()
    }
}
