// wollok-model - Lexical scopes for linked nodes
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Scopes map simple names to the ids of the nodes they denote.
//!
//! Every linked node carries a scope extending its parent's scope with the
//! names it introduces. Scopes are persistent maps (`im::HashMap`), so a
//! child scope shares structure with its parent instead of copying it —
//! the linker builds one scope per node without quadratic blow-up.

use crate::name::{Name, NodeId};

/// A mapping from simple name to the id of the node it resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    bindings: im::HashMap<Name, NodeId>,
}

impl Scope {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Scope::default()
    }

    /// Bind `name` to `target`, shadowing any previous binding.
    pub fn bind(&mut self, name: impl Into<Name>, target: NodeId) {
        self.bindings.insert(name.into(), target);
    }

    /// A copy of this scope with one extra binding.
    #[must_use]
    pub fn with(&self, name: impl Into<Name>, target: NodeId) -> Self {
        let mut child = self.clone();
        child.bind(name, target);
        child
    }

    /// Resolve a simple name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<NodeId> {
        self.bindings.get(name).copied()
    }

    /// Whether `name` is bound here.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Number of visible bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the scope has no bindings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_resolve() {
        let mut scope = Scope::new();
        let id = NodeId::fresh();
        scope.bind("x", id);

        assert_eq!(scope.resolve("x"), Some(id));
        assert_eq!(scope.resolve("y"), None);
    }

    #[test]
    fn test_child_shadows_parent() {
        let mut parent = Scope::new();
        let outer = NodeId::fresh();
        let inner = NodeId::fresh();
        parent.bind("x", outer);

        let child = parent.with("x", inner);
        assert_eq!(child.resolve("x"), Some(inner));
        assert_eq!(parent.resolve("x"), Some(outer));
    }

    #[test]
    fn test_with_preserves_other_bindings() {
        let mut parent = Scope::new();
        let a = NodeId::fresh();
        parent.bind("a", a);

        let child = parent.with("b", NodeId::fresh());
        assert_eq!(child.resolve("a"), Some(a));
        assert_eq!(child.len(), 2);
    }
}
