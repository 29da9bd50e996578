// wollok-vm - Lexical contexts
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Nested lexical contexts.
//!
//! Contexts form a chain through parent references: frame base contexts
//! parent on receiver instances, instances parent on the root context (or
//! on their captured lexical context, for anonymous singletons), and
//! `PUSH_CONTEXT` nests further contexts inside a frame. The chain is a
//! DAG rooted at the evaluation's root context; a context's parent never
//! becomes `None` after construction.
//!
//! Contexts are shared and mutated through `Rc<RefCell<..>>`; lookups walk
//! the chain iteratively so deep nesting cannot overflow the host stack.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use wollok_model::Name;

use super::object::Operand;

/// An exception handler recorded on a context by `PUSH_CONTEXT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Absolute instruction index to resume at.
    pub pc: usize,
    /// Operand-stack depth at context entry; unwinding truncates to it.
    pub stack_depth: usize,
}

/// A lexical context: local bindings plus an optional parent.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Rc<RefCell<ContextData>>,
}

#[derive(Debug)]
struct ContextData {
    parent: Option<Context>,
    locals: HashMap<Name, Operand>,
    handler: Option<ExceptionHandler>,
}

impl Context {
    /// Create a root context with no parent.
    #[must_use]
    pub fn new() -> Self {
        Context {
            inner: Rc::new(RefCell::new(ContextData {
                parent: None,
                locals: HashMap::new(),
                handler: None,
            })),
        }
    }

    /// Create a child context with this context as parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Context {
            inner: Rc::new(RefCell::new(ContextData {
                parent: Some(self.clone()),
                locals: HashMap::new(),
                handler: None,
            })),
        }
    }

    /// Create a child context carrying an exception handler.
    #[must_use]
    pub fn child_with_handler(&self, handler: ExceptionHandler) -> Self {
        let child = self.child();
        child.inner.borrow_mut().handler = Some(handler);
        child
    }

    /// The parent context, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Context> {
        self.inner.borrow().parent.clone()
    }

    /// The handler recorded on this context, if any.
    #[must_use]
    pub fn handler(&self) -> Option<ExceptionHandler> {
        self.inner.borrow().handler
    }

    /// Bind a name in this context, shadowing outer bindings.
    pub fn bind(&self, name: impl Into<Name>, value: Operand) {
        self.inner.borrow_mut().locals.insert(name.into(), value);
    }

    /// Look a name up through the context chain.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Operand> {
        let mut current = self.clone();
        loop {
            let data = current.inner.borrow();
            if let Some(value) = data.locals.get(name) {
                return Some(*value);
            }
            let parent = data.parent.clone();
            drop(data);
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }

    /// Assign a name in the nearest context that already binds it, or in
    /// this context if none does.
    pub fn assign(&self, name: &str, value: Operand) {
        let mut current = self.clone();
        loop {
            {
                let mut data = current.inner.borrow_mut();
                if data.locals.contains_key(name) {
                    data.locals.insert(name.to_string(), value);
                    return;
                }
            }
            let parent = current.inner.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => {
                    self.bind(name.to_string(), value);
                    return;
                }
            }
        }
    }

    /// Whether two handles refer to the same context.
    #[must_use]
    pub fn same(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A key identifying this context, for visited sets and copy caches.
    #[must_use]
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// A snapshot of the local bindings, for tracing and copying.
    #[must_use]
    pub fn locals(&self) -> Vec<(Name, Operand)> {
        self.inner
            .borrow()
            .locals
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect()
    }

    /// Rebuild a context from copied parts. Used by `Evaluation::copy`.
    #[must_use]
    pub fn from_parts(
        parent: Option<Context>,
        locals: Vec<(Name, Operand)>,
        handler: Option<ExceptionHandler>,
    ) -> Self {
        Context {
            inner: Rc::new(RefCell::new(ContextData {
                parent,
                locals: locals.into_iter().collect(),
                handler,
            })),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wollok_model::InstanceId;

    fn id() -> Operand {
        Some(InstanceId::fresh())
    }

    #[test]
    fn test_bind_and_lookup() {
        let context = Context::new();
        let value = id();
        context.bind("x", value);

        assert_eq!(context.lookup("x"), Some(value));
        assert_eq!(context.lookup("y"), None);
    }

    #[test]
    fn test_child_sees_and_shadows_parent() {
        let parent = Context::new();
        let outer = id();
        parent.bind("x", outer);

        let child = parent.child();
        assert_eq!(child.lookup("x"), Some(outer));

        let inner = id();
        child.bind("x", inner);
        assert_eq!(child.lookup("x"), Some(inner));
        assert_eq!(parent.lookup("x"), Some(outer));
    }

    #[test]
    fn test_assign_updates_nearest_binding() {
        let parent = Context::new();
        parent.bind("x", id());
        let child = parent.child();

        let updated = id();
        child.assign("x", updated);
        assert_eq!(parent.lookup("x"), Some(updated));
    }

    #[test]
    fn test_assign_without_binding_falls_back_to_current() {
        let parent = Context::new();
        let child = parent.child();
        let value = id();
        child.assign("x", value);

        assert_eq!(child.lookup("x"), Some(value));
        assert_eq!(parent.lookup("x"), None);
    }

    #[test]
    fn test_handler_is_not_inherited() {
        let parent = Context::new();
        let handler = ExceptionHandler {
            pc: 7,
            stack_depth: 2,
        };
        let child = parent.child_with_handler(handler);

        assert_eq!(child.handler(), Some(handler));
        assert_eq!(child.child().handler(), None);
    }
}
