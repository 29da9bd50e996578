// wollok-vm - Runtime instances
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime instances and their inner values.
//!
//! Every value the machine touches is an instance id into the
//! evaluation's instance table; the table is the authoritative owner.
//! An instance is a context (its fields, plus `self` for named modules)
//! with a module, an optional primitive inner value, and — for globals —
//! an optional pending lazy initializer.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use wollok_model::{InstanceId, NodeId};

use super::context::Context;

/// An operand-stack slot: an instance id, or the undefined value.
pub type Operand = Option<InstanceId>;

/// Fixed id of the interned `null` instance.
pub const NULL_ID: InstanceId = InstanceId::fixed(1);
/// Fixed id of the interned `true` instance.
pub const TRUE_ID: InstanceId = InstanceId::fixed(2);
/// Fixed id of the interned `false` instance.
pub const FALSE_ID: InstanceId = InstanceId::fixed(3);

/// A runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeObject {
    pub id: InstanceId,
    /// The module node this instance is an instance of.
    pub module: NodeId,
    /// The instance's own context: fields, plus `self` unless the module
    /// is a closure.
    pub context: Context,
    /// Primitive payload, when the instance wraps one.
    pub inner: Option<InnerValue>,
    /// Pending lazy initializer: the `Variable` node whose thunk resolves
    /// this instance's binding on first load.
    pub lazy: Option<NodeId>,
}

impl RuntimeObject {
    /// A plain instance of a module.
    #[must_use]
    pub fn new(id: InstanceId, module: NodeId, context: Context) -> Self {
        RuntimeObject {
            id,
            module,
            context,
            inner: None,
            lazy: None,
        }
    }

    /// An instance wrapping a primitive inner value.
    #[must_use]
    pub fn with_inner(id: InstanceId, module: NodeId, context: Context, inner: InnerValue) -> Self {
        RuntimeObject {
            id,
            module,
            context,
            inner: Some(inner),
            lazy: None,
        }
    }

    /// A lazy-initializer placeholder for a global.
    #[must_use]
    pub fn lazy(id: InstanceId, module: NodeId, context: Context, initializer: NodeId) -> Self {
        RuntimeObject {
            id,
            module,
            context,
            inner: None,
            lazy: Some(initializer),
        }
    }

    /// The wrapped number, if this instance carries one.
    #[must_use]
    pub fn number(&self) -> Option<f64> {
        match self.inner {
            Some(InnerValue::Number(n)) => Some(n),
            _ => None,
        }
    }

    /// The wrapped string, if this instance carries one.
    #[must_use]
    pub fn string(&self) -> Option<&str> {
        match &self.inner {
            Some(InnerValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The wrapped element ids, if this instance is a collection.
    #[must_use]
    pub fn elements(&self) -> Option<&[InstanceId]> {
        match &self.inner {
            Some(InnerValue::List(elements)) | Some(InnerValue::Set(elements)) => Some(elements),
            _ => None,
        }
    }
}

/// The primitive payload of an instance.
#[derive(Clone)]
pub enum InnerValue {
    Number(f64),
    String(String),
    List(Vec<InstanceId>),
    Set(Vec<InstanceId>),
    /// Opaque native payload; shared, never inspected by the core.
    Handle(Rc<dyn Any>),
}

impl fmt::Debug for InnerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerValue::Number(n) => write!(f, "Number({})", n),
            InnerValue::String(s) => write!(f, "String({:?})", s),
            InnerValue::List(elements) => write!(f, "List({} elements)", elements.len()),
            InnerValue::Set(elements) => write!(f, "Set({} elements)", elements.len()),
            InnerValue::Handle(_) => write!(f, "Handle(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_ids_are_distinct() {
        assert_ne!(NULL_ID, TRUE_ID);
        assert_ne!(TRUE_ID, FALSE_ID);
        assert_ne!(NULL_ID, FALSE_ID);
    }

    #[test]
    fn test_inner_accessors() {
        let context = Context::new();
        let module = NodeId::fresh();
        let number = RuntimeObject::with_inner(
            InstanceId::fresh(),
            module,
            context.clone(),
            InnerValue::Number(42.0),
        );
        assert_eq!(number.number(), Some(42.0));
        assert_eq!(number.string(), None);

        let string = RuntimeObject::with_inner(
            InstanceId::fresh(),
            module,
            context,
            InnerValue::String("hi".to_string()),
        );
        assert_eq!(string.string(), Some("hi"));
        assert_eq!(string.number(), None);
    }
}
