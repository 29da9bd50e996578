// wollok-model - Linked nodes
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Linked nodes: the arena-resident form of the tree.
//!
//! After linking, every node lives in an [`Environment`](crate::Environment)
//! arena and refers to its children, parent and reference targets by
//! [`NodeId`]. The payload is a tagged variant ([`NodeKind`]); operations
//! that are polymorphic over nodes dispatch on the tag.

use crate::ast::SourceSpan;
use crate::name::{Name, NodeId};
use crate::scope::Scope;

/// A node in a linked environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique within the environment; fresh on every link run.
    pub id: NodeId,
    /// The containing node. Only the environment root has none.
    pub parent: Option<NodeId>,
    /// Names visible at this node.
    pub scope: Scope,
    /// Opaque source span carried through from the parser.
    pub source: Option<SourceSpan>,
    pub kind: NodeKind,
}

/// The tagged payload of a linked node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The root holding the top-level packages.
    Environment { members: Vec<NodeId> },
    Package {
        name: Name,
        imports: Vec<NodeId>,
        members: Vec<NodeId>,
    },
    Import { path: Name, generic: bool },
    Class {
        name: Name,
        superclass: Option<NodeId>,
        mixins: Vec<NodeId>,
        members: Vec<NodeId>,
    },
    Mixin { name: Name, members: Vec<NodeId> },
    Singleton {
        name: Option<Name>,
        superclass: Option<NodeId>,
        mixins: Vec<NodeId>,
        members: Vec<NodeId>,
        closure: bool,
    },
    /// A supertype clause: reference plus instantiation arguments
    /// (`ParameterizedType` in the grammar).
    ParameterizedType { reference: NodeId, args: Vec<NodeId> },
    Field {
        name: Name,
        mutable: bool,
        value: Option<NodeId>,
    },
    Method {
        name: Name,
        parameters: Vec<NodeId>,
        body: MethodBody,
    },
    Constructor { parameters: Vec<NodeId>, body: NodeId },
    Parameter { name: Name, var_arg: bool },
    Body { sentences: Vec<NodeId> },
    Variable {
        name: Name,
        mutable: bool,
        value: Option<NodeId>,
    },
    Return { value: Option<NodeId> },
    Assignment { reference: NodeId, value: NodeId },
    Reference {
        name: Name,
        /// Filled by the linker; `Some` in every successfully linked tree.
        target: Option<NodeId>,
    },
    SelfRef,
    Literal { value: LiteralValue },
    Send {
        receiver: NodeId,
        message: Name,
        args: Vec<NodeId>,
    },
    Super { args: Vec<NodeId> },
    New { instantiated: NodeId, args: Vec<NodeId> },
    NamedArgument { name: Name, value: NodeId },
    If {
        condition: NodeId,
        then_body: NodeId,
        else_body: NodeId,
    },
    Try {
        body: NodeId,
        catches: Vec<NodeId>,
        always: Option<NodeId>,
    },
    Catch {
        parameter: NodeId,
        parameter_type: Option<NodeId>,
        body: NodeId,
    },
    Throw { exception: NodeId },
    Program { name: Name, body: NodeId },
    Test { name: Name, body: NodeId },
    Describe { name: Name, members: Vec<NodeId> },
}

/// The body of a linked method.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodBody {
    Body(NodeId),
    /// The `native` sentinel: resolved through the native registry.
    Native,
    /// Declared without a body.
    Abstract,
}

/// A linked literal value. Collections hold element node ids.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    List(Vec<NodeId>),
    Set(Vec<NodeId>),
}

impl Node {
    /// The declared name of this node, if its kind has one. Anonymous
    /// singletons answer `None`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Package { name, .. }
            | NodeKind::Class { name, .. }
            | NodeKind::Mixin { name, .. }
            | NodeKind::Field { name, .. }
            | NodeKind::Method { name, .. }
            | NodeKind::Parameter { name, .. }
            | NodeKind::Variable { name, .. }
            | NodeKind::Reference { name, .. }
            | NodeKind::NamedArgument { name, .. }
            | NodeKind::Program { name, .. }
            | NodeKind::Test { name, .. }
            | NodeKind::Describe { name, .. } => Some(name),
            NodeKind::Singleton { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    /// Whether this node is a module: a method-bearing container that
    /// participates in linearization.
    #[must_use]
    pub fn is_module(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Class { .. }
                | NodeKind::Mixin { .. }
                | NodeKind::Singleton { .. }
                | NodeKind::Describe { .. }
        )
    }

    /// Whether this node is an entity container (environment or package).
    #[must_use]
    pub fn is_package(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Environment { .. } | NodeKind::Package { .. }
        )
    }

    /// A closure singleton, i.e. desugared closure sugar.
    #[must_use]
    pub fn is_closure(&self) -> bool {
        matches!(self.kind, NodeKind::Singleton { closure: true, .. })
    }

    /// The member lists of container kinds; empty for leaves.
    #[must_use]
    pub fn members(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Environment { members }
            | NodeKind::Package { members, .. }
            | NodeKind::Class { members, .. }
            | NodeKind::Mixin { members, .. }
            | NodeKind::Singleton { members, .. }
            | NodeKind::Describe { members, .. } => members,
            _ => &[],
        }
    }

    /// A short tag name, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Environment { .. } => "Environment",
            NodeKind::Package { .. } => "Package",
            NodeKind::Import { .. } => "Import",
            NodeKind::Class { .. } => "Class",
            NodeKind::Mixin { .. } => "Mixin",
            NodeKind::Singleton { .. } => "Singleton",
            NodeKind::ParameterizedType { .. } => "ParameterizedType",
            NodeKind::Field { .. } => "Field",
            NodeKind::Method { .. } => "Method",
            NodeKind::Constructor { .. } => "Constructor",
            NodeKind::Parameter { .. } => "Parameter",
            NodeKind::Body { .. } => "Body",
            NodeKind::Variable { .. } => "Variable",
            NodeKind::Return { .. } => "Return",
            NodeKind::Assignment { .. } => "Assignment",
            NodeKind::Reference { .. } => "Reference",
            NodeKind::SelfRef => "Self",
            NodeKind::Literal { .. } => "Literal",
            NodeKind::Send { .. } => "Send",
            NodeKind::Super { .. } => "Super",
            NodeKind::New { .. } => "New",
            NodeKind::NamedArgument { .. } => "NamedArgument",
            NodeKind::If { .. } => "If",
            NodeKind::Try { .. } => "Try",
            NodeKind::Catch { .. } => "Catch",
            NodeKind::Throw { .. } => "Throw",
            NodeKind::Program { .. } => "Program",
            NodeKind::Test { .. } => "Test",
            NodeKind::Describe { .. } => "Describe",
        }
    }

    /// Every child id, in declaration order. Drives generic tree walks.
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        match &self.kind {
            NodeKind::Environment { members } => out.extend(members),
            NodeKind::Package {
                imports, members, ..
            } => {
                out.extend(imports);
                out.extend(members);
            }
            NodeKind::Import { .. }
            | NodeKind::Parameter { .. }
            | NodeKind::Reference { .. }
            | NodeKind::SelfRef => {}
            NodeKind::Class {
                superclass,
                mixins,
                members,
                ..
            }
            | NodeKind::Singleton {
                superclass,
                mixins,
                members,
                ..
            } => {
                out.extend(superclass.iter());
                out.extend(mixins);
                out.extend(members);
            }
            NodeKind::Mixin { members, .. } | NodeKind::Describe { members, .. } => {
                out.extend(members)
            }
            NodeKind::ParameterizedType { reference, args } => {
                out.push(*reference);
                out.extend(args);
            }
            NodeKind::Field { value, .. } | NodeKind::Variable { value, .. } => {
                out.extend(value.iter())
            }
            NodeKind::Method {
                parameters, body, ..
            } => {
                out.extend(parameters);
                if let MethodBody::Body(body) = body {
                    out.push(*body);
                }
            }
            NodeKind::Constructor { parameters, body } => {
                out.extend(parameters);
                out.push(*body);
            }
            NodeKind::Body { sentences } => out.extend(sentences),
            NodeKind::Return { value } => out.extend(value.iter()),
            NodeKind::Assignment { reference, value } => {
                out.push(*reference);
                out.push(*value);
            }
            NodeKind::Literal { value } => match value {
                LiteralValue::List(elements) | LiteralValue::Set(elements) => {
                    out.extend(elements)
                }
                _ => {}
            },
            NodeKind::Send { receiver, args, .. } => {
                out.push(*receiver);
                out.extend(args);
            }
            NodeKind::Super { args } => out.extend(args),
            NodeKind::New {
                instantiated, args, ..
            } => {
                out.push(*instantiated);
                out.extend(args);
            }
            NodeKind::NamedArgument { value, .. } => out.push(*value),
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => {
                out.push(*condition);
                out.push(*then_body);
                out.push(*else_body);
            }
            NodeKind::Try {
                body,
                catches,
                always,
            } => {
                out.push(*body);
                out.extend(catches);
                out.extend(always.iter());
            }
            NodeKind::Catch {
                parameter,
                parameter_type,
                body,
            } => {
                out.push(*parameter);
                out.extend(parameter_type.iter());
                out.push(*body);
            }
            NodeKind::Throw { exception } => out.push(*exception),
            NodeKind::Program { body, .. } | NodeKind::Test { body, .. } => out.push(*body),
        }
        out
    }
}
