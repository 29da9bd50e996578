// wollok-model - Names, qualified names and identifiers
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Simple and fully-qualified names, plus the opaque identifiers used for
//! linked nodes and runtime instances.

use std::fmt;

use uuid::Uuid;

/// A simple or fully-qualified name.
///
/// Qualified names join their segments with [`FQN_SEPARATOR`]; the linker and
/// VM treat them as plain strings.
pub type Name = String;

/// Separator between the segments of a fully-qualified name.
pub const FQN_SEPARATOR: char = '.';

/// Join a container name and a member name into a qualified name.
///
/// An empty container (the environment root) yields the member name alone.
#[must_use]
pub fn qualify(container: &str, member: &str) -> Name {
    if container.is_empty() {
        member.to_string()
    } else {
        format!("{}{}{}", container, FQN_SEPARATOR, member)
    }
}

/// The last segment of a (possibly qualified) name.
#[must_use]
pub fn simple_name(name: &str) -> &str {
    name.rsplit(FQN_SEPARATOR).next().unwrap_or(name)
}

/// Split a qualified name into its segments.
pub fn segments(name: &str) -> impl Iterator<Item = &str> {
    name.split(FQN_SEPARATOR)
}

/// Unique identifier of a linked node.
///
/// Assigned freshly by the linker on every link run; uniqueness within one
/// [`Environment`](crate::Environment) is the only guarantee.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Mint a new id.
    #[must_use]
    pub fn fresh() -> Self {
        NodeId(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    ///
    /// Anonymous modules use their id string as a fully-qualified name, so
    /// the environment needs to recognise one when it sees it.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", &self.0.simple().to_string()[..8])
    }
}

/// Unique identifier of a runtime instance.
///
/// Interned primitives reuse well-known ids; everything else gets a fresh
/// one at instantiation time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Mint a new id.
    #[must_use]
    pub fn fresh() -> Self {
        InstanceId(Uuid::new_v4())
    }

    /// A fixed, well-known id. Used for the interned `null`, `true` and
    /// `false` instances so they are stable across evaluations.
    #[must_use]
    pub const fn fixed(marker: u128) -> Self {
        InstanceId(Uuid::from_u128(marker))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", &self.0.simple().to_string()[..8])
    }
}

/// Fully-qualified names of the modules the VM depends on.
pub mod well_known {
    pub const OBJECT: &str = "wollok.lang.Object";
    pub const BOOLEAN: &str = "wollok.lang.Boolean";
    pub const NUMBER: &str = "wollok.lang.Number";
    pub const STRING: &str = "wollok.lang.String";
    pub const LIST: &str = "wollok.lang.List";
    pub const SET: &str = "wollok.lang.Set";
    pub const CLOSURE: &str = "wollok.lang.Closure";
    pub const EXCEPTION: &str = "wollok.lang.Exception";
    pub const EVALUATION_ERROR: &str = "wollok.lang.EvaluationError";
    pub const STACK_OVERFLOW: &str = "wollok.lang.StackOverflowException";

    /// Every module that must exist in a linked environment.
    pub const ALL: &[&str] = &[
        OBJECT,
        BOOLEAN,
        NUMBER,
        STRING,
        LIST,
        SET,
        CLOSURE,
        EXCEPTION,
        EVALUATION_ERROR,
        STACK_OVERFLOW,
    ];
}
