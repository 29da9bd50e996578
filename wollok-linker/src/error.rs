// wollok-linker - Error types for linking
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Error types for the linker.

use std::fmt;

use wollok_model::{Name, NodeId};

/// Result type for linking.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that abort a link run. All of these are fatal to the embedder:
/// a partially linked environment is never returned.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// A reference name could not be resolved through any scope.
    UnresolvedReference { name: Name, site: NodeId },
    /// Two package members could not be merged.
    MergeConflict {
        name: Name,
        left_kind: &'static str,
        right_kind: &'static str,
    },
    /// The input tree violates a structural rule the parser should have
    /// enforced.
    MalformedTree { message: String },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnresolvedReference { name, site } => {
                write!(f, "Unable to resolve reference '{}' at node {:?}", name, site)
            }
            LinkError::MergeConflict {
                name,
                left_kind,
                right_kind,
            } => {
                write!(
                    f,
                    "Cannot merge '{}': {} collides with {}",
                    name, left_kind, right_kind
                )
            }
            LinkError::MalformedTree { message } => {
                write!(f, "Malformed tree: {}", message)
            }
        }
    }
}

impl std::error::Error for LinkError {}

impl LinkError {
    /// Create an unresolved-reference error.
    pub fn unresolved(name: impl Into<Name>, site: NodeId) -> Self {
        LinkError::UnresolvedReference {
            name: name.into(),
            site,
        }
    }

    /// Create a merge-conflict error.
    pub fn conflict(name: impl Into<Name>, left_kind: &'static str, right_kind: &'static str) -> Self {
        LinkError::MergeConflict {
            name: name.into(),
            left_kind,
            right_kind,
        }
    }

    /// Create a malformed-tree error.
    pub fn malformed(message: impl Into<String>) -> Self {
        LinkError::MalformedTree {
            message: message.into(),
        }
    }
}
