// wollok-linker - Linker for the Wollok programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # wollok-linker
//!
//! Turns parsed package trees into a linked [`Environment`]: merges
//! packages by name, assigns a stable id to every node, wires parent
//! back-references, computes scopes, and resolves every symbolic reference
//! to its definition through the lexical, inheritance and import chains.
//!
//! # Quick start
//!
//! ```
//! use wollok_linker::{base_packages, link};
//! use wollok_model::ast::{Class, Entity, Package};
//!
//! let mut packages = base_packages();
//! packages.push(Package::new(
//!     "farm",
//!     vec![Entity::Class(Class::new("Chicken", vec![]))],
//! ));
//!
//! let environment = link(packages).unwrap();
//! let chicken = environment.lookup("farm.Chicken").unwrap();
//! assert_eq!(environment.fqn(chicken), "farm.Chicken");
//! ```
//!
//! Linking tolerates inheritance cycles (it always terminates); diagnosing
//! them is left to the validator.

pub mod base;
pub mod error;
mod link;
mod merge;
mod resolve;

pub use base::base_packages;
pub use error::{LinkError, Result};
pub use link::{link, link_onto};
pub use merge::merge;

// Re-export the model types a linker caller needs.
pub use wollok_model::{Environment, Name, NodeId};
