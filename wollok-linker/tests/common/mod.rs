// wollok-linker - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared helpers for linker integration tests: linking over the base
//! library and navigating linked environments.

pub use wollok_linker::{base_packages, link, LinkError};
pub use wollok_model::ast::*;
pub use wollok_model::node::{NodeKind, MethodBody};
pub use wollok_model::{Environment, NodeId};

/// Link user packages together with the base library.
#[must_use]
pub fn link_with_base(packages: Vec<Package>) -> Environment {
    let mut all = base_packages();
    all.extend(packages);
    link(all).expect("linking should succeed")
}

/// Link user packages together with the base library, expecting failure.
#[must_use]
#[allow(dead_code)]
pub fn link_error(packages: Vec<Package>) -> LinkError {
    let mut all = base_packages();
    all.extend(packages);
    link(all).expect_err("linking should fail")
}

/// The node a fully-qualified name denotes.
#[must_use]
#[allow(dead_code)]
pub fn lookup(environment: &Environment, fqn: &str) -> NodeId {
    environment
        .lookup(fqn)
        .unwrap_or_else(|| panic!("'{}' not found", fqn))
}

/// A module's method by name.
#[must_use]
#[allow(dead_code)]
pub fn method_named(environment: &Environment, module: NodeId, name: &str) -> NodeId {
    environment
        .node(module)
        .members()
        .iter()
        .copied()
        .find(|&m| {
            matches!(&environment.node(m).kind, NodeKind::Method { name: n, .. } if n == name)
        })
        .unwrap_or_else(|| panic!("method '{}' not found", name))
}

/// A module's field by name.
#[must_use]
#[allow(dead_code)]
pub fn field_named(environment: &Environment, module: NodeId, name: &str) -> NodeId {
    environment
        .node(module)
        .members()
        .iter()
        .copied()
        .find(|&m| {
            matches!(&environment.node(m).kind, NodeKind::Field { name: n, .. } if n == name)
        })
        .unwrap_or_else(|| panic!("field '{}' not found", name))
}

/// The sentences of a method's body.
#[must_use]
#[allow(dead_code)]
pub fn method_sentences(environment: &Environment, method: NodeId) -> Vec<NodeId> {
    let body = match &environment.node(method).kind {
        NodeKind::Method {
            body: MethodBody::Body(body),
            ..
        } => *body,
        other => panic!("concrete method expected, found {:?}", other),
    };
    match &environment.node(body).kind {
        NodeKind::Body { sentences } => sentences.clone(),
        other => panic!("body expected, found {:?}", other),
    }
}

/// The resolved target of a reference node.
#[must_use]
#[allow(dead_code)]
pub fn target_of(environment: &Environment, reference: NodeId) -> NodeId {
    match &environment.node(reference).kind {
        NodeKind::Reference { target, .. } => target.expect("reference should be resolved"),
        other => panic!("reference expected, found {:?}", other),
    }
}
