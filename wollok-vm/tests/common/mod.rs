// wollok-vm - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared helpers for VM integration tests: linking fixtures over the
//! base library, constructing evaluations with a small native set, and
//! navigating linked environments.

use std::rc::Rc;

pub use wollok_linker::{base_packages, link};
pub use wollok_model::ast::*;
pub use wollok_model::node::{MethodBody, NodeKind};
pub use wollok_model::{Environment, InstanceId, NodeId};
pub use wollok_vm::{
    Evaluation, EvaluationConfig, ExecutionError, NativeRegistry, Operand, NULL_ID,
};

/// Link user packages together with the base library.
#[must_use]
pub fn environment_for(packages: Vec<Package>) -> Rc<Environment> {
    let mut all = base_packages();
    all.extend(packages);
    Rc::new(link(all).expect("linking should succeed"))
}

/// A ready evaluation over the given packages, with the test natives.
#[must_use]
#[allow(dead_code)]
pub fn evaluation_for(packages: Vec<Package>) -> Evaluation {
    let config = EvaluationConfig {
        natives: test_natives(),
        ..EvaluationConfig::default()
    };
    Evaluation::of(environment_for(packages), config).expect("evaluation should construct")
}

/// Just enough natives for the fixtures: number arithmetic and
/// comparison, identity equality, and collection size.
#[must_use]
#[allow(dead_code)]
pub fn test_natives() -> NativeRegistry {
    let mut registry = NativeRegistry::new();
    number_native(&mut registry, "+", |a, b| a + b);
    number_native(&mut registry, "-", |a, b| a - b);
    number_native(&mut registry, "*", |a, b| a * b);
    registry.register("wollok.lang.Object.==", |evaluation, receiver, args| {
        let answer = evaluation.boolean(args.first().copied().flatten() == Some(receiver));
        evaluation.push_result(Some(answer))
    });
    registry.register("wollok.lang.Boolean.negate", |evaluation, receiver, _args| {
        let truthy = receiver == evaluation.boolean(true);
        let negated = evaluation.boolean(!truthy);
        evaluation.push_result(Some(negated))
    });
    registry.register("wollok.lang.List.size", |evaluation, receiver, _args| {
        let size = match evaluation.instance(receiver).and_then(|o| o.elements()) {
            Some(elements) => elements.len(),
            None => return evaluation.raise_evaluation_error("size expects a collection"),
        };
        let size = evaluation.number(size as f64);
        evaluation.push_result(Some(size))
    });
    registry
}

#[allow(dead_code)]
fn number_native(registry: &mut NativeRegistry, operation: &str, apply: fn(f64, f64) -> f64) {
    registry.register(
        format!("wollok.lang.Number.{}", operation),
        move |evaluation, receiver, args| {
            let (a, b) = match (
                evaluation.number_value(Some(receiver)),
                evaluation.number_value(args.first().copied().flatten()),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => return evaluation.raise_evaluation_error("expected two numbers"),
            };
            let result = evaluation.number(apply(a, b));
            evaluation.push_result(Some(result))
        },
    );
}

/// The instance of a named singleton.
#[must_use]
#[allow(dead_code)]
pub fn singleton_id(evaluation: &Evaluation, fqn: &str) -> InstanceId {
    evaluation
        .global(fqn)
        .flatten()
        .unwrap_or_else(|| panic!("singleton '{}' not found", fqn))
}

/// Send a message to a named singleton.
#[allow(dead_code)]
pub fn send_to(
    evaluation: &mut Evaluation,
    fqn: &str,
    message: &str,
    args: &[InstanceId],
) -> Result<Operand, ExecutionError> {
    let receiver = singleton_id(evaluation, fqn);
    evaluation.send_message(message, receiver, args)
}

/// Send a message to a named singleton, expecting success.
#[allow(dead_code)]
pub fn send_ok(evaluation: &mut Evaluation, fqn: &str, message: &str, args: &[InstanceId]) -> Operand {
    send_to(evaluation, fqn, message, args)
        .unwrap_or_else(|e| panic!("{}.{} failed: {}", fqn, message, e))
}

/// Send a message and read back its numeric result.
#[allow(dead_code)]
pub fn send_number(evaluation: &mut Evaluation, fqn: &str, message: &str) -> f64 {
    let result = send_ok(evaluation, fqn, message, &[]);
    evaluation
        .number_value(result)
        .unwrap_or_else(|| panic!("{}.{} did not answer a number", fqn, message))
}

/// A module's method node, for compiler tests.
#[must_use]
#[allow(dead_code)]
pub fn method_named(environment: &Environment, module_fqn: &str, name: &str) -> NodeId {
    let module = environment
        .lookup(module_fqn)
        .unwrap_or_else(|| panic!("'{}' not found", module_fqn));
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
