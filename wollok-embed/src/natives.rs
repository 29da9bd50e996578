// wollok-embed - Default natives for the base library
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Default native bodies for the base library's `native` methods.
//!
//! Every native follows the VM contract: it receives the evaluation, the
//! receiver and the arguments, and leaves exactly one value on the
//! current operand stack or raises. Type mismatches raise
//! `wollok.lang.EvaluationError` so user code can catch them.

use wollok_model::name::well_known;
use wollok_vm::{NativeRegistry, NULL_ID};

/// The native registry covering every `native` method of the base
/// library. Extend or override entries for application-specific natives.
#[must_use]
pub fn default_natives() -> NativeRegistry {
    let mut registry = NativeRegistry::new();

    registry.register(key(well_known::OBJECT, "=="), |evaluation, receiver, args| {
        // Primitives are interned, so id equality covers them too.
        let answer = evaluation.boolean(args.first().copied().flatten() == Some(receiver));
        evaluation.push_result(Some(answer))
    });
    registry.register(
        key(well_known::OBJECT, "identity"),
        |evaluation, receiver, _args| {
            let identity = evaluation.string(&receiver.to_string());
            evaluation.push_result(Some(identity))
        },
    );
    registry.register(
        key(well_known::OBJECT, "kindName"),
        |evaluation, receiver, _args| {
            let module = match evaluation.instance(receiver) {
                Some(object) => object.module,
                None => return evaluation.raise_evaluation_error("receiver vanished"),
            };
            let name = evaluation.environment().fqn(module);
            let name = evaluation.string(&name);
            evaluation.push_result(Some(name))
        },
    );

    registry.register(
        key(well_known::BOOLEAN, "negate"),
        |evaluation, receiver, _args| {
            let truthy = receiver == evaluation.boolean(true);
            let negated = evaluation.boolean(!truthy);
            evaluation.push_result(Some(negated))
        },
    );

    arithmetic(&mut registry, "+", |a, b| a + b);
    arithmetic(&mut registry, "-", |a, b| a - b);
    arithmetic(&mut registry, "*", |a, b| a * b);
    registry.register(key(well_known::NUMBER, "/"), |evaluation, receiver, args| {
        let (a, b) = match (
            evaluation.number_value(Some(receiver)),
            evaluation.number_value(args.first().copied().flatten()),
        ) {
            (Some(a), Some(b)) => (a, b),
            _ => return evaluation.raise_evaluation_error("/ expects two numbers"),
        };
        if b == 0.0 {
            return evaluation.raise_evaluation_error("division by zero");
        }
        let result = evaluation.number(a / b);
        evaluation.push_result(Some(result))
    });
    comparison(&mut registry, ">", |a, b| a > b);
    comparison(&mut registry, "<", |a, b| a < b);
    comparison(&mut registry, ">=", |a, b| a >= b);
    comparison(&mut registry, "<=", |a, b| a <= b);

    registry.register(key(well_known::STRING, "+"), |evaluation, receiver, args| {
        let prefix = match evaluation.string_value(Some(receiver)) {
            Some(s) => s,
            None => return evaluation.raise_evaluation_error("+ expects a string receiver"),
        };
        let argument = args.first().copied().flatten();
        let suffix = evaluation
            .string_value(argument)
            .unwrap_or_else(|| evaluation.describe_operand(argument));
        let joined = evaluation.string(&format!("{}{}", prefix, suffix));
        evaluation.push_result(Some(joined))
    });
    registry.register(
        key(well_known::STRING, "length"),
        |evaluation, receiver, _args| {
            let length = match evaluation.string_value(Some(receiver)) {
                Some(s) => s.chars().count(),
                None => return evaluation.raise_evaluation_error("length expects a string"),
            };
            let length = evaluation.number(length as f64);
            evaluation.push_result(Some(length))
        },
    );

    collection(&mut registry, well_known::LIST, false);
    collection(&mut registry, well_known::SET, true);

    registry.register(
        "wollok.lang.console.println",
        |evaluation, _receiver, args| {
            let text = evaluation.describe_operand(args.first().copied().flatten());
            println!("{}", text);
            evaluation.push_result(Some(NULL_ID))
        },
    );

    registry
}

fn key(module: &str, method: &str) -> String {
    format!("{}.{}", module, method)
}

fn arithmetic(registry: &mut NativeRegistry, operation: &'static str, apply: fn(f64, f64) -> f64) {
    registry.register(
        key(well_known::NUMBER, operation),
        move |evaluation, receiver, args| {
            let (a, b) = match (
                evaluation.number_value(Some(receiver)),
                evaluation.number_value(args.first().copied().flatten()),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return evaluation
                        .raise_evaluation_error(&format!("{} expects two numbers", operation))
                }
            };
            let result = evaluation.number(apply(a, b));
            evaluation.push_result(Some(result))
        },
    );
}

fn comparison(
    registry: &mut NativeRegistry,
    operation: &'static str,
    apply: fn(f64, f64) -> bool,
) {
    registry.register(
        key(well_known::NUMBER, operation),
        move |evaluation, receiver, args| {
            let (a, b) = match (
                evaluation.number_value(Some(receiver)),
                evaluation.number_value(args.first().copied().flatten()),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return evaluation
                        .raise_evaluation_error(&format!("{} expects two numbers", operation))
                }
            };
            let answer = evaluation.boolean(apply(a, b));
            evaluation.push_result(Some(answer))
        },
    );
}

fn collection(registry: &mut NativeRegistry, module: &str, unique: bool) {
    registry.register(key(module, "add"), move |evaluation, receiver, args| {
        let element = args.first().copied().flatten().unwrap_or(NULL_ID);
        let mut elements = match evaluation.instance(receiver).and_then(|o| o.elements()) {
            Some(elements) => elements.to_vec(),
            None => return evaluation.raise_evaluation_error("add expects a collection"),
        };
        if !unique || !elements.contains(&element) {
            elements.push(element);
        }
        evaluation.set_elements(receiver, elements);
        evaluation.push_result(Some(NULL_ID))
    });
    registry.register(key(module, "size"), |evaluation, receiver, _args| {
        let size = match evaluation.instance(receiver).and_then(|o| o.elements()) {
            Some(elements) => elements.len(),
            None => return evaluation.raise_evaluation_error("size expects a collection"),
        };
        let size = evaluation.number(size as f64);
        evaluation.push_result(Some(size))
    });
    registry.register(key(module, "clear"), |evaluation, receiver, _args| {
        evaluation.set_elements(receiver, Vec::new());
        evaluation.push_result(Some(NULL_ID))
    });
}
