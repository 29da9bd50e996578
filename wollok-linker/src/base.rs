// wollok-linker - Built-in base library
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The built-in `wollok` base library.
//!
//! Every environment must provide the well-known modules the VM depends
//! on (`wollok.lang.Object`, the primitive wrappers, the exception
//! classes). The real Wollok standard library is source code parsed like
//! any other package and is out of scope here; this module builds a
//! minimal seed tree programmatically so the core is self-hosting enough
//! to link, evaluate and test against. Primitive operations are declared
//! `native` and dispatched through the native registry —
//! `wollok-embed` ships a default implementation.

use wollok_model::ast::{
    Assignment, Body, Class, Entity, Expression, Field, Member, Method, Package, Parameter,
    Return, Sentence, Singleton, Supertype,
};

/// The packages every link starts from.
#[must_use]
pub fn base_packages() -> Vec<Package> {
    vec![Package::new(
        "wollok",
        vec![Entity::Package(lang_package())],
    )]
}

fn lang_package() -> Package {
    Package::new(
        "lang",
        vec![
            Entity::Class(object_class()),
            Entity::Class(boolean_class()),
            Entity::Class(number_class()),
            Entity::Class(string_class()),
            Entity::Class(list_class()),
            Entity::Class(set_class()),
            Entity::Class(Class::new("Closure", vec![])),
            Entity::Class(exception_class()),
            Entity::Class(
                Class::new("EvaluationError", vec![]).extending(Supertype::of("Exception")),
            ),
            Entity::Class(
                Class::new("StackOverflowException", vec![])
                    .extending(Supertype::of("Exception")),
            ),
            Entity::Singleton(console_singleton()),
        ],
    )
}

fn object_class() -> Class {
    Class::new(
        "Object",
        vec![
            Member::Method(Method::native("==", vec![Parameter::new("other")])),
            Member::Method(Method::new(
                "!=",
                vec![Parameter::new("other")],
                Body::of(Expression::send(
                    Expression::send(
                        Expression::self_ref(),
                        "==",
                        vec![Expression::reference("other")],
                    ),
                    "negate",
                    vec![],
                )),
            )),
            Member::Method(Method::native("identity", vec![])),
            Member::Method(Method::native("kindName", vec![])),
        ],
    )
}

fn boolean_class() -> Class {
    Class::new(
        "Boolean",
        vec![
            Member::Method(Method::native("negate", vec![])),
            Member::Method(Method::new(
                "!",
                vec![],
                Body::of(Expression::send(Expression::self_ref(), "negate", vec![])),
            )),
        ],
    )
}

fn number_class() -> Class {
    let binary_natives = ["+", "-", "*", "/", ">", "<", ">=", "<="];
    let members = binary_natives
        .iter()
        .map(|op| Member::Method(Method::native(*op, vec![Parameter::new("other")])))
        .collect();
    Class::new("Number", members)
}

fn string_class() -> Class {
    Class::new(
        "String",
        vec![
            Member::Method(Method::native("+", vec![Parameter::new("other")])),
            Member::Method(Method::native("length", vec![])),
        ],
    )
}

fn list_class() -> Class {
    Class::new(
        "List",
        vec![
            Member::Method(Method::native("add", vec![Parameter::new("element")])),
            Member::Method(Method::native("size", vec![])),
            Member::Method(Method::native("clear", vec![])),
        ],
    )
}

fn set_class() -> Class {
    Class::new(
        "Set",
        vec![
            Member::Method(Method::native("add", vec![Parameter::new("element")])),
            Member::Method(Method::native("size", vec![])),
            Member::Method(Method::native("clear", vec![])),
        ],
    )
}

fn exception_class() -> Class {
    Class::new(
        "Exception",
        vec![
            Member::Field(Field::variable("message", Some(Expression::nil()))),
            Member::Constructor(wollok_model::ast::Constructor::new(
                vec![Parameter::new("aMessage")],
                Body::new(vec![Sentence::Assignment(Assignment::new(
                    "message",
                    Expression::reference("aMessage"),
                ))]),
            )),
            Member::Method(Method::new(
                "message",
                vec![],
                Body::new(vec![Sentence::Return(Return {
                    value: Some(Expression::reference("message")),
                    source: None,
                })]),
            )),
        ],
    )
}

fn console_singleton() -> Singleton {
    Singleton::named(
        "console",
        vec![Member::Method(Method::native(
            "println",
            vec![Parameter::new("obj")],
        ))],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wollok_model::well_known;

    #[test]
    fn test_base_library_links_alone() {
        let environment = crate::link(base_packages()).expect("base library should link");
        for fqn in well_known::ALL {
            assert!(
                environment.lookup(fqn).is_some(),
                "well-known module {} missing",
                fqn
            );
        }
    }

    #[test]
    fn test_exception_subclasses_chain_to_object() {
        let environment = crate::link(base_packages()).unwrap();
        let error = environment.lookup(well_known::EVALUATION_ERROR).unwrap();
        let exception = environment.lookup(well_known::EXCEPTION).unwrap();
        let object = environment.lookup(well_known::OBJECT).unwrap();
        assert!(environment.inherits(error, exception));
        assert!(environment.inherits(error, object));
        assert!(!environment.inherits(exception, error));
    }
}
