// wollok-vm - Compiler lowering tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Tests for the lowering rules: the exact instruction sequences the
//! compiler produces for sentences, expressions and control flow.

mod common;

use common::*;
use wollok_vm::compiler::{compile, EXCEPTION_LOCAL};
use wollok_vm::{CompileError, InnerSpec, Instruction};

fn instructions_for(packages: Vec<Package>, module_fqn: &str, method: &str) -> Vec<Instruction> {
    let environment = environment_for(packages);
    let node = method_named(&environment, module_fqn, method);
    compile(&environment, node).expect("compilation should succeed")
}

fn object_with(methods: Vec<Member>) -> Vec<Package> {
    vec![Package::new(
        "p",
        vec![Entity::Singleton(Singleton::named("o", methods))],
    )]
}

fn load(name: &str) -> Instruction {
    Instruction::Load(name.to_string())
}

fn store(name: &str, lookup: bool) -> Instruction {
    Instruction::Store {
        name: name.to_string(),
        lookup,
    }
}

fn number(value: f64) -> Instruction {
    Instruction::Instantiate {
        module: "wollok.lang.Number".to_string(),
        inner: Some(InnerSpec::Number(value)),
    }
}

// =============================================================================
// Sentences
// =============================================================================

#[test]
fn test_expression_method_returns_its_value() {
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::of(Expression::number(42.0)),
        ))]),
        "p.o",
        "m",
    );
    assert_eq!(code, vec![number(42.0), Instruction::Return]);
}

#[test]
fn test_variable_declaration_lowering() {
    // var a = 1  =>  compile(e); STORE a; PUSH undefined
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::new(vec![Sentence::Variable(Variable::new(
                "a",
                true,
                Some(Expression::number(1.0)),
            ))]),
        ))]),
        "p.o",
        "m",
    );
    assert_eq!(
        code,
        vec![
            number(1.0),
            store("a", false),
            Instruction::Push(None),
            Instruction::Return,
        ]
    );
}

#[test]
fn test_assignment_lowering() {
    let code = instructions_for(
        object_with(vec![
            Member::Field(Field::variable("x", Some(Expression::number(0.0)))),
            Member::Method(Method::new(
                "m",
                vec![],
                Body::new(vec![Sentence::Assignment(Assignment::new(
                    "x",
                    Expression::number(1.0),
                ))]),
            )),
        ]),
        "p.o",
        "m",
    );
    assert_eq!(
        code,
        vec![
            number(1.0),
            store("x", true),
            Instruction::Push(None),
            Instruction::Return,
        ]
    );
}

#[test]
fn test_self_lowering() {
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::of(Expression::self_ref()),
        ))]),
        "p.o",
        "m",
    );
    assert_eq!(code, vec![load("self"), Instruction::Return]);
}

#[test]
fn test_send_lowering() {
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::of(Expression::send(
                Expression::self_ref(),
                "f",
                vec![Expression::number(1.0)],
            )),
        ))]),
        "p.o",
        "m",
    );
    assert_eq!(
        code,
        vec![
            load("self"),
            number(1.0),
            Instruction::Call {
                message: "f".to_string(),
                arity: 1,
                lookup_start: None,
                skip_receiver_context: false,
            },
            Instruction::Return,
        ]
    );
}

#[test]
fn test_super_lowering_starts_lookup_at_the_enclosing_module() {
    let packages = vec![Package::new(
        "p",
        vec![
            Entity::Class(Class::new(
                "A",
                vec![Member::Method(Method::new(
                    "m",
                    vec![],
                    Body::of(Expression::number(1.0)),
                ))],
            )),
            Entity::Class(
                Class::new(
                    "B",
                    vec![Member::Method(Method::new(
                        "m",
                        vec![],
                        Body::of(Expression::super_call(vec![])),
                    ))],
                )
                .extending(Supertype::of("A")),
            ),
        ],
    )];
    let code = instructions_for(packages, "p.B", "m");
    assert_eq!(
        code,
        vec![
            load("self"),
            Instruction::Call {
                message: "m".to_string(),
                arity: 0,
                lookup_start: Some("p.B".to_string()),
                skip_receiver_context: false,
            },
            Instruction::Return,
        ]
    );
}

#[test]
fn test_module_references_load_by_fqn() {
    let packages = vec![Package::new(
        "p",
        vec![
            Entity::Singleton(Singleton::named("other", vec![])),
            Entity::Singleton(Singleton::named(
                "o",
                vec![Member::Method(Method::new(
                    "m",
                    vec![],
                    Body::of(Expression::reference("other")),
                ))],
            )),
        ],
    )];
    let code = instructions_for(packages, "p.o", "m");
    assert_eq!(code, vec![load("p.other"), Instruction::Return]);
}

// =============================================================================
// Control flow
// =============================================================================

#[test]
fn test_if_lowering_layout() {
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::of(Expression::if_else(
                Expression::boolean(true),
                Body::of(Expression::number(1.0)),
                Body::of(Expression::number(2.0)),
            )),
        ))]),
        "p.o",
        "m",
    );
    assert_eq!(
        code,
        vec![
            Instruction::Push(Some(wollok_vm::TRUE_ID)),
            Instruction::PushContext { handler: None },
            Instruction::ConditionalJump(2),
            number(2.0),
            Instruction::Jump(1),
            number(1.0),
            Instruction::PopContext,
            Instruction::Return,
        ]
    );
}

#[test]
fn test_throw_compiles_to_interrupt() {
    let code = instructions_for(
        object_with(vec![
            Member::Field(Field::variable("boom", Some(Expression::nil()))),
            Member::Method(Method::new(
                "m",
                vec![],
                Body::of(Expression::throw(Expression::reference("boom"))),
            )),
        ]),
        "p.o",
        "m",
    );
    assert_eq!(
        code,
        vec![load("boom"), Instruction::Interrupt, Instruction::Return]
    );
}

#[test]
fn test_try_prelude_and_handler_point_at_the_catches() {
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::of(Expression::Try(Box::new(Try {
                body: Body::of(Expression::number(1.0)),
                catches: vec![Catch::new(
                    "e",
                    Some("Exception".to_string()),
                    Body::of(Expression::number(2.0)),
                )],
                always: None,
                source: None,
            }))),
        ))]),
        "p.o",
        "m",
    );

    // Prelude: wrapper context, <exception> = false, <result> = undefined.
    assert_eq!(code[0], Instruction::PushContext { handler: None });
    assert_eq!(code[1], Instruction::Push(Some(wollok_vm::FALSE_ID)));
    assert_eq!(code[2], store(EXCEPTION_LOCAL, false));
    assert_eq!(code[3], Instruction::Push(None));
    assert_eq!(code[4], store("<result>", false));

    // The guarded body context records a handler, and the handler's
    // target is the first catch test: LOAD <exception>.
    let handler = match code[5] {
        Instruction::PushContext { handler: Some(delta) } => delta,
        ref other => panic!("expected a handler context, got {:?}", other),
    };
    assert_eq!(code[6 + handler], load(EXCEPTION_LOCAL));
    assert_eq!(
        code[7 + handler],
        Instruction::Inherits {
            module: "wollok.lang.Exception".to_string(),
        }
    );

    // A pending throwable re-raises after the always section.
    let interrupts = code
        .iter()
        .filter(|i| matches!(i, Instruction::Interrupt))
        .count();
    assert_eq!(interrupts, 1);
    assert_eq!(code.last(), Some(&Instruction::Return));
}

// =============================================================================
// Other compilation roots
// =============================================================================

#[test]
fn test_programs_compile_as_statements() {
    let environment = environment_for(vec![Package::new(
        "p",
        vec![Entity::Program(Program::new(
            "main",
            Body::new(vec![
                Sentence::Expression(Expression::number(1.0)),
                Sentence::Expression(Expression::number(2.0)),
            ]),
        ))],
    )]);
    let program = environment.lookup("p.main").expect("program exists");
    let code = compile(&environment, program).expect("compiles");
    assert_eq!(
        code,
        vec![number(1.0), Instruction::Pop, number(2.0), Instruction::Pop]
    );
}

#[test]
fn test_global_variable_compiles_to_a_self_replacing_thunk() {
    let environment = environment_for(vec![Package::new(
        "p",
        vec![Entity::Variable(Variable::new(
            "g",
            false,
            Some(Expression::number(9.0)),
        ))],
    )]);
    let variable = environment.lookup("p.g").expect("variable exists");
    let code = compile(&environment, variable).expect("compiles");
    assert_eq!(
        code,
        vec![
            number(9.0),
            Instruction::Dup,
            store("p.g", true),
            Instruction::Return,
        ]
    );
}

#[test]
fn test_constructors_return_self() {
    let environment = environment_for(vec![Package::new(
        "p",
        vec![Entity::Class(Class::new(
            "C",
            vec![Member::Constructor(Constructor::new(vec![], Body::empty()))],
        ))],
    )]);
    let class = environment.lookup("p.C").expect("class exists");
    let constructor = environment.node(class).members()[0];
    let code = compile(&environment, constructor).expect("compiles");
    assert_eq!(code, vec![load("self"), Instruction::Return]);
}

#[test]
fn test_singleton_literal_lowering() {
    let code = instructions_for(
        object_with(vec![Member::Method(Method::new(
            "m",
            vec![],
            Body::of(Expression::closure(vec![], Body::of(Expression::number(1.0)))),
        ))]),
        "p.o",
        "m",
    );
    assert!(matches!(
        code[0],
        Instruction::Instantiate { inner: None, .. }
    ));
    assert_eq!(code[1], Instruction::InitNamed { names: vec![] });
    assert!(matches!(
        code[2],
        Instruction::Init {
            arity: 0,
            optional: true,
            ..
        }
    ));
    assert_eq!(code[3], Instruction::Return);
}

#[test]
fn test_unhandled_node_kinds_are_rejected() {
    let environment = environment_for(object_with(vec![Member::Method(Method::new(
        "m",
        vec![Parameter::new("x")],
        Body::empty(),
    ))]));
    let method = method_named(&environment, "p.o", "m");
    let parameter = match &environment.node(method).kind {
        NodeKind::Method { parameters, .. } => parameters[0],
        other => panic!("method expected, found {:?}", other),
    };
    let error = compile(&environment, parameter).expect_err("parameters have no code");
    assert!(matches!(error, CompileError::UnexpectedNode { .. }));
}
