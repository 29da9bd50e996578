// wollok-linker - Linking integration tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Integration tests for merging, id assignment, parent wiring and the
//! structural link invariants.

mod common;

use common::*;
use wollok_linker::link_onto;
use wollok_model::node::NodeKind;

// =============================================================================
// Merge scenarios
// =============================================================================

#[test]
fn test_nested_package_stays_apart_from_top_level() {
    // [pkg A { pkg B {} }, pkg B {}, pkg C { class B }] keeps three
    // top-level packages, and A.B is not merged with the top-level B.
    let environment = link_with_base(vec![
        Package::new("A", vec![Entity::Package(Package::new("B", vec![]))]),
        Package::new("B", vec![]),
        Package::new(
            "C",
            vec![Entity::Class(
                Class::new("B", vec![]).extending(Supertype::of("Object")),
            )],
        ),
    ]);

    let a = lookup(&environment, "A");
    assert!(environment.lookup("A.B").is_some());
    assert!(environment.lookup("B").is_some());
    assert!(environment.lookup("C.B").is_some());
    assert_ne!(environment.lookup("A.B"), environment.lookup("B"));
    assert_eq!(environment.node(a).members().len(), 1);
}

#[test]
fn test_same_name_member_right_wins() {
    // [pkg p { class C { field x } }, pkg p { class C { field y } }]
    // leaves a single p.C with only the field y.
    let environment = link_with_base(vec![
        Package::new(
            "p",
            vec![Entity::Class(Class::new(
                "C",
                vec![Member::Field(Field::variable(
                    "x",
                    Some(Expression::number(1.0)),
                ))],
            ))],
        ),
        Package::new(
            "p",
            vec![Entity::Class(Class::new(
                "C",
                vec![Member::Field(Field::variable(
                    "y",
                    Some(Expression::number(2.0)),
                ))],
            ))],
        ),
    ]);

    let class = lookup(&environment, "p.C");
    let members = environment.node(class).members();
    assert_eq!(members.len(), 1);
    assert!(
        matches!(&environment.node(members[0]).kind, NodeKind::Field { name, .. } if name == "y")
    );
}

#[test]
fn test_package_entity_collision_fails() {
    let error = link_error(vec![Package::new(
        "p",
        vec![
            Entity::Package(Package::new("thing", vec![])),
            Entity::Class(Class::new("thing", vec![])),
        ],
    )]);
    assert!(matches!(error, LinkError::MergeConflict { .. }));
}

// =============================================================================
// Structural invariants
// =============================================================================

fn sample_packages() -> Vec<Package> {
    vec![
        Package::new(
            "farm",
            vec![
                Entity::Class(Class::new(
                    "Animal",
                    vec![
                        Member::Field(Field::variable("energy", Some(Expression::number(100.0)))),
                        Member::Method(Method::new(
                            "energy",
                            vec![],
                            Body::of(Expression::reference("energy")),
                        )),
                    ],
                )),
                Entity::Class(
                    Class::new(
                        "Chicken",
                        vec![Member::Method(Method::new(
                            "fly",
                            vec![],
                            Body::of(Expression::boolean(false)),
                        ))],
                    )
                    .extending(Supertype::of("Animal")),
                ),
                Entity::Singleton(Singleton::named(
                    "pepita",
                    vec![Member::Method(Method::new(
                        "sing",
                        vec![],
                        Body::of(Expression::string("twit")),
                    ))],
                )),
                Entity::Variable(Variable::new(
                    "limit",
                    false,
                    Some(Expression::number(42.0)),
                )),
            ],
        ),
        Package::new(
            "city",
            vec![Entity::Class(
                Class::new("Pigeon", vec![]).extending(Supertype::of("farm.Animal")),
            )],
        )
        .importing(vec![Import::generic("farm")]),
    ]
}

fn assert_well_formed(environment: &Environment) {
    // Every node id is unique (the arena guarantees it) and every child's
    // parent back-reference points at its container.
    for node in environment.nodes() {
        for child in node.children() {
            let child_node = environment
                .try_node(child)
                .unwrap_or_else(|| panic!("dangling child of {}", node.kind_name()));
            assert_eq!(child_node.parent, Some(node.id), "parent back-reference");
        }
        if let NodeKind::Reference { name, target } = &node.kind {
            let target = target.unwrap_or_else(|| panic!("unresolved reference '{}'", name));
            assert!(
                environment.try_node(target).is_some(),
                "reference '{}' targets a node outside the environment",
                name
            );
        }
    }
}

#[test]
fn test_linked_environment_is_well_formed() {
    let environment = link_with_base(sample_packages());
    assert_well_formed(&environment);
}

#[test]
fn test_link_is_deterministic_on_shape() {
    let left = link_with_base(sample_packages());
    let right = link_with_base(sample_packages());
    assert_eq!(left.to_packages(), right.to_packages());
}

#[test]
fn test_link_is_idempotent_on_shape() {
    let once = link_with_base(sample_packages());
    let twice = link(once.to_packages()).expect("relink should succeed");
    assert_eq!(once.to_packages(), twice.to_packages());
    assert_well_formed(&twice);
}

#[test]
fn test_link_onto_merges_new_packages_over_base() {
    let base = link_with_base(sample_packages());
    let extended = link_onto(
        &base,
        vec![Package::new(
            "farm",
            vec![Entity::Class(Class::new("Cow", vec![]))],
        )],
    )
    .expect("link_onto should succeed");

    assert!(extended.lookup("farm.Cow").is_some());
    assert!(extended.lookup("farm.Chicken").is_some());
    // The base environment is untouched.
    assert!(base.lookup("farm.Cow").is_none());
}

// =============================================================================
// Cycle tolerance
// =============================================================================

#[test]
fn test_self_inheritance_terminates() {
    let environment = link_with_base(vec![Package::new(
        "p",
        vec![Entity::Class(
            Class::new("C", vec![]).extending(Supertype::of("C")),
        )],
    )]);
    let c = lookup(&environment, "p.C");
    let hierarchy = environment.hierarchy(c);
    assert_eq!(hierarchy[0], c);
    assert_eq!(hierarchy.iter().filter(|&&m| m == c).count(), 1);
}

#[test]
fn test_inheritance_cycle_terminates() {
    let environment = link_with_base(vec![Package::new(
        "p",
        vec![
            Entity::Class(Class::new("A", vec![]).extending(Supertype::of("B"))),
            Entity::Class(Class::new("B", vec![]).extending(Supertype::of("A"))),
        ],
    )]);
    let a = lookup(&environment, "p.A");
    let b = lookup(&environment, "p.B");
    assert!(environment.inherits(a, b));
    assert!(environment.inherits(b, a));
}

#[test]
fn test_mixin_cycle_terminates() {
    // A module appearing in its own mixin list must not hang the walk.
    let environment = link_with_base(vec![Package::new(
        "p",
        vec![Entity::Class(
            Class::new("C", vec![]).mixed_with(vec![Supertype::of("C")]),
        )],
    )]);
    let c = lookup(&environment, "p.C");
    assert_eq!(environment.hierarchy(c)[0], c);
}

// =============================================================================
// Link failures
// =============================================================================

#[test]
fn test_unresolved_reference_fails() {
    let error = link_error(vec![Package::new(
        "p",
        vec![Entity::Singleton(Singleton::named(
            "o",
            vec![Member::Method(Method::new(
                "m",
                vec![],
                Body::of(Expression::reference("nowhere")),
            ))],
        ))],
    )]);
    match error {
        LinkError::UnresolvedReference { name, .. } => assert_eq!(name, "nowhere"),
        other => panic!("expected UnresolvedReference, got {:?}", other),
    }
}

#[test]
fn test_unknown_import_fails() {
    let error = link_error(vec![
        Package::new("p", vec![]).importing(vec![Import::generic("ghost")]),
    ]);
    assert!(matches!(error, LinkError::UnresolvedReference { .. }));
}

#[test]
fn test_variadic_parameter_must_be_last() {
    let error = link_error(vec![Package::new(
        "p",
        vec![Entity::Singleton(Singleton::named(
            "o",
            vec![Member::Method(Method::new(
                "m",
                vec![Parameter::var_arg("xs"), Parameter::new("y")],
                Body::empty(),
            ))],
        ))],
    )]);
    assert!(matches!(error, LinkError::MalformedTree { .. }));
}

#[test]
fn test_local_redeclaration_is_rejected() {
    let error = link_error(vec![Package::new(
        "p",
        vec![Entity::Singleton(Singleton::named(
            "o",
            vec![Member::Method(Method::new(
                "m",
                vec![],
                Body::new(vec![
                    Sentence::Variable(Variable::new("x", true, Some(Expression::number(1.0)))),
                    Sentence::Variable(Variable::new("x", true, Some(Expression::number(2.0)))),
                ]),
            ))],
        ))],
    )]);
    assert!(matches!(error, LinkError::MalformedTree { .. }));
}

#[test]
fn test_super_outside_method_is_rejected() {
    let error = link_error(vec![Package::new(
        "p",
        vec![Entity::Program(Program::new(
            "main",
            Body::of(Expression::super_call(vec![])),
        ))],
    )]);
    assert!(matches!(error, LinkError::MalformedTree { .. }));
}
