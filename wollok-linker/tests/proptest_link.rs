// wollok-linker - Property-based tests for link invariants
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Property-based tests for the structural link invariants: shape
//! determinism, idempotence, parent soundness, reference soundness and
//! cycle termination over randomized package forests.

mod common;

use common::*;
use proptest::prelude::*;
use wollok_model::node::NodeKind;

/// A generated class: name index, optional superclass index (possibly
/// itself — inheritance cycles are legal input), and a flag for a field
/// with a numeric initializer.
#[derive(Debug, Clone)]
struct GenClass {
    name: usize,
    superclass: Option<usize>,
    field: bool,
}

fn class_name(index: usize) -> String {
    format!("C{}", index)
}

fn package_name(index: usize) -> String {
    format!("p{}", index)
}

fn gen_class() -> impl Strategy<Value = GenClass> {
    (0..4usize, proptest::option::of(0..4usize), any::<bool>()).prop_map(
        |(name, superclass, field)| GenClass {
            name,
            superclass,
            field,
        },
    )
}

fn gen_package() -> impl Strategy<Value = (usize, Vec<GenClass>)> {
    (0..3usize, proptest::collection::vec(gen_class(), 1..5))
}

fn build_packages(generated: Vec<(usize, Vec<GenClass>)>) -> Vec<Package> {
    generated
        .into_iter()
        .map(|(package, classes)| {
            // Superclass references must resolve: only point at class
            // names that exist in this package (cycles included).
            let present: Vec<usize> = classes.iter().map(|c| c.name).collect();
            let members = classes
                .into_iter()
                .map(|class| {
                    let mut built = Class::new(class_name(class.name), vec![]);
                    if let Some(superclass) = class.superclass {
                        if present.contains(&superclass) {
                            built = built.extending(Supertype::of(class_name(superclass)));
                        }
                    }
                    if class.field {
                        built.members.push(Member::Field(Field::variable(
                            "value",
                            Some(Expression::number(1.0)),
                        )));
                    }
                    Entity::Class(built)
                })
                .collect();
            Package::new(package_name(package), members)
        })
        .collect()
}

fn assert_well_formed(environment: &Environment) {
    for node in environment.nodes() {
        for child in node.children() {
            let child_node = environment.try_node(child).expect("child in arena");
            assert_eq!(child_node.parent, Some(node.id));
        }
        if let NodeKind::Reference { name, target } = &node.kind {
            let target = target.unwrap_or_else(|| panic!("unresolved '{}'", name));
            assert!(environment.try_node(target).is_some());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Linking random package forests terminates and produces a sound
    /// tree — self-inheritance and inheritance cycles included.
    #[test]
    fn link_terminates_and_is_sound(generated in proptest::collection::vec(gen_package(), 1..4)) {
        let environment = link_with_base(build_packages(generated));
        assert_well_formed(&environment);

        // Linearization terminates for every module in the tree.
        for id in environment.ids() {
            if environment.node(id).is_module() {
                let hierarchy = environment.hierarchy(id);
                prop_assert!(!hierarchy.is_empty());
                prop_assert_eq!(hierarchy[0], id);
            }
        }
    }

    /// The same input always links to the same tree shape.
    #[test]
    fn link_is_deterministic(generated in proptest::collection::vec(gen_package(), 1..4)) {
        let left = link_with_base(build_packages(generated.clone()));
        let right = link_with_base(build_packages(generated));
        prop_assert_eq!(left.to_packages(), right.to_packages());
    }

    /// Relinking a linked environment reproduces its shape.
    #[test]
    fn link_is_idempotent(generated in proptest::collection::vec(gen_package(), 1..4)) {
        let once = link_with_base(build_packages(generated));
        let twice = link(once.to_packages()).expect("relink succeeds");
        prop_assert_eq!(once.to_packages(), twice.to_packages());
    }
}
