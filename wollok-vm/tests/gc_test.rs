// wollok-vm - Garbage collection integration tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Integration tests for mark-and-sweep soundness: reachable instances
//! survive, unreachable ones are swept, and intern tables are purged.

mod common;

use common::*;

fn fixtures() -> Vec<Package> {
    vec![Package::new(
        "p",
        vec![
            Entity::Singleton(Singleton::named(
                "maker",
                vec![Member::Method(Method::new(
                    "make",
                    vec![],
                    Body::of(Expression::literal(Literal::List(vec![
                        Expression::string("garbage"),
                    ]))),
                ))],
            )),
            Entity::Singleton(Singleton::named(
                "keeper",
                vec![Member::Field(Field::variable(
                    "stash",
                    Some(Expression::literal(Literal::List(vec![
                        Expression::string("kept"),
                    ]))),
                ))],
            )),
        ],
    )]
}

#[test]
fn test_unreachable_instances_are_swept() {
    let mut evaluation = evaluation_for(fixtures());
    let made = send_ok(&mut evaluation, "p.maker", "make", &[]).expect("a list");
    assert!(evaluation.has_instance(made));

    // The returned operand is not a root: nothing references it anymore.
    evaluation.garbage_collect();
    assert!(!evaluation.has_instance(made));
}

#[test]
fn test_reachable_instances_survive() {
    let mut evaluation = evaluation_for(fixtures());
    let keeper = singleton_id(&evaluation, "p.keeper");
    let stash = evaluation
        .field_of(keeper, "stash")
        .flatten()
        .expect("stash holds a list");
    let element = evaluation
        .instance(stash)
        .and_then(|o| o.elements().map(|e| e[0]))
        .expect("stash has an element");

    evaluation.garbage_collect();

    // The singleton, its field value and the list's element all survive.
    assert!(evaluation.has_instance(keeper));
    assert!(evaluation.has_instance(stash));
    assert!(evaluation.has_instance(element));
    // So do the interned well-known instances.
    assert!(evaluation.has_instance(evaluation.null()));
    assert!(evaluation.has_instance(evaluation.boolean(true)));
    assert!(evaluation.has_instance(evaluation.boolean(false)));
}

#[test]
fn test_collection_does_not_change_behaviour() {
    let mut evaluation = evaluation_for(fixtures());
    evaluation.garbage_collect();
    let keeper = singleton_id(&evaluation, "p.keeper");
    let stash = evaluation.field_of(keeper, "stash").flatten().expect("list");
    assert_eq!(
        evaluation.instance(stash).and_then(|o| o.elements().map(<[_]>::len)),
        Some(1)
    );
}

#[test]
fn test_intern_tables_are_purged_with_their_instances() {
    let mut evaluation = evaluation_for(vec![]);
    let stale = evaluation.number(123.456);
    assert!(evaluation.has_instance(stale));

    evaluation.garbage_collect();
    assert!(!evaluation.has_instance(stale));

    // Interning after the sweep mints a live instance rather than
    // resurrecting the dead id.
    let fresh = evaluation.number(123.456);
    assert_ne!(fresh, stale);
    assert!(evaluation.has_instance(fresh));
}

#[test]
fn test_instance_count_shrinks_only_by_garbage() {
    let mut evaluation = evaluation_for(fixtures());
    let before = evaluation.instance_count();
    send_ok(&mut evaluation, "p.maker", "make", &[]);
    send_ok(&mut evaluation, "p.maker", "make", &[]);
    assert!(evaluation.instance_count() > before);

    evaluation.garbage_collect();
    let after_sweep = evaluation.instance_count();
    // Running the collector again finds nothing new to sweep.
    evaluation.garbage_collect();
    assert_eq!(evaluation.instance_count(), after_sweep);
}
