// wollok-linker - Package merging
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Package merging.
//!
//! Packages with identical names at the same nesting level merge
//! recursively, bottom-up: a package's own members are normalised before
//! the package is merged with its siblings. When two members share kind
//! and name the right-hand one replaces the left-hand one (last writer
//! wins) at the left-hand one's position; a package colliding with a
//! non-package of the same name is a [`MergeConflict`]. Members of
//! different non-package kinds may share a name — scope binding order
//! decides which one a reference sees.
//!
//! [`MergeConflict`]: crate::LinkError::MergeConflict

use wollok_model::ast::{Entity, Package};

use crate::error::{LinkError, Result};

/// Merge a list of top-level packages.
///
/// The output preserves first-appearance order, so merging is
/// deterministic on tree shape for a given input order.
pub fn merge(packages: Vec<Package>) -> Result<Vec<Package>> {
    let entities = packages.into_iter().map(Entity::Package).collect();
    let merged = merge_members(entities)?;
    Ok(merged
        .into_iter()
        .map(|entity| match entity {
            Entity::Package(p) => p,
            _ => unreachable!("merge_members preserves entity kinds"),
        })
        .collect())
}

/// Normalise a package: merge duplicate members recursively.
fn normalise(package: Package) -> Result<Package> {
    let members = merge_members(package.members)?;
    Ok(Package { members, ..package })
}

fn merge_members(members: Vec<Entity>) -> Result<Vec<Entity>> {
    let mut merged: Vec<Entity> = Vec::new();
    for member in members {
        let member = match member {
            Entity::Package(p) => Entity::Package(normalise(p)?),
            other => other,
        };
        let name = match member.name() {
            Some(name) => name.to_string(),
            None => {
                merged.push(member);
                continue;
            }
        };
        let existing = merged
            .iter()
            .position(|m| m.name() == Some(name.as_str()));
        match existing {
            None => merged.push(member),
            Some(index) => {
                let left = merged.remove(index);
                match (left, member) {
                    (Entity::Package(left), Entity::Package(right)) => {
                        merged.insert(index, Entity::Package(merge_pair(left, right)?));
                    }
                    (left, right) => {
                        let left_kind = kind_of(&left);
                        let right_kind = kind_of(&right);
                        if left_kind == "package" || right_kind == "package" {
                            return Err(LinkError::conflict(name, left_kind, right_kind));
                        }
                        if left_kind == right_kind {
                            // Same kind, same name: the right-hand member
                            // replaces the left-hand one in place.
                            merged.insert(index, right);
                        } else {
                            merged.insert(index, left);
                            merged.push(right);
                        }
                    }
                }
            }
        }
    }
    Ok(merged)
}

fn merge_pair(left: Package, right: Package) -> Result<Package> {
    let mut combined = Package {
        name: left.name,
        imports: left.imports,
        members: left.members,
        source: left.source.or(right.source),
    };
    combined.imports.extend(right.imports);
    combined.members.extend(right.members);
    normalise(combined)
}

fn kind_of(entity: &Entity) -> &'static str {
    match entity {
        Entity::Package(_) => "package",
        Entity::Class(_) => "class",
        Entity::Mixin(_) => "mixin",
        Entity::Singleton(_) => "singleton",
        Entity::Variable(_) => "variable",
        Entity::Program(_) => "program",
        Entity::Test(_) => "test",
        Entity::Describe(_) => "describe",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wollok_model::ast::{Class, Field, Expression};

    fn pkg(name: &str, members: Vec<Entity>) -> Package {
        Package::new(name, members)
    }

    #[test]
    fn test_distinct_packages_kept_apart() {
        let merged = merge(vec![pkg("a", vec![]), pkg("b", vec![])]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[1].name, "b");
    }

    #[test]
    fn test_same_name_packages_merge() {
        let left = pkg(
            "p",
            vec![Entity::Class(Class::new("A", vec![]))],
        );
        let right = pkg(
            "p",
            vec![Entity::Class(Class::new("B", vec![]))],
        );
        let merged = merge(vec![left, right]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].members.len(), 2);
    }

    #[test]
    fn test_right_class_replaces_left() {
        let left = pkg(
            "p",
            vec![Entity::Class(Class::new(
                "C",
                vec![wollok_model::ast::Member::Field(Field::variable(
                    "x",
                    Some(Expression::number(1.0)),
                ))],
            ))],
        );
        let right = pkg(
            "p",
            vec![Entity::Class(Class::new(
                "C",
                vec![wollok_model::ast::Member::Field(Field::variable(
                    "y",
                    Some(Expression::number(2.0)),
                ))],
            ))],
        );
        let merged = merge(vec![left, right]).unwrap();
        assert_eq!(merged.len(), 1);
        match &merged[0].members[0] {
            Entity::Class(c) => {
                assert_eq!(c.members.len(), 1);
                match &c.members[0] {
                    wollok_model::ast::Member::Field(f) => assert_eq!(f.name, "y"),
                    other => panic!("expected field, got {:?}", other),
                }
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_package_not_merged_with_top_level() {
        let merged = merge(vec![
            pkg("a", vec![Entity::Package(pkg("b", vec![]))]),
            pkg("b", vec![]),
        ])
        .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[1].name, "b");
        assert_eq!(merged[0].members.len(), 1);
    }

    #[test]
    fn test_package_class_collision_is_conflict() {
        let result = merge(vec![pkg(
            "p",
            vec![
                Entity::Package(pkg("x", vec![])),
                Entity::Class(Class::new("x", vec![])),
            ],
        )]);
        assert!(matches!(result, Err(LinkError::MergeConflict { .. })));
    }
}
