// wollok-linker - Scope computation and reference resolution
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Scope computation and reference resolution.
//!
//! Resolution is staged. Package scopes come first (root names, imports,
//! local members), then supertype references resolve against their
//! enclosing package so linearizations become available, and finally a
//! lexical walk computes every remaining scope and resolves every
//! remaining reference:
//!
//! - a module's scope extends its package's scope with the fields of its
//!   whole linearization, most general first, so the most specific
//!   declaration shadows;
//! - field initializers and supertype arguments resolve in the module
//!   scope, so a field outshadows an entity of the same name;
//! - parameters extend the module scope inside methods, and a local
//!   variable is visible from its own declaration onwards — including
//!   inside its own initializer.
//!
//! Inheritance cycles are tolerated here (the linearization walk carries a
//! visited set); diagnosing them is the validator's business.

use std::collections::HashSet;

use wollok_model::name::{segments, simple_name, FQN_SEPARATOR};
use wollok_model::node::{MethodBody, NodeKind};
use wollok_model::{Environment, NodeId, Scope};

use crate::error::{LinkError, Result};

/// Whether the surrounding declaration admits `super`.
#[derive(Clone, Copy)]
struct Ctx {
    in_method: bool,
}

pub(crate) fn resolve(environment: &mut Environment) -> Result<()> {
    let root = environment.root();
    let root_scope = root_scope(environment);
    environment.node_mut(root).scope = root_scope.clone();

    let top_level: Vec<NodeId> = environment.node(root).members().to_vec();
    for package in &top_level {
        package_scopes(environment, *package, &root_scope)?;
    }
    resolve_supertypes(environment)?;
    for package in &top_level {
        resolve_package(environment, *package)?;
    }
    Ok(())
}

/// The scope every other scope extends: the public members of
/// `wollok.lang` (auto-imported everywhere), shadowed by the top-level
/// package names.
fn root_scope(environment: &Environment) -> Scope {
    let mut scope = Scope::new();
    if let Some(lang) = environment.lookup("wollok.lang") {
        for &member in environment.node(lang).members() {
            if let Some(name) = environment.node(member).name() {
                scope.bind(name.to_string(), member);
            }
        }
    }
    for &package in environment.node(environment.root()).members() {
        if let Some(name) = environment.node(package).name() {
            scope.bind(name.to_string(), package);
        }
    }
    scope
}

/// Compute a package's scope (parent, then imports, then local members,
/// each layer shadowing the previous) and recurse into nested packages.
fn package_scopes(environment: &mut Environment, package: NodeId, parent: &Scope) -> Result<()> {
    let (imports, members) = match &environment.node(package).kind {
        NodeKind::Package {
            imports, members, ..
        } => (imports.clone(), members.clone()),
        other => {
            return Err(LinkError::malformed(format!(
                "package expected, found {}",
                other_name(other)
            )))
        }
    };

    let mut scope = parent.clone();
    for import in imports {
        bind_import(environment, import, &mut scope)?;
        environment.node_mut(import).scope = scope.clone();
    }
    for &member in &members {
        if let Some(name) = environment.node(member).name() {
            scope.bind(name.to_string(), member);
        }
    }
    environment.node_mut(package).scope = scope.clone();

    for member in members {
        if matches!(environment.node(member).kind, NodeKind::Package { .. }) {
            package_scopes(environment, member, &scope)?;
        }
    }
    Ok(())
}

fn bind_import(environment: &Environment, import: NodeId, scope: &mut Scope) -> Result<()> {
    let (path, generic) = match &environment.node(import).kind {
        NodeKind::Import { path, generic } => (path.clone(), *generic),
        _ => unreachable!("import node expected"),
    };
    let target = environment
        .lookup(&path)
        .ok_or_else(|| LinkError::unresolved(path.clone(), import))?;
    if generic {
        if !environment.node(target).is_package() {
            return Err(LinkError::malformed(format!(
                "generic import '{}' does not name a package",
                path
            )));
        }
        for &member in environment.node(target).members() {
            if let Some(name) = environment.node(member).name() {
                scope.bind(name.to_string(), member);
            }
        }
    } else {
        scope.bind(simple_name(&path).to_string(), target);
    }
    Ok(())
}

/// Resolve every supertype clause's reference against its enclosing
/// package, making linearizations available to the later passes.
fn resolve_supertypes(environment: &mut Environment) -> Result<()> {
    let supertypes: Vec<NodeId> = environment
        .ids()
        .filter(|&id| {
            matches!(
                environment.node(id).kind,
                NodeKind::ParameterizedType { .. }
            )
        })
        .collect();
    for supertype in supertypes {
        let reference = match &environment.node(supertype).kind {
            NodeKind::ParameterizedType { reference, .. } => *reference,
            _ => unreachable!(),
        };
        let scope = enclosing_package_scope(environment, supertype);
        resolve_reference(environment, reference, &scope)?;
    }
    Ok(())
}

fn enclosing_package_scope(environment: &Environment, mut id: NodeId) -> Scope {
    while let Some(parent) = environment.node(id).parent {
        if environment.node(parent).is_package() {
            return environment.node(parent).scope.clone();
        }
        id = parent;
    }
    environment.node(environment.root()).scope.clone()
}

fn resolve_package(environment: &mut Environment, package: NodeId) -> Result<()> {
    let scope = environment.node(package).scope.clone();
    let members: Vec<NodeId> = environment.node(package).members().to_vec();
    for member in members {
        match &environment.node(member).kind {
            NodeKind::Package { .. } => resolve_package(environment, member)?,
            NodeKind::Variable { .. } => resolve_variable_entity(environment, member, &scope)?,
            NodeKind::Program { body, .. } | NodeKind::Test { body, .. } => {
                let body = *body;
                environment.node_mut(member).scope = scope.clone();
                resolve_body(environment, body, scope.clone(), Ctx { in_method: false })?;
            }
            NodeKind::Class { .. }
            | NodeKind::Mixin { .. }
            | NodeKind::Singleton { .. }
            | NodeKind::Describe { .. } => resolve_module(environment, member, &scope)?,
            other => {
                return Err(LinkError::malformed(format!(
                    "unexpected package member: {}",
                    other_name(other)
                )))
            }
        }
    }
    Ok(())
}

fn resolve_variable_entity(
    environment: &mut Environment,
    variable: NodeId,
    scope: &Scope,
) -> Result<()> {
    let value = match &environment.node(variable).kind {
        NodeKind::Variable { value, .. } => *value,
        _ => unreachable!("variable node expected"),
    };
    environment.node_mut(variable).scope = scope.clone();
    if let Some(value) = value {
        resolve_expression(environment, value, scope.clone(), Ctx { in_method: false })?;
    }
    Ok(())
}

/// Resolve a module (entity-level or literal): extend the base scope with
/// the linearized fields, then walk supertype arguments and members.
fn resolve_module(environment: &mut Environment, module: NodeId, base: &Scope) -> Result<()> {
    let mut scope = base.clone();
    let hierarchy = environment.hierarchy(module);
    for &ancestor in hierarchy.iter().rev() {
        for &member in environment.node(ancestor).members() {
            if let NodeKind::Field { name, .. } = &environment.node(member).kind {
                scope.bind(name.clone(), member);
            }
        }
    }
    environment.node_mut(module).scope = scope.clone();

    let (supertypes, members) = match &environment.node(module).kind {
        NodeKind::Class {
            superclass,
            mixins,
            members,
            ..
        }
        | NodeKind::Singleton {
            superclass,
            mixins,
            members,
            ..
        } => {
            let mut supertypes: Vec<NodeId> = superclass.iter().copied().collect();
            supertypes.extend(mixins);
            (supertypes, members.clone())
        }
        NodeKind::Mixin { members, .. } | NodeKind::Describe { members, .. } => {
            (Vec::new(), members.clone())
        }
        other => {
            return Err(LinkError::malformed(format!(
                "module expected, found {}",
                other_name(other)
            )))
        }
    };

    // Supercall arguments resolve against the module's fields.
    for supertype in supertypes {
        let args = match &environment.node(supertype).kind {
            NodeKind::ParameterizedType { args, .. } => args.clone(),
            _ => unreachable!(),
        };
        for arg in args {
            resolve_argument(environment, arg, &scope)?;
        }
    }

    for member in members {
        match &environment.node(member).kind {
            NodeKind::Field { value, .. } => {
                let value = *value;
                environment.node_mut(member).scope = scope.clone();
                if let Some(value) = value {
                    resolve_expression(
                        environment,
                        value,
                        scope.clone(),
                        Ctx { in_method: false },
                    )?;
                }
            }
            NodeKind::Method {
                parameters, body, ..
            } => {
                let parameters = parameters.clone();
                let body = match body {
                    MethodBody::Body(b) => Some(*b),
                    MethodBody::Native | MethodBody::Abstract => None,
                };
                let method_scope =
                    bind_parameters(environment, member, &scope, &parameters)?;
                if let Some(body) = body {
                    resolve_body(environment, body, method_scope, Ctx { in_method: true })?;
                }
            }
            NodeKind::Constructor { parameters, body } => {
                let parameters = parameters.clone();
                let body = *body;
                let constructor_scope =
                    bind_parameters(environment, member, &scope, &parameters)?;
                resolve_body(environment, body, constructor_scope, Ctx { in_method: false })?;
            }
            NodeKind::Test { body, .. } => {
                let body = *body;
                environment.node_mut(member).scope = scope.clone();
                resolve_body(environment, body, scope.clone(), Ctx { in_method: false })?;
            }
            other => {
                return Err(LinkError::malformed(format!(
                    "unexpected module member: {}",
                    other_name(other)
                )))
            }
        }
    }
    Ok(())
}

fn bind_parameters(
    environment: &mut Environment,
    owner: NodeId,
    base: &Scope,
    parameters: &[NodeId],
) -> Result<Scope> {
    let mut scope = base.clone();
    for &parameter in parameters {
        let name = match &environment.node(parameter).kind {
            NodeKind::Parameter { name, .. } => name.clone(),
            _ => unreachable!("parameter node expected"),
        };
        scope.bind(name, parameter);
        environment.node_mut(parameter).scope = scope.clone();
    }
    environment.node_mut(owner).scope = scope.clone();
    Ok(scope)
}

/// Walk a body sentence by sentence. A variable declaration extends the
/// scope for the rest of the body and for its own initializer, and may not
/// redeclare a name already declared in the same body.
fn resolve_body(
    environment: &mut Environment,
    body: NodeId,
    mut scope: Scope,
    ctx: Ctx,
) -> Result<()> {
    environment.node_mut(body).scope = scope.clone();
    let sentences: Vec<NodeId> = match &environment.node(body).kind {
        NodeKind::Body { sentences } => sentences.clone(),
        other => {
            return Err(LinkError::malformed(format!(
                "body expected, found {}",
                other_name(other)
            )))
        }
    };

    let mut declared: HashSet<String> = HashSet::new();
    for sentence in sentences {
        match &environment.node(sentence).kind {
            NodeKind::Variable { name, value, .. } => {
                let name = name.clone();
                let value = *value;
                if !declared.insert(name.clone()) {
                    return Err(LinkError::malformed(format!(
                        "'{}' is already declared in this body",
                        name
                    )));
                }
                scope.bind(name, sentence);
                environment.node_mut(sentence).scope = scope.clone();
                if let Some(value) = value {
                    resolve_expression(environment, value, scope.clone(), ctx)?;
                }
            }
            NodeKind::Return { value } => {
                let value = *value;
                environment.node_mut(sentence).scope = scope.clone();
                if let Some(value) = value {
                    resolve_expression(environment, value, scope.clone(), ctx)?;
                }
            }
            NodeKind::Assignment { reference, value } => {
                let (reference, value) = (*reference, *value);
                environment.node_mut(sentence).scope = scope.clone();
                resolve_reference(environment, reference, &scope)?;
                resolve_expression(environment, value, scope.clone(), ctx)?;
            }
            _ => resolve_expression(environment, sentence, scope.clone(), ctx)?,
        }
    }
    Ok(())
}

fn resolve_expression(
    environment: &mut Environment,
    expression: NodeId,
    scope: Scope,
    ctx: Ctx,
) -> Result<()> {
    environment.node_mut(expression).scope = scope.clone();
    let kind = environment.node(expression).kind.clone();
    match kind {
        NodeKind::SelfRef => Ok(()),
        NodeKind::Reference { .. } => resolve_reference(environment, expression, &scope),
        NodeKind::Literal { value } => {
            use wollok_model::LiteralValue;
            match value {
                LiteralValue::List(elements) | LiteralValue::Set(elements) => {
                    for element in elements {
                        resolve_expression(environment, element, scope.clone(), ctx)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
        NodeKind::Send { receiver, args, .. } => {
            resolve_expression(environment, receiver, scope.clone(), ctx)?;
            for arg in args {
                resolve_expression(environment, arg, scope.clone(), ctx)?;
            }
            Ok(())
        }
        NodeKind::Super { args } => {
            if !ctx.in_method {
                return Err(LinkError::malformed("super is only valid inside a method"));
            }
            for arg in args {
                resolve_expression(environment, arg, scope.clone(), ctx)?;
            }
            Ok(())
        }
        NodeKind::New { instantiated, args } => {
            resolve_reference(environment, instantiated, &scope)?;
            for arg in args {
                resolve_argument_in(environment, arg, &scope, ctx)?;
            }
            Ok(())
        }
        NodeKind::If {
            condition,
            then_body,
            else_body,
        } => {
            resolve_expression(environment, condition, scope.clone(), ctx)?;
            resolve_body(environment, then_body, scope.clone(), ctx)?;
            resolve_body(environment, else_body, scope, ctx)
        }
        NodeKind::Try {
            body,
            catches,
            always,
        } => {
            resolve_body(environment, body, scope.clone(), ctx)?;
            for catch in catches {
                let (parameter, parameter_type, catch_body) =
                    match &environment.node(catch).kind {
                        NodeKind::Catch {
                            parameter,
                            parameter_type,
                            body,
                        } => (*parameter, *parameter_type, *body),
                        _ => unreachable!("catch node expected"),
                    };
                if let Some(parameter_type) = parameter_type {
                    resolve_reference(environment, parameter_type, &scope)?;
                }
                let name = match &environment.node(parameter).kind {
                    NodeKind::Parameter { name, .. } => name.clone(),
                    _ => unreachable!("parameter node expected"),
                };
                let catch_scope = scope.with(name, parameter);
                environment.node_mut(catch).scope = catch_scope.clone();
                environment.node_mut(parameter).scope = catch_scope.clone();
                resolve_body(environment, catch_body, catch_scope, ctx)?;
            }
            if let Some(always) = always {
                resolve_body(environment, always, scope, ctx)?;
            }
            Ok(())
        }
        NodeKind::Throw { exception } => resolve_expression(environment, exception, scope, ctx),
        NodeKind::Singleton { .. } => resolve_module(environment, expression, &scope),
        other => Err(LinkError::malformed(format!(
            "expression expected, found {}",
            other_name(&other)
        ))),
    }
}

fn resolve_argument(environment: &mut Environment, argument: NodeId, scope: &Scope) -> Result<()> {
    resolve_argument_in(environment, argument, scope, Ctx { in_method: false })
}

fn resolve_argument_in(
    environment: &mut Environment,
    argument: NodeId,
    scope: &Scope,
    ctx: Ctx,
) -> Result<()> {
    match &environment.node(argument).kind {
        NodeKind::NamedArgument { value, .. } => {
            let value = *value;
            environment.node_mut(argument).scope = scope.clone();
            resolve_expression(environment, value, scope.clone(), ctx)
        }
        _ => resolve_expression(environment, argument, scope.clone(), ctx),
    }
}

/// Resolve a reference node in a scope and record its target.
///
/// Qualified names resolve segment-wise: the head through the scope chain,
/// the remainder through container members.
fn resolve_reference(
    environment: &mut Environment,
    reference: NodeId,
    scope: &Scope,
) -> Result<()> {
    let name = match &environment.node(reference).kind {
        NodeKind::Reference { name, .. } => name.clone(),
        other => {
            return Err(LinkError::malformed(format!(
                "reference expected, found {}",
                other_name(other)
            )))
        }
    };
    environment.node_mut(reference).scope = scope.clone();
    let target = resolve_name(environment, scope, &name)
        .ok_or_else(|| LinkError::unresolved(name, reference))?;
    match &mut environment.node_mut(reference).kind {
        NodeKind::Reference { target: slot, .. } => *slot = Some(target),
        _ => unreachable!(),
    }
    Ok(())
}

fn resolve_name(environment: &Environment, scope: &Scope, name: &str) -> Option<NodeId> {
    if !name.contains(FQN_SEPARATOR) {
        return scope.resolve(name);
    }
    let mut parts = segments(name);
    let head = parts.next()?;
    let mut current = scope.resolve(head)?;
    for segment in parts {
        current = environment.member_named(current, segment)?;
    }
    Some(current)
}

fn other_name(kind: &NodeKind) -> String {
    // Cheap kind tag for error messages without a node at hand.
    format!("{:?}", kind)
        .split([' ', '(', '{'])
        .next()
        .unwrap_or("node")
        .to_string()
}
