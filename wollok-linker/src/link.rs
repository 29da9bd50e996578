// wollok-linker - Lowering raw trees into the node arena
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The `link` operation.
//!
//! Linking happens in four steps: merge the input packages, lower the
//! merged trees into an id-keyed arena (assigning a fresh id to every node
//! and wiring parents as it goes), compute scopes, and resolve every
//! reference. Closure sugar is desugared during lowering into an anonymous
//! singleton extending `wollok.lang.Closure` with a single `apply` method.

use indexmap::IndexMap;

use wollok_model::ast;
use wollok_model::name::well_known;
use wollok_model::node::{LiteralValue, MethodBody, Node, NodeKind};
use wollok_model::{Environment, NodeId, Scope};

use crate::error::{LinkError, Result};
use crate::merge;
use crate::resolve;

/// Merge, lower and resolve a list of packages into a linked environment.
///
/// The input must contain the `wollok` base library (see
/// [`base_packages`](crate::base_packages)); every environment is expected
/// to provide the well-known modules.
pub fn link(packages: Vec<ast::Package>) -> Result<Environment> {
    let merged = merge::merge(packages)?;
    let mut lowering = Lowering::default();
    let root = lowering.lower_root(merged)?;
    let mut environment = Environment::new(root, lowering.nodes);
    resolve::resolve(&mut environment)?;
    Ok(environment)
}

/// Link new packages onto an existing environment.
///
/// The base environment's packages are reconstructed and linked in front
/// of the new ones, so the new packages win merges against the base. The
/// result is a fresh environment; the base is untouched.
pub fn link_onto(base: &Environment, packages: Vec<ast::Package>) -> Result<Environment> {
    let mut combined = base.to_packages();
    combined.extend(packages);
    link(combined)
}

#[derive(Default)]
struct Lowering {
    nodes: IndexMap<NodeId, Node>,
}

impl Lowering {
    fn insert(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        source: Option<ast::SourceSpan>,
        kind: NodeKind,
    ) {
        self.nodes.insert(
            id,
            Node {
                id,
                parent,
                scope: Scope::new(),
                source,
                kind,
            },
        );
    }

    fn lower_root(&mut self, packages: Vec<ast::Package>) -> Result<NodeId> {
        let root = NodeId::fresh();
        let members = packages
            .into_iter()
            .map(|p| self.lower_package(p, root))
            .collect::<Result<Vec<_>>>()?;
        self.insert(root, None, None, NodeKind::Environment { members });
        Ok(root)
    }

    fn lower_package(&mut self, package: ast::Package, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let imports = package
            .imports
            .into_iter()
            .map(|i| self.lower_import(i, id))
            .collect();
        let members = package
            .members
            .into_iter()
            .map(|m| self.lower_entity(m, id))
            .collect::<Result<Vec<_>>>()?;
        self.insert(
            id,
            Some(parent),
            package.source,
            NodeKind::Package {
                name: package.name,
                imports,
                members,
            },
        );
        Ok(id)
    }

    fn lower_import(&mut self, import: ast::Import, parent: NodeId) -> NodeId {
        let id = NodeId::fresh();
        self.insert(
            id,
            Some(parent),
            import.source,
            NodeKind::Import {
                path: import.path,
                generic: import.generic,
            },
        );
        id
    }

    fn lower_entity(&mut self, entity: ast::Entity, parent: NodeId) -> Result<NodeId> {
        match entity {
            ast::Entity::Package(p) => self.lower_package(p, parent),
            ast::Entity::Class(c) => self.lower_class(c, parent),
            ast::Entity::Mixin(m) => self.lower_mixin(m, parent),
            ast::Entity::Singleton(s) => self.lower_singleton(s, parent),
            ast::Entity::Variable(v) => self.lower_variable(v, parent),
            ast::Entity::Program(p) => {
                let id = NodeId::fresh();
                let body = self.lower_body(p.body, id)?;
                self.insert(
                    id,
                    Some(parent),
                    p.source,
                    NodeKind::Program { name: p.name, body },
                );
                Ok(id)
            }
            ast::Entity::Test(t) => self.lower_test(t, parent),
            ast::Entity::Describe(d) => {
                let id = NodeId::fresh();
                let members = d
                    .members
                    .into_iter()
                    .map(|m| match m {
                        ast::DescribeMember::Field(f) => self.lower_field(f, id),
                        ast::DescribeMember::Method(m) => self.lower_method(m, id),
                        ast::DescribeMember::Test(t) => self.lower_test(t, id),
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.insert(
                    id,
                    Some(parent),
                    d.source,
                    NodeKind::Describe { name: d.name, members },
                );
                Ok(id)
            }
        }
    }

    fn lower_test(&mut self, test: ast::Test, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let body = self.lower_body(test.body, id)?;
        self.insert(
            id,
            Some(parent),
            test.source,
            NodeKind::Test { name: test.name, body },
        );
        Ok(id)
    }

    fn lower_class(&mut self, class: ast::Class, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let superclass = class
            .superclass
            .map(|s| self.lower_supertype(s, id))
            .transpose()?;
        let mixins = class
            .mixins
            .into_iter()
            .map(|m| self.lower_supertype(m, id))
            .collect::<Result<Vec<_>>>()?;
        let members = class
            .members
            .into_iter()
            .map(|m| self.lower_member(m, id))
            .collect::<Result<Vec<_>>>()?;
        self.insert(
            id,
            Some(parent),
            class.source,
            NodeKind::Class {
                name: class.name,
                superclass,
                mixins,
                members,
            },
        );
        Ok(id)
    }

    fn lower_mixin(&mut self, mixin: ast::Mixin, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let members = mixin
            .members
            .into_iter()
            .map(|m| self.lower_member(m, id))
            .collect::<Result<Vec<_>>>()?;
        self.insert(
            id,
            Some(parent),
            mixin.source,
            NodeKind::Mixin {
                name: mixin.name,
                members,
            },
        );
        Ok(id)
    }

    fn lower_singleton(&mut self, singleton: ast::Singleton, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let superclass = singleton
            .superclass
            .map(|s| self.lower_supertype(s, id))
            .transpose()?;
        let mixins = singleton
            .mixins
            .into_iter()
            .map(|m| self.lower_supertype(m, id))
            .collect::<Result<Vec<_>>>()?;
        let members = singleton
            .members
            .into_iter()
            .map(|m| self.lower_member(m, id))
            .collect::<Result<Vec<_>>>()?;
        self.insert(
            id,
            Some(parent),
            singleton.source,
            NodeKind::Singleton {
                name: singleton.name,
                superclass,
                mixins,
                members,
                closure: singleton.closure,
            },
        );
        Ok(id)
    }

    fn lower_supertype(&mut self, supertype: ast::Supertype, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let reference = NodeId::fresh();
        self.insert(
            reference,
            Some(id),
            supertype.source,
            NodeKind::Reference {
                name: supertype.reference,
                target: None,
            },
        );
        let args = supertype
            .args
            .into_iter()
            .map(|a| self.lower_argument(a, id))
            .collect::<Result<Vec<_>>>()?;
        self.insert(
            id,
            Some(parent),
            supertype.source,
            NodeKind::ParameterizedType { reference, args },
        );
        Ok(id)
    }

    fn lower_member(&mut self, member: ast::Member, parent: NodeId) -> Result<NodeId> {
        match member {
            ast::Member::Field(f) => self.lower_field(f, parent),
            ast::Member::Method(m) => self.lower_method(m, parent),
            ast::Member::Constructor(c) => {
                let id = NodeId::fresh();
                let parameters = self.lower_parameters(c.parameters, id)?;
                let body = self.lower_body(c.body, id)?;
                self.insert(
                    id,
                    Some(parent),
                    c.source,
                    NodeKind::Constructor { parameters, body },
                );
                Ok(id)
            }
        }
    }

    fn lower_field(&mut self, field: ast::Field, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let value = field
            .value
            .map(|v| self.lower_expression(v, id))
            .transpose()?;
        self.insert(
            id,
            Some(parent),
            field.source,
            NodeKind::Field {
                name: field.name,
                mutable: field.mutable,
                value,
            },
        );
        Ok(id)
    }

    fn lower_method(&mut self, method: ast::Method, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let parameters = self.lower_parameters(method.parameters, id)?;
        let body = match method.body {
            ast::MethodBody::Concrete(b) => MethodBody::Body(self.lower_body(b, id)?),
            ast::MethodBody::Native => MethodBody::Native,
            ast::MethodBody::Abstract => MethodBody::Abstract,
        };
        self.insert(
            id,
            Some(parent),
            method.source,
            NodeKind::Method {
                name: method.name,
                parameters,
                body,
            },
        );
        Ok(id)
    }

    fn lower_parameters(
        &mut self,
        parameters: Vec<ast::Parameter>,
        parent: NodeId,
    ) -> Result<Vec<NodeId>> {
        let count = parameters.len();
        parameters
            .into_iter()
            .enumerate()
            .map(|(index, p)| {
                if p.var_arg && index + 1 != count {
                    return Err(LinkError::malformed(format!(
                        "variadic parameter '{}' must be last",
                        p.name
                    )));
                }
                let id = NodeId::fresh();
                self.insert(
                    id,
                    Some(parent),
                    p.source,
                    NodeKind::Parameter {
                        name: p.name,
                        var_arg: p.var_arg,
                    },
                );
                Ok(id)
            })
            .collect()
    }

    fn lower_variable(&mut self, variable: ast::Variable, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let value = variable
            .value
            .map(|v| self.lower_expression(v, id))
            .transpose()?;
        self.insert(
            id,
            Some(parent),
            variable.source,
            NodeKind::Variable {
                name: variable.name,
                mutable: variable.mutable,
                value,
            },
        );
        Ok(id)
    }

    fn lower_body(&mut self, body: ast::Body, parent: NodeId) -> Result<NodeId> {
        let id = NodeId::fresh();
        let sentences = body
            .sentences
            .into_iter()
            .map(|s| self.lower_sentence(s, id))
            .collect::<Result<Vec<_>>>()?;
        self.insert(id, Some(parent), body.source, NodeKind::Body { sentences });
        Ok(id)
    }

    fn lower_sentence(&mut self, sentence: ast::Sentence, parent: NodeId) -> Result<NodeId> {
        match sentence {
            ast::Sentence::Variable(v) => self.lower_variable(v, parent),
            ast::Sentence::Return(r) => {
                let id = NodeId::fresh();
                let value = r
                    .value
                    .map(|v| self.lower_expression(v, id))
                    .transpose()?;
                self.insert(id, Some(parent), r.source, NodeKind::Return { value });
                Ok(id)
            }
            ast::Sentence::Assignment(a) => {
                let id = NodeId::fresh();
                let reference = self.lower_reference(a.reference, id);
                let value = self.lower_expression(a.value, id)?;
                self.insert(
                    id,
                    Some(parent),
                    a.source,
                    NodeKind::Assignment { reference, value },
                );
                Ok(id)
            }
            ast::Sentence::Expression(e) => self.lower_expression(e, parent),
        }
    }

    fn lower_reference(&mut self, reference: ast::Reference, parent: NodeId) -> NodeId {
        let id = NodeId::fresh();
        self.insert(
            id,
            Some(parent),
            reference.source,
            NodeKind::Reference {
                name: reference.name,
                target: None,
            },
        );
        id
    }

    fn lower_argument(&mut self, argument: ast::Argument, parent: NodeId) -> Result<NodeId> {
        match argument {
            ast::Argument::Positional(e) => self.lower_expression(e, parent),
            ast::Argument::Named(n) => {
                let id = NodeId::fresh();
                let value = self.lower_expression(n.value, id)?;
                self.insert(
                    id,
                    Some(parent),
                    n.source,
                    NodeKind::NamedArgument { name: n.name, value },
                );
                Ok(id)
            }
        }
    }

    fn lower_expression(&mut self, expression: ast::Expression, parent: NodeId) -> Result<NodeId> {
        match expression {
            ast::Expression::SelfRef { source } => {
                let id = NodeId::fresh();
                self.insert(id, Some(parent), source, NodeKind::SelfRef);
                Ok(id)
            }
            ast::Expression::Reference(r) => Ok(self.lower_reference(r, parent)),
            ast::Expression::Literal { value, source } => {
                let id = NodeId::fresh();
                let value = match value {
                    ast::Literal::Nil => LiteralValue::Nil,
                    ast::Literal::Boolean(b) => LiteralValue::Boolean(b),
                    ast::Literal::Number(n) => LiteralValue::Number(n),
                    ast::Literal::String(s) => LiteralValue::String(s),
                    ast::Literal::List(elements) => LiteralValue::List(
                        elements
                            .into_iter()
                            .map(|e| self.lower_expression(e, id))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    ast::Literal::Set(elements) => LiteralValue::Set(
                        elements
                            .into_iter()
                            .map(|e| self.lower_expression(e, id))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                };
                self.insert(id, Some(parent), source, NodeKind::Literal { value });
                Ok(id)
            }
            ast::Expression::Send(s) => {
                let id = NodeId::fresh();
                let receiver = self.lower_expression(*s.receiver, id)?;
                let args = s
                    .args
                    .into_iter()
                    .map(|a| self.lower_expression(a, id))
                    .collect::<Result<Vec<_>>>()?;
                self.insert(
                    id,
                    Some(parent),
                    s.source,
                    NodeKind::Send {
                        receiver,
                        message: s.message,
                        args,
                    },
                );
                Ok(id)
            }
            ast::Expression::Super(s) => {
                let id = NodeId::fresh();
                let args = s
                    .args
                    .into_iter()
                    .map(|a| self.lower_expression(a, id))
                    .collect::<Result<Vec<_>>>()?;
                self.insert(id, Some(parent), s.source, NodeKind::Super { args });
                Ok(id)
            }
            ast::Expression::New(n) => {
                let id = NodeId::fresh();
                let instantiated = self.lower_reference(n.instantiated, id);
                let args = n
                    .args
                    .into_iter()
                    .map(|a| self.lower_argument(a, id))
                    .collect::<Result<Vec<_>>>()?;
                self.insert(
                    id,
                    Some(parent),
                    n.source,
                    NodeKind::New { instantiated, args },
                );
                Ok(id)
            }
            ast::Expression::If(i) => {
                let id = NodeId::fresh();
                let condition = self.lower_expression(i.condition, id)?;
                let then_body = self.lower_body(i.then_body, id)?;
                let else_body = self.lower_body(i.else_body, id)?;
                self.insert(
                    id,
                    Some(parent),
                    i.source,
                    NodeKind::If {
                        condition,
                        then_body,
                        else_body,
                    },
                );
                Ok(id)
            }
            ast::Expression::Try(t) => {
                let id = NodeId::fresh();
                let body = self.lower_body(t.body, id)?;
                let catches = t
                    .catches
                    .into_iter()
                    .map(|c| {
                        let catch_id = NodeId::fresh();
                        let parameter = self
                            .lower_parameters(vec![c.parameter], catch_id)?
                            .pop()
                            .expect("one parameter lowered");
                        let parameter_type =
                            c.parameter_type.map(|t| self.lower_reference(t, catch_id));
                        let catch_body = self.lower_body(c.body, catch_id)?;
                        self.insert(
                            catch_id,
                            Some(id),
                            c.source,
                            NodeKind::Catch {
                                parameter,
                                parameter_type,
                                body: catch_body,
                            },
                        );
                        Ok(catch_id)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let always = t.always.map(|a| self.lower_body(a, id)).transpose()?;
                self.insert(
                    id,
                    Some(parent),
                    t.source,
                    NodeKind::Try {
                        body,
                        catches,
                        always,
                    },
                );
                Ok(id)
            }
            ast::Expression::Throw(t) => {
                let id = NodeId::fresh();
                let exception = self.lower_expression(t.exception, id)?;
                self.insert(id, Some(parent), t.source, NodeKind::Throw { exception });
                Ok(id)
            }
            ast::Expression::Closure(c) => self.lower_closure(c, parent),
            ast::Expression::Singleton(s) => self.lower_singleton(*s, parent),
        }
    }

    /// Desugar a closure into an anonymous singleton extending
    /// `wollok.lang.Closure` whose single `apply` method holds the body.
    fn lower_closure(&mut self, closure: ast::Closure, parent: NodeId) -> Result<NodeId> {
        let desugared = ast::Singleton {
            name: None,
            superclass: Some(ast::Supertype::of(well_known::CLOSURE)),
            mixins: Vec::new(),
            members: vec![ast::Member::Method(ast::Method {
                name: "apply".to_string(),
                parameters: closure.parameters,
                body: ast::MethodBody::Concrete(closure.body),
                source: closure.source,
            })],
            closure: true,
            source: closure.source,
        };
        self.lower_singleton(desugared, parent)
    }
}
