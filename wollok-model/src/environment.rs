// wollok-model - Linked environments
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The linked environment: an id-keyed node arena rooted at an
//! `Environment` node, with the queries the compiler and VM need —
//! fully-qualified names, member lookup, module linearization, and method
//! and constructor resolution.
//!
//! The arena is the authoritative owner of every node; parents, children
//! and reference targets are all indirect ids, so the parent↔child and
//! reference→target cycles of a linked tree never become ownership cycles.

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::ast;
use crate::name::{qualify, segments, well_known, Name, NodeId};
use crate::node::{LiteralValue, MethodBody, Node, NodeKind};

/// A linked tree: all user packages plus the `wollok` base library.
#[derive(Debug, Clone)]
pub struct Environment {
    root: NodeId,
    nodes: IndexMap<NodeId, Node>,
}

impl Environment {
    /// Assemble an environment from a root id and its node arena.
    ///
    /// Constructed by the linker; the arena is expected to be internally
    /// consistent (every child/parent/target id present).
    #[must_use]
    pub fn new(root: NodeId, nodes: IndexMap<NodeId, Node>) -> Self {
        Environment { root, nodes }
    }

    /// The root `Environment` node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// The node with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id is not in the arena, which indicates a corrupt
    /// environment (a structural bug, not a user error). For fallible
    /// access use [`try_node`](Environment::try_node).
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        self.try_node(id).expect("node missing from environment")
    }

    /// The node with the given id, if present.
    #[must_use]
    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Mutable access for the linker's resolution passes.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(&id)
            .expect("node missing from environment")
    }

    /// The parent node, if any.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<&Node> {
        self.node(id).parent.map(|p| self.node(p))
    }

    // =========================================================================
    // Names
    // =========================================================================

    /// The fully-qualified name of a node.
    ///
    /// Anonymous modules have no path from the root, so their id string
    /// doubles as their fully-qualified name; [`lookup`](Environment::lookup)
    /// recognises it.
    #[must_use]
    pub fn fqn(&self, id: NodeId) -> Name {
        let node = self.node(id);
        if node.is_module() && node.name().is_none() {
            return id.to_string();
        }
        let name = node.name().unwrap_or_default();
        match node.parent {
            None => name.to_string(),
            Some(parent_id) => {
                let parent = self.node(parent_id);
                if parent.parent.is_none() {
                    name.to_string()
                } else if parent.name().is_some() || parent.is_module() {
                    qualify(&self.fqn(parent_id), name)
                } else {
                    name.to_string()
                }
            }
        }
    }

    /// Find the member of a container with the given simple name.
    ///
    /// Later members shadow earlier ones, matching merge semantics where
    /// the right-hand package wins.
    #[must_use]
    pub fn member_named(&self, container: NodeId, name: &str) -> Option<NodeId> {
        self.node(container)
            .members()
            .iter()
            .rev()
            .copied()
            .find(|&m| self.node(m).name() == Some(name))
    }

    /// Resolve a fully-qualified name from the root.
    #[must_use]
    pub fn lookup(&self, fqn: &str) -> Option<NodeId> {
        if let Some(id) = NodeId::parse(fqn) {
            return if self.nodes.contains_key(&id) {
                Some(id)
            } else {
                None
            };
        }
        let mut current = self.root;
        for segment in segments(fqn) {
            current = self.member_named(current, segment)?;
        }
        Some(current)
    }

    // =========================================================================
    // Hierarchy and linearization
    // =========================================================================

    /// The module a supertype clause (`ParameterizedType`) resolves to.
    #[must_use]
    pub fn supertype_module(&self, parameterized_type: NodeId) -> Option<NodeId> {
        match &self.node(parameterized_type).kind {
            NodeKind::ParameterizedType { reference, .. } => {
                match &self.node(*reference).kind {
                    NodeKind::Reference { target, .. } => *target,
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// The explicitly declared superclass of a module, resolved.
    #[must_use]
    pub fn declared_superclass(&self, module: NodeId) -> Option<NodeId> {
        match &self.node(module).kind {
            NodeKind::Class { superclass, .. } | NodeKind::Singleton { superclass, .. } => {
                superclass.and_then(|s| self.supertype_module(s))
            }
            _ => None,
        }
    }

    /// The declared mixins of a module, resolved, in source order.
    #[must_use]
    pub fn declared_mixins(&self, module: NodeId) -> Vec<NodeId> {
        match &self.node(module).kind {
            NodeKind::Class { mixins, .. } | NodeKind::Singleton { mixins, .. } => mixins
                .iter()
                .filter_map(|&m| self.supertype_module(m))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Module linearization: the ordered module sequence searched for a
    /// member.
    ///
    /// `[self, mixins left-to-right (recursively), superclass chain]`, with
    /// duplicates removed keeping the first occurrence, so the leftmost
    /// mixin overrides its right neighbours and the superclass. Every
    /// module implicitly terminates at `wollok.lang.Object`. Inheritance
    /// cycles are tolerated: the visited set guarantees termination.
    #[must_use]
    pub fn hierarchy(&self, module: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        self.walk_hierarchy(module, &mut order, &mut seen);
        if let Some(object) = self.lookup(well_known::OBJECT) {
            if seen.insert(object) {
                order.push(object);
            }
        }
        order
    }

    fn walk_hierarchy(&self, module: NodeId, order: &mut Vec<NodeId>, seen: &mut HashSet<NodeId>) {
        if !seen.insert(module) {
            return;
        }
        order.push(module);
        for mixin in self.declared_mixins(module) {
            self.walk_hierarchy(mixin, order, seen);
        }
        if let Some(superclass) = self.declared_superclass(module) {
            self.walk_hierarchy(superclass, order, seen);
        }
    }

    /// Whether `module` is `ancestor` or inherits from it.
    #[must_use]
    pub fn inherits(&self, module: NodeId, ancestor: NodeId) -> bool {
        self.hierarchy(module).contains(&ancestor)
    }

    // =========================================================================
    // Member resolution
    // =========================================================================

    /// Whether a method node answers `message` with `arity` arguments.
    ///
    /// A variadic last parameter absorbs any surplus; abstract methods
    /// never answer.
    #[must_use]
    pub fn method_answers(&self, method: NodeId, message: &str, arity: usize) -> bool {
        match &self.node(method).kind {
            NodeKind::Method {
                name,
                parameters,
                body,
            } => {
                if name != message || matches!(body, MethodBody::Abstract) {
                    return false;
                }
                self.parameters_accept(parameters, arity)
            }
            _ => false,
        }
    }

    fn parameters_accept(&self, parameters: &[NodeId], arity: usize) -> bool {
        let var_arg = parameters
            .last()
            .map(|&p| matches!(self.node(p).kind, NodeKind::Parameter { var_arg: true, .. }))
            .unwrap_or(false);
        if var_arg {
            arity >= parameters.len() - 1
        } else {
            arity == parameters.len()
        }
    }

    /// Resolve a message through a module's linearization.
    ///
    /// When `start_after` names a module in the linearization, the search
    /// resumes past it — this is how `super` skips the currently executing
    /// method's module.
    #[must_use]
    pub fn lookup_method(
        &self,
        module: NodeId,
        message: &str,
        arity: usize,
        start_after: Option<NodeId>,
    ) -> Option<NodeId> {
        let hierarchy = self.hierarchy(module);
        let skip = match start_after {
            Some(after) => hierarchy.iter().position(|&m| m == after).map_or(0, |i| i + 1),
            None => 0,
        };
        for &candidate in &hierarchy[skip.min(hierarchy.len())..] {
            for &member in self.node(candidate).members() {
                if self.method_answers(member, message, arity) {
                    return Some(member);
                }
            }
        }
        None
    }

    /// Resolve a constructor of the given arity through the linearization.
    #[must_use]
    pub fn lookup_constructor(&self, module: NodeId, arity: usize) -> Option<NodeId> {
        for candidate in self.hierarchy(module) {
            for &member in self.node(candidate).members() {
                if let NodeKind::Constructor { parameters, .. } = &self.node(member).kind {
                    if self.parameters_accept(parameters, arity) {
                        return Some(member);
                    }
                }
            }
        }
        None
    }

    /// The fields a module's instances carry, most-general module first.
    ///
    /// Shadowed fields (same name redeclared lower in the hierarchy) appear
    /// once, as their most-specific declaration — the first occurrence in
    /// the linearization wins, the initialization order stays base-first.
    #[must_use]
    pub fn hierarchy_fields(&self, module: NodeId) -> Vec<NodeId> {
        let hierarchy = self.hierarchy(module);
        let mut visible: Vec<(usize, NodeId)> = Vec::new();
        let mut names: HashSet<&str> = HashSet::new();
        for (depth, &candidate) in hierarchy.iter().enumerate() {
            for &member in self.node(candidate).members() {
                if let NodeKind::Field { name, .. } = &self.node(member).kind {
                    if names.insert(name.as_str()) {
                        visible.push((depth, member));
                    }
                }
            }
        }
        visible.sort_by(|a, b| b.0.cmp(&a.0));
        visible.into_iter().map(|(_, field)| field).collect()
    }

    // =========================================================================
    // Entity collection
    // =========================================================================

    fn collect_entities(&self, container: NodeId, out: &mut Vec<NodeId>) {
        for &member in self.node(container).members() {
            out.push(member);
            if self.node(member).is_package() {
                self.collect_entities(member, out);
            }
        }
    }

    /// Every package-level entity, recursively, in declaration order.
    #[must_use]
    pub fn entities(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_entities(self.root, &mut out);
        out
    }

    /// Every named singleton in the environment.
    #[must_use]
    pub fn named_singletons(&self) -> Vec<NodeId> {
        self.entities()
            .into_iter()
            .filter(|&e| matches!(self.node(e).kind, NodeKind::Singleton { name: Some(_), .. }))
            .collect()
    }

    /// Every package-level variable (global constant).
    #[must_use]
    pub fn global_variables(&self) -> Vec<NodeId> {
        self.entities()
            .into_iter()
            .filter(|&e| matches!(self.node(e).kind, NodeKind::Variable { .. }))
            .collect()
    }

    /// Every program.
    #[must_use]
    pub fn programs(&self) -> Vec<NodeId> {
        self.entities()
            .into_iter()
            .filter(|&e| matches!(self.node(e).kind, NodeKind::Program { .. }))
            .collect()
    }

    /// Every test, including those nested in describes.
    #[must_use]
    pub fn tests(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for entity in self.entities() {
            match &self.node(entity).kind {
                NodeKind::Test { .. } => out.push(entity),
                NodeKind::Describe { members, .. } => out.extend(
                    members
                        .iter()
                        .copied()
                        .filter(|&m| matches!(self.node(m).kind, NodeKind::Test { .. })),
                ),
                _ => {}
            }
        }
        out
    }

    // =========================================================================
    // Reconstruction
    // =========================================================================

    /// Rebuild the raw package list this environment links from.
    ///
    /// Feeding the result back through the linker reproduces the same tree
    /// shape (ids differ), which is how a linked environment serves as the
    /// base of a further link.
    #[must_use]
    pub fn to_packages(&self) -> Vec<ast::Package> {
        self.node(self.root)
            .members()
            .iter()
            .map(|&m| self.package_to_ast(m))
            .collect()
    }

    fn package_to_ast(&self, id: NodeId) -> ast::Package {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Package {
                name,
                imports,
                members,
            } => ast::Package {
                name: name.clone(),
                imports: imports.iter().map(|&i| self.import_to_ast(i)).collect(),
                members: members.iter().map(|&m| self.entity_to_ast(m)).collect(),
                source: node.source,
            },
            _ => panic!("package expected, found {}", node.kind_name()),
        }
    }

    fn import_to_ast(&self, id: NodeId) -> ast::Import {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Import { path, generic } => ast::Import {
                path: path.clone(),
                generic: *generic,
                source: node.source,
            },
            _ => panic!("import expected, found {}", node.kind_name()),
        }
    }

    fn entity_to_ast(&self, id: NodeId) -> ast::Entity {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Package { .. } => ast::Entity::Package(self.package_to_ast(id)),
            NodeKind::Class {
                name,
                superclass,
                mixins,
                members,
            } => ast::Entity::Class(ast::Class {
                name: name.clone(),
                superclass: superclass.map(|s| self.supertype_to_ast(s)),
                mixins: mixins.iter().map(|&m| self.supertype_to_ast(m)).collect(),
                members: members.iter().map(|&m| self.member_to_ast(m)).collect(),
                source: node.source,
            }),
            NodeKind::Mixin { name, members } => ast::Entity::Mixin(ast::Mixin {
                name: name.clone(),
                members: members.iter().map(|&m| self.member_to_ast(m)).collect(),
                source: node.source,
            }),
            NodeKind::Singleton { .. } => ast::Entity::Singleton(self.singleton_to_ast(id)),
            NodeKind::Variable { .. } => ast::Entity::Variable(self.variable_to_ast(id)),
            NodeKind::Program { name, body } => ast::Entity::Program(ast::Program {
                name: name.clone(),
                body: self.body_to_ast(*body),
                source: node.source,
            }),
            NodeKind::Test { name, body } => ast::Entity::Test(ast::Test {
                name: name.clone(),
                body: self.body_to_ast(*body),
                source: node.source,
            }),
            NodeKind::Describe { name, members } => ast::Entity::Describe(ast::Describe {
                name: name.clone(),
                members: members
                    .iter()
                    .map(|&m| match &self.node(m).kind {
                        NodeKind::Field { .. } => {
                            ast::DescribeMember::Field(self.field_to_ast(m))
                        }
                        NodeKind::Method { .. } => {
                            ast::DescribeMember::Method(self.method_to_ast(m))
                        }
                        NodeKind::Test { name, body } => {
                            ast::DescribeMember::Test(ast::Test {
                                name: name.clone(),
                                body: self.body_to_ast(*body),
                                source: self.node(m).source,
                            })
                        }
                        other => panic!("describe member expected, found {:?}", other),
                    })
                    .collect(),
                source: node.source,
            }),
            other => panic!("entity expected, found {:?}", other),
        }
    }

    fn singleton_to_ast(&self, id: NodeId) -> ast::Singleton {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Singleton {
                name,
                superclass,
                mixins,
                members,
                closure,
            } => ast::Singleton {
                name: name.clone(),
                superclass: superclass.map(|s| self.supertype_to_ast(s)),
                mixins: mixins.iter().map(|&m| self.supertype_to_ast(m)).collect(),
                members: members.iter().map(|&m| self.member_to_ast(m)).collect(),
                closure: *closure,
                source: node.source,
            },
            _ => panic!("singleton expected, found {}", node.kind_name()),
        }
    }

    fn supertype_to_ast(&self, id: NodeId) -> ast::Supertype {
        let node = self.node(id);
        match &node.kind {
            NodeKind::ParameterizedType { reference, args } => {
                let name = match &self.node(*reference).kind {
                    NodeKind::Reference { name, .. } => name.clone(),
                    other => panic!("reference expected, found {:?}", other),
                };
                ast::Supertype {
                    reference: name,
                    args: args.iter().map(|&a| self.argument_to_ast(a)).collect(),
                    source: node.source,
                }
            }
            _ => panic!("supertype expected, found {}", node.kind_name()),
        }
    }

    fn argument_to_ast(&self, id: NodeId) -> ast::Argument {
        match &self.node(id).kind {
            NodeKind::NamedArgument { name, value } => {
                ast::Argument::Named(ast::NamedArgument {
                    name: name.clone(),
                    value: self.expression_to_ast(*value),
                    source: self.node(id).source,
                })
            }
            _ => ast::Argument::Positional(self.expression_to_ast(id)),
        }
    }

    fn member_to_ast(&self, id: NodeId) -> ast::Member {
        match &self.node(id).kind {
            NodeKind::Field { .. } => ast::Member::Field(self.field_to_ast(id)),
            NodeKind::Method { .. } => ast::Member::Method(self.method_to_ast(id)),
            NodeKind::Constructor { parameters, body } => {
                ast::Member::Constructor(ast::Constructor {
                    parameters: parameters.iter().map(|&p| self.parameter_to_ast(p)).collect(),
                    body: self.body_to_ast(*body),
                    source: self.node(id).source,
                })
            }
            other => panic!("member expected, found {:?}", other),
        }
    }

    fn field_to_ast(&self, id: NodeId) -> ast::Field {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Field {
                name,
                mutable,
                value,
            } => ast::Field {
                name: name.clone(),
                mutable: *mutable,
                value: value.map(|v| self.expression_to_ast(v)),
                source: node.source,
            },
            _ => panic!("field expected, found {}", node.kind_name()),
        }
    }

    fn method_to_ast(&self, id: NodeId) -> ast::Method {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Method {
                name,
                parameters,
                body,
            } => ast::Method {
                name: name.clone(),
                parameters: parameters.iter().map(|&p| self.parameter_to_ast(p)).collect(),
                body: match body {
                    MethodBody::Body(b) => ast::MethodBody::Concrete(self.body_to_ast(*b)),
                    MethodBody::Native => ast::MethodBody::Native,
                    MethodBody::Abstract => ast::MethodBody::Abstract,
                },
                source: node.source,
            },
            _ => panic!("method expected, found {}", node.kind_name()),
        }
    }

    fn parameter_to_ast(&self, id: NodeId) -> ast::Parameter {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Parameter { name, var_arg } => ast::Parameter {
                name: name.clone(),
                var_arg: *var_arg,
                source: node.source,
            },
            _ => panic!("parameter expected, found {}", node.kind_name()),
        }
    }

    fn variable_to_ast(&self, id: NodeId) -> ast::Variable {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Variable {
                name,
                mutable,
                value,
            } => ast::Variable {
                name: name.clone(),
                mutable: *mutable,
                value: value.map(|v| self.expression_to_ast(v)),
                source: node.source,
            },
            _ => panic!("variable expected, found {}", node.kind_name()),
        }
    }

    fn body_to_ast(&self, id: NodeId) -> ast::Body {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Body { sentences } => ast::Body {
                sentences: sentences.iter().map(|&s| self.sentence_to_ast(s)).collect(),
                source: node.source,
            },
            _ => panic!("body expected, found {}", node.kind_name()),
        }
    }

    fn sentence_to_ast(&self, id: NodeId) -> ast::Sentence {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Variable { .. } => ast::Sentence::Variable(self.variable_to_ast(id)),
            NodeKind::Return { value } => ast::Sentence::Return(ast::Return {
                value: value.map(|v| self.expression_to_ast(v)),
                source: node.source,
            }),
            NodeKind::Assignment { reference, value } => {
                ast::Sentence::Assignment(ast::Assignment {
                    reference: self.reference_to_ast(*reference),
                    value: self.expression_to_ast(*value),
                    source: node.source,
                })
            }
            _ => ast::Sentence::Expression(self.expression_to_ast(id)),
        }
    }

    fn reference_to_ast(&self, id: NodeId) -> ast::Reference {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Reference { name, .. } => ast::Reference {
                name: name.clone(),
                source: node.source,
            },
            _ => panic!("reference expected, found {}", node.kind_name()),
        }
    }

    fn expression_to_ast(&self, id: NodeId) -> ast::Expression {
        let node = self.node(id);
        match &node.kind {
            NodeKind::SelfRef => ast::Expression::SelfRef {
                source: node.source,
            },
            NodeKind::Reference { .. } => {
                ast::Expression::Reference(self.reference_to_ast(id))
            }
            NodeKind::Literal { value } => ast::Expression::Literal {
                value: match value {
                    LiteralValue::Nil => ast::Literal::Nil,
                    LiteralValue::Boolean(b) => ast::Literal::Boolean(*b),
                    LiteralValue::Number(n) => ast::Literal::Number(*n),
                    LiteralValue::String(s) => ast::Literal::String(s.clone()),
                    LiteralValue::List(elements) => ast::Literal::List(
                        elements.iter().map(|&e| self.expression_to_ast(e)).collect(),
                    ),
                    LiteralValue::Set(elements) => ast::Literal::Set(
                        elements.iter().map(|&e| self.expression_to_ast(e)).collect(),
                    ),
                },
                source: node.source,
            },
            NodeKind::Send {
                receiver,
                message,
                args,
            } => ast::Expression::Send(ast::Send {
                receiver: Box::new(self.expression_to_ast(*receiver)),
                message: message.clone(),
                args: args.iter().map(|&a| self.expression_to_ast(a)).collect(),
                source: node.source,
            }),
            NodeKind::Super { args } => ast::Expression::Super(ast::Super {
                args: args.iter().map(|&a| self.expression_to_ast(a)).collect(),
                source: node.source,
            }),
            NodeKind::New { instantiated, args } => ast::Expression::New(ast::New {
                instantiated: self.reference_to_ast(*instantiated),
                args: args.iter().map(|&a| self.argument_to_ast(a)).collect(),
                source: node.source,
            }),
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => ast::Expression::If(Box::new(ast::If {
                condition: self.expression_to_ast(*condition),
                then_body: self.body_to_ast(*then_body),
                else_body: self.body_to_ast(*else_body),
                source: node.source,
            })),
            NodeKind::Try {
                body,
                catches,
                always,
            } => ast::Expression::Try(Box::new(ast::Try {
                body: self.body_to_ast(*body),
                catches: catches
                    .iter()
                    .map(|&c| match &self.node(c).kind {
                        NodeKind::Catch {
                            parameter,
                            parameter_type,
                            body,
                        } => ast::Catch {
                            parameter: self.parameter_to_ast(*parameter),
                            parameter_type: parameter_type.map(|t| self.reference_to_ast(t)),
                            body: self.body_to_ast(*body),
                            source: self.node(c).source,
                        },
                        other => panic!("catch expected, found {:?}", other),
                    })
                    .collect(),
                always: always.map(|a| self.body_to_ast(a)),
                source: node.source,
            })),
            NodeKind::Throw { exception } => ast::Expression::Throw(Box::new(ast::Throw {
                exception: self.expression_to_ast(*exception),
                source: node.source,
            })),
            NodeKind::Singleton { .. } => {
                ast::Expression::Singleton(Box::new(self.singleton_to_ast(id)))
            }
            other => panic!("expression expected, found {:?}", other),
        }
    }
}
