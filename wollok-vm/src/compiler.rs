// wollok-vm - Lowering linked nodes to instructions
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The compiler: lowers linked nodes into linear instruction sequences.
//!
//! Compilation is per node — one sequence per method, constructor, field
//! initializer, global thunk, program or test — and is requested lazily by
//! the machine, which memoizes the results in its code cache. Jumps are
//! emitted as placeholders and patched once their targets are known, with
//! offsets relative to the following instruction.
//!
//! Bodies compile in two flavours: as an *expression clause* the last
//! sentence's value stays on the stack (an empty body pushes undefined);
//! as statements every value is popped.

use wollok_model::name::well_known;
use wollok_model::node::{LiteralValue, MethodBody, NodeKind};
use wollok_model::{Environment, Name, NodeId};

use crate::error::CompileError;
use crate::instruction::{InnerSpec, Instruction};
use crate::runtime::{FALSE_ID, NULL_ID, TRUE_ID};

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Local name the try lowering stores the in-flight exception under.
pub const EXCEPTION_LOCAL: &str = "<exception>";
/// Local name the try lowering stores the result under.
pub const RESULT_LOCAL: &str = "<result>";

/// Compile a node into its instruction sequence.
///
/// Handles concrete methods, constructors, fields, package-level
/// variables (compiled as self-replacing lazy thunks), programs and
/// tests. Any other node kind is a [`CompileError::UnexpectedNode`].
pub fn compile(environment: &Environment, node: NodeId) -> Result<Vec<Instruction>> {
    let mut emitter = Emitter::new(environment);
    match &environment.node(node).kind {
        NodeKind::Method {
            body: MethodBody::Body(body),
            ..
        } => {
            emitter.compile_body(*body, true)?;
            emitter.emit(Instruction::Return);
        }
        NodeKind::Constructor { body, .. } => {
            emitter.compile_body(*body, false)?;
            emitter.emit(Instruction::Load("self".to_string()));
            emitter.emit(Instruction::Return);
        }
        NodeKind::Program { body, .. } | NodeKind::Test { body, .. } => {
            emitter.compile_body(*body, false)?;
        }
        NodeKind::Variable { value, .. } => {
            // Global thunk: resolve, then replace the lazy binding with
            // the result while leaving a copy for the interrupted LOAD.
            match value {
                Some(value) => emitter.compile_expression(*value)?,
                None => emitter.emit(Instruction::Push(Some(NULL_ID))),
            }
            emitter.emit(Instruction::Dup);
            emitter.emit(Instruction::Store {
                name: environment.fqn(node),
                lookup: true,
            });
            emitter.emit(Instruction::Return);
        }
        NodeKind::Field { name, value, .. } => {
            if let Some(value) = value {
                let name = name.clone();
                emitter.compile_expression(*value)?;
                emitter.emit(Instruction::Store { name, lookup: true });
            }
        }
        _ => {
            return Err(CompileError::UnexpectedNode {
                kind: environment.node(node).kind_name().to_string(),
            })
        }
    }
    Ok(emitter.code)
}

/// Compile the instantiation arguments of a singleton's supercall,
/// yielding the argument code and the matching `INIT_NAMED`/`INIT` pair.
/// Used both for singleton literals and for the bootstrap frame.
pub fn singleton_initialization(
    environment: &Environment,
    singleton: NodeId,
) -> Result<(Vec<Instruction>, Vec<Name>, usize)> {
    let mut emitter = Emitter::new(environment);
    let args = match &environment.node(singleton).kind {
        NodeKind::Singleton {
            superclass: Some(supertype),
            ..
        } => match &environment.node(*supertype).kind {
            NodeKind::ParameterizedType { args, .. } => args.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    let (names, arity) = emitter.compile_arguments(&args)?;
    Ok((emitter.code, names, arity))
}

struct Emitter<'a> {
    environment: &'a Environment,
    code: Vec<Instruction>,
}

impl<'a> Emitter<'a> {
    fn new(environment: &'a Environment) -> Self {
        Emitter {
            environment,
            code: Vec::new(),
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    /// Emit a jump (or handler-carrying context push) to be patched later.
    fn placeholder(&mut self, instruction: Instruction) -> usize {
        let at = self.code.len();
        self.emit(instruction);
        at
    }

    /// Point the placeholder at `at` to the current position.
    fn patch(&mut self, at: usize) {
        let delta = self.code.len() - at - 1;
        match &mut self.code[at] {
            Instruction::Jump(target) | Instruction::ConditionalJump(target) => {
                *target = delta as isize;
            }
            Instruction::PushContext { handler } => *handler = Some(delta),
            other => debug_assert!(false, "patch called on non-jump: {:?}", other),
        }
    }

    // =========================================================================
    // Bodies and sentences
    // =========================================================================

    fn compile_body(&mut self, body: NodeId, expression_clause: bool) -> Result<()> {
        let sentences = match &self.environment.node(body).kind {
            NodeKind::Body { sentences } => sentences.clone(),
            _ => {
                return Err(CompileError::UnexpectedNode {
                    kind: self.environment.node(body).kind_name().to_string(),
                })
            }
        };
        if sentences.is_empty() {
            if expression_clause {
                self.emit(Instruction::Push(None));
            }
            return Ok(());
        }
        let last = sentences.len() - 1;
        for (index, sentence) in sentences.into_iter().enumerate() {
            self.compile_sentence(sentence)?;
            if index != last || !expression_clause {
                self.emit(Instruction::Pop);
            }
        }
        Ok(())
    }

    /// Every sentence nets one value on the stack; the body compiler pops
    /// the ones it does not keep.
    fn compile_sentence(&mut self, sentence: NodeId) -> Result<()> {
        match &self.environment.node(sentence).kind {
            NodeKind::Variable { name, value, .. } => {
                let name = name.clone();
                match value {
                    Some(value) => self.compile_expression(*value)?,
                    None => self.emit(Instruction::Push(Some(NULL_ID))),
                }
                self.emit(Instruction::Store {
                    name,
                    lookup: false,
                });
                self.emit(Instruction::Push(None));
                Ok(())
            }
            NodeKind::Return { value } => {
                match value {
                    Some(value) => self.compile_expression(*value)?,
                    None => self.emit(Instruction::Push(None)),
                }
                self.emit(Instruction::Return);
                Ok(())
            }
            NodeKind::Assignment { reference, value } => {
                let name = self.reference_target_name(*reference)?;
                self.compile_expression(*value)?;
                self.emit(Instruction::Store { name, lookup: true });
                self.emit(Instruction::Push(None));
                Ok(())
            }
            _ => self.compile_expression(sentence),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expression(&mut self, expression: NodeId) -> Result<()> {
        let kind = self.environment.node(expression).kind.clone();
        match kind {
            NodeKind::SelfRef => {
                self.emit(Instruction::Load("self".to_string()));
                Ok(())
            }
            NodeKind::Reference { .. } => {
                let name = self.reference_target_name(expression)?;
                self.emit(Instruction::Load(name));
                Ok(())
            }
            NodeKind::Literal { value } => self.compile_literal(value),
            NodeKind::Send {
                receiver,
                message,
                args,
            } => {
                // `{ ... }.apply(...)` is statically known to run in its
                // captured context; the VM handles dynamic closures the
                // same way.
                let skip_receiver_context =
                    message == "apply" && self.environment.node(receiver).is_closure();
                self.compile_expression(receiver)?;
                let arity = args.len();
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit(Instruction::Call {
                    message,
                    arity,
                    lookup_start: None,
                    skip_receiver_context,
                });
                Ok(())
            }
            NodeKind::Super { args } => {
                let (message, module) = self.enclosing_method(expression)?;
                self.emit(Instruction::Load("self".to_string()));
                let arity = args.len();
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit(Instruction::Call {
                    message,
                    arity,
                    lookup_start: Some(self.environment.fqn(module)),
                    skip_receiver_context: false,
                });
                Ok(())
            }
            NodeKind::New { instantiated, args } => {
                let target = self.reference_target(instantiated)?;
                let fqn = self.environment.fqn(target);
                let (names, arity) = self.compile_arguments(&args)?;
                self.emit(Instruction::Instantiate {
                    module: fqn.clone(),
                    inner: None,
                });
                self.emit(Instruction::InitNamed { names });
                self.emit(Instruction::Init {
                    arity,
                    lookup_start: fqn,
                    optional: false,
                });
                Ok(())
            }
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.compile_expression(condition)?;
                self.emit(Instruction::PushContext { handler: None });
                let to_then = self.placeholder(Instruction::ConditionalJump(0));
                self.compile_body(else_body, true)?;
                let to_end = self.placeholder(Instruction::Jump(0));
                self.patch(to_then);
                self.compile_body(then_body, true)?;
                self.patch(to_end);
                self.emit(Instruction::PopContext);
                Ok(())
            }
            NodeKind::Throw { exception } => {
                self.compile_expression(exception)?;
                self.emit(Instruction::Interrupt);
                Ok(())
            }
            NodeKind::Try {
                body,
                catches,
                always,
            } => self.compile_try(body, &catches, always),
            NodeKind::Singleton { .. } => self.compile_singleton_literal(expression),
            other => Err(CompileError::UnexpectedNode {
                kind: format!("{:?}", other)
                    .split([' ', '(', '{'])
                    .next()
                    .unwrap_or("node")
                    .to_string(),
            }),
        }
    }

    fn compile_literal(&mut self, value: LiteralValue) -> Result<()> {
        match value {
            LiteralValue::Nil => self.emit(Instruction::Push(Some(NULL_ID))),
            LiteralValue::Boolean(true) => self.emit(Instruction::Push(Some(TRUE_ID))),
            LiteralValue::Boolean(false) => self.emit(Instruction::Push(Some(FALSE_ID))),
            LiteralValue::Number(n) => self.emit(Instruction::Instantiate {
                module: well_known::NUMBER.to_string(),
                inner: Some(InnerSpec::Number(n)),
            }),
            LiteralValue::String(s) => self.emit(Instruction::Instantiate {
                module: well_known::STRING.to_string(),
                inner: Some(InnerSpec::String(s)),
            }),
            LiteralValue::List(elements) => {
                let count = elements.len();
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Instruction::Instantiate {
                    module: well_known::LIST.to_string(),
                    inner: Some(InnerSpec::List(count)),
                });
            }
            LiteralValue::Set(elements) => {
                let count = elements.len();
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Instruction::Instantiate {
                    module: well_known::SET.to_string(),
                    inner: Some(InnerSpec::Set(count)),
                });
            }
        }
        Ok(())
    }

    /// A singleton literal: evaluate the supercall arguments, instantiate
    /// (capturing the current context), initialize fields, run the
    /// inherited constructor if one matches.
    fn compile_singleton_literal(&mut self, singleton: NodeId) -> Result<()> {
        let fqn = self.environment.fqn(singleton);
        let args = match &self.environment.node(singleton).kind {
            NodeKind::Singleton {
                superclass: Some(supertype),
                ..
            } => match &self.environment.node(*supertype).kind {
                NodeKind::ParameterizedType { args, .. } => args.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let (names, arity) = self.compile_arguments(&args)?;
        self.emit(Instruction::Instantiate {
            module: fqn.clone(),
            inner: None,
        });
        self.emit(Instruction::InitNamed { names });
        self.emit(Instruction::Init {
            arity,
            lookup_start: fqn,
            optional: true,
        });
        Ok(())
    }

    /// Compile instantiation arguments in source order. Answers the named
    /// argument names (empty when positional) and the positional arity.
    fn compile_arguments(&mut self, args: &[NodeId]) -> Result<(Vec<Name>, usize)> {
        let named = args.iter().any(|&a| {
            matches!(
                self.environment.node(a).kind,
                NodeKind::NamedArgument { .. }
            )
        });
        if named {
            let mut names = Vec::with_capacity(args.len());
            for &arg in args {
                match self.environment.node(arg).kind.clone() {
                    NodeKind::NamedArgument { name, value } => {
                        names.push(name);
                        self.compile_expression(value)?;
                    }
                    _ => return Err(CompileError::MixedArguments),
                }
            }
            Ok((names, 0))
        } else {
            for &arg in args {
                self.compile_expression(arg)?;
            }
            Ok((Vec::new(), args.len()))
        }
    }

    // =========================================================================
    // Try / catch / always
    // =========================================================================

    fn compile_try(
        &mut self,
        body: NodeId,
        catches: &[NodeId],
        always: Option<NodeId>,
    ) -> Result<()> {
        self.emit(Instruction::PushContext { handler: None });
        self.emit(Instruction::Push(Some(FALSE_ID)));
        self.emit(Instruction::Store {
            name: EXCEPTION_LOCAL.to_string(),
            lookup: false,
        });
        self.emit(Instruction::Push(None));
        self.emit(Instruction::Store {
            name: RESULT_LOCAL.to_string(),
            lookup: false,
        });

        // The body runs in a context whose handler points past it, at the
        // catch tests. Unwinding pops the context, truncates the operand
        // stack and binds <exception> in the wrapper.
        let guarded = self.placeholder(Instruction::PushContext { handler: None });
        self.compile_body(body, true)?;
        self.emit(Instruction::Store {
            name: RESULT_LOCAL.to_string(),
            lookup: true,
        });
        self.emit(Instruction::PopContext);
        let mut to_always = vec![self.placeholder(Instruction::Jump(0))];
        self.patch(guarded);

        for &catch in catches {
            let (parameter, parameter_type, catch_body) =
                match &self.environment.node(catch).kind {
                    NodeKind::Catch {
                        parameter,
                        parameter_type,
                        body,
                    } => (*parameter, *parameter_type, *body),
                    _ => {
                        return Err(CompileError::UnexpectedNode {
                            kind: self.environment.node(catch).kind_name().to_string(),
                        })
                    }
                };
            let to_next = match parameter_type {
                Some(type_reference) => {
                    let target = self.reference_target(type_reference)?;
                    self.emit(Instruction::Load(EXCEPTION_LOCAL.to_string()));
                    self.emit(Instruction::Inherits {
                        module: self.environment.fqn(target),
                    });
                    let into_body = self.placeholder(Instruction::ConditionalJump(0));
                    let to_next = self.placeholder(Instruction::Jump(0));
                    self.patch(into_body);
                    Some(to_next)
                }
                None => None,
            };

            let parameter_name = match &self.environment.node(parameter).kind {
                NodeKind::Parameter { name, .. } => name.clone(),
                _ => {
                    return Err(CompileError::UnexpectedNode {
                        kind: self.environment.node(parameter).kind_name().to_string(),
                    })
                }
            };
            self.emit(Instruction::PushContext { handler: None });
            self.emit(Instruction::Load(EXCEPTION_LOCAL.to_string()));
            self.emit(Instruction::Store {
                name: parameter_name,
                lookup: false,
            });
            self.compile_body(catch_body, true)?;
            self.emit(Instruction::Store {
                name: RESULT_LOCAL.to_string(),
                lookup: true,
            });
            self.emit(Instruction::Push(Some(FALSE_ID)));
            self.emit(Instruction::Store {
                name: EXCEPTION_LOCAL.to_string(),
                lookup: true,
            });
            self.emit(Instruction::PopContext);
            to_always.push(self.placeholder(Instruction::Jump(0)));

            if let Some(to_next) = to_next {
                self.patch(to_next);
            }
        }

        // The always block runs whether or not a catch fired; afterwards a
        // still-pending exception is re-raised, otherwise the result is
        // the try's value.
        for jump in to_always {
            self.patch(jump);
        }
        if let Some(always) = always {
            self.compile_body(always, false)?;
        }
        self.emit(Instruction::Load(EXCEPTION_LOCAL.to_string()));
        self.emit(Instruction::Inherits {
            module: well_known::EXCEPTION.to_string(),
        });
        let to_reraise = self.placeholder(Instruction::ConditionalJump(0));
        self.emit(Instruction::Load(RESULT_LOCAL.to_string()));
        self.emit(Instruction::PopContext);
        let to_end = self.placeholder(Instruction::Jump(0));
        self.patch(to_reraise);
        self.emit(Instruction::Load(EXCEPTION_LOCAL.to_string()));
        self.emit(Instruction::Interrupt);
        self.patch(to_end);
        Ok(())
    }

    // =========================================================================
    // Reference helpers
    // =========================================================================

    fn reference_target(&self, reference: NodeId) -> Result<NodeId> {
        match &self.environment.node(reference).kind {
            NodeKind::Reference { name, target } => target.ok_or_else(|| {
                CompileError::UnlinkedReference { name: name.clone() }
            }),
            _ => Err(CompileError::UnexpectedNode {
                kind: self.environment.node(reference).kind_name().to_string(),
            }),
        }
    }

    /// The name a reference loads or stores: the fully-qualified name for
    /// modules and package-level variables (bound in the root context),
    /// the simple name for everything lexical.
    fn reference_target_name(&self, reference: NodeId) -> Result<Name> {
        let target = self.reference_target(reference)?;
        let target_node = self.environment.node(target);
        let package_level = target_node
            .parent
            .map(|p| self.environment.node(p).is_package())
            .unwrap_or(false);
        let global = target_node.is_module()
            || (package_level && matches!(target_node.kind, NodeKind::Variable { .. }));
        if global {
            Ok(self.environment.fqn(target))
        } else {
            Ok(target_node
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| self.environment.fqn(target)))
        }
    }

    fn enclosing_method(&self, mut node: NodeId) -> Result<(Name, NodeId)> {
        while let Some(parent) = self.environment.node(node).parent {
            if let NodeKind::Method { name, .. } = &self.environment.node(parent).kind {
                let module = self
                    .environment
                    .node(parent)
                    .parent
                    .expect("method has an owning module");
                return Ok((name.clone(), module));
            }
            node = parent;
        }
        Err(CompileError::UnexpectedNode {
            kind: "Super".to_string(),
        })
    }
}
