// wollok-vm - The stack machine
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The stack machine: frames, the dispatch loop, dynamic dispatch,
//! exception unwinding, interning and native dispatch.
//!
//! An [`Evaluation`] is the whole VM state: the linked environment, a root
//! context holding the globals, a bounded frame stack, the id-keyed
//! instance table and a per-node code cache. Execution is an explicit
//! interpreter loop — each [`step`](Evaluation::step) is atomic from the
//! embedder's perspective, and the embedder decides when to step.
//!
//! Anything user-expressible goes through user-level exceptions: stack
//! exhaustion raises `wollok.lang.StackOverflowException`, dispatch
//! failures raise `EvaluationError` or route through
//! `messageNotUnderstood`, and only structural invariants surface as host
//! errors.

pub mod frame;
pub mod gc;
pub mod stack;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use wollok_model::name::well_known;
use wollok_model::node::{MethodBody, NodeKind};
use wollok_model::{Environment, InstanceId, Name, NodeId};

use crate::compiler;
use crate::error::{ExecutionError, Result};
use crate::instruction::{InnerSpec, Instruction};
use crate::runtime::{
    Context, ExceptionHandler, InnerValue, Operand, RuntimeObject, FALSE_ID, NULL_ID, TRUE_ID,
};

pub use frame::Frame;
pub use stack::{OperandStack, StackFault};

/// A native method body: receives the evaluation, the receiver and the
/// arguments, and must leave exactly one value on the current frame's
/// operand stack — or raise through [`Evaluation::raise`].
pub type NativeFunction = Rc<dyn Fn(&mut Evaluation, InstanceId, &[Operand]) -> Result<()>>;

/// The caller-supplied table of native method bodies, keyed
/// `<declaring module FQN>.<method name>`.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    natives: HashMap<Name, NativeFunction>,
}

impl NativeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    /// Register a native under its `<module FQN>.<method>` key.
    pub fn register<F>(&mut self, key: impl Into<Name>, body: F)
    where
        F: Fn(&mut Evaluation, InstanceId, &[Operand]) -> Result<()> + 'static,
    {
        self.natives.insert(key.into(), Rc::new(body));
    }

    /// Look a native up by key.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<NativeFunction> {
        self.natives.get(key).cloned()
    }

    /// Merge another registry into this one; its entries win.
    pub fn extend(&mut self, other: NativeRegistry) {
        self.natives.extend(other.natives);
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeRegistry({} natives)", self.natives.len())
    }
}

/// Tunable parameters of an evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Decimal places numbers are rounded to before interning.
    pub decimal_precision: u32,
    /// Maximum call depth before `StackOverflowException`.
    pub max_frame_stack_size: usize,
    /// Maximum operand-stack depth per frame.
    pub max_operand_stack_size: usize,
    /// Native method bodies.
    pub natives: NativeRegistry,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            decimal_precision: 5,
            max_frame_stack_size: 1_000,
            max_operand_stack_size: 10_000,
            natives: NativeRegistry::new(),
        }
    }
}

/// The well-known modules, resolved once at construction.
#[derive(Debug, Clone, Copy)]
struct LangModules {
    object: NodeId,
    boolean: NodeId,
    number: NodeId,
    string: NodeId,
    list: NodeId,
    set: NodeId,
    evaluation_error: NodeId,
    stack_overflow: NodeId,
}

impl LangModules {
    fn resolve(environment: &Environment) -> Result<Self> {
        for fqn in well_known::ALL {
            if environment.lookup(fqn).is_none() {
                return Err(ExecutionError::missing_module(*fqn));
            }
        }
        let find = |fqn: &str| environment.lookup(fqn).expect("well-known module verified");
        Ok(LangModules {
            object: find(well_known::OBJECT),
            boolean: find(well_known::BOOLEAN),
            number: find(well_known::NUMBER),
            string: find(well_known::STRING),
            list: find(well_known::LIST),
            set: find(well_known::SET),
            evaluation_error: find(well_known::EVALUATION_ERROR),
            stack_overflow: find(well_known::STACK_OVERFLOW),
        })
    }
}

/// The whole VM state.
pub struct Evaluation {
    environment: Rc<Environment>,
    config: EvaluationConfig,
    lang: LangModules,
    root_context: Context,
    frames: Vec<Frame>,
    instances: IndexMap<InstanceId, RuntimeObject>,
    numbers: HashMap<String, InstanceId>,
    strings: HashMap<String, InstanceId>,
    code: HashMap<NodeId, Rc<Vec<Instruction>>>,
    /// Value delivered by a `RETURN` with no caller frame.
    returned: Operand,
}

impl Evaluation {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Construct a ready evaluation over a linked environment.
    ///
    /// Primes the root context with `null`, `true` and `false`, one
    /// pre-created instance per named singleton (bound by FQN), and one
    /// lazy-initializer instance per package-level constant; then runs a
    /// bootstrap frame initializing every singleton's fields and
    /// constructor.
    pub fn of(environment: Rc<Environment>, config: EvaluationConfig) -> Result<Evaluation> {
        let lang = LangModules::resolve(&environment)?;
        let root_context = Context::new();
        let mut evaluation = Evaluation {
            environment,
            config,
            lang,
            root_context: root_context.clone(),
            frames: Vec::new(),
            instances: IndexMap::new(),
            numbers: HashMap::new(),
            strings: HashMap::new(),
            code: HashMap::new(),
            returned: None,
        };

        evaluation.install_fixed(NULL_ID, lang.object);
        evaluation.install_fixed(TRUE_ID, lang.boolean);
        evaluation.install_fixed(FALSE_ID, lang.boolean);
        root_context.bind("null", Some(NULL_ID));
        root_context.bind("true", Some(TRUE_ID));
        root_context.bind("false", Some(FALSE_ID));

        let singletons = evaluation.environment.named_singletons();
        let mut instances = Vec::with_capacity(singletons.len());
        for &singleton in &singletons {
            let id = evaluation.create_instance(singleton, &root_context, None);
            let fqn = evaluation.environment.fqn(singleton);
            root_context.bind(fqn, Some(id));
            instances.push((singleton, id));
        }

        for variable in evaluation.environment.global_variables() {
            let fqn = evaluation.environment.fqn(variable);
            let has_value = matches!(
                evaluation.environment.node(variable).kind,
                NodeKind::Variable { value: Some(_), .. }
            );
            if has_value {
                let id = InstanceId::fresh();
                let object =
                    RuntimeObject::lazy(id, lang.object, root_context.child(), variable);
                evaluation.instances.insert(id, object);
                root_context.bind(fqn, Some(id));
            } else {
                root_context.bind(fqn, Some(NULL_ID));
            }
        }

        // Singletons self-initialize through a bootstrap frame running the
        // same INIT sequence a singleton literal compiles to.
        let mut code = Vec::new();
        for (singleton, id) in instances {
            let environment = Rc::clone(&evaluation.environment);
            let (args_code, names, arity) =
                compiler::singleton_initialization(&environment, singleton)?;
            code.extend(args_code);
            code.push(Instruction::Push(Some(id)));
            code.push(Instruction::InitNamed { names });
            code.push(Instruction::Init {
                arity,
                lookup_start: evaluation.environment.fqn(singleton),
                optional: true,
            });
            code.push(Instruction::Pop);
        }
        if !code.is_empty() {
            let frame = evaluation.frame_over(Rc::new(code), root_context.child(), "bootstrap");
            evaluation.run_frame(frame)?;
        }
        Ok(evaluation)
    }

    fn install_fixed(&mut self, id: InstanceId, module: NodeId) {
        let context = self.root_context.child();
        context.bind("self", Some(id));
        self.instances
            .insert(id, RuntimeObject::new(id, module, context));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The linked environment this evaluation runs over.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// The configuration this evaluation was constructed with.
    #[must_use]
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// The instance with the given id, if it exists.
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&RuntimeObject> {
        self.instances.get(&id)
    }

    /// Whether an id is in the instance table.
    #[must_use]
    pub fn has_instance(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    /// Number of live instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Current call depth.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// A global binding from the root context (globals are bound by FQN;
    /// `null`, `true` and `false` by name).
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Operand> {
        self.root_context.lookup(name)
    }

    /// Read a field of an instance.
    #[must_use]
    pub fn field_of(&self, id: InstanceId, field: &str) -> Option<Operand> {
        self.instances.get(&id).and_then(|o| o.context.lookup(field))
    }

    /// The wrapped number of an operand, if it is a number instance.
    #[must_use]
    pub fn number_value(&self, operand: Operand) -> Option<f64> {
        operand.and_then(|id| self.instances.get(&id)).and_then(RuntimeObject::number)
    }

    /// The wrapped string of an operand, if it is a string instance.
    #[must_use]
    pub fn string_value(&self, operand: Operand) -> Option<String> {
        operand
            .and_then(|id| self.instances.get(&id))
            .and_then(|o| o.string().map(str::to_string))
    }

    // =========================================================================
    // Value construction and interning
    // =========================================================================

    /// The interned `null` instance.
    #[must_use]
    pub fn null(&self) -> InstanceId {
        NULL_ID
    }

    /// The interned boolean instances.
    #[must_use]
    pub fn boolean(&self, value: bool) -> InstanceId {
        if value {
            TRUE_ID
        } else {
            FALSE_ID
        }
    }

    /// The interned number instance for a value, rounded to the
    /// configured decimal precision.
    pub fn number(&mut self, value: f64) -> InstanceId {
        let precision = self.config.decimal_precision;
        let factor = 10f64.powi(precision as i32);
        let rounded = (value * factor).round() / factor;
        let key = format!("{:.*}", precision as usize, rounded);
        if let Some(&id) = self.numbers.get(&key) {
            return id;
        }
        let id = InstanceId::fresh();
        let context = self.root_context.child();
        context.bind("self", Some(id));
        self.instances.insert(
            id,
            RuntimeObject::with_inner(id, self.lang.number, context, InnerValue::Number(rounded)),
        );
        self.numbers.insert(key, id);
        id
    }

    /// The interned string instance for a value.
    pub fn string(&mut self, value: &str) -> InstanceId {
        if let Some(&id) = self.strings.get(value) {
            return id;
        }
        let id = InstanceId::fresh();
        let context = self.root_context.child();
        context.bind("self", Some(id));
        self.instances.insert(
            id,
            RuntimeObject::with_inner(
                id,
                self.lang.string,
                context,
                InnerValue::String(value.to_string()),
            ),
        );
        self.strings.insert(value.to_string(), id);
        id
    }

    /// A fresh list instance over the given elements.
    pub fn list(&mut self, elements: Vec<InstanceId>) -> InstanceId {
        let id = InstanceId::fresh();
        let context = self.root_context.child();
        context.bind("self", Some(id));
        self.instances.insert(
            id,
            RuntimeObject::with_inner(id, self.lang.list, context, InnerValue::List(elements)),
        );
        id
    }

    /// A fresh set instance over the given elements, deduplicated by id.
    pub fn set(&mut self, elements: Vec<InstanceId>) -> InstanceId {
        let mut unique = Vec::new();
        for element in elements {
            if !unique.contains(&element) {
                unique.push(element);
            }
        }
        let id = InstanceId::fresh();
        let context = self.root_context.child();
        context.bind("self", Some(id));
        self.instances.insert(
            id,
            RuntimeObject::with_inner(id, self.lang.set, context, InnerValue::Set(unique)),
        );
        id
    }

    /// Create a plain instance of a module. Fields are not initialized
    /// here; `INIT_NAMED` zeroes and initializes them.
    fn create_instance(
        &mut self,
        module: NodeId,
        parent: &Context,
        inner: Option<InnerValue>,
    ) -> InstanceId {
        let id = InstanceId::fresh();
        let context = parent.child();
        if !self.environment.node(module).is_closure() {
            context.bind("self", Some(id));
        }
        let mut object = RuntimeObject::new(id, module, context);
        object.inner = inner;
        self.instances.insert(id, object);
        id
    }

    /// Attach an opaque native handle to an instance.
    pub fn set_inner(&mut self, id: InstanceId, inner: InnerValue) {
        if let Some(object) = self.instances.get_mut(&id) {
            object.inner = Some(inner);
        }
    }

    /// Replace a collection instance's elements. Used by natives.
    pub fn set_elements(&mut self, id: InstanceId, elements: Vec<InstanceId>) {
        if let Some(object) = self.instances.get_mut(&id) {
            match &mut object.inner {
                Some(InnerValue::List(slots)) => *slots = elements,
                Some(InnerValue::Set(slots)) => *slots = elements,
                _ => {}
            }
        }
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// Execute one instruction of the top frame.
    pub fn step(&mut self) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| ExecutionError::internal("no active frame"))?;
        if frame.is_finished() {
            return Err(ExecutionError::internal("stepping a finished frame"));
        }
        let instruction = frame.instructions[frame.pc].clone();
        frame.pc += 1;
        self.execute(instruction)
    }

    /// Step until the top frame is finished.
    pub fn step_all(&mut self) -> Result<()> {
        loop {
            let done = match self.frames.last() {
                None => true,
                Some(frame) => frame.is_finished(),
            };
            if done {
                return Ok(());
            }
            self.step()?;
        }
    }

    /// Send a message to an instance and run it to completion.
    ///
    /// Pushes a synthesized frame that pushes the receiver and arguments
    /// and issues the `CALL`, then steps until the frame stack returns to
    /// its pre-call depth. An uncaught exception propagates as
    /// [`ExecutionError::UncaughtException`].
    pub fn send_message(
        &mut self,
        message: &str,
        receiver: InstanceId,
        args: &[InstanceId],
    ) -> Result<Operand> {
        let depth = self.frames.len();
        let mut code = Vec::with_capacity(args.len() + 2);
        code.push(Instruction::Push(Some(receiver)));
        for &arg in args {
            code.push(Instruction::Push(Some(arg)));
        }
        code.push(Instruction::Call {
            message: message.to_string(),
            arity: args.len(),
            lookup_start: None,
            skip_receiver_context: false,
        });
        let frame = self.frame_over(
            Rc::new(code),
            self.root_context.child(),
            format!("send {}", message),
        );
        self.push_frame_strict(frame)?;
        loop {
            if self.frames.len() < depth + 1 {
                return Err(ExecutionError::internal(
                    "message send unwound past its frame",
                ));
            }
            if self.frames.len() == depth + 1 {
                let finished = self.frames.last().map(Frame::is_finished).unwrap_or(false);
                if finished {
                    let mut frame = self.frames.pop().expect("send frame present");
                    let result = frame.operands.pop().unwrap_or(None);
                    return Ok(result);
                }
            }
            self.step()?;
        }
    }

    /// Run a program: execute its body in a fresh context over the root.
    pub fn run_program(&mut self, program: NodeId) -> Result<()> {
        let code = self.code_for(program)?;
        let label = self.environment.fqn(program);
        let frame = self.frame_over(code, self.root_context.child(), label);
        self.run_frame(frame)?;
        Ok(())
    }

    /// Run a test. A test declared inside a describe runs against a fresh
    /// instance of the describe, so fixture fields reset between tests.
    pub fn run_test(&mut self, test: NodeId) -> Result<()> {
        let parent = self.environment.node(test).parent;
        let context = match parent {
            Some(parent)
                if matches!(self.environment.node(parent).kind, NodeKind::Describe { .. }) =>
            {
                let fixture = self.instantiate_with_fields(parent)?;
                self.instances
                    .get(&fixture)
                    .expect("fixture instance registered")
                    .context
                    .child()
            }
            _ => self.root_context.child(),
        };
        let code = self.code_for(test)?;
        let label = self.environment.fqn(test);
        let frame = self.frame_over(code, context, label);
        self.run_frame(frame)?;
        Ok(())
    }

    /// Create an instance of a module with zeroed fields and run its
    /// field initializers.
    fn instantiate_with_fields(&mut self, module: NodeId) -> Result<InstanceId> {
        let id = self.create_instance(module, &self.root_context.clone(), None);
        self.zero_fields(id);
        let code = self.field_initialization_code(module, &[])?;
        if !code.is_empty() {
            let context = self
                .instances
                .get(&id)
                .expect("instance registered")
                .context
                .child();
            let frame = self.frame_over(Rc::new(code), context, "initialize fields");
            self.run_frame(frame)?;
        }
        Ok(id)
    }

    fn frame_over(
        &self,
        instructions: Rc<Vec<Instruction>>,
        context: Context,
        label: impl Into<Name>,
    ) -> Frame {
        Frame::new(
            instructions,
            context,
            self.config.max_operand_stack_size,
            label,
        )
    }

    /// Push a frame and run until it finishes or returns, answering its
    /// result. Only used at the bottom of the frame stack.
    fn run_frame(&mut self, frame: Frame) -> Result<Operand> {
        let depth = self.frames.len();
        self.push_frame_strict(frame)?;
        loop {
            if self.frames.len() == depth {
                return Ok(self.returned.take());
            }
            if self.frames.len() == depth + 1 {
                let finished = self.frames.last().map(Frame::is_finished).unwrap_or(false);
                if finished {
                    let mut frame = self.frames.pop().expect("frame present");
                    return Ok(frame.operands.pop().unwrap_or(None));
                }
            }
            if self.frames.len() < depth {
                return Err(ExecutionError::internal("frame unwound past its caller"));
            }
            self.step()?;
        }
    }

    // =========================================================================
    // Instruction dispatch
    // =========================================================================

    fn execute(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            Instruction::Load(name) => self.execute_load(&name),
            Instruction::Store { name, lookup } => {
                let value = self.pop_operand()?;
                let frame = self.top_frame()?;
                if lookup {
                    frame.context.assign(&name, value);
                } else {
                    frame.context.bind(name, value);
                }
                Ok(())
            }
            Instruction::Push(operand) => self.push_value(operand),
            Instruction::Pop => {
                self.pop_operand()?;
                Ok(())
            }
            Instruction::PushContext { handler } => {
                let frame = self.top_frame()?;
                let context = match handler {
                    Some(delta) => frame.context.child_with_handler(ExceptionHandler {
                        pc: frame.pc + delta,
                        stack_depth: frame.operands.len(),
                    }),
                    None => frame.context.child(),
                };
                frame.context = context;
                Ok(())
            }
            Instruction::PopContext => {
                let frame = self.top_frame()?;
                if frame.context.same(&frame.base_context) {
                    return Err(ExecutionError::internal("cannot pop a frame's base context"));
                }
                match frame.context.parent() {
                    Some(parent) => {
                        frame.context = parent;
                        Ok(())
                    }
                    None => Err(ExecutionError::internal("context chain lost its parent")),
                }
            }
            Instruction::Swap { distance } => {
                let frame = self.top_frame()?;
                frame
                    .operands
                    .swap(distance + 1)
                    .map_err(|_| ExecutionError::internal("operand stack underflow on SWAP"))
            }
            Instruction::Dup => {
                let top = {
                    let frame = self.top_frame()?;
                    frame
                        .operands
                        .peek(0)
                        .map_err(|_| ExecutionError::internal("operand stack underflow on DUP"))?
                };
                self.push_value(top)
            }
            Instruction::Instantiate { module, inner } => self.execute_instantiate(&module, inner),
            Instruction::Inherits { module } => {
                let operand = self.pop_operand()?;
                let id = match operand {
                    Some(id) => id,
                    None => return self.raise_evaluation_error("undefined has no type"),
                };
                let target = self
                    .environment
                    .lookup(&module)
                    .ok_or_else(|| ExecutionError::missing_module(module.clone()))?;
                let object_module = self.module_of(id)?;
                let answer = self.environment.inherits(object_module, target);
                let boolean = self.boolean(answer);
                self.push_value(Some(boolean))
            }
            Instruction::Jump(offset) => self.jump(offset),
            Instruction::ConditionalJump(offset) => {
                let operand = self.pop_operand()?;
                match operand {
                    Some(id) if id == TRUE_ID => self.jump(offset),
                    Some(id) if id == FALSE_ID => Ok(()),
                    other => self.raise_evaluation_error(&format!(
                        "expected a boolean condition, got {}",
                        self.describe_operand(other)
                    )),
                }
            }
            Instruction::Call {
                message,
                arity,
                lookup_start,
                skip_receiver_context,
            } => self.execute_call(&message, arity, lookup_start, skip_receiver_context),
            Instruction::Init {
                arity,
                lookup_start,
                optional,
            } => self.execute_init(arity, &lookup_start, optional),
            Instruction::InitNamed { names } => self.execute_init_named(&names),
            Instruction::Interrupt => {
                let operand = self.pop_operand()?;
                match operand {
                    Some(id) => self.raise(id),
                    None => self.raise_evaluation_error("cannot throw undefined"),
                }
            }
            Instruction::Return => {
                let value = self.pop_operand()?;
                self.frames
                    .pop()
                    .ok_or_else(|| ExecutionError::internal("no frame to return from"))?;
                if self.frames.is_empty() {
                    self.returned = value;
                    Ok(())
                } else {
                    self.push_value(value)
                }
            }
        }
    }

    fn execute_load(&mut self, name: &str) -> Result<()> {
        let value = {
            let frame = self.top_frame()?;
            frame.context.lookup(name)
        };
        let operand = match value {
            Some(operand) => operand,
            None => {
                return self
                    .raise_evaluation_error(&format!("reference '{}' is not bound", name))
            }
        };
        // A pending lazy initializer loads by evaluating its thunk: the
        // thunk stores the result over the binding and returns it here.
        if let Some(id) = operand {
            let lazy = self.instances.get(&id).and_then(|o| o.lazy);
            if let Some(variable) = lazy {
                let code = self.code_for(variable)?;
                let label = format!("lazy {}", self.environment.fqn(variable));
                let frame = self.frame_over(code, self.root_context.child(), label);
                return self.push_frame(frame);
            }
        }
        self.push_value(operand)
    }

    fn execute_instantiate(&mut self, module: &str, inner: Option<InnerSpec>) -> Result<()> {
        match inner {
            Some(InnerSpec::Number(value)) => {
                let id = self.number(value);
                self.push_value(Some(id))
            }
            Some(InnerSpec::String(value)) => {
                let id = self.string(&value);
                self.push_value(Some(id))
            }
            Some(InnerSpec::List(count)) => {
                let elements = self.pop_elements(count)?;
                let id = self.list(elements);
                self.push_value(Some(id))
            }
            Some(InnerSpec::Set(count)) => {
                let elements = self.pop_elements(count)?;
                let id = self.set(elements);
                self.push_value(Some(id))
            }
            None => {
                let target = self
                    .environment
                    .lookup(module)
                    .ok_or_else(|| ExecutionError::missing_module(module))?;
                let anonymous = matches!(
                    self.environment.node(target).kind,
                    NodeKind::Singleton { name: None, .. }
                );
                // Anonymous singletons (closures included) capture the
                // instantiating context; everything else parents on root.
                let parent = if anonymous {
                    self.top_frame()?.context.clone()
                } else {
                    self.root_context.clone()
                };
                let id = self.create_instance(target, &parent, None);
                self.push_value(Some(id))
            }
        }
    }

    fn pop_elements(&mut self, count: usize) -> Result<Vec<InstanceId>> {
        let operands = self.pop_operands(count)?;
        Ok(operands
            .into_iter()
            .map(|operand| operand.unwrap_or(NULL_ID))
            .collect())
    }

    fn execute_call(
        &mut self,
        message: &str,
        arity: usize,
        lookup_start: Option<Name>,
        skip_receiver_context: bool,
    ) -> Result<()> {
        let args = self.pop_operands(arity)?;
        let receiver = match self.pop_operand()? {
            Some(id) => id,
            None => {
                return self.raise_evaluation_error(&format!(
                    "message {}/{} sent to undefined",
                    message, arity
                ))
            }
        };
        let module = self.module_of(receiver)?;
        let start_after = match lookup_start {
            Some(fqn) => Some(
                self.environment
                    .lookup(&fqn)
                    .ok_or_else(|| ExecutionError::missing_module(fqn))?,
            ),
            None => None,
        };
        match self
            .environment
            .lookup_method(module, message, arity, start_after)
        {
            Some(method) => self.invoke(method, receiver, args, skip_receiver_context),
            None => self.dispatch_not_understood(receiver, message, args),
        }
    }

    /// No method answered: dispatch `messageNotUnderstood(name, args)`
    /// through the same lookup (user-overridable), or raise.
    fn dispatch_not_understood(
        &mut self,
        receiver: InstanceId,
        message: &str,
        args: Vec<Operand>,
    ) -> Result<()> {
        let module = self.module_of(receiver)?;
        match self
            .environment
            .lookup_method(module, "messageNotUnderstood", 2, None)
        {
            Some(method) => {
                let name = self.string(message);
                let elements = args.into_iter().map(|a| a.unwrap_or(NULL_ID)).collect();
                let bundle = self.list(elements);
                self.invoke(method, receiver, vec![Some(name), Some(bundle)], false)
            }
            None => {
                let description = format!(
                    "a {} does not understand {}/{}",
                    self.environment.fqn(module),
                    message,
                    args.len()
                );
                self.raise_evaluation_error(&description)
            }
        }
    }

    fn invoke(
        &mut self,
        method: NodeId,
        receiver: InstanceId,
        args: Vec<Operand>,
        skip_receiver_context: bool,
    ) -> Result<()> {
        let (method_name, parameters, body) = match &self.environment.node(method).kind {
            NodeKind::Method {
                name,
                parameters,
                body,
            } => (name.clone(), parameters.clone(), body.clone()),
            _ => {
                return Err(ExecutionError::internal(format!(
                    "cannot invoke a {} node",
                    self.environment.node(method).kind_name()
                )))
            }
        };
        let owner = self
            .environment
            .node(method)
            .parent
            .ok_or_else(|| ExecutionError::internal("method without an owning module"))?;
        match body {
            MethodBody::Native => {
                let key = format!("{}.{}", self.environment.fqn(owner), method_name);
                let native = self
                    .config
                    .natives
                    .lookup(&key)
                    .ok_or(ExecutionError::MissingNative { key })?;
                native(self, receiver, &args)
            }
            MethodBody::Body(_) => {
                let code = self.code_for(method)?;
                let receiver_context = self
                    .instances
                    .get(&receiver)
                    .ok_or_else(|| ExecutionError::internal("receiver missing from table"))?
                    .context
                    .clone();
                // Closure-owned methods run in their captured context:
                // skipping the (fieldless) closure instance context is
                // equivalent and what the explicit flag requests.
                let parent = if skip_receiver_context {
                    receiver_context
                        .parent()
                        .unwrap_or_else(|| self.root_context.clone())
                } else {
                    receiver_context
                };
                let context = parent.child();
                self.bind_parameters(&context, &parameters, args)?;
                let label = format!("{}.{}", self.environment.fqn(owner), method_name);
                let frame = self.frame_over(code, context, label);
                self.push_frame(frame)
            }
            MethodBody::Abstract => {
                let description = format!(
                    "abstract method {}.{} cannot be invoked",
                    self.environment.fqn(owner),
                    method_name
                );
                self.raise_evaluation_error(&description)
            }
        }
    }

    /// Bind parameters in a call context. A variadic last parameter
    /// bundles the surplus arguments into a list.
    fn bind_parameters(
        &mut self,
        context: &Context,
        parameters: &[NodeId],
        args: Vec<Operand>,
    ) -> Result<()> {
        let mut names = Vec::with_capacity(parameters.len());
        let mut variadic = false;
        for &parameter in parameters {
            match &self.environment.node(parameter).kind {
                NodeKind::Parameter { name, var_arg } => {
                    names.push(name.clone());
                    variadic = *var_arg;
                }
                _ => return Err(ExecutionError::internal("parameter node expected")),
            }
        }
        if variadic {
            let fixed = names.len() - 1;
            for (name, value) in names[..fixed].iter().zip(args.iter()) {
                context.bind(name.clone(), *value);
            }
            let rest: Vec<InstanceId> = args[fixed..]
                .iter()
                .map(|operand| operand.unwrap_or(NULL_ID))
                .collect();
            let bundle = self.list(rest);
            context.bind(names[fixed].clone(), Some(bundle));
        } else {
            for (name, value) in names.iter().zip(args.iter()) {
                context.bind(name.clone(), *value);
            }
        }
        Ok(())
    }

    fn execute_init(&mut self, arity: usize, lookup_start: &str, optional: bool) -> Result<()> {
        let receiver = match self.pop_operand()? {
            Some(id) => id,
            None => return self.raise_evaluation_error("cannot initialize undefined"),
        };
        let args = self.pop_operands(arity)?;
        let start = self
            .environment
            .lookup(lookup_start)
            .ok_or_else(|| ExecutionError::missing_module(lookup_start))?;
        match self.environment.lookup_constructor(start, arity) {
            Some(constructor) => {
                let parameters = match &self.environment.node(constructor).kind {
                    NodeKind::Constructor { parameters, .. } => parameters.clone(),
                    _ => return Err(ExecutionError::internal("constructor node expected")),
                };
                let code = self.code_for(constructor)?;
                let receiver_context = self
                    .instances
                    .get(&receiver)
                    .ok_or_else(|| ExecutionError::internal("instance missing from table"))?
                    .context
                    .clone();
                let context = receiver_context.child();
                self.bind_parameters(&context, &parameters, args)?;
                let label = format!("{} constructor", self.environment.fqn(start));
                let frame = self.frame_over(code, context, label);
                self.push_frame(frame)
            }
            // Classes without constructors are 0-ary instantiable.
            None if optional || arity == 0 => self.push_value(Some(receiver)),
            None => self.raise_evaluation_error(&format!(
                "{} has no constructor with {} parameters",
                lookup_start, arity
            )),
        }
    }

    fn execute_init_named(&mut self, names: &[Name]) -> Result<()> {
        let receiver = match self.pop_operand()? {
            Some(id) => id,
            None => return self.raise_evaluation_error("cannot initialize undefined"),
        };
        let values = self.pop_operands(names.len())?;
        self.zero_fields(receiver);
        let context = self
            .instances
            .get(&receiver)
            .ok_or_else(|| ExecutionError::internal("instance missing from table"))?
            .context
            .clone();
        for (name, value) in names.iter().zip(values) {
            context.bind(name.clone(), value);
        }

        let module = self.module_of(receiver)?;
        let code = self.field_initialization_code(module, names)?;
        if code.is_empty() {
            return self.push_value(Some(receiver));
        }
        let mut code = code;
        code.push(Instruction::Push(Some(receiver)));
        code.push(Instruction::Return);
        let label = format!("initialize {}", self.environment.fqn(module));
        let frame = self.frame_over(Rc::new(code), context.child(), label);
        self.push_frame(frame)
    }

    /// Bind every field of the instance's full hierarchy to `null`.
    fn zero_fields(&mut self, receiver: InstanceId) {
        let module = match self.instances.get(&receiver) {
            Some(object) => object.module,
            None => return,
        };
        let context = self
            .instances
            .get(&receiver)
            .expect("instance present")
            .context
            .clone();
        for field in self.environment.hierarchy_fields(module) {
            if let Some(name) = self.environment.node(field).name() {
                context.bind(name.to_string(), Some(NULL_ID));
            }
        }
    }

    /// Concatenated initializer code for every field not covered by the
    /// given names, most general module first.
    fn field_initialization_code(
        &mut self,
        module: NodeId,
        skip: &[Name],
    ) -> Result<Vec<Instruction>> {
        let mut code = Vec::new();
        for field in self.environment.hierarchy_fields(module) {
            let (name, has_value) = match &self.environment.node(field).kind {
                NodeKind::Field { name, value, .. } => (name.clone(), value.is_some()),
                _ => continue,
            };
            if !has_value || skip.contains(&name) {
                continue;
            }
            let fragment = self.code_for(field)?;
            code.extend(fragment.iter().cloned());
        }
        Ok(code)
    }

    // =========================================================================
    // Frames, stacks and code
    // =========================================================================

    fn top_frame(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| ExecutionError::internal("no active frame"))
    }

    fn pop_operand(&mut self) -> Result<Operand> {
        let frame = self.top_frame()?;
        frame
            .operands
            .pop()
            .map_err(|_| ExecutionError::internal("operand stack underflow"))
    }

    fn pop_operands(&mut self, count: usize) -> Result<Vec<Operand>> {
        let frame = self.top_frame()?;
        frame
            .operands
            .pop_n(count)
            .map_err(|_| ExecutionError::internal("operand stack underflow"))
    }

    /// Push a value on the current operand stack; overflow raises
    /// `StackOverflowException`.
    fn push_value(&mut self, value: Operand) -> Result<()> {
        let outcome = {
            let frame = self.top_frame()?;
            frame.operands.push(value)
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(StackFault::Overflow) => self.raise_stack_overflow("operand stack exhausted"),
            Err(StackFault::Underflow) => unreachable!("push cannot underflow"),
        }
    }

    /// Push a value from a native body. Part of the native contract.
    pub fn push_result(&mut self, value: Operand) -> Result<()> {
        self.push_value(value)
    }

    /// Push a frame; a full frame stack raises `StackOverflowException`.
    fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= self.config.max_frame_stack_size {
            return self.raise_stack_overflow("frame stack exhausted");
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Push a frame from the embedder's edge, where overflow is a
    /// configuration problem rather than user-catchable.
    fn push_frame_strict(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= self.config.max_frame_stack_size {
            return Err(ExecutionError::internal("frame stack exhausted"));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn jump(&mut self, offset: isize) -> Result<()> {
        let frame = self.top_frame()?;
        let target = frame.pc as isize + offset;
        if target < 0 || target as usize > frame.instructions.len() {
            return Err(ExecutionError::internal("jump out of bounds"));
        }
        frame.pc = target as usize;
        Ok(())
    }

    /// The compiled code for a node, memoized.
    fn code_for(&mut self, node: NodeId) -> Result<Rc<Vec<Instruction>>> {
        if let Some(code) = self.code.get(&node) {
            return Ok(Rc::clone(code));
        }
        let code = Rc::new(compiler::compile(&self.environment, node)?);
        self.code.insert(node, Rc::clone(&code));
        Ok(code)
    }

    fn module_of(&self, id: InstanceId) -> Result<NodeId> {
        self.instances
            .get(&id)
            .map(|object| object.module)
            .ok_or_else(|| ExecutionError::internal("instance missing from table"))
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Raise an exception instance: unwind frames and nested contexts
    /// towards the nearest handler, binding `<exception>` there. Reaching
    /// the bottom of the frame stack is fatal.
    pub fn raise(&mut self, exception: InstanceId) -> Result<()> {
        loop {
            if self.frames.is_empty() {
                return Err(ExecutionError::UncaughtException {
                    exception,
                    description: self.describe_operand(Some(exception)),
                });
            }
            let frame = self.frames.last_mut().expect("frame present");
            loop {
                if let Some(handler) = frame.context.handler() {
                    frame.pc = handler.pc;
                    frame.operands.truncate(handler.stack_depth);
                    let parent = frame
                        .context
                        .parent()
                        .ok_or_else(|| ExecutionError::internal("handler context has no parent"))?;
                    frame.context = parent;
                    frame
                        .context
                        .bind(compiler::EXCEPTION_LOCAL, Some(exception));
                    return Ok(());
                }
                if frame.context.same(&frame.base_context) {
                    break;
                }
                match frame.context.parent() {
                    Some(parent) => frame.context = parent,
                    None => break,
                }
            }
            self.frames.pop();
        }
    }

    /// Create and raise an instance of an exception class with a message.
    pub fn raise_exception(&mut self, fqn: &str, message: &str) -> Result<()> {
        let module = self
            .environment
            .lookup(fqn)
            .ok_or_else(|| ExecutionError::missing_module(fqn))?;
        self.raise_in_module(module, message)
    }

    /// Raise a `wollok.lang.EvaluationError`. Every dispatch-loop failure
    /// that user code may catch routes through here.
    pub fn raise_evaluation_error(&mut self, description: &str) -> Result<()> {
        self.raise_in_module(self.lang.evaluation_error, description)
    }

    fn raise_stack_overflow(&mut self, description: &str) -> Result<()> {
        self.raise_in_module(self.lang.stack_overflow, description)
    }

    fn raise_in_module(&mut self, module: NodeId, message: &str) -> Result<()> {
        let id = self.create_instance(module, &self.root_context.clone(), None);
        self.zero_fields(id);
        let text = self.string(message);
        if let Some(object) = self.instances.get(&id) {
            object.context.bind("message", Some(text));
        }
        self.raise(id)
    }

    /// A human-readable description of an operand, for diagnostics.
    #[must_use]
    pub fn describe_operand(&self, operand: Operand) -> String {
        let id = match operand {
            Some(id) => id,
            None => return "undefined".to_string(),
        };
        if id == NULL_ID {
            return "null".to_string();
        }
        let object = match self.instances.get(&id) {
            Some(object) => object,
            None => return format!("<missing instance {:?}>", id),
        };
        match &object.inner {
            Some(InnerValue::Number(n)) => format!("{}", n),
            Some(InnerValue::String(s)) => format!("\"{}\"", s),
            Some(InnerValue::List(e)) => format!("a List of {} elements", e.len()),
            Some(InnerValue::Set(e)) => format!("a Set of {} elements", e.len()),
            Some(InnerValue::Handle(_)) => "a native object".to_string(),
            None => {
                let fqn = self.environment.fqn(object.module);
                match object.context.lookup("message") {
                    Some(Some(message_id)) => match self
                        .instances
                        .get(&message_id)
                        .and_then(RuntimeObject::string)
                    {
                        Some(text) => format!("{}: {}", fqn, text),
                        None => format!("a {}", fqn),
                    },
                    _ => format!("a {}", fqn),
                }
            }
        }
    }

    // =========================================================================
    // Copying
    // =========================================================================

    /// An independent deep-copy snapshot of this evaluation.
    ///
    /// Contexts are copied through a per-copy cache keyed on context
    /// identity, so shared contexts stay shared and the copy is
    /// cycle-safe. Instance ids, node ids and compiled code are preserved;
    /// opaque native handles are shared, not cloned.
    #[must_use]
    pub fn copy(&self) -> Evaluation {
        let mut cache: HashMap<usize, Context> = HashMap::new();
        let root_context = copy_context(&self.root_context, &mut cache);
        let frames = self
            .frames
            .iter()
            .map(|frame| Frame {
                instructions: Rc::clone(&frame.instructions),
                pc: frame.pc,
                operands: frame.operands.clone(),
                base_context: copy_context(&frame.base_context, &mut cache),
                context: copy_context(&frame.context, &mut cache),
                label: frame.label.clone(),
            })
            .collect();
        let instances = self
            .instances
            .iter()
            .map(|(&id, object)| {
                (
                    id,
                    RuntimeObject {
                        id: object.id,
                        module: object.module,
                        context: copy_context(&object.context, &mut cache),
                        inner: object.inner.clone(),
                        lazy: object.lazy,
                    },
                )
            })
            .collect();
        Evaluation {
            environment: Rc::clone(&self.environment),
            config: self.config.clone(),
            lang: self.lang,
            root_context,
            frames,
            instances,
            numbers: self.numbers.clone(),
            strings: self.strings.clone(),
            code: self.code.clone(),
            returned: self.returned,
        }
    }
}

/// Copy a context chain through a cache keyed on context identity.
fn copy_context(context: &Context, cache: &mut HashMap<usize, Context>) -> Context {
    if let Some(copied) = cache.get(&context.key()) {
        return copied.clone();
    }
    let parent = context.parent().map(|p| copy_context(&p, cache));
    let copied = Context::from_parts(parent, context.locals(), context.handler());
    cache.insert(context.key(), copied.clone());
    copied
}
