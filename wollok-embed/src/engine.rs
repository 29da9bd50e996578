// wollok-embed - Engine implementation
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The Engine struct - main entry point for embedding Wollok.

use std::fmt;
use std::rc::Rc;

use wollok_linker::{base_packages, link, LinkError};
use wollok_model::ast::Package;
use wollok_model::node::NodeKind;
use wollok_model::{Environment, InstanceId, Name, NodeId};
use wollok_vm::{Evaluation, EvaluationConfig, ExecutionError, Operand};

use crate::natives;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine facade.
#[derive(Debug)]
pub enum EngineError {
    /// Linking the packages failed.
    Link(LinkError),
    /// Evaluation failed fatally.
    Execution(ExecutionError),
    /// A fully-qualified name does not denote what the call expects.
    NotFound { fqn: Name },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Link(e) => write!(f, "{}", e),
            EngineError::Execution(e) => write!(f, "{}", e),
            EngineError::NotFound { fqn } => write!(f, "'{}' not found", fqn),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LinkError> for EngineError {
    fn from(error: LinkError) -> Self {
        EngineError::Link(error)
    }
}

impl From<ExecutionError> for EngineError {
    fn from(error: ExecutionError) -> Self {
        EngineError::Execution(error)
    }
}

/// The outcome of one test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// The test's fully-qualified name.
    pub name: Name,
    /// `None` when the test passed; the failure description otherwise.
    pub failure: Option<String>,
}

impl TestResult {
    /// Whether the test passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// The Wollok engine.
///
/// `Engine` links user packages onto the built-in base library and keeps a
/// ready [`Evaluation`] to send messages into.
///
/// Not thread-safe: evaluations use `Rc` and `RefCell` internally. Create
/// one engine per thread if you need concurrency; engines share nothing.
///
/// # Example
///
/// ```rust
/// use wollok_embed::Engine;
/// use wollok_model::ast::{Body, Entity, Expression, Member, Method, Package, Singleton};
///
/// let pepita = Singleton::named(
///     "pepita",
///     vec![Member::Method(Method::new(
///         "energia",
///         vec![],
///         Body::of(Expression::number(100.0)),
///     ))],
/// );
/// let mut engine = Engine::new(vec![Package::new(
///     "example",
///     vec![Entity::Singleton(pepita)],
/// )])
/// .unwrap();
///
/// let result = engine.send_to("example.pepita", "energia", &[]).unwrap();
/// assert_eq!(engine.evaluation().number_value(result), Some(100.0));
/// ```
pub struct Engine {
    environment: Rc<Environment>,
    evaluation: Evaluation,
}

impl Engine {
    /// Create an engine over the given packages with the default
    /// configuration and the default native set.
    pub fn new(packages: Vec<Package>) -> Result<Self> {
        let config = EvaluationConfig {
            natives: natives::default_natives(),
            ..EvaluationConfig::default()
        };
        Engine::with_config(packages, config)
    }

    /// Create an engine with a custom configuration. The caller owns the
    /// native registry entirely; combine with
    /// [`natives::default_natives`] to keep the base library working.
    pub fn with_config(packages: Vec<Package>, config: EvaluationConfig) -> Result<Self> {
        let mut all = base_packages();
        all.extend(packages);
        let environment = Rc::new(link(all)?);
        let evaluation = Evaluation::of(Rc::clone(&environment), config)?;
        Ok(Engine {
            environment,
            evaluation,
        })
    }

    /// The linked environment.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// The underlying evaluation, for direct access.
    pub fn evaluation(&mut self) -> &mut Evaluation {
        &mut self.evaluation
    }

    /// The instance of a named singleton, by fully-qualified name.
    #[must_use]
    pub fn singleton(&self, fqn: &str) -> Option<InstanceId> {
        self.evaluation.global(fqn).flatten()
    }

    /// Send a message to an instance.
    pub fn send(
        &mut self,
        receiver: InstanceId,
        message: &str,
        args: &[InstanceId],
    ) -> Result<Operand> {
        Ok(self.evaluation.send_message(message, receiver, args)?)
    }

    /// Send a message to a named singleton.
    pub fn send_to(&mut self, fqn: &str, message: &str, args: &[InstanceId]) -> Result<Operand> {
        let receiver = self.singleton(fqn).ok_or_else(|| EngineError::NotFound {
            fqn: fqn.to_string(),
        })?;
        self.send(receiver, message, args)
    }

    /// Run a program by fully-qualified name.
    pub fn run_program(&mut self, fqn: &str) -> Result<()> {
        let program = self.node_of_kind(fqn, |kind| matches!(kind, NodeKind::Program { .. }))?;
        Ok(self.evaluation.run_program(program)?)
    }

    /// Run every test in the environment, each against an independent
    /// snapshot of the evaluation so tests cannot observe each other's
    /// side effects.
    pub fn run_tests(&mut self) -> Vec<TestResult> {
        let tests = self.environment.tests();
        let mut results = Vec::with_capacity(tests.len());
        for test in tests {
            let name = self.environment.fqn(test);
            let mut snapshot = self.evaluation.copy();
            let failure = match snapshot.run_test(test) {
                Ok(()) => None,
                Err(error) => Some(error.to_string()),
            };
            results.push(TestResult { name, failure });
        }
        results
    }

    fn node_of_kind(
        &self,
        fqn: &str,
        accepts: impl Fn(&NodeKind) -> bool,
    ) -> Result<NodeId> {
        let node = self
            .environment
            .lookup(fqn)
            .ok_or_else(|| EngineError::NotFound {
                fqn: fqn.to_string(),
            })?;
        if accepts(&self.environment.node(node).kind) {
            Ok(node)
        } else {
            Err(EngineError::NotFound {
                fqn: fqn.to_string(),
            })
        }
    }
}
