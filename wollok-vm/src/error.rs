// wollok-vm - Error types for compilation and execution
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Error types for the compiler and the stack machine.
//!
//! Most runtime failures never surface here: anything expressible as a
//! user-level exception (`wollok.lang.EvaluationError`,
//! `StackOverflowException`, `messageNotUnderstood`) is raised inside the
//! evaluation and handled by the ordinary unwinding machinery. What is
//! left are structural failures — compiler bugs, missing well-known
//! modules, a misconfigured native registry — and exceptions that reach
//! the bottom of the frame stack without a handler.

use std::fmt;

use wollok_model::{InstanceId, Name};

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Errors during compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The compiler was asked for the code of a node kind it does not
    /// handle. Bug-indicating: the dispatch loop only requests code for
    /// methods, constructors, fields, variables, programs and tests.
    UnexpectedNode { kind: String },
    /// A reference reached the compiler without a resolved target.
    UnlinkedReference { name: Name },
    /// Positional and named arguments were mixed in one instantiation.
    MixedArguments,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnexpectedNode { kind } => {
                write!(f, "No code can be generated for {} nodes", kind)
            }
            CompileError::UnlinkedReference { name } => {
                write!(f, "Reference '{}' reached the compiler unlinked", name)
            }
            CompileError::MixedArguments => {
                write!(f, "Positional and named arguments cannot be mixed")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors that abort an evaluation.
///
/// Once one of these is returned the evaluation is in an unspecified
/// state and must be discarded; there is no resume.
#[derive(Debug, Clone)]
pub enum ExecutionError {
    /// Compilation failed while lazily lowering a node.
    Compile(CompileError),
    /// An exception reached the bottom of the frame stack.
    UncaughtException {
        exception: InstanceId,
        description: String,
    },
    /// A well-known module (or an instruction's module operand) does not
    /// exist in the environment.
    MissingModule { fqn: Name },
    /// A method declared `native` has no entry in the native registry.
    MissingNative { key: Name },
    /// A structural invariant of the machine was violated: corrupt frame
    /// stack, operand underflow, popping a base context. Always a bug.
    Internal(String),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Compile(e) => write!(f, "{}", e),
            ExecutionError::UncaughtException { description, .. } => {
                write!(f, "Uncaught exception: {}", description)
            }
            ExecutionError::MissingModule { fqn } => {
                write!(f, "Module '{}' does not exist in the environment", fqn)
            }
            ExecutionError::MissingNative { key } => {
                write!(f, "No native registered for '{}'", key)
            }
            ExecutionError::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<CompileError> for ExecutionError {
    fn from(error: CompileError) -> Self {
        ExecutionError::Compile(error)
    }
}

impl ExecutionError {
    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ExecutionError::Internal(message.into())
    }

    /// Create a missing-module error.
    pub fn missing_module(fqn: impl Into<Name>) -> Self {
        ExecutionError::MissingModule { fqn: fqn.into() }
    }
}
