// wollok-vm - Bytecode compiler and stack virtual machine for the Wollok programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # wollok-vm
//!
//! The execution core of the Wollok language: a lazy per-node compiler
//! lowering linked trees to a 17-opcode instruction set, and a
//! stack-based interpreter with nested lexical contexts, mixin-aware
//! dynamic dispatch, try/catch/always unwinding, lazy global
//! initialization, interned primitives, garbage collection and a native
//! escape hatch.
//!
//! # Quick start
//!
//! ```
//! use std::rc::Rc;
//! use wollok_linker::{base_packages, link};
//! use wollok_vm::{Evaluation, EvaluationConfig};
//!
//! let environment = Rc::new(link(base_packages()).unwrap());
//! let mut evaluation = Evaluation::of(environment, EvaluationConfig::default()).unwrap();
//!
//! // Primitives are interned: the same value always has the same id.
//! let three = evaluation.number(3.0);
//! assert_eq!(three, evaluation.number(3.0));
//! ```
//!
//! Execution is embedder-driven: push work with
//! [`Evaluation::send_message`], [`Evaluation::run_program`] or
//! [`Evaluation::run_test`], or single-step with [`Evaluation::step`].

pub mod compiler;
pub mod error;
pub mod instruction;
pub mod machine;
pub mod runtime;

pub use error::{CompileError, ExecutionError, Result};
pub use instruction::{InnerSpec, Instruction};
pub use machine::{
    Evaluation, EvaluationConfig, Frame, NativeFunction, NativeRegistry, OperandStack,
};
pub use runtime::{Context, InnerValue, Operand, RuntimeObject, FALSE_ID, NULL_ID, TRUE_ID};

// Re-export the model ids embedders deal in.
pub use wollok_model::{InstanceId, NodeId};
