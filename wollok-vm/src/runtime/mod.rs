// wollok-vm - Runtime values and contexts
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime values: instances, inner values and lexical contexts.

pub mod context;
pub mod object;

pub use context::{Context, ExceptionHandler};
pub use object::{InnerValue, Operand, RuntimeObject, FALSE_ID, NULL_ID, TRUE_ID};
