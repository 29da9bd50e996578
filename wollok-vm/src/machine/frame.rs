// wollok-vm - Call frames
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Call frames: one activation record per method, constructor,
//! initializer, thunk or synthesized entry point.
//!
//! A frame is Running while its program counter is inside its instruction
//! list and Finished once the counter reaches the end. Calls push new
//! frames (the caller stays Running, pointing past the call); `RETURN`
//! pops the frame and hands its value to the caller.

use std::rc::Rc;

use wollok_model::Name;

use crate::instruction::Instruction;
use crate::machine::stack::OperandStack;
use crate::runtime::Context;

/// A call-activation record.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The compiled code this frame executes. Immutable and shared with
    /// the code cache.
    pub instructions: Rc<Vec<Instruction>>,
    /// Index of the next instruction.
    pub pc: usize,
    /// This frame's operand stack.
    pub operands: OperandStack,
    /// The context created for this call. `POP_CONTEXT` may never pop it.
    pub base_context: Context,
    /// The currently active context: the base, or a nested push.
    pub context: Context,
    /// What this frame is executing, for diagnostics.
    pub label: Name,
}

impl Frame {
    /// Create a frame over compiled code with a fresh call context.
    #[must_use]
    pub fn new(
        instructions: Rc<Vec<Instruction>>,
        context: Context,
        operand_limit: usize,
        label: impl Into<Name>,
    ) -> Self {
        Frame {
            instructions,
            pc: 0,
            operands: OperandStack::new(operand_limit),
            base_context: context.clone(),
            context,
            label: label.into(),
        }
    }

    /// Whether this frame has run off the end of its instructions.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pc >= self.instructions.len()
    }
}
