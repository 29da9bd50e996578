// wollok-vm - Instruction definitions
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The instruction set of the stack machine.
//!
//! Seventeen opcodes operating on a per-frame operand stack of optional
//! instance ids (`None` is the undefined value). Jump offsets are relative
//! to the instruction *after* the jump; exception handler offsets on
//! `PushContext` are likewise relative to the following instruction.

use wollok_model::Name;

use crate::runtime::Operand;

/// One instruction of a compiled method, constructor, initializer,
/// program or test.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push the value bound to `name` in the current context chain. If the
    /// value is a pending lazy initializer, a thunk frame is pushed
    /// instead and delivers the resolved value.
    Load(Name),

    /// Pop a value and store it under `name`: with `lookup`, in the
    /// nearest context that already binds it (falling back to the current
    /// context); without, in the current context.
    Store { name: Name, lookup: bool },

    /// Push an instance id, or undefined.
    Push(Operand),

    /// Drop the top of the operand stack.
    Pop,

    /// Enter a nested lexical context. `handler` optionally records an
    /// exception handler at the given offset.
    PushContext { handler: Option<usize> },

    /// Leave one nested context. Popping the frame's base context is a
    /// machine error.
    PopContext,

    /// Swap the top of the stack with the element at depth `distance + 1`.
    Swap { distance: usize },

    /// Duplicate the top of the stack.
    Dup,

    /// Create an instance of `module`. Primitive inner values intern;
    /// collection specs bundle operands off the stack.
    Instantiate {
        module: Name,
        inner: Option<InnerSpec>,
    },

    /// Pop an instance; push whether it is an instance of `module` or a
    /// subtype.
    Inherits { module: Name },

    /// Unconditional relative jump.
    Jump(isize),

    /// Pop a boolean; jump if true. A non-boolean is an evaluation error.
    ConditionalJump(isize),

    /// Pop `arity` arguments and a receiver; resolve `message` through the
    /// receiver's linearization (resuming after `lookup_start` when
    /// given); push a frame or dispatch a native. An unanswered message
    /// dispatches `messageNotUnderstood` instead.
    Call {
        message: Name,
        arity: usize,
        lookup_start: Option<Name>,
        /// Parent the callee's context on the receiver's parent context
        /// (its captured lexical context) instead of the receiver itself.
        skip_receiver_context: bool,
    },

    /// Pop an instance and `arity` arguments; run the matching
    /// constructor, leaving the instance on the caller's stack. With
    /// `optional`, a missing constructor is a no-op; a missing 0-ary
    /// constructor is always tolerated.
    Init {
        arity: usize,
        lookup_start: Name,
        optional: bool,
    },

    /// Pop an instance and one value per name; zero every field of the
    /// instance's full hierarchy, assign the named values, then run the
    /// remaining fields' initializers.
    InitNamed { names: Vec<Name> },

    /// Pop an exception and unwind towards the nearest handler.
    Interrupt,

    /// Pop a value, drop the current frame, and push the value on the
    /// caller's operand stack.
    Return,
}

/// Inner-value specification for `Instantiate`.
#[derive(Debug, Clone, PartialEq)]
pub enum InnerSpec {
    /// An interned number.
    Number(f64),
    /// An interned string.
    String(String),
    /// A list bundling the top `n` operands (pushed left to right).
    List(usize),
    /// A set bundling the top `n` operands.
    Set(usize),
}

impl Instruction {
    /// Whether this instruction transfers control (jump, call, interrupt,
    /// return).
    #[inline]
    #[must_use]
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Instruction::Jump(_)
                | Instruction::ConditionalJump(_)
                | Instruction::Call { .. }
                | Instruction::Init { .. }
                | Instruction::InitNamed { .. }
                | Instruction::Interrupt
                | Instruction::Return
        )
    }

    /// The net operand-stack effect, where statically known.
    ///
    /// `Call` and `Init` depend on their arity and on the callee; `None`
    /// for those.
    #[inline]
    #[must_use]
    pub fn stack_effect(&self) -> Option<isize> {
        Some(match self {
            Instruction::Load(_) | Instruction::Push(_) | Instruction::Dup => 1,
            Instruction::Store { .. }
            | Instruction::Pop
            | Instruction::ConditionalJump(_)
            | Instruction::Interrupt => -1,
            Instruction::PushContext { .. }
            | Instruction::PopContext
            | Instruction::Swap { .. }
            | Instruction::Jump(_) => 0,
            Instruction::Inherits { .. } => 0,
            Instruction::Instantiate { inner, .. } => match inner {
                Some(InnerSpec::List(n)) | Some(InnerSpec::Set(n)) => 1 - (*n as isize),
                _ => 1,
            },
            // Return leaves the frame; the net effect belongs to the caller.
            Instruction::Return => -1,
            Instruction::Call { .. } | Instruction::Init { .. } | Instruction::InitNamed { .. } => {
                return None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_flow_classification() {
        assert!(Instruction::Jump(3).is_control_flow());
        assert!(Instruction::Return.is_control_flow());
        assert!(!Instruction::Dup.is_control_flow());
        assert!(!Instruction::Load("x".to_string()).is_control_flow());
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Instruction::Push(None).stack_effect(), Some(1));
        assert_eq!(Instruction::Pop.stack_effect(), Some(-1));
        assert_eq!(
            Instruction::Instantiate {
                module: "wollok.lang.List".to_string(),
                inner: Some(InnerSpec::List(3)),
            }
            .stack_effect(),
            Some(-2)
        );
        assert_eq!(
            Instruction::Call {
                message: "m".to_string(),
                arity: 2,
                lookup_start: None,
                skip_receiver_context: false,
            }
            .stack_effect(),
            None
        );
    }
}
