// wollok-vm - Garbage collection
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Mark-and-sweep collection over the instance table.
//!
//! Roots are the root context and, per frame, the current and base
//! contexts, every operand on the stack, and every id referenced by a
//! `PUSH` in the frame's instructions. Tracing follows context parents,
//! local values and collection inner values. Contexts form a DAG, so the
//! walk carries a visited set keyed on context identity.
//!
//! Only safe to run between instructions: the dispatch loop never holds
//! an id outside a frame or context while yielding.

use std::collections::HashSet;

use wollok_model::InstanceId;

use crate::instruction::Instruction;
use crate::runtime::Context;

use super::Evaluation;

impl Evaluation {
    /// Delete every instance unreachable from the roots. Interned
    /// numbers and strings whose instances are swept are forgotten too,
    /// so interning never resurrects a dead id.
    pub fn garbage_collect(&mut self) {
        let mut marked: HashSet<InstanceId> = HashSet::new();
        let mut seen_contexts: HashSet<usize> = HashSet::new();
        let mut contexts: Vec<Context> = vec![self.root_context.clone()];
        let mut pending: Vec<InstanceId> = Vec::new();

        for frame in &self.frames {
            contexts.push(frame.context.clone());
            contexts.push(frame.base_context.clone());
            for operand in frame.operands.contents() {
                if let Some(id) = operand {
                    pending.push(*id);
                }
            }
            for instruction in frame.instructions.iter() {
                if let Instruction::Push(Some(id)) = instruction {
                    pending.push(*id);
                }
            }
        }

        loop {
            if let Some(context) = contexts.pop() {
                if !seen_contexts.insert(context.key()) {
                    continue;
                }
                for (_, operand) in context.locals() {
                    if let Some(id) = operand {
                        pending.push(id);
                    }
                }
                if let Some(parent) = context.parent() {
                    contexts.push(parent);
                }
                continue;
            }
            match pending.pop() {
                None => break,
                Some(id) => {
                    if !marked.insert(id) {
                        continue;
                    }
                    if let Some(object) = self.instances.get(&id) {
                        contexts.push(object.context.clone());
                        if let Some(elements) = object.elements() {
                            pending.extend(elements.iter().copied());
                        }
                    }
                }
            }
        }

        self.instances.retain(|id, _| marked.contains(id));
        self.numbers.retain(|_, id| marked.contains(id));
        self.strings.retain(|_, id| marked.contains(id));
    }
}
