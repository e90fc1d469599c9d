//! Mapping cursor positions through an operation.
//!
//! A cursor at codepoint `i` in the base document lands at
//! `transform_index(op, i)` in the produced document: inserts at or
//! before `i` shift it right, deletes spanning `i` clamp it to the
//! start of the deleted range, and actions past `i` leave it alone.

use crate::operation::{Operation, PrimitiveOp};

/// Maps a codepoint index through `operation`.
pub fn transform_index(operation: &Operation, position: u32) -> u32 {
    let mut remaining = i64::from(position);
    let mut transformed = remaining;
    for action in operation.actions() {
        match action {
            PrimitiveOp::Retain(n) => remaining -= *n as i64,
            PrimitiveOp::Insert(s) => transformed += s.chars().count() as i64,
            PrimitiveOp::Delete(n) => {
                transformed -= remaining.min(*n as i64);
                remaining -= *n as i64;
            }
        }
        if remaining < 0 {
            break;
        }
    }
    transformed as u32
}
