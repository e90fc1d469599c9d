//! # scrawl-ot — Operational transformation for plain text
//!
//! The algebra underneath Scrawl's collaborative editing. An [`Operation`]
//! is a function from one string to another, written as a run of
//! retain/insert/delete actions measured in Unicode codepoints.
//!
//! ## Convergence identity
//!
//! ```text
//!            doc
//!           /   \
//!         a       b        concurrent edits from the same base
//!           \   /
//!  transform(a, b) = (a', b')
//!           /   \
//!      a ∘ b'   b ∘ a'     both orders reach the same document
//! ```
//!
//! Every client and the server run the same [`Operation::transform`] with
//! the same insert tie-break, which is what makes the system converge.
//!
//! ## Modules
//!
//! - [`operation`] — the action sequence: compose, transform, apply, invert
//! - [`index`] — mapping cursor positions through an operation
//!
//! Reference: Ellis & Gibbs, "Concurrency control in groupware systems"

#![forbid(unsafe_code)]

pub mod index;
pub mod operation;

#[cfg(test)]
pub(crate) mod testing;

pub use index::transform_index;
pub use operation::{OpError, Operation, PrimitiveOp};
