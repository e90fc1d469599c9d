//! Text operations as canonical retain/insert/delete sequences.
//!
//! An [`Operation`] consumes `base_len` codepoints and produces
//! `target_len`. The builders keep the action list canonical: adjacent
//! actions of the same kind are merged, zero-length spans and empty
//! inserts are dropped, and an insert landing after a delete is moved in
//! front of it, so two operations with the same effect compare equal.
//!
//! Wire form is a JSON array: a positive integer retains, a negative
//! integer deletes its absolute value, a string inserts. The empty
//! operation serializes to `[]`.

use std::collections::VecDeque;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A primitive edit action over a text buffer, measured in codepoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveOp {
    /// Advance the cursor, copying codepoints through.
    Retain(u64),
    /// Insert the string at the cursor.
    Insert(String),
    /// Consume and drop codepoints.
    Delete(u64),
}

/// Length-mismatch faults from the algebra.
///
/// These indicate that the caller paired operations with incompatible
/// lengths. The connection layer treats any of them as evidence the
/// session has diverged from the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    #[error("cannot compose: left produces {left_target} codepoints, right consumes {right_base}")]
    ComposeMismatch { left_target: u64, right_base: u64 },
    #[error("cannot transform: operations consume {left_base} and {right_base} codepoints")]
    TransformMismatch { left_base: u64, right_base: u64 },
    #[error("cannot apply: operation consumes {base} codepoints, document has {document}")]
    ApplyMismatch { base: u64, document: u64 },
    #[error("action lists exhausted unevenly despite matching lengths")]
    Unbalanced,
}

/// An ordered run of [`PrimitiveOp`]s in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    actions: Vec<PrimitiveOp>,
    base_len: u64,
    target_len: u64,
}

fn codepoints(s: &str) -> u64 {
    s.chars().count() as u64
}

/// Splits `s` after its first `n` codepoints.
fn split_codepoints(s: &str, n: u64) -> (String, String) {
    let byte = s
        .char_indices()
        .nth(n as usize)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    (s[..byte].to_owned(), s[byte..].to_owned())
}

impl Operation {
    /// The empty operation over the empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// The action list, in canonical order.
    pub fn actions(&self) -> &[PrimitiveOp] {
        &self.actions
    }

    /// Number of codepoints this operation consumes.
    pub fn base_len(&self) -> u64 {
        self.base_len
    }

    /// Number of codepoints this operation produces.
    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    /// True if applying this operation leaves any document unchanged.
    pub fn is_noop(&self) -> bool {
        matches!(self.actions.as_slice(), [] | [PrimitiveOp::Retain(_)])
    }

    /// Appends a retain, merging with a trailing retain.
    pub fn retain(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        self.base_len += n;
        self.target_len += n;
        if let Some(PrimitiveOp::Retain(last)) = self.actions.last_mut() {
            *last += n;
        } else {
            self.actions.push(PrimitiveOp::Retain(n));
        }
    }

    /// Appends a delete, merging with a trailing delete.
    pub fn delete(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        self.base_len += n;
        if let Some(PrimitiveOp::Delete(last)) = self.actions.last_mut() {
            *last += n;
        } else {
            self.actions.push(PrimitiveOp::Delete(n));
        }
    }

    /// Appends an insert, keeping insert-before-delete canonical order.
    pub fn insert(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        self.target_len += codepoints(s);
        match self.actions.as_mut_slice() {
            [.., PrimitiveOp::Insert(last)] => last.push_str(s),
            [.., PrimitiveOp::Insert(prior), PrimitiveOp::Delete(_)] => prior.push_str(s),
            [.., trailing @ PrimitiveOp::Delete(_)] => {
                let delete = trailing.clone();
                *trailing = PrimitiveOp::Insert(s.to_owned());
                self.actions.push(delete);
            }
            _ => self.actions.push(PrimitiveOp::Insert(s.to_owned())),
        }
    }

    /// Sequential combination: `apply(apply(s, self), other) == apply(s, self.compose(other))`.
    pub fn compose(&self, other: &Self) -> Result<Self, OpError> {
        if self.target_len != other.base_len {
            return Err(OpError::ComposeMismatch {
                left_target: self.target_len,
                right_base: other.base_len,
            });
        }

        let mut first: VecDeque<PrimitiveOp> = self.actions.iter().cloned().collect();
        let mut second: VecDeque<PrimitiveOp> = other.actions.iter().cloned().collect();
        let mut out = Operation::new();

        loop {
            match (first.front_mut(), second.front_mut()) {
                (None, None) => break,
                // Deletes in the first pass through untouched by the second.
                (Some(PrimitiveOp::Delete(n)), _) => {
                    out.delete(*n);
                    first.pop_front();
                }
                // Inserts in the second act on text the first already produced.
                (_, Some(PrimitiveOp::Insert(s))) => {
                    out.insert(s);
                    second.pop_front();
                }
                (None, Some(_)) | (Some(_), None) => return Err(OpError::Unbalanced),
                (Some(PrimitiveOp::Retain(n)), Some(PrimitiveOp::Retain(m))) => {
                    let span = (*n).min(*m);
                    out.retain(span);
                    *n -= span;
                    *m -= span;
                    let (n_done, m_done) = (*n == 0, *m == 0);
                    if n_done {
                        first.pop_front();
                    }
                    if m_done {
                        second.pop_front();
                    }
                }
                (Some(PrimitiveOp::Retain(n)), Some(PrimitiveOp::Delete(m))) => {
                    let span = (*n).min(*m);
                    out.delete(span);
                    *n -= span;
                    *m -= span;
                    let (n_done, m_done) = (*n == 0, *m == 0);
                    if n_done {
                        first.pop_front();
                    }
                    if m_done {
                        second.pop_front();
                    }
                }
                (Some(PrimitiveOp::Insert(s)), Some(PrimitiveOp::Retain(m))) => {
                    let len = codepoints(s);
                    if len <= *m {
                        out.insert(s);
                        *m -= len;
                        let m_done = *m == 0;
                        first.pop_front();
                        if m_done {
                            second.pop_front();
                        }
                    } else {
                        let (head, tail) = split_codepoints(s, *m);
                        out.insert(&head);
                        *s = tail;
                        second.pop_front();
                    }
                }
                (Some(PrimitiveOp::Insert(s)), Some(PrimitiveOp::Delete(m))) => {
                    let len = codepoints(s);
                    if len <= *m {
                        *m -= len;
                        let m_done = *m == 0;
                        first.pop_front();
                        if m_done {
                            second.pop_front();
                        }
                    } else {
                        let (_, tail) = split_codepoints(s, *m);
                        *s = tail;
                        second.pop_front();
                    }
                }
            }
        }

        Ok(out)
    }

    /// Reconciles two concurrent operations from the same base.
    ///
    /// Produces `(a', b')` with `a ∘ b' == b ∘ a'`. Concurrent inserts at
    /// the same position keep `self`'s text to the left; the server and
    /// every client must agree on this ordering.
    pub fn transform(&self, other: &Self) -> Result<(Self, Self), OpError> {
        if self.base_len != other.base_len {
            return Err(OpError::TransformMismatch {
                left_base: self.base_len,
                right_base: other.base_len,
            });
        }

        let mut ours: VecDeque<PrimitiveOp> = self.actions.iter().cloned().collect();
        let mut theirs: VecDeque<PrimitiveOp> = other.actions.iter().cloned().collect();
        let mut a_prime = Operation::new();
        let mut b_prime = Operation::new();

        loop {
            match (ours.front_mut(), theirs.front_mut()) {
                (None, None) => break,
                // Our insert wins the position; their view retains over it.
                (Some(PrimitiveOp::Insert(s)), _) => {
                    b_prime.retain(codepoints(s));
                    a_prime.insert(s);
                    ours.pop_front();
                }
                (_, Some(PrimitiveOp::Insert(s))) => {
                    a_prime.retain(codepoints(s));
                    b_prime.insert(s);
                    theirs.pop_front();
                }
                (None, Some(_)) | (Some(_), None) => return Err(OpError::Unbalanced),
                (Some(PrimitiveOp::Retain(n)), Some(PrimitiveOp::Retain(m))) => {
                    let span = (*n).min(*m);
                    a_prime.retain(span);
                    b_prime.retain(span);
                    *n -= span;
                    *m -= span;
                    let (n_done, m_done) = (*n == 0, *m == 0);
                    if n_done {
                        ours.pop_front();
                    }
                    if m_done {
                        theirs.pop_front();
                    }
                }
                // Both deleted the same span; nothing left to reconcile.
                (Some(PrimitiveOp::Delete(n)), Some(PrimitiveOp::Delete(m))) => {
                    let span = (*n).min(*m);
                    *n -= span;
                    *m -= span;
                    let (n_done, m_done) = (*n == 0, *m == 0);
                    if n_done {
                        ours.pop_front();
                    }
                    if m_done {
                        theirs.pop_front();
                    }
                }
                (Some(PrimitiveOp::Delete(n)), Some(PrimitiveOp::Retain(m))) => {
                    let span = (*n).min(*m);
                    a_prime.delete(span);
                    *n -= span;
                    *m -= span;
                    let (n_done, m_done) = (*n == 0, *m == 0);
                    if n_done {
                        ours.pop_front();
                    }
                    if m_done {
                        theirs.pop_front();
                    }
                }
                (Some(PrimitiveOp::Retain(n)), Some(PrimitiveOp::Delete(m))) => {
                    let span = (*n).min(*m);
                    b_prime.delete(span);
                    *n -= span;
                    *m -= span;
                    let (n_done, m_done) = (*n == 0, *m == 0);
                    if n_done {
                        ours.pop_front();
                    }
                    if m_done {
                        theirs.pop_front();
                    }
                }
            }
        }

        Ok((a_prime, b_prime))
    }

    /// Applies the operation to a document, counting in codepoints.
    pub fn apply(&self, text: &str) -> Result<String, OpError> {
        let document = codepoints(text);
        if document != self.base_len {
            return Err(OpError::ApplyMismatch {
                base: self.base_len,
                document,
            });
        }
        let mut result = String::with_capacity(text.len());
        let mut rest = text.chars();
        for action in &self.actions {
            match action {
                PrimitiveOp::Retain(n) => result.extend(rest.by_ref().take(*n as usize)),
                PrimitiveOp::Delete(n) => {
                    for _ in 0..*n {
                        rest.next();
                    }
                }
                PrimitiveOp::Insert(s) => result.push_str(s),
            }
        }
        Ok(result)
    }

    /// The operation that undoes this one against `text`, its base document.
    pub fn invert(&self, text: &str) -> Self {
        let mut inverse = Operation::new();
        let mut rest = text.chars();
        for action in &self.actions {
            match action {
                PrimitiveOp::Retain(n) => {
                    inverse.retain(*n);
                    for _ in 0..*n {
                        rest.next();
                    }
                }
                PrimitiveOp::Insert(s) => inverse.delete(codepoints(s)),
                PrimitiveOp::Delete(n) => {
                    let removed: String = rest.by_ref().take(*n as usize).collect();
                    inverse.insert(&removed);
                }
            }
        }
        inverse
    }
}

// ── Wire form ───────────────────────────────────────────────────────

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.actions.len()))?;
        for action in &self.actions {
            match action {
                PrimitiveOp::Retain(n) => seq.serialize_element(&(*n as i64))?,
                PrimitiveOp::Delete(n) => seq.serialize_element(&-(*n as i64))?,
                PrimitiveOp::Insert(s) => seq.serialize_element(s)?,
            }
        }
        seq.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireAction {
    Span(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let actions = Vec::<WireAction>::deserialize(deserializer)?;
        let mut op = Operation::new();
        for action in actions {
            match action {
                WireAction::Span(n) if n > 0 => op.retain(n as u64),
                WireAction::Span(n) if n < 0 => op.delete(n.unsigned_abs()),
                WireAction::Span(_) => {
                    return Err(serde::de::Error::custom("zero-length span in operation"))
                }
                WireAction::Text(s) => op.insert(&s),
            }
        }
        Ok(op)
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{random_operation, random_text};

    const ROUNDS: usize = 500;

    #[test]
    fn test_length_bookkeeping() {
        let mut op = Operation::new();
        assert_eq!(op.base_len(), 0);
        assert_eq!(op.target_len(), 0);
        op.retain(4);
        assert_eq!((op.base_len(), op.target_len()), (4, 4));
        op.insert("xy");
        assert_eq!((op.base_len(), op.target_len()), (4, 6));
        op.delete(3);
        assert_eq!((op.base_len(), op.target_len()), (7, 6));
    }

    #[test]
    fn test_builders_merge_adjacent() {
        let mut op = Operation::new();
        op.retain(2);
        op.retain(3);
        op.insert("ab");
        op.insert("cd");
        op.delete(1);
        op.delete(2);
        assert_eq!(
            op.actions(),
            &[
                PrimitiveOp::Retain(5),
                PrimitiveOp::Insert("abcd".into()),
                PrimitiveOp::Delete(3),
            ]
        );
    }

    #[test]
    fn test_builders_drop_empty_actions() {
        let mut op = Operation::new();
        op.retain(0);
        op.insert("");
        op.delete(0);
        assert!(op.actions().is_empty());
        assert!(op.is_noop());
    }

    #[test]
    fn test_insert_moves_before_trailing_delete() {
        let mut a = Operation::new();
        a.delete(2);
        a.insert("xy");
        let mut b = Operation::new();
        b.insert("xy");
        b.delete(2);
        assert_eq!(a, b);
        // Both describe "replace two codepoints with xy".
        assert_eq!(a.apply("ab").unwrap(), "xy");
    }

    #[test]
    fn test_canonical_form_makes_equal_effects_equal() {
        let mut a = Operation::new();
        a.retain(2);
        a.retain(3);
        a.insert("lo");
        let mut b = Operation::new();
        b.retain(5);
        b.insert("l");
        b.insert("o");
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_noop() {
        let mut op = Operation::new();
        assert!(op.is_noop());
        op.retain(7);
        assert!(op.is_noop());
        op.insert("x");
        assert!(!op.is_noop());
    }

    #[test]
    fn test_apply_counts_codepoints() {
        let mut op = Operation::new();
        op.retain(1);
        op.delete(1);
        op.insert("!");
        op.retain(3);
        // Astral and accented characters each count once.
        assert_eq!(op.apply("😀héllo").unwrap_err(), OpError::ApplyMismatch { base: 5, document: 6 });
        assert_eq!(op.apply("😀éllo").unwrap(), "😀!llo");
    }

    #[test]
    fn test_apply_length_mismatch() {
        let mut op = Operation::new();
        op.retain(3);
        assert!(matches!(op.apply("ab"), Err(OpError::ApplyMismatch { .. })));
    }

    #[test]
    fn test_compose_length_mismatch() {
        let mut a = Operation::new();
        a.insert("abc");
        let mut b = Operation::new();
        b.retain(2);
        assert!(matches!(a.compose(&b), Err(OpError::ComposeMismatch { .. })));
    }

    #[test]
    fn test_transform_length_mismatch() {
        let mut a = Operation::new();
        a.retain(2);
        let mut b = Operation::new();
        b.retain(3);
        assert!(matches!(a.transform(&b), Err(OpError::TransformMismatch { .. })));
    }

    #[test]
    fn test_apply_random() {
        let mut rng = rand::rng();
        for _ in 0..ROUNDS {
            let s = random_text(&mut rng, 40);
            let op = random_operation(&mut rng, &s);
            assert_eq!(codepoints(&s), op.base_len());
            let applied = op.apply(&s).unwrap();
            assert_eq!(codepoints(&applied), op.target_len());
        }
    }

    #[test]
    fn test_compose_random() {
        let mut rng = rand::rng();
        for _ in 0..ROUNDS {
            let s = random_text(&mut rng, 20);
            let a = random_operation(&mut rng, &s);
            let after_a = a.apply(&s).unwrap();
            let b = random_operation(&mut rng, &after_a);
            let ab = a.compose(&b).unwrap();
            assert_eq!(ab.base_len(), a.base_len());
            assert_eq!(ab.target_len(), b.target_len());
            assert_eq!(ab.apply(&s).unwrap(), b.apply(&after_a).unwrap());
        }
    }

    #[test]
    fn test_compose_associative() {
        let mut rng = rand::rng();
        for _ in 0..ROUNDS {
            let s = random_text(&mut rng, 20);
            let a = random_operation(&mut rng, &s);
            let after_a = a.apply(&s).unwrap();
            let b = random_operation(&mut rng, &after_a);
            let after_b = b.apply(&after_a).unwrap();
            let c = random_operation(&mut rng, &after_b);

            let left = a.compose(&b).unwrap().compose(&c).unwrap();
            let right = a.compose(&b.compose(&c).unwrap()).unwrap();
            assert_eq!(left.apply(&s).unwrap(), right.apply(&s).unwrap());
        }
    }

    #[test]
    fn test_transform_converges() {
        let mut rng = rand::rng();
        for _ in 0..ROUNDS {
            let s = random_text(&mut rng, 20);
            let a = random_operation(&mut rng, &s);
            let b = random_operation(&mut rng, &s);
            let (a_prime, b_prime) = a.transform(&b).unwrap();
            let ab = a.compose(&b_prime).unwrap();
            let ba = b.compose(&a_prime).unwrap();
            assert_eq!(ab, ba);
            assert_eq!(ab.apply(&s).unwrap(), ba.apply(&s).unwrap());
        }
    }

    #[test]
    fn test_transform_insert_tie_break() {
        let mut a = Operation::new();
        a.insert("X");
        let mut b = Operation::new();
        b.insert("Y");
        let (a_prime, b_prime) = a.transform(&b).unwrap();
        // Both composition orders land on "XY": a's insert takes the left slot.
        assert_eq!(a.compose(&b_prime).unwrap().apply("").unwrap(), "XY");
        assert_eq!(b.compose(&a_prime).unwrap().apply("").unwrap(), "XY");
    }

    #[test]
    fn test_invert_round_trip() {
        let mut rng = rand::rng();
        for _ in 0..ROUNDS {
            let s = random_text(&mut rng, 30);
            let op = random_operation(&mut rng, &s);
            let inverse = op.invert(&s);
            assert_eq!(inverse.base_len(), op.target_len());
            assert_eq!(inverse.target_len(), op.base_len());
            assert_eq!(inverse.apply(&op.apply(&s).unwrap()).unwrap(), s);
        }
    }

    #[test]
    fn test_wire_decode() {
        let op: Operation = serde_json::from_str(r#"[1,-2,"abc"]"#).unwrap();
        let mut expected = Operation::new();
        expected.retain(1);
        expected.delete(2);
        expected.insert("abc");
        assert_eq!(op, expected);
    }

    #[test]
    fn test_wire_encode() {
        let mut op = Operation::new();
        op.retain(3);
        op.insert("hi");
        op.delete(1);
        assert_eq!(serde_json::to_string(&op).unwrap(), r#"[3,"hi",-1]"#);
    }

    #[test]
    fn test_wire_empty() {
        assert_eq!(serde_json::to_string(&Operation::new()).unwrap(), "[]");
        let op: Operation = serde_json::from_str("[]").unwrap();
        assert!(op.is_noop());
    }

    #[test]
    fn test_wire_round_trip_random() {
        let mut rng = rand::rng();
        for _ in 0..ROUNDS {
            let s = random_text(&mut rng, 20);
            let op = random_operation(&mut rng, &s);
            let encoded = serde_json::to_string(&op).unwrap();
            let decoded: Operation = serde_json::from_str(&encoded).unwrap();
            assert_eq!(op, decoded);
        }
    }

    #[test]
    fn test_wire_rejects_zero_span() {
        assert!(serde_json::from_str::<Operation>("[0]").is_err());
    }
}
