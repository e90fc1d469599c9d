//! Randomized inputs for the algebra law tests.

use rand::Rng;

use crate::operation::Operation;

// Mix of ASCII, accented, CJK, and astral codepoints so the laws are
// exercised across UTF-8 widths.
const POOL: &[char] = &['a', 'b', 'c', 'd', 'e', ' ', '\n', 'ß', 'é', '中', '😀'];

pub fn random_text(rng: &mut impl Rng, max_codepoints: usize) -> String {
    let len = rng.random_range(0..=max_codepoints);
    (0..len).map(|_| POOL[rng.random_range(0..POOL.len())]).collect()
}

/// A random operation whose base length matches `text`.
pub fn random_operation(rng: &mut impl Rng, text: &str) -> Operation {
    let mut op = Operation::new();
    let mut remaining = text.chars().count() as u64;
    while remaining > 0 {
        let span = rng.random_range(1..=remaining.min(4));
        match rng.random_range(0..3) {
            0 => op.retain(span),
            1 => op.delete(span),
            _ => {
                let fresh = random_text(rng, 3);
                op.insert(&fresh);
                op.retain(span);
            }
        }
        remaining -= span;
    }
    if rng.random_range(0..3) == 0 {
        let tail = random_text(rng, 4);
        op.insert(&tail);
    }
    op
}
