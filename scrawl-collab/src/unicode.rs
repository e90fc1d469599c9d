//! UTF-16 and codepoint offset conversion.
//!
//! Host editors index text in UTF-16 code units; the wire protocol
//! counts Unicode codepoints. Astral-plane characters are 2 units but
//! 1 codepoint, so every index crossing the editor/protocol boundary
//! goes through these helpers. Offsets past the end clamp to the end;
//! a unit offset landing inside a surrogate pair resolves to the index
//! of the codepoint containing it.

/// Number of Unicode codepoints in `s`.
pub fn codepoint_len(s: &str) -> usize {
    s.chars().count()
}

/// Converts a UTF-16 code unit offset into a codepoint offset.
pub fn utf16_to_codepoint(text: &str, utf16_offset: usize) -> usize {
    let mut units = 0;
    for (index, ch) in text.chars().enumerate() {
        let next = units + ch.len_utf16();
        if utf16_offset < next {
            return index;
        }
        units = next;
    }
    codepoint_len(text)
}

/// Converts a codepoint offset into a UTF-16 code unit offset.
pub fn codepoint_to_utf16(text: &str, codepoint_offset: usize) -> usize {
    text.chars()
        .take(codepoint_offset)
        .map(char::len_utf16)
        .sum()
}
