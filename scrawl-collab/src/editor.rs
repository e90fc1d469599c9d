//! The capability seam between the session and a host editor.
//!
//! The session never talks to a concrete editor widget. It sees a text
//! model addressed in UTF-16 code units (the indexing Monaco-style
//! editors expose) and a decoration sink for remote cursors. Hosts
//! implement [`EditorModel`] over their real editor; [`InMemoryModel`]
//! is the string-backed implementation used headless and in tests.
//!
//! The host is responsible for normalizing line endings to LF before
//! text reaches the model.

use std::sync::{Arc, Mutex};

/// One host edit range against the pre-change text, in UTF-16 units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentChange {
    pub utf16_offset: usize,
    pub utf16_length: usize,
    pub text: String,
}

impl ContentChange {
    pub fn new(utf16_offset: usize, utf16_length: usize, text: impl Into<String>) -> Self {
        Self {
            utf16_offset,
            utf16_length,
            text: text.into(),
        }
    }
}

/// A caret decoration for one remote cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caret {
    pub peer: u64,
    pub hue: u16,
    pub utf16_offset: usize,
}

/// A highlighted range for one remote selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionSpan {
    pub peer: u64,
    pub hue: u16,
    pub utf16_start: usize,
    pub utf16_end: usize,
}

/// Replacement set of remote decorations.
///
/// `new_hues` lists hues appearing for the first time in this session;
/// the host registers a style rule for each exactly once and never sees
/// a hue repeated here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecorationUpdate {
    pub carets: Vec<Caret>,
    pub selections: Vec<SelectionSpan>,
    pub new_hues: Vec<u16>,
}

/// What the session requires of a host editor.
pub trait EditorModel {
    /// Current document content.
    fn value(&self) -> String;

    /// Replaces `utf16_length` units at `utf16_offset` with `text`,
    /// preserving caret intent the way the host editor does for
    /// programmatic edits.
    fn replace(&mut self, utf16_offset: usize, utf16_length: usize, text: &str);

    /// Replaces the full set of remote decorations.
    fn set_decorations(&mut self, update: &DecorationUpdate);
}

fn utf16_to_byte(text: &str, utf16_offset: usize) -> usize {
    let mut units = 0;
    for (byte, ch) in text.char_indices() {
        if units >= utf16_offset {
            return byte;
        }
        units += ch.len_utf16();
    }
    text.len()
}

/// Plain string-backed model.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    text: String,
    decorations: DecorationUpdate,
}

impl InMemoryModel {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            decorations: DecorationUpdate::default(),
        }
    }

    /// The most recent decoration update.
    pub fn decorations(&self) -> &DecorationUpdate {
        &self.decorations
    }
}

impl EditorModel for InMemoryModel {
    fn value(&self) -> String {
        self.text.clone()
    }

    fn replace(&mut self, utf16_offset: usize, utf16_length: usize, text: &str) {
        let start = utf16_to_byte(&self.text, utf16_offset);
        let end = utf16_to_byte(&self.text, utf16_offset + utf16_length);
        self.text.replace_range(start..end, text);
    }

    fn set_decorations(&mut self, update: &DecorationUpdate) {
        self.decorations = update.clone();
    }
}

// Lets a host keep a handle on the model while the client task owns the
// other; all access is serialized through the lock.
impl<M: EditorModel> EditorModel for Arc<Mutex<M>> {
    fn value(&self) -> String {
        self.lock().unwrap().value()
    }

    fn replace(&mut self, utf16_offset: usize, utf16_length: usize, text: &str) {
        self.lock().unwrap().replace(utf16_offset, utf16_length, text)
    }

    fn set_decorations(&mut self, update: &DecorationUpdate) {
        self.lock().unwrap().set_decorations(update)
    }
}
