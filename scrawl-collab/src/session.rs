//! The OT client state machine.
//!
//! Three buffers reconcile local typing with the server's linearization:
//!
//! ```text
//! (out=∅, buf=∅) ──local op──► (out=op, buf=∅)        send op
//! (out=O, buf=∅) ──local op──► (out=O, buf=op)
//! (out=O, buf=B) ──local op──► (out=O, buf=B∘op)
//! (out=O, buf=∅) ──ack──────► (out=∅, buf=∅)
//! (out=O, buf=B) ──ack──────► (out=B, buf=∅)          send B
//! (out=O, buf=?) ──server S──► transform pipeline, apply S'
//! ```
//!
//! At any quiescent moment the editor equals the server's
//! revision-`revision` document with `outstanding` then `buffer`
//! applied on top. `buffer` is only ever present under `outstanding`.
//!
//! Methods return the wire messages they produce instead of sending;
//! the connection manager owns all I/O.

use scrawl_ot::{OpError, Operation};
use thiserror::Error;

use crate::editor::{ContentChange, EditorModel};
use crate::presence::PresenceRoom;
use crate::protocol::{ClientMsg, UserOperation};
use crate::unicode::{codepoint_len, codepoint_to_utf16, utf16_to_codepoint};

/// Faults surfaced by the state machine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server's history starts past our revision; this session
    /// cannot fill the gap and the socket must be closed.
    #[error("server history starts at revision {start}, but client is at {revision}")]
    HistoryGap { start: u64, revision: u64 },
    /// A host change event did not fit the pre-change snapshot. The
    /// operation is refused, never sent.
    #[error("change event does not fit the document snapshot")]
    InvalidChange,
    /// A transform or apply length mismatch: local and server state no
    /// longer agree. Terminal for the session.
    #[error("client diverged from server: {0}")]
    Diverged(#[from] OpError),
}

/// Client-side OT session over a host editor.
pub struct Session<E: EditorModel> {
    editor: E,
    /// Count of server-acknowledged operations absorbed, our own included.
    revision: u64,
    /// The single in-flight operation awaiting server acknowledgment.
    outstanding: Option<Operation>,
    /// Local edits composed on top of `outstanding` while it is in flight.
    buffer: Option<Operation>,
    /// Server-assigned peer id, known after `Identity`.
    me: Option<u64>,
    /// Editor content before the most recent change, for delta capture.
    last_value: String,
    /// Re-entrancy guard while a remote operation mutates the editor.
    ignore_changes: bool,
}

impl<E: EditorModel> Session<E> {
    pub fn new(editor: E) -> Self {
        let last_value = editor.value();
        Self {
            editor,
            revision: 0,
            outstanding: None,
            buffer: None,
            me: None,
            last_value,
            ignore_changes: false,
        }
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn set_me(&mut self, id: u64) {
        self.me = Some(id);
    }

    pub fn me(&self) -> Option<u64> {
        self.me
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The document as of the last absorbed change.
    pub fn text(&self) -> &str {
        &self.last_value
    }

    pub fn outstanding(&self) -> Option<&Operation> {
        self.outstanding.as_ref()
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// True while local edits beyond `outstanding` wait to be sent;
    /// cursor announcements are suppressed in this state.
    pub fn is_buffered(&self) -> bool {
        self.buffer.is_some()
    }

    /// The in-flight edit, re-sent verbatim after a reconnect. The
    /// buffered composition stays local until the server acknowledges.
    pub fn outstanding_edit(&self) -> Option<ClientMsg> {
        self.outstanding.as_ref().map(|op| ClientMsg::Edit {
            revision: self.revision,
            operation: op.clone(),
        })
    }

    /// Captures a host change event as a single operation.
    ///
    /// Ranges are processed in descending offset order so each range's
    /// offsets stay valid against the pre-change snapshot. Returns the
    /// `Edit` to send when this change becomes the outstanding
    /// operation.
    pub fn on_local_change(
        &mut self,
        changes: &[ContentChange],
        presence: &mut PresenceRoom,
    ) -> Result<Option<ClientMsg>, SessionError> {
        if self.ignore_changes || changes.is_empty() {
            return Ok(None);
        }

        let snapshot = self.last_value.clone();
        let mut composed = Operation::new();
        composed.retain(codepoint_len(&snapshot) as u64);

        let mut ordered: Vec<&ContentChange> = changes.iter().collect();
        ordered.sort_by(|a, b| b.utf16_offset.cmp(&a.utf16_offset));

        for change in ordered {
            let start = utf16_to_codepoint(&snapshot, change.utf16_offset) as u64;
            let end =
                utf16_to_codepoint(&snapshot, change.utf16_offset + change.utf16_length) as u64;
            let tail = composed
                .target_len()
                .checked_sub(end)
                .ok_or(SessionError::InvalidChange)?;

            let mut step = Operation::new();
            step.retain(start);
            step.delete(end - start);
            step.insert(&change.text);
            step.retain(tail);

            composed = composed
                .compose(&step)
                .map_err(|_| SessionError::InvalidChange)?;
        }

        self.last_value = self.editor.value();
        if composed.is_noop() {
            return Ok(None);
        }
        self.apply_client(composed, presence)
    }

    /// Routes a freshly captured local operation into the buffers.
    fn apply_client(
        &mut self,
        operation: Operation,
        presence: &mut PresenceRoom,
    ) -> Result<Option<ClientMsg>, SessionError> {
        presence.transform(&operation);
        if self.outstanding.is_none() {
            self.outstanding = Some(operation.clone());
            Ok(Some(ClientMsg::Edit {
                revision: self.revision,
                operation,
            }))
        } else if let Some(buffered) = self.buffer.take() {
            self.buffer = Some(buffered.compose(&operation)?);
            Ok(None)
        } else {
            self.buffer = Some(operation);
            Ok(None)
        }
    }

    /// Absorbs one remote operation from the server's history.
    ///
    /// The incoming operation is rebased over our unacknowledged work,
    /// which is simultaneously rebased to stay valid against the new
    /// server document.
    fn apply_server(
        &mut self,
        operation: Operation,
        presence: &mut PresenceRoom,
    ) -> Result<(), SessionError> {
        let mut incoming = operation;
        if let Some(outstanding) = self.outstanding.take() {
            let (outstanding, rebased) = outstanding.transform(&incoming)?;
            self.outstanding = Some(outstanding);
            incoming = rebased;
            if let Some(buffered) = self.buffer.take() {
                let (buffered, rebased) = buffered.transform(&incoming)?;
                self.buffer = Some(buffered);
                incoming = rebased;
            }
        }
        self.apply_to_editor(&incoming)?;
        presence.transform(&incoming);
        Ok(())
    }

    /// Replays a (rebased) remote operation into the host editor,
    /// translating codepoint spans into UTF-16 ranges per action.
    fn apply_to_editor(&mut self, operation: &Operation) -> Result<(), SessionError> {
        let document = codepoint_len(&self.last_value) as u64;
        if operation.base_len() != document {
            return Err(OpError::ApplyMismatch {
                base: operation.base_len(),
                document,
            }
            .into());
        }

        self.ignore_changes = true;
        let mut position = 0usize;
        for action in operation.actions() {
            match action {
                scrawl_ot::PrimitiveOp::Retain(n) => position += *n as usize,
                scrawl_ot::PrimitiveOp::Insert(s) => {
                    let text = self.editor.value();
                    let at = codepoint_to_utf16(&text, position);
                    self.editor.replace(at, 0, s);
                    position += codepoint_len(s);
                }
                scrawl_ot::PrimitiveOp::Delete(n) => {
                    let text = self.editor.value();
                    let from = codepoint_to_utf16(&text, position);
                    let to = codepoint_to_utf16(&text, position + *n as usize);
                    self.editor.replace(from, to - from, "");
                }
            }
        }
        self.ignore_changes = false;
        self.last_value = self.editor.value();
        Ok(())
    }

    /// Handles the server acknowledging our outstanding operation:
    /// the buffered composition, if any, becomes the next in-flight edit.
    fn server_ack(&mut self) -> Option<ClientMsg> {
        if self.outstanding.is_none() {
            log::warn!("ignoring server acknowledgment with no outstanding operation");
            return None;
        }
        self.outstanding = self.buffer.take();
        self.outstanding.as_ref().map(|op| ClientMsg::Edit {
            revision: self.revision,
            operation: op.clone(),
        })
    }

    /// Absorbs a server `History` frame.
    ///
    /// Entries below our revision were already absorbed (the server may
    /// retransmit from any earlier point after a reconnect) and are
    /// skipped. Entries carrying our own id acknowledge `outstanding`;
    /// all others are applied as remote operations. Returns the
    /// follow-up `Edit` to send when an acknowledgment releases the
    /// buffered composition.
    pub fn handle_history(
        &mut self,
        start: u64,
        operations: Vec<UserOperation>,
        presence: &mut PresenceRoom,
    ) -> Result<Option<ClientMsg>, SessionError> {
        if start > self.revision {
            return Err(SessionError::HistoryGap {
                start,
                revision: self.revision,
            });
        }
        let seen = (self.revision - start) as usize;
        let mut reply = None;
        for UserOperation { id, operation } in operations.into_iter().skip(seen) {
            self.revision += 1;
            if self.me == Some(id) {
                reply = self.server_ack();
            } else {
                self.apply_server(operation, presence)?;
            }
        }
        Ok(reply)
    }
}
