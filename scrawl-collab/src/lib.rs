//! # scrawl-collab — Client half of the Scrawl collaborative editor
//!
//! Multiple participants edit one plain-text document; a central server
//! arbitrates the order of operations. This crate keeps a local editor
//! byte-identical with every other participant despite network
//! reordering, typing during stalls, and reconnection mid-edit.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ContentChange    ┌──────────────────────────┐
//! │ host editor │ ─────────────────► │ Session (revision,       │
//! │ (UTF-16)    │ ◄───────────────── │  outstanding, buffer)    │
//! └─────────────┘   remote edits,    └──────┬───────────▲───────┘
//!        ▲           decorations            │ Edit      │ History
//!        │                                  ▼           │
//! ┌──────┴───────┐   UserCursor     ┌──────────────────────────┐
//! │ PresenceRoom │ ◄──────────────── │ CollabClient (WebSocket, │
//! └──────────────┘                   │  reconnect, failure cap) │
//!                                    └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON message envelopes, one per socket frame
//! - [`unicode`] — UTF-16 / codepoint offset bridge
//! - [`editor`] — the host editor seam and the in-memory model
//! - [`session`] — the OT client state machine
//! - [`presence`] — remote peers, cursors, and decorations
//! - [`client`] — connection lifecycle and host event surface
//!
//! Operation algebra lives in the `scrawl-ot` crate.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

#![forbid(unsafe_code)]

pub mod client;
pub mod editor;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod unicode;

pub use client::{ClientConfig, CollabClient, Event};
pub use editor::{ContentChange, DecorationUpdate, EditorModel, InMemoryModel};
pub use presence::PresenceRoom;
pub use protocol::{
    ClientMsg, CursorData, DocumentMeta, ProtocolError, Role, ServerMsg, UserInfo, UserOperation,
    Visibility,
};
pub use session::{Session, SessionError};
