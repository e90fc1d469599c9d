//! Remote peer tracking: who is here, and where their cursors are.
//!
//! ```text
//! UserInfo / UserCursor / UserDisconnect ──► PresenceRoom ──► DecorationUpdate
//!                                                ▲
//!              every applied operation ──────────┘  (transform_index)
//! ```
//!
//! Cursor positions are stored in codepoint indices, exactly as they
//! travel on the wire, and every applied operation (local or remote)
//! maps them through `transform_index` so decorations stay attached to
//! the text they pointed at. Local cursor sends are debounced on the
//! trailing edge and suppressed while the session holds buffered edits
//! the server has not seen; cursors against that future text would
//! decorate wrong positions for peers.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use scrawl_ot::{transform_index, Operation};

use crate::editor::{Caret, DecorationUpdate, SelectionSpan};
use crate::protocol::{ClientMsg, CursorData, UserInfo};
use crate::unicode::codepoint_to_utf16;

/// Trailing-edge delay before a local cursor move is sent.
pub const CURSOR_DEBOUNCE: Duration = Duration::from_millis(20);

#[derive(Clone, Debug, Default)]
struct RemotePeer {
    info: Option<UserInfo>,
    cursor: Option<CursorData>,
}

/// Presence state for all remote peers in a document.
pub struct PresenceRoom {
    me: Option<u64>,
    peers: BTreeMap<u64, RemotePeer>,
    /// Hues already announced to the host's style sink, across the
    /// whole session. Styles are registered once and survive reconnects.
    seen_hues: HashSet<u16>,
    local_cursor: CursorData,
    flush_at: Option<Instant>,
    debounce: Duration,
}

impl Default for PresenceRoom {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRoom {
    pub fn new() -> Self {
        Self::with_debounce(CURSOR_DEBOUNCE)
    }

    /// Custom debounce interval, for tests.
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            me: None,
            peers: BTreeMap::new(),
            seen_hues: HashSet::new(),
            local_cursor: CursorData::default(),
            flush_at: None,
            debounce,
        }
    }

    /// Records our server-assigned id; we never track ourselves as a peer.
    pub fn set_me(&mut self, id: u64) {
        self.me = Some(id);
        self.peers.remove(&id);
    }

    /// Drops all remote peers. Called on reconnect; the server
    /// re-announces everyone who is still present.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Upserts a peer's display information. Returns false for our own id.
    pub fn handle_info(&mut self, id: u64, user: UserInfo) -> bool {
        if self.me == Some(id) {
            return false;
        }
        self.peers.entry(id).or_default().info = Some(user);
        true
    }

    /// Overwrites a peer's cursor state verbatim.
    pub fn handle_cursor(&mut self, id: u64, data: CursorData) -> bool {
        if self.me == Some(id) {
            return false;
        }
        self.peers.entry(id).or_default().cursor = Some(data);
        true
    }

    /// Removes a departed peer.
    pub fn handle_disconnect(&mut self, id: u64) -> bool {
        self.peers.remove(&id).is_some()
    }

    /// Maps every tracked cursor endpoint through an applied operation.
    pub fn transform(&mut self, operation: &Operation) {
        for peer in self.peers.values_mut() {
            if let Some(cursor) = peer.cursor.as_mut() {
                for position in cursor.cursors.iter_mut() {
                    *position = transform_index(operation, *position);
                }
                for (start, end) in cursor.selections.iter_mut() {
                    *start = transform_index(operation, *start);
                    *end = transform_index(operation, *end);
                }
            }
        }
    }

    /// Display info for every remote peer the server has announced.
    pub fn users(&self) -> BTreeMap<u64, UserInfo> {
        self.peers
            .iter()
            .filter_map(|(id, peer)| peer.info.clone().map(|info| (*id, info)))
            .collect()
    }

    /// A peer's current cursor state, if any.
    pub fn cursor(&self, id: u64) -> Option<&CursorData> {
        self.peers.get(&id).and_then(|peer| peer.cursor.as_ref())
    }

    /// Builds the replacement decoration set against the current text.
    ///
    /// Peers whose info has not arrived yet are skipped; there is no hue
    /// to style them with. Each distinct hue is reported in `new_hues`
    /// exactly once per session.
    pub fn decorations(&mut self, text: &str) -> DecorationUpdate {
        let mut update = DecorationUpdate::default();
        for (&id, peer) in &self.peers {
            let (Some(info), Some(cursor)) = (&peer.info, &peer.cursor) else {
                continue;
            };
            if self.seen_hues.insert(info.hue) {
                update.new_hues.push(info.hue);
            }
            for &position in &cursor.cursors {
                update.carets.push(Caret {
                    peer: id,
                    hue: info.hue,
                    utf16_offset: codepoint_to_utf16(text, position as usize),
                });
            }
            for &(start, end) in &cursor.selections {
                update.selections.push(SelectionSpan {
                    peer: id,
                    hue: info.hue,
                    utf16_start: codepoint_to_utf16(text, start as usize),
                    utf16_end: codepoint_to_utf16(text, end as usize),
                });
            }
        }
        update
    }

    // ── Local cursor debounce ───────────────────────────────────────

    /// Records a local cursor move.
    ///
    /// Resets the trailing-edge timer unless `suppress` is set (the
    /// session holds buffered edits); a suppressed move cancels any
    /// pending send so stale positions never go out.
    pub fn set_local_cursor(&mut self, data: CursorData, suppress: bool, now: Instant) {
        self.local_cursor = data;
        self.flush_at = if suppress {
            None
        } else {
            Some(now + self.debounce)
        };
    }

    /// The position last reported by the host, sent on reconnect.
    pub fn local_cursor(&self) -> &CursorData {
        &self.local_cursor
    }

    /// When the pending cursor send fires, if one is scheduled.
    pub fn next_flush(&self) -> Option<Instant> {
        self.flush_at
    }

    /// Emits the debounced cursor message once the timer has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Option<ClientMsg> {
        if self.flush_at.is_some_and(|at| at <= now) {
            self.flush_at = None;
            Some(ClientMsg::CursorData(self.local_cursor.clone()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;
    use scrawl_ot::Operation;

    fn info(name: &str, hue: u16) -> UserInfo {
        UserInfo {
            name: name.into(),
            hue,
            role: Role::Anon,
        }
    }

    fn cursor_at(positions: &[u32]) -> CursorData {
        CursorData {
            cursors: positions.to_vec(),
            selections: Vec::new(),
        }
    }

    #[test]
    fn test_ignores_own_id() {
        let mut room = PresenceRoom::new();
        room.set_me(3);
        assert!(!room.handle_info(3, info("Me", 10)));
        assert!(!room.handle_cursor(3, cursor_at(&[0])));
        assert!(room.users().is_empty());
    }

    #[test]
    fn test_upsert_and_disconnect() {
        let mut room = PresenceRoom::new();
        room.set_me(0);
        assert!(room.handle_info(7, info("Alice", 120)));
        assert!(room.handle_info(7, info("Alice2", 130)));
        assert_eq!(room.users().len(), 1);
        assert_eq!(room.users()[&7].name, "Alice2");
        assert!(room.handle_disconnect(7));
        assert!(!room.handle_disconnect(7));
        assert!(room.users().is_empty());
    }

    #[test]
    fn test_cursor_overwrite_is_verbatim() {
        let mut room = PresenceRoom::new();
        room.handle_cursor(7, CursorData {
            cursors: vec![1, 5],
            selections: vec![(0, 4)],
        });
        room.handle_cursor(7, cursor_at(&[2]));
        assert_eq!(room.cursor(7), Some(&cursor_at(&[2])));
    }

    #[test]
    fn test_transform_shifts_cursor_past_insert() {
        // Local op inserts "XYZ" at index 2; a peer cursor at 5 lands at 8.
        let mut room = PresenceRoom::new();
        room.handle_info(7, info("Alice", 120));
        room.handle_cursor(7, cursor_at(&[5]));

        let mut op = Operation::new();
        op.retain(2);
        op.insert("XYZ");
        op.retain(10);
        room.transform(&op);

        assert_eq!(room.cursor(7), Some(&cursor_at(&[8])));
    }

    #[test]
    fn test_transform_clamps_into_deleted_span() {
        let mut room = PresenceRoom::new();
        room.handle_cursor(7, CursorData {
            cursors: vec![3],
            selections: vec![(3, 6)],
        });

        let mut op = Operation::new();
        op.retain(2);
        op.delete(3);
        op.retain(3);
        room.transform(&op);

        let cursor = room.cursor(7).unwrap();
        assert_eq!(cursor.cursors, vec![2]);
        assert_eq!(cursor.selections, vec![(2, 3)]);
    }

    #[test]
    fn test_decorations_convert_to_utf16() {
        let mut room = PresenceRoom::new();
        room.handle_info(7, info("Alice", 120));
        room.handle_cursor(7, CursorData {
            cursors: vec![2],
            selections: vec![(0, 2)],
        });

        // Codepoint 2 sits after the astral char, at UTF-16 offset 3.
        let update = room.decorations("a😀bc");
        assert_eq!(update.carets.len(), 1);
        assert_eq!(update.carets[0].utf16_offset, 3);
        assert_eq!(update.selections[0].utf16_start, 0);
        assert_eq!(update.selections[0].utf16_end, 3);
    }

    #[test]
    fn test_decorations_skip_peers_without_info() {
        let mut room = PresenceRoom::new();
        room.handle_cursor(7, cursor_at(&[1]));
        let update = room.decorations("abc");
        assert!(update.carets.is_empty());
    }

    #[test]
    fn test_each_hue_reported_once() {
        let mut room = PresenceRoom::new();
        room.handle_info(7, info("Alice", 120));
        room.handle_cursor(7, cursor_at(&[0]));
        room.handle_info(8, info("Bob", 120));
        room.handle_cursor(8, cursor_at(&[1]));

        let first = room.decorations("abc");
        assert_eq!(first.new_hues, vec![120]);

        // Rebuilding, and even a fresh peer with the same hue, adds nothing.
        let second = room.decorations("abc");
        assert!(second.new_hues.is_empty());
        room.handle_info(9, info("Eve", 120));
        room.handle_cursor(9, cursor_at(&[2]));
        assert!(room.decorations("abc").new_hues.is_empty());
    }

    #[test]
    fn test_debounce_fires_once_at_quiescence() {
        let mut room = PresenceRoom::new();
        let start = Instant::now();
        room.set_local_cursor(cursor_at(&[1]), false, start);

        // Still pending before the deadline.
        assert_eq!(room.flush_due(start), None);

        let due = start + CURSOR_DEBOUNCE;
        let msg = room.flush_due(due).expect("debounced send due");
        assert_eq!(msg, ClientMsg::CursorData(cursor_at(&[1])));

        // Fires only once.
        assert_eq!(room.flush_due(due + CURSOR_DEBOUNCE), None);
    }

    #[test]
    fn test_debounce_resets_on_each_move() {
        let mut room = PresenceRoom::new();
        let start = Instant::now();
        room.set_local_cursor(cursor_at(&[1]), false, start);
        let later = start + Duration::from_millis(15);
        room.set_local_cursor(cursor_at(&[2]), false, later);

        // The first deadline passed without the timer having been reset there.
        assert_eq!(room.flush_due(start + CURSOR_DEBOUNCE), None);
        let msg = room.flush_due(later + CURSOR_DEBOUNCE).unwrap();
        assert_eq!(msg, ClientMsg::CursorData(cursor_at(&[2])));
    }

    #[test]
    fn test_suppressed_move_does_not_send() {
        let mut room = PresenceRoom::new();
        let start = Instant::now();
        room.set_local_cursor(cursor_at(&[1]), true, start);
        assert_eq!(room.next_flush(), None);
        assert_eq!(room.flush_due(start + CURSOR_DEBOUNCE), None);

        // A later unsuppressed move schedules again.
        room.set_local_cursor(cursor_at(&[2]), false, start);
        assert!(room.next_flush().is_some());
    }

    #[test]
    fn test_suppressed_move_cancels_pending_send() {
        let mut room = PresenceRoom::new();
        let start = Instant::now();
        room.set_local_cursor(cursor_at(&[1]), false, start);
        room.set_local_cursor(cursor_at(&[9]), true, start + Duration::from_millis(5));
        assert_eq!(room.flush_due(start + CURSOR_DEBOUNCE), None);
    }

    #[test]
    fn test_clear_keeps_seen_hues() {
        let mut room = PresenceRoom::new();
        room.handle_info(7, info("Alice", 120));
        room.handle_cursor(7, cursor_at(&[0]));
        assert_eq!(room.decorations("abc").new_hues, vec![120]);

        room.clear();
        assert!(room.users().is_empty());
        room.handle_info(7, info("Alice", 120));
        room.handle_cursor(7, cursor_at(&[0]));
        // The host already has a style for this hue.
        assert!(room.decorations("abc").new_hues.is_empty());
    }
}
