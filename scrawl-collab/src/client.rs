//! WebSocket connection manager for a Scrawl editing session.
//!
//! ```text
//! host edits / cursor moves          server frames
//!        │ (Command)                       │
//!        ▼                                 ▼
//! ┌──────────────────────────────────────────────┐
//! │ client task:  Session ── PresenceRoom ── ws  │
//! └──────────────────────────────────────────────┘
//!        │ (Event)
//!        ▼
//! host callbacks (connected, users, meta, desync)
//! ```
//!
//! One spawned task owns the session, the presence room, and the
//! socket, so every editor callback, server frame, and timer tick is
//! serialized; the state machine never runs re-entrantly.
//!
//! Reconnection: a tick every `reconnect_interval` retries while the
//! socket is down, and a second tick every 15 intervals resets the
//! failure counter. Five failures inside one window mean the connection
//! is not coming back; the task emits `Desynchronized` once and stops.
//! On reopen the in-flight operation is re-sent; the buffered
//! composition stays local until the server acknowledges it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant as TokioInstant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::editor::{ContentChange, EditorModel};
use crate::presence::PresenceRoom;
use crate::protocol::{ClientMsg, CursorData, DocumentMeta, ServerMsg, UserInfo, Visibility};
use crate::session::{Session, SessionError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Closes within one window that turn reconnecting into giving up.
const FAILURE_BUDGET: u8 = 5;
/// Reconnect intervals per failure-counter reset window.
const FAILURE_WINDOW_INTERVALS: u32 = 15;

/// Connection parameters.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Full socket URI, e.g. `ws://host/api/socket/<document-id>`.
    pub uri: String,
    pub reconnect_interval: Duration,
}

impl ClientConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            reconnect_interval: Duration::from_secs(1),
        }
    }
}

/// Events delivered to the host, in order of occurrence.
#[derive(Clone, Debug)]
pub enum Event {
    /// Identity received; the session is live.
    Connected { me: u64, info: Option<UserInfo> },
    /// The socket dropped; reconnection is in progress.
    Disconnected,
    /// Convergence can no longer be guaranteed. Terminal; the host
    /// should tell the user to reload.
    Desynchronized,
    /// A non-fatal socket error.
    Error(String),
    MetaChanged {
        language: String,
        visibility: Visibility,
    },
    /// The remote peer map changed.
    UsersChanged(BTreeMap<u64, UserInfo>),
    /// Our own display information changed.
    MeChanged(UserInfo),
}

enum Command {
    LocalChange(Vec<ContentChange>),
    Cursor(CursorData),
    SetMeta {
        language: Option<String>,
        visibility: Option<Visibility>,
    },
    SetInfo(UserInfo),
    Dispose,
}

/// Handle to a running collaboration client.
///
/// Dropping the handle (or calling [`dispose`](Self::dispose)) stops
/// the connection task.
pub struct CollabClient {
    commands: mpsc::Sender<Command>,
    events: Option<mpsc::Receiver<Event>>,
    dirty: watch::Receiver<bool>,
}

impl CollabClient {
    /// Spawns the connection task over a host editor model.
    pub fn spawn<E>(config: ClientConfig, editor: E) -> Self
    where
        E: EditorModel + Send + Sync + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (dirty_tx, dirty_rx) = watch::channel(false);

        let task = ClientTask {
            uri: config.uri,
            reconnect_interval: config.reconnect_interval,
            session: Session::new(editor),
            presence: PresenceRoom::new(),
            my_info: None,
            meta: DocumentMeta::default(),
            recent_failures: 0,
            events: event_tx,
            dirty: dirty_tx,
        };
        tokio::spawn(task.run(command_rx));

        Self {
            commands: command_tx,
            events: Some(event_rx),
            dirty: dirty_rx,
        }
    }

    /// Takes the event receiver; can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.events.take()
    }

    /// Forwards a host change event. The host must have already applied
    /// the change to the editor model.
    pub async fn local_change(&self, changes: Vec<ContentChange>) {
        self.command(Command::LocalChange(changes)).await;
    }

    /// Forwards a local cursor or selection move.
    pub async fn set_cursor(&self, data: CursorData) {
        self.command(Command::Cursor(data)).await;
    }

    /// Updates document metadata on the server; fields left `None` are
    /// unchanged. Ignored while disconnected.
    pub async fn set_meta(&self, language: Option<String>, visibility: Option<Visibility>) {
        self.command(Command::SetMeta {
            language,
            visibility,
        })
        .await;
    }

    /// Announces the local user's display information.
    pub async fn set_info(&self, info: UserInfo) {
        self.command(Command::SetInfo(info)).await;
    }

    /// Stops the connection task. Idempotent.
    pub async fn dispose(&self) {
        self.command(Command::Dispose).await;
    }

    /// True while an edit is unacknowledged. The host's unload guard:
    /// prompt before navigation while this is set.
    pub fn has_unsynced_changes(&self) -> bool {
        *self.dirty.borrow()
    }

    /// A watch on the unsynced-changes flag.
    pub fn dirty_flag(&self) -> watch::Receiver<bool> {
        self.dirty.clone()
    }

    async fn command(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            log::warn!("collab client task is gone; command dropped");
        }
    }
}

/// What a handled server frame means for the connection.
enum Step {
    Continue,
    /// Close the socket and let reconnection recover.
    Close,
    /// Convergence lost; stop for good.
    Fatal,
}

struct ClientTask<E: EditorModel> {
    uri: String,
    reconnect_interval: Duration,
    session: Session<E>,
    presence: PresenceRoom,
    my_info: Option<UserInfo>,
    meta: DocumentMeta,
    recent_failures: u8,
    events: mpsc::Sender<Event>,
    dirty: watch::Sender<bool>,
}

impl<E: EditorModel> ClientTask<E> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut connect_tick = interval(self.reconnect_interval);
        connect_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut window_tick = interval(self.reconnect_interval * FAILURE_WINDOW_INTERVALS);
        window_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut socket: Option<WsStream> = None;

        loop {
            let cursor_due = self.presence.next_flush().map(TokioInstant::from_std);
            let socket_open = socket.is_some();

            tokio::select! {
                _ = connect_tick.tick(), if !socket_open => {
                    match connect_async(&self.uri).await {
                        Ok((mut ws, _)) => {
                            if self.on_open(&mut ws).await {
                                socket = Some(ws);
                            } else if self.after_close(false).await {
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("connection attempt failed: {e}");
                            if self.after_close(false).await {
                                break;
                            }
                        }
                    }
                }

                _ = window_tick.tick() => {
                    self.recent_failures = 0;
                }

                incoming = async { socket.as_mut().expect("read arm guarded").next().await },
                        if socket_open => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let ws = socket.as_mut().expect("read arm guarded");
                            match self.on_frame(&text, ws).await {
                                Step::Continue => {}
                                Step::Close => {
                                    socket = None;
                                    if self.after_close(true).await {
                                        break;
                                    }
                                }
                                Step::Fatal => {
                                    self.emit(Event::Desynchronized).await;
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            socket = None;
                            if self.after_close(true).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            self.emit(Event::Error(e.to_string())).await;
                            socket = None;
                            if self.after_close(true).await {
                                break;
                            }
                        }
                        Some(Ok(other)) => {
                            log::warn!("ignoring non-text frame: {other:?}");
                        }
                    }
                }

                command = commands.recv() => {
                    match command {
                        None | Some(Command::Dispose) => break,
                        Some(command) => {
                            if self.on_command(command, &mut socket).await {
                                break;
                            }
                        }
                    }
                }

                _ = async {
                    match cursor_due {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if cursor_due.is_some() => {
                    if let Some(msg) = self.presence.flush_due(Instant::now()) {
                        if let Some(ws) = socket.as_mut() {
                            if !send_frame(ws, &msg).await {
                                socket = None;
                                if self.after_close(true).await {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        log::info!("collab client task stopped");
    }

    /// Handles one host command. Returns true when the task must stop.
    async fn on_command(&mut self, command: Command, socket: &mut Option<WsStream>) -> bool {
        match command {
            Command::LocalChange(changes) => {
                match self.session.on_local_change(&changes, &mut self.presence) {
                    Ok(Some(edit)) => {
                        if let Some(ws) = socket.as_mut() {
                            if !send_frame(ws, &edit).await {
                                *socket = None;
                                let stop = self.after_close(true).await;
                                self.sync_dirty();
                                return stop;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(SessionError::InvalidChange) => {
                        log::error!("refusing change event that does not fit the snapshot");
                    }
                    Err(e) => {
                        log::error!("session diverged on local change: {e}");
                        self.emit(Event::Desynchronized).await;
                        return true;
                    }
                }
                self.sync_dirty();
                self.sync_decorations();
            }
            Command::Cursor(data) => {
                self.presence
                    .set_local_cursor(data, self.session.is_buffered(), Instant::now());
            }
            Command::SetMeta {
                language,
                visibility,
            } => {
                if let Some(ws) = socket.as_mut() {
                    let msg = ClientMsg::SetMeta {
                        language,
                        visibility,
                    };
                    if !send_frame(ws, &msg).await {
                        *socket = None;
                        return self.after_close(true).await;
                    }
                } else {
                    log::info!("set_meta ignored while disconnected");
                }
            }
            Command::SetInfo(info) => {
                self.my_info = Some(info.clone());
                self.emit(Event::MeChanged(info.clone())).await;
                if let Some(ws) = socket.as_mut() {
                    let msg = ClientMsg::ClientInfo {
                        name: info.name,
                        hue: info.hue,
                    };
                    if !send_frame(ws, &msg).await {
                        *socket = None;
                        return self.after_close(true).await;
                    }
                }
            }
            Command::Dispose => return true,
        }
        false
    }

    /// Announces ourselves on a fresh socket and replays in-flight work.
    async fn on_open(&mut self, ws: &mut WsStream) -> bool {
        log::info!("socket open to {}", self.uri);

        // The server re-announces everyone who is still present.
        self.presence.clear();
        self.emit(Event::UsersChanged(BTreeMap::new())).await;

        let mut frames = Vec::new();
        if let Some(info) = &self.my_info {
            frames.push(ClientMsg::ClientInfo {
                name: info.name.clone(),
                hue: info.hue,
            });
        }
        frames.push(ClientMsg::CursorData(self.presence.local_cursor().clone()));
        if let Some(edit) = self.session.outstanding_edit() {
            log::info!("replaying in-flight edit at revision {}", self.session.revision());
            frames.push(edit);
        }

        for frame in &frames {
            if !send_frame(ws, frame).await {
                return false;
            }
        }
        true
    }

    /// Dispatches one decoded server frame.
    async fn on_frame(&mut self, text: &str, ws: &mut WsStream) -> Step {
        let msg = match ServerMsg::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("ignoring malformed frame: {e}");
                return Step::Continue;
            }
        };

        match msg {
            ServerMsg::Identity { id, info } => {
                self.session.set_me(id);
                self.presence.set_me(id);
                self.emit(Event::Connected {
                    me: id,
                    info: info.clone(),
                })
                .await;
                if let Some(info) = info {
                    self.my_info = Some(info.clone());
                    self.emit(Event::MeChanged(info)).await;
                }
            }
            ServerMsg::History { start, operations } => {
                match self
                    .session
                    .handle_history(start, operations, &mut self.presence)
                {
                    Ok(reply) => {
                        if let Some(msg) = reply {
                            if !send_frame(ws, &msg).await {
                                return Step::Close;
                            }
                        }
                        self.sync_dirty();
                        self.sync_decorations();
                    }
                    Err(SessionError::HistoryGap { start, revision }) => {
                        log::warn!(
                            "history gap: server start {start}, local revision {revision}; closing socket"
                        );
                        return Step::Close;
                    }
                    Err(e) => {
                        log::error!("session diverged: {e}");
                        return Step::Fatal;
                    }
                }
            }
            ServerMsg::Meta(meta) => {
                self.meta = meta;
                self.emit_meta().await;
            }
            ServerMsg::Language(language) => {
                self.meta.language = language;
                self.emit_meta().await;
            }
            ServerMsg::UserInfo { id, user } => {
                if self.session.me() == Some(id) {
                    self.my_info = Some(user.clone());
                    self.emit(Event::MeChanged(user)).await;
                } else if self.presence.handle_info(id, user) {
                    self.emit(Event::UsersChanged(self.presence.users())).await;
                    self.sync_decorations();
                }
            }
            ServerMsg::UserDisconnect { id } => {
                if self.presence.handle_disconnect(id) {
                    self.emit(Event::UsersChanged(self.presence.users())).await;
                    self.sync_decorations();
                }
            }
            ServerMsg::UserCursor { id, data } => {
                if self.presence.handle_cursor(id, data) {
                    self.sync_decorations();
                }
            }
        }
        Step::Continue
    }

    /// Books a socket loss. Returns true when the failure budget is
    /// spent and the task must stop.
    async fn after_close(&mut self, was_open: bool) -> bool {
        if was_open {
            self.emit(Event::Disconnected).await;
        }
        self.recent_failures += 1;
        if self.recent_failures >= FAILURE_BUDGET {
            log::error!(
                "{FAILURE_BUDGET} connection failures inside one window; giving up"
            );
            self.emit(Event::Desynchronized).await;
            return true;
        }
        false
    }

    fn sync_dirty(&self) {
        self.dirty.send_replace(self.session.has_outstanding());
    }

    fn sync_decorations(&mut self) {
        let text = self.session.text().to_owned();
        let update = self.presence.decorations(&text);
        self.session.editor_mut().set_decorations(&update);
    }

    async fn emit_meta(&self) {
        self.emit(Event::MetaChanged {
            language: self.meta.language.clone(),
            visibility: self.meta.visibility,
        })
        .await;
    }

    async fn emit(&self, event: Event) {
        // The host may have dropped the receiver; that only matters for
        // commands, which close the task when their sender goes away.
        let _ = self.events.send(event).await;
    }
}

async fn send_frame(ws: &mut WsStream, msg: &ClientMsg) -> bool {
    match msg.encode() {
        Ok(text) => match ws.send(Message::Text(text)).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("send failed: {e}");
                false
            }
        },
        Err(e) => {
            log::error!("dropping unencodable frame: {e}");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::InMemoryModel;

    #[test]
    fn test_config_defaults_to_one_second() {
        let config = ClientConfig::new("ws://example/api/socket/doc");
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_spawn_and_dispose_without_server() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9/api/socket/doc");
        config.reconnect_interval = Duration::from_secs(60);
        let mut client = CollabClient::spawn(config, InMemoryModel::new(""));

        assert!(!client.has_unsynced_changes());
        assert!(client.take_events().is_some());
        assert!(client.take_events().is_none());
        client.dispose().await;
    }
}
