//! JSON wire protocol between a Scrawl client and the arbitration server.
//!
//! One message per WebSocket text frame. Messages are externally tagged,
//! so every frame is an object with exactly one discriminator key:
//!
//! ```text
//! {"Edit":{"revision":3,"operation":[1,"X",2]}}
//! {"History":{"start":3,"operations":[{"id":7,"operation":[4,"Y"]}]}}
//! ```
//!
//! Operations travel as arrays of positive integers (retain), negative
//! integers (delete), and strings (insert); see `scrawl_ot`.

use std::fmt;

use scrawl_ot::Operation;
use serde::{Deserialize, Serialize};

/// Who can open a document. Orders from most to least restricted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only admins.
    Private,
    /// Any authenticated user.
    Internal,
    /// Anyone with the link.
    Public,
}

/// Access level the server attaches to a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Anon,
    User,
    Admin,
}

/// Display information for a connected user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    /// Cursor and selection tint, degrees on the color wheel.
    pub hue: u16,
    #[serde(default)]
    pub role: Role,
}

/// Cursor and selection positions, in codepoint indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub cursors: Vec<u32>,
    pub selections: Vec<(u32, u32)>,
}

/// Document metadata, last writer wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub language: String,
    pub visibility: Visibility,
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self {
            language: "markdown".to_owned(),
            visibility: Visibility::Public,
        }
    }
}

/// One server-serialized operation attributed to its author.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserOperation {
    pub id: u64,
    pub operation: Operation,
}

/// A message sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMsg {
    /// Local edits against the server document at `revision`.
    Edit { revision: u64, operation: Operation },
    /// Updates document metadata; absent fields are unchanged.
    SetMeta {
        language: Option<String>,
        visibility: Option<Visibility>,
    },
    /// Older single-field form of `SetMeta`, kept for older servers.
    SetLanguage(String),
    /// Announces the user's display information.
    ClientInfo { name: String, hue: u16 },
    /// Announces the user's cursor and selection positions.
    CursorData(CursorData),
}

/// A message sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMsg {
    /// Assigns this connection its peer id. Always the first message.
    Identity { id: u64, info: Option<UserInfo> },
    /// Serialized operations starting at revision `start`.
    History {
        start: u64,
        operations: Vec<UserOperation>,
    },
    /// Current document metadata.
    Meta(DocumentMeta),
    /// Older single-field form of `Meta`.
    Language(String),
    /// A user's display information changed.
    UserInfo { id: u64, user: UserInfo },
    /// A user's connection closed.
    UserDisconnect { id: u64 },
    /// A user's cursor or selection moved.
    UserCursor { id: u64, data: CursorData },
}

/// Codec failures at the socket boundary.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Encode(String),
    Decode(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "failed to encode frame: {e}"),
            Self::Decode(e) => write!(f, "failed to decode frame: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ClientMsg {
    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from a text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl ServerMsg {
    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from a text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
