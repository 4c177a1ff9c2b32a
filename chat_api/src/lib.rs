use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Room used when a caller activates without naming one.
pub const DEFAULT_ROOM: &str = "general";

/// Errors raised while turning backend documents into typed records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("message '{0}' has neither text nor image")]
    EmptyBody(String),
    #[error("message '{0}' has both text and image")]
    AmbiguousBody(String),
}

/// Current wall clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Normalise an optional server timestamp. Pending server timestamps arrive
/// as `None` and are treated as "now".
pub fn to_millis(value: Option<i64>) -> i64 {
    value.unwrap_or_else(now_millis)
}

/// Content of a message. A message carries either text or one image.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    Image { url: String },
}

impl MessageBody {
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(t) => Some(t),
            MessageBody::Image { .. } => None,
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            MessageBody::Text(_) => None,
            MessageBody::Image { url } => Some(url),
        }
    }
}

/// A chat message as held by the client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub body: MessageBody,
    pub created_at: i64,
}

impl Message {
    pub fn text(
        id: impl Into<String>,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            user_id: user_id.into(),
            body: MessageBody::Text(text.into()),
            created_at,
        }
    }

    pub fn image(
        id: impl Into<String>,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        url: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            user_id: user_id.into(),
            body: MessageBody::Image { url: url.into() },
            created_at,
        }
    }
}

/// Loosely typed message document as stored by a document backend.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    #[serde(default, alias = "roomId")]
    pub room_id: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<i64>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ModelError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let text = raw.text.filter(|t| !t.is_empty());
        let image = raw.image_url.filter(|u| !u.is_empty());
        let body = match (text, image) {
            (Some(text), None) => MessageBody::Text(text),
            (None, Some(url)) => MessageBody::Image { url },
            (None, None) => return Err(ModelError::EmptyBody(raw.id)),
            (Some(_), Some(_)) => return Err(ModelError::AmbiguousBody(raw.id)),
        };
        Ok(Message {
            room_id: raw.room_id.unwrap_or_default(),
            user_id: raw.user_id.unwrap_or_default(),
            created_at: to_millis(raw.created_at),
            id: raw.id,
            body,
        })
    }
}

/// Opaque pagination token pointing at the oldest message of a page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One batch returned by a backward pagination fetch, newest first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub items: Vec<Message>,
    pub next_cursor: Option<Cursor>,
}

impl Page {
    pub fn new(items: Vec<Message>, next_cursor: Option<Cursor>) -> Self {
        Self { items, next_cursor }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// True when this page signals that no older history exists.
    pub fn is_exhausted(&self) -> bool {
        self.items.is_empty() || self.next_cursor.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    #[serde(default = "default_room_name")]
    pub name: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub created_by: String,
}

fn default_room_name() -> String {
    "Room".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TypingState {
    pub user_id: String,
    pub room_id: String,
    pub is_typing: bool,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_active: i64,
}
