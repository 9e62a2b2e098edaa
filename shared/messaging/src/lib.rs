//! Conversation and message models shared across Squadlink clients.
//!
//! Everything here is plain data: no IO, no clocks beyond stamping freshly
//! created pending messages. The serde shapes follow the REST backend's JSON.

pub mod attachment;
pub mod conversation;
pub mod outgoing;

pub use attachment::{Attachment, AttachmentKind, AttachmentUpload};
pub use conversation::{Conversation, MessagePreview, Participant};
pub use outgoing::OutgoingMessage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier as the backend sends it: some deployments use numbers, some strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "RawId", into = "String")]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<RawId> for $name {
            fn from(raw: RawId) -> Self {
                Self(raw.into())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Server-assigned identifier of a two-party conversation.
    ConversationId
);

string_id!(
    /// Identity of a user account on the backend.
    UserId
);

/// Identifier of a message.
///
/// Messages created locally carry a `Pending` id until the backend echoes them
/// back with their `Server` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub enum MessageId {
    Server(String),
    Pending(Uuid),
}

impl MessageId {
    pub fn server(id: impl Into<String>) -> Self {
        Self::Server(id.into())
    }

    pub fn pending() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl From<RawId> for MessageId {
    fn from(raw: RawId) -> Self {
        Self::Server(raw.into())
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Pending(id) => write!(f, "pending-{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditState {
    #[default]
    Unedited,
    Edited,
}

/// A single chat message, top-level or a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: Participant,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Reply target. The parent always lives in the same conversation.
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    #[serde(default)]
    pub reply_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edit_state: EditState,
    /// One reaction per user; the latest one wins.
    #[serde(default)]
    pub reactions: BTreeMap<UserId, String>,
}

impl Message {
    /// Build a locally created message that has not been confirmed yet.
    pub fn pending(
        conversation_id: ConversationId,
        sender: Participant,
        content: Option<String>,
        attachment: Option<Attachment>,
        parent_id: Option<MessageId>,
    ) -> Self {
        Self {
            id: MessageId::pending(),
            conversation_id,
            sender,
            content,
            attachment,
            parent_id,
            reply_count: 0,
            created_at: Utc::now(),
            edit_state: EditState::Unedited,
            reactions: BTreeMap::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender.id == user
    }

    /// Set `user`'s reaction, returning the one it replaced.
    pub fn react(&mut self, user: UserId, emoji: impl Into<String>) -> Option<String> {
        self.reactions.insert(user, emoji.into())
    }

    /// Put back a reaction captured before a `react` call.
    pub fn restore_reaction(&mut self, user: &UserId, previous: Option<String>) {
        match previous {
            Some(emoji) => {
                self.reactions.insert(user.clone(), emoji);
            }
            None => {
                self.reactions.remove(user);
            }
        }
    }

    /// Case-insensitive substring match on the text content. `needle` must be lowercase.
    pub fn text_contains(&self, needle: &str) -> bool {
        self.content
            .as_deref()
            .map(|content| content.to_lowercase().contains(needle))
            .unwrap_or(false)
    }
}
