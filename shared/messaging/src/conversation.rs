//! Conversations and their list previews.

use crate::{AttachmentKind, ConversationId, Message, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Participant {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }
}

/// Last-message summary shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub sender_name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<AttachmentKind>,
    pub sent_at: DateTime<Utc>,
}

impl MessagePreview {
    pub fn from_message(message: &Message) -> Self {
        Self {
            sender_name: message.sender.display_name.clone(),
            content: message.content.clone(),
            attachment: message.attachment.as_ref().map(|a| a.kind),
            sent_at: message.created_at,
        }
    }

    /// Text for the list row: the content, or the attachment marker when there is none.
    pub fn summary(&self) -> &str {
        match (&self.content, self.attachment) {
            (Some(content), _) if !content.is_empty() => content,
            (_, Some(kind)) => kind.marker(),
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub unread_count: u32,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// The participant on the other side from `me`.
    pub fn counterpart(&self, me: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id != me)
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| &p.id == user)
    }

    /// Move the preview and activity forward to `message`. Older messages are ignored.
    pub fn record_message(&mut self, message: &Message) -> bool {
        if message.created_at < self.last_activity && self.last_message.is_some() {
            return false;
        }
        self.last_message = Some(MessagePreview::from_message(message));
        self.last_activity = self.last_activity.max(message.created_at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attachment, MessageId};
    use chrono::TimeZone;

    fn conversation() -> Conversation {
        Conversation {
            id: ConversationId::new("c1"),
            participants: vec![
                Participant::new(UserId::new("me"), "Me"),
                Participant::new(UserId::new("them"), "Them"),
            ],
            last_message: None,
            unread_count: 0,
            last_activity: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn counterpart_skips_self() {
        let conversation = conversation();
        let other = conversation.counterpart(&UserId::new("me")).unwrap();
        assert_eq!(other.display_name, "Them");
    }

    #[test]
    fn preview_falls_back_to_attachment_marker() {
        let mut message = Message::pending(
            ConversationId::new("c1"),
            Participant::new(UserId::new("me"), "Me"),
            None,
            Some(Attachment {
                kind: AttachmentKind::Image,
                name: "shot.png".into(),
                size: 10,
                mime_type: "image/png".into(),
                url: None,
            }),
            None,
        );
        assert_eq!(MessagePreview::from_message(&message).summary(), "[image]");
        message.content = Some("look".into());
        assert_eq!(MessagePreview::from_message(&message).summary(), "look");
    }

    #[test]
    fn record_message_ignores_older_messages() {
        let mut conversation = conversation();
        let mut newer = Message::pending(
            conversation.id.clone(),
            Participant::new(UserId::new("me"), "Me"),
            Some("new".into()),
            None,
            None,
        );
        newer.id = MessageId::server("2");
        assert!(conversation.record_message(&newer));

        let mut older = newer.clone();
        older.created_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        older.content = Some("old".into());
        assert!(!conversation.record_message(&older));
        assert_eq!(conversation.last_message.unwrap().content.as_deref(), Some("new"));
    }
}
