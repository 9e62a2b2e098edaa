//! Local cache of the current user's conversations.

use crate::backend::ChatBackend;
use crate::error::Result;
use chrono::{DateTime, Utc};
use squadlink_messaging::{Conversation, ConversationId, Message, MessagePreview};
use tracing::{debug, warn};

/// Preview state captured before an optimistic send touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSnapshot {
    pub last_message: Option<MessagePreview>,
    pub last_activity: DateTime<Utc>,
    /// The preview the optimistic send put in place.
    pub applied: MessagePreview,
}

/// Result of folding a poll into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadSummary {
    pub has_unread: bool,
    pub total_unread: u32,
}

/// Conversations ordered by last activity, newest first, ties by id.
#[derive(Debug, Default)]
pub struct ConversationListStore {
    conversations: Vec<Conversation>,
}

impl ConversationListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the full list and replace the store with it. On failure the current list stays.
    pub async fn refresh(&mut self, backend: &dyn ChatBackend) -> Result<()> {
        match backend.list_conversations().await {
            Ok(conversations) => {
                debug!(count = conversations.len(), "conversation list refreshed");
                self.replace_all(conversations);
                Ok(())
            }
            Err(err) => {
                warn!(%err, "conversation refresh failed; keeping previous list");
                Err(err)
            }
        }
    }

    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.sort();
    }

    pub fn upsert(&mut self, conversation: Conversation) {
        match self.position(&conversation.id) {
            Some(index) => self.conversations[index] = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort();
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.position(id).is_some()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Advance a conversation's preview to `message`, returning what it replaced.
    pub fn record_message(&mut self, message: &Message) -> Option<PreviewSnapshot> {
        let index = self.position(&message.conversation_id)?;
        let conversation = &mut self.conversations[index];
        let last_message = conversation.last_message.clone();
        let last_activity = conversation.last_activity;
        if !conversation.record_message(message) {
            return None;
        }
        self.sort();
        Some(PreviewSnapshot {
            last_message,
            last_activity,
            applied: MessagePreview::from_message(message),
        })
    }

    /// Swap an optimistic preview for the confirmed message's, unless something newer replaced it.
    pub fn confirm_preview(&mut self, snapshot: &PreviewSnapshot, confirmed: &Message) {
        let Some(index) = self.position(&confirmed.conversation_id) else {
            return;
        };
        let conversation = &mut self.conversations[index];
        if conversation.last_message.as_ref() == Some(&snapshot.applied) {
            conversation.last_message = Some(MessagePreview::from_message(confirmed));
        }
    }

    /// Undo an optimistic preview, unless something newer replaced it meanwhile.
    pub fn revert_preview(&mut self, id: &ConversationId, snapshot: PreviewSnapshot) {
        let Some(index) = self.position(id) else {
            return;
        };
        let conversation = &mut self.conversations[index];
        if conversation.last_message.as_ref() != Some(&snapshot.applied) {
            return;
        }
        conversation.last_message = snapshot.last_message;
        conversation.last_activity = snapshot.last_activity;
        self.sort();
    }

    pub fn mark_read(&mut self, id: &ConversationId) {
        if let Some(index) = self.position(id) {
            self.conversations[index].unread_count = 0;
        }
    }

    /// Fold a polled list in: counts, previews and activity for known
    /// conversations, insertion for new ones. `active` stays read.
    pub fn merge_unread(
        &mut self,
        polled: Vec<Conversation>,
        active: Option<&ConversationId>,
    ) -> UnreadSummary {
        for mut fresh in polled {
            if Some(&fresh.id) == active {
                fresh.unread_count = 0;
            }
            match self.position(&fresh.id) {
                Some(index) => {
                    let known = &mut self.conversations[index];
                    known.unread_count = fresh.unread_count;
                    if fresh.last_activity >= known.last_activity {
                        known.last_activity = fresh.last_activity;
                        known.last_message = fresh.last_message;
                    }
                }
                None => self.conversations.push(fresh),
            }
        }
        self.sort();
        self.unread_summary()
    }

    pub fn unread_summary(&self) -> UnreadSummary {
        let total_unread = self.conversations.iter().map(|c| c.unread_count).sum();
        UnreadSummary {
            has_unread: total_unread > 0,
            total_unread,
        }
    }

    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| &c.id == id)
    }

    fn sort(&mut self) {
        self.conversations.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
