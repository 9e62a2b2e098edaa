//! Message threads and their lazily loaded reply sets.
//!
//! One conversation is active at a time. Threads of other conversations may
//! stay resident so late reconciliations still land in the right place, but
//! selecting a conversation always refetches its thread.

use crate::backend::ChatBackend;
use crate::error::Result;
use squadlink_messaging::{ConversationId, Message, MessageId, UserId};
use std::collections::HashMap;
use tracing::debug;

/// Replies of one parent message, once fetched.
///
/// A parent with no entry has never been expanded; an entry that is not
/// visible was fetched and then collapsed, and reopening it does not refetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplySet {
    replies: Vec<Message>,
    visible: bool,
}

impl ReplySet {
    pub fn replies(&self) -> &[Message] {
        &self.replies
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// The three states a parent's replies can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    NotFetched,
    Hidden,
    Shown,
}

/// Where a message sat before removal, so it can be put back exactly there.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedMessage {
    pub message: Message,
    pub position: usize,
    replies: Option<ReplySet>,
}

/// Local effects of unanswered mutations that a refetched thread must keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlightEffects {
    /// Messages removed by a delete the server has not answered.
    pub deleted: Vec<Message>,
    /// Reactions the user set that the server has not confirmed.
    pub reactions: Vec<(MessageId, UserId, String)>,
}

impl InFlightEffects {
    fn is_deleted(&self, id: &MessageId) -> bool {
        self.deleted.iter().any(|message| &message.id == id)
    }
}

#[derive(Debug, Default)]
struct Thread {
    messages: Vec<Message>,
    replies: HashMap<MessageId, ReplySet>,
}

impl Thread {
    fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        if let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) {
            return Some(message);
        }
        self.replies
            .values_mut()
            .flat_map(|set| set.replies.iter_mut())
            .find(|m| &m.id == id)
    }

    /// Unsent messages, top level first, then replies.
    fn into_pending(self) -> Vec<Message> {
        let Thread { messages, replies } = self;
        let mut replies: Vec<Message> = replies
            .into_values()
            .flat_map(|set| set.replies)
            .filter(Message::is_pending)
            .collect();
        replies.sort_by_key(|m| m.created_at);
        messages
            .into_iter()
            .filter(Message::is_pending)
            .chain(replies)
            .collect()
    }

    fn adjust_reply_count(&mut self, parent_id: &MessageId, delta: i64) {
        if let Some(parent) = self.find_mut(parent_id) {
            let count = i64::from(parent.reply_count) + delta;
            parent.reply_count = count.clamp(0, i64::from(u32::MAX)) as u32;
        }
    }
}

#[derive(Debug, Default)]
pub struct MessageThreadStore {
    threads: HashMap<ConversationId, Thread>,
    active: Option<ConversationId>,
}

impl MessageThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Make `id` the displayed conversation and drop threads nothing refers to.
    pub fn activate(&mut self, id: ConversationId, keep: &[ConversationId]) {
        self.threads
            .retain(|conversation, _| conversation == &id || keep.contains(conversation));
        self.active = Some(id);
    }

    pub fn is_resident(&self, id: &ConversationId) -> bool {
        self.threads.contains_key(id)
    }

    /// Fetch `conversation_id`'s messages and replace its thread with them, oldest first.
    pub async fn load(
        &mut self,
        backend: &dyn ChatBackend,
        conversation_id: &ConversationId,
        in_flight: &InFlightEffects,
    ) -> Result<()> {
        let messages = backend.list_messages(conversation_id).await?;
        debug!(%conversation_id, count = messages.len(), "thread loaded");
        self.reload(conversation_id.clone(), messages, in_flight);
        Ok(())
    }

    pub fn replace_messages(&mut self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.reload(conversation_id, messages, &InFlightEffects::default());
    }

    /// Install a fetched thread on top of what unanswered mutations did locally.
    ///
    /// Pending messages of the previous thread are appended again, messages
    /// with a delete in flight stay out and unconfirmed reactions stay set.
    /// Reply sets are dropped and fetched again on demand.
    pub fn reload(
        &mut self,
        conversation_id: ConversationId,
        mut messages: Vec<Message>,
        in_flight: &InFlightEffects,
    ) {
        messages.retain(|m| !in_flight.is_deleted(&m.id));
        messages.sort_by_key(|m| m.created_at);
        let mut thread = Thread {
            messages,
            replies: HashMap::new(),
        };
        for deleted in &in_flight.deleted {
            if let Some(parent_id) = &deleted.parent_id {
                thread.adjust_reply_count(parent_id, -1);
            }
        }
        for (message_id, user, emoji) in &in_flight.reactions {
            if let Some(message) = thread.find_mut(message_id) {
                message.react(user.clone(), emoji.clone());
            }
        }

        let pending = self
            .threads
            .insert(conversation_id, thread)
            .map(Thread::into_pending)
            .unwrap_or_default();
        for message in pending {
            self.append(message);
        }
    }

    /// Add a message at the end of its thread, or of its parent's reply set.
    ///
    /// A reply bumps its parent's count even when the reply set was never
    /// fetched. Returns false when the thread is not resident or the message
    /// is already there.
    pub fn append(&mut self, message: Message) -> bool {
        let Some(thread) = self.threads.get_mut(&message.conversation_id) else {
            return false;
        };
        if thread.find_mut(&message.id).is_some() {
            return false;
        }
        match message.parent_id.clone() {
            None => thread.messages.push(message),
            Some(parent_id) => {
                thread.adjust_reply_count(&parent_id, 1);
                if let Some(set) = thread.replies.get_mut(&parent_id) {
                    set.replies.push(message);
                }
            }
        }
        true
    }

    /// Swap `pending_id` for the confirmed message at the same position.
    ///
    /// If a refetch already brought the confirmed message, the pending one is
    /// dropped instead. If the pending one is gone, the confirmed message is
    /// filed at the end of its thread or loaded reply set without touching
    /// reply counts. Returns false when the thread is not resident.
    pub fn replace(
        &mut self,
        conversation_id: &ConversationId,
        pending_id: &MessageId,
        confirmed: Message,
    ) -> bool {
        if !self.is_resident(conversation_id) {
            return false;
        }
        if self.find(conversation_id, &confirmed.id).is_some() {
            if self.remove(conversation_id, pending_id).is_none() {
                if let Some(parent_id) = &confirmed.parent_id {
                    self.adjust_reply_count(conversation_id, parent_id, -1);
                }
            }
            return true;
        }
        let Some(thread) = self.threads.get_mut(conversation_id) else {
            return false;
        };
        if let Some(slot) = thread.find_mut(pending_id) {
            *slot = confirmed;
            return true;
        }
        debug!(%conversation_id, pending = %pending_id, "pending message gone; filing confirmed copy");
        match confirmed.parent_id.clone() {
            None => thread.messages.push(confirmed),
            Some(parent_id) => {
                if let Some(set) = thread.replies.get_mut(&parent_id) {
                    set.replies.push(confirmed);
                }
            }
        }
        true
    }

    /// Change fields of a message in place.
    pub fn update(
        &mut self,
        conversation_id: &ConversationId,
        id: &MessageId,
        apply: impl FnOnce(&mut Message),
    ) -> bool {
        match self
            .threads
            .get_mut(conversation_id)
            .and_then(|thread| thread.find_mut(id))
        {
            Some(message) => {
                apply(message);
                true
            }
            None => false,
        }
    }

    /// Remove a message from the top level or from a reply set; a removed
    /// reply decrements its parent's count.
    pub fn remove(&mut self, conversation_id: &ConversationId, id: &MessageId) -> Option<RemovedMessage> {
        let thread = self.threads.get_mut(conversation_id)?;

        if let Some(position) = thread.messages.iter().position(|m| &m.id == id) {
            let message = thread.messages.remove(position);
            let replies = thread.replies.remove(id);
            return Some(RemovedMessage {
                message,
                position,
                replies,
            });
        }

        let (parent_id, position) = thread.replies.iter().find_map(|(parent, set)| {
            set.replies
                .iter()
                .position(|m| &m.id == id)
                .map(|position| (parent.clone(), position))
        })?;
        let message = thread.replies.get_mut(&parent_id)?.replies.remove(position);
        thread.adjust_reply_count(&parent_id, -1);
        Some(RemovedMessage {
            message,
            position,
            replies: None,
        })
    }

    /// Put a removed message back where it was, unless it is already there.
    pub fn restore(&mut self, conversation_id: &ConversationId, removed: RemovedMessage) {
        let Some(thread) = self.threads.get_mut(conversation_id) else {
            return;
        };
        if thread.find_mut(&removed.message.id).is_some() {
            debug!(%conversation_id, message_id = %removed.message.id, "restored message already present");
            return;
        }
        let RemovedMessage {
            message,
            position,
            replies,
        } = removed;
        match message.parent_id.clone() {
            None => {
                if let Some(replies) = replies {
                    thread.replies.insert(message.id.clone(), replies);
                }
                let position = position.min(thread.messages.len());
                thread.messages.insert(position, message);
            }
            Some(parent_id) => {
                thread.adjust_reply_count(&parent_id, 1);
                if let Some(set) = thread.replies.get_mut(&parent_id) {
                    let position = position.min(set.replies.len());
                    set.replies.insert(position, message);
                }
            }
        }
    }

    pub fn adjust_reply_count(&mut self, conversation_id: &ConversationId, parent_id: &MessageId, delta: i64) {
        if let Some(thread) = self.threads.get_mut(conversation_id) {
            thread.adjust_reply_count(parent_id, delta);
        }
    }

    /// Show `parent_id`'s replies, fetching them only the first time.
    pub async fn load_replies(
        &mut self,
        backend: &dyn ChatBackend,
        conversation_id: &ConversationId,
        parent_id: &MessageId,
    ) -> Result<()> {
        if let Some(set) = self
            .threads
            .get_mut(conversation_id)
            .and_then(|thread| thread.replies.get_mut(parent_id))
        {
            set.visible = true;
            return Ok(());
        }

        let mut replies = backend.list_replies(parent_id).await?;
        replies.sort_by_key(|m| m.created_at);
        debug!(%conversation_id, %parent_id, count = replies.len(), "replies loaded");

        if let Some(thread) = self.threads.get_mut(conversation_id) {
            thread.replies.insert(
                parent_id.clone(),
                ReplySet {
                    replies,
                    visible: true,
                },
            );
        }
        Ok(())
    }

    /// Collapse a reply set, keeping what was fetched.
    pub fn hide_replies(&mut self, conversation_id: &ConversationId, parent_id: &MessageId) {
        if let Some(set) = self
            .threads
            .get_mut(conversation_id)
            .and_then(|thread| thread.replies.get_mut(parent_id))
        {
            set.visible = false;
        }
    }

    pub fn reply_state(&self, conversation_id: &ConversationId, parent_id: &MessageId) -> ReplyState {
        match self.reply_set(conversation_id, parent_id) {
            None => ReplyState::NotFetched,
            Some(set) if set.visible => ReplyState::Shown,
            Some(_) => ReplyState::Hidden,
        }
    }

    pub fn reply_set(&self, conversation_id: &ConversationId, parent_id: &MessageId) -> Option<&ReplySet> {
        self.threads
            .get(conversation_id)
            .and_then(|thread| thread.replies.get(parent_id))
    }

    /// Top-level messages of a conversation, in display order.
    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.threads
            .get(conversation_id)
            .map(|thread| thread.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, conversation_id: &ConversationId, id: &MessageId) -> Option<&Message> {
        let thread = self.threads.get(conversation_id)?;
        thread
            .messages
            .iter()
            .chain(thread.replies.values().flat_map(|set| set.replies.iter()))
            .find(|m| &m.id == id)
    }

    /// Everything on screen: each top-level message followed by its shown replies.
    pub fn visible(&self, conversation_id: &ConversationId) -> Vec<&Message> {
        let Some(thread) = self.threads.get(conversation_id) else {
            return Vec::new();
        };
        let mut visible = Vec::with_capacity(thread.messages.len());
        for message in &thread.messages {
            visible.push(message);
            if let Some(set) = thread.replies.get(&message.id).filter(|set| set.visible) {
                visible.extend(set.replies.iter());
            }
        }
        visible
    }
}
