//! In-process `ChatBackend` holding everything in memory.
//!
//! Behaves like the REST backend for a single user: it assigns server ids,
//! keeps previews current and deduplicates conversations per participant.
//! Failures can be scripted per endpoint, and every call is counted.

use super::ChatBackend;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use chrono::Utc;
use squadlink_messaging::{
    Conversation, ConversationId, EditState, Message, MessageId, OutgoingMessage, Participant,
    UserId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ListConversations,
    GetConversation,
    OpenConversation,
    ListMessages,
    SendMessage,
    EditMessage,
    DeleteMessage,
    React,
    ListReplies,
}

struct MemoryState {
    me: Participant,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    directory: HashMap<UserId, Participant>,
    failures: HashMap<Endpoint, VecDeque<ChatError>>,
    calls: HashMap<Endpoint, usize>,
    next_id: u64,
}

impl MemoryState {
    fn enter(&mut self, endpoint: Endpoint) -> Result<()> {
        *self.calls.entry(endpoint).or_default() += 1;
        match self.failures.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("conversation {id}")))
    }

    fn message_mut(&mut self, id: &MessageId) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("message {id}")))
    }
}

#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// A backend acting on behalf of `me`.
    pub fn new(me: Participant) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                me,
                conversations: Vec::new(),
                messages: Vec::new(),
                directory: HashMap::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut state = self.state();
        state.conversations.retain(|c| c.id != conversation.id);
        state.conversations.push(conversation);
    }

    /// Store a message as if some client had already sent it.
    pub fn insert_message(&self, message: Message) {
        let mut state = self.state();
        if let Some(parent_id) = &message.parent_id {
            if let Ok(parent) = state.message_mut(parent_id) {
                parent.reply_count += 1;
            }
        }
        if let Ok(conversation) = state.conversation_mut(&message.conversation_id) {
            conversation.record_message(&message);
        }
        state.messages.push(message);
    }

    /// Make a user known so `open_conversation` can name them.
    pub fn register_user(&self, participant: Participant) {
        self.state()
            .directory
            .insert(participant.id.clone(), participant);
    }

    pub fn set_unread(&self, id: &ConversationId, unread: u32) {
        if let Ok(conversation) = self.state().conversation_mut(id) {
            conversation.unread_count = unread;
        }
    }

    /// Fail the next call to `endpoint` with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, endpoint: Endpoint, error: ChatError) {
        self.state()
            .failures
            .entry(endpoint)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.state().calls.get(&endpoint).copied().unwrap_or(0)
    }

    pub fn stored_message(&self, id: &MessageId) -> Option<Message> {
        self.state().messages.iter().find(|m| &m.id == id).cloned()
    }

    /// Remove a message behind the client's back, as another device would.
    pub fn forget_message(&self, id: &MessageId) {
        self.state().messages.retain(|m| &m.id != id);
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut state = self.state();
        state.enter(Endpoint::ListConversations)?;
        Ok(state.conversations.clone())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let mut state = self.state();
        state.enter(Endpoint::GetConversation)?;
        state.conversation_mut(id).map(|c| c.clone())
    }

    async fn open_conversation(&self, participant: &UserId) -> Result<Conversation> {
        let mut state = self.state();
        state.enter(Endpoint::OpenConversation)?;
        if let Some(existing) = state
            .conversations
            .iter()
            .find(|c| c.has_participant(participant))
        {
            return Ok(existing.clone());
        }
        let other = state
            .directory
            .get(participant)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("user {participant}")))?;
        let id = ConversationId::new(state.next_id("conv"));
        let conversation = Conversation {
            id,
            participants: vec![state.me.clone(), other],
            last_message: None,
            unread_count: 0,
            last_activity: Utc::now(),
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let mut state = self.state();
        state.enter(Endpoint::ListMessages)?;
        state.conversation_mut(conversation_id)?.unread_count = 0;
        Ok(state
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id && m.parent_id.is_none())
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        outgoing: OutgoingMessage,
    ) -> Result<Message> {
        let mut state = self.state();
        state.enter(Endpoint::SendMessage)?;
        state.conversation_mut(conversation_id)?;
        if let Some(parent_id) = &outgoing.parent_id {
            state.message_mut(parent_id)?;
        }

        let mut attachment = outgoing.attachment();
        if let Some(attachment) = attachment.as_mut() {
            attachment.url = Some(format!("memory://uploads/{}", attachment.name));
        }
        let mut message = Message::pending(
            conversation_id.clone(),
            state.me.clone(),
            outgoing.content,
            attachment,
            outgoing.parent_id,
        );
        message.id = MessageId::server(state.next_id("msg"));
        drop(state);

        self.insert_message(message.clone());
        Ok(message)
    }

    async fn edit_message(&self, id: &MessageId, content: &str) -> Result<Message> {
        let mut state = self.state();
        state.enter(Endpoint::EditMessage)?;
        let me = state.me.id.clone();
        let message = state.message_mut(id)?;
        if !message.is_from(&me) {
            return Err(ChatError::Auth("only the sender can edit a message".into()));
        }
        message.content = Some(content.to_string());
        message.edit_state = EditState::Edited;
        Ok(message.clone())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let mut state = self.state();
        state.enter(Endpoint::DeleteMessage)?;
        let parent_id = state.message_mut(id)?.parent_id.clone();
        state.messages.retain(|m| &m.id != id && m.parent_id.as_ref() != Some(id));
        if let Some(parent_id) = parent_id {
            if let Ok(parent) = state.message_mut(&parent_id) {
                parent.reply_count = parent.reply_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn react(&self, id: &MessageId, emoji: &str) -> Result<()> {
        let mut state = self.state();
        state.enter(Endpoint::React)?;
        let me = state.me.id.clone();
        state.message_mut(id)?.react(me, emoji);
        Ok(())
    }

    async fn list_replies(&self, parent_id: &MessageId) -> Result<Vec<Message>> {
        let mut state = self.state();
        state.enter(Endpoint::ListReplies)?;
        state.message_mut(parent_id)?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect())
    }
}
