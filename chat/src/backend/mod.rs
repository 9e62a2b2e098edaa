//! The REST collaborator the chat core talks to.
//!
//! `ChatBackend` mirrors the backend's endpoints one method each. The session
//! only ever holds it as `Arc<dyn ChatBackend>`, so tests swap in
//! [`MemoryBackend`] where production uses [`HttpBackend`].

mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::{Endpoint, MemoryBackend};

use crate::error::Result;
use async_trait::async_trait;
use squadlink_messaging::{Conversation, ConversationId, Message, MessageId, OutgoingMessage, UserId};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /conversations`
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// `GET /conversations/{id}`
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;

    /// `POST /conversations`; the backend returns the existing conversation
    /// with `participant` if there is one.
    async fn open_conversation(&self, participant: &UserId) -> Result<Conversation>;

    /// `GET /conversations/{id}/messages`
    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>>;

    /// `POST /conversations/{id}/messages`
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        outgoing: OutgoingMessage,
    ) -> Result<Message>;

    /// `PATCH /messages/{id}`
    async fn edit_message(&self, id: &MessageId, content: &str) -> Result<Message>;

    /// `DELETE /messages/{id}`
    async fn delete_message(&self, id: &MessageId) -> Result<()>;

    /// `POST /messages/{id}/reactions`
    async fn react(&self, id: &MessageId, emoji: &str) -> Result<()>;

    /// `GET /messages/{id}/replies`
    async fn list_replies(&self, parent_id: &MessageId) -> Result<Vec<Message>>;
}
