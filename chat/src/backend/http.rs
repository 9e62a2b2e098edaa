use super::ChatBackend;
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use squadlink_messaging::{
    AttachmentUpload, Conversation, ConversationId, Message, MessageId, OutgoingMessage, UserId,
};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct OpenConversationBody<'a> {
    participant_id: &'a UserId,
}

#[derive(Serialize)]
struct EditBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct ReactionBody<'a> {
    emoji: &'a str,
}

/// `ChatBackend` over the REST API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Network(format!("failed to build http client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.api_token.clone(),
            config.session.request_timeout,
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        debug!(status = status.as_u16(), %message, "backend rejected request");
        Err(ChatError::from_status(status.as_u16(), message))
    }

    async fn fetch<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = Self::execute(builder).await?;
        Ok(response.json::<T>().await?)
    }
}

fn upload_part(upload: AttachmentUpload) -> Result<Part> {
    let AttachmentUpload {
        name,
        mime_type,
        bytes,
    } = upload;
    Part::bytes(bytes)
        .file_name(name)
        .mime_str(&mime_type)
        .map_err(|e| ChatError::validation(format!("invalid mime type {mime_type:?}: {e}")))
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Self::fetch(self.request(Method::GET, "/conversations")).await
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        Self::fetch(self.request(Method::GET, &format!("/conversations/{id}"))).await
    }

    async fn open_conversation(&self, participant: &UserId) -> Result<Conversation> {
        let body = OpenConversationBody {
            participant_id: participant,
        };
        Self::fetch(self.request(Method::POST, "/conversations").json(&body)).await
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        Self::fetch(self.request(
            Method::GET,
            &format!("/conversations/{conversation_id}/messages"),
        ))
        .await
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        outgoing: OutgoingMessage,
    ) -> Result<Message> {
        let OutgoingMessage {
            content,
            image,
            file,
            parent_id,
        } = outgoing;

        let mut form = Form::new();
        if let Some(content) = content {
            form = form.text("content", content);
        }
        if let Some(parent_id) = parent_id {
            form = form.text("parent_id", parent_id.to_string());
        }
        if let Some(image) = image {
            form = form.part("image", upload_part(image)?);
        }
        if let Some(file) = file {
            form = form.part("file", upload_part(file)?);
        }

        Self::fetch(
            self.request(
                Method::POST,
                &format!("/conversations/{conversation_id}/messages"),
            )
            .multipart(form),
        )
        .await
    }

    async fn edit_message(&self, id: &MessageId, content: &str) -> Result<Message> {
        let body = EditBody { content };
        Self::fetch(self.request(Method::PATCH, &format!("/messages/{id}")).json(&body)).await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        Self::execute(self.request(Method::DELETE, &format!("/messages/{id}"))).await?;
        Ok(())
    }

    async fn react(&self, id: &MessageId, emoji: &str) -> Result<()> {
        let body = ReactionBody { emoji };
        Self::execute(
            self.request(Method::POST, &format!("/messages/{id}/reactions"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn list_replies(&self, parent_id: &MessageId) -> Result<Vec<Message>> {
        Self::fetch(self.request(Method::GET, &format!("/messages/{parent_id}/replies"))).await
    }
}
