//! Error taxonomy shared by every part of the chat core.

use crate::mutation::MutationKind;
use squadlink_messaging::MessageId;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Rejected on the client before anything reached the network.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("a {kind} is already in flight for message {message_id}")]
    MutationInFlight {
        message_id: MessageId,
        kind: MutationKind,
    },
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            404 | 410 => Self::NotFound(message),
            400 | 413 | 422 => Self::Validation(message),
            _ => Self::Server { status, message },
        }
    }

    /// A vanished target is the outcome an edit or delete was converging to anyway.
    pub fn is_benign_for(&self, kind: MutationKind) -> bool {
        matches!(self, Self::NotFound(_))
            && matches!(kind, MutationKind::Edit | MutationKind::Delete)
    }

    /// Failures worth offering a manual retry for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::Server {
                status: 200,
                message: format!("malformed response body: {err}"),
            };
        }
        Self::Network(err.to_string())
    }
}
