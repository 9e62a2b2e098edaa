//! Read-only snapshot handed to presentation, plus the notices it must show.

use crate::attachments::AttachmentPreview;
use crate::error::ChatError;
use crate::search::SearchState;
use crate::thread::ReplyState;
use squadlink_messaging::{Conversation, Message, MessageId};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewModel {
    pub conversations: Vec<Conversation>,
    pub active: Option<Conversation>,
    /// Top-level messages in thread order, each followed by its shown replies.
    pub messages: Vec<DisplayMessage>,
    pub attachment: Option<AttachmentPreview>,
    pub search: Option<SearchState>,
    pub reply_target: Option<MessageId>,
    pub sending: bool,
    pub has_unread: bool,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message: Message,
    /// 0 for top-level messages, 1 for replies.
    pub depth: u8,
    pub pending: bool,
    /// An edit is awaiting confirmation.
    pub editing: bool,
    pub current_match: bool,
    /// `None` for replies, which cannot be expanded themselves.
    pub replies: Option<ReplyState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoticeId(pub u64);

/// A failure the user has to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: NoticeId,
    pub error: ChatError,
    /// Re-triggering the action by hand may succeed.
    pub retryable: bool,
    /// Mutations are refused until this notice is acknowledged.
    pub blocking: bool,
}

/// Unacknowledged notices, oldest first.
#[derive(Debug, Default)]
pub struct Notices {
    next_id: u64,
    pending: Vec<Notice>,
}

impl Notices {
    pub fn push(&mut self, error: ChatError) -> NoticeId {
        self.next_id += 1;
        let id = NoticeId(self.next_id);
        let notice = Notice {
            id,
            retryable: error.is_retryable(),
            blocking: error.is_auth(),
            error,
        };
        warn!(
            notice = id.0,
            error = %notice.error,
            retryable = notice.retryable,
            blocking = notice.blocking,
            "notice raised"
        );
        self.pending.push(notice);
        id
    }

    /// Dismiss a notice. Returns false if it was not pending.
    pub fn acknowledge(&mut self, id: NoticeId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|notice| notice.id != id);
        self.pending.len() != before
    }

    pub fn blocking(&self) -> Option<&Notice> {
        self.pending.iter().find(|notice| notice.blocking)
    }

    pub fn as_slice(&self) -> &[Notice] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
