//! Payload of a send request.

use crate::{Attachment, AttachmentKind, AttachmentUpload, MessageId};

/// What the client posts to create a message: optional text, at most one of
/// image or file, and an optional reply target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub image: Option<AttachmentUpload>,
    pub file: Option<AttachmentUpload>,
    pub parent_id: Option<MessageId>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Drops whitespace-only content so emptiness checks see it as absent.
    pub fn normalized(mut self) -> Self {
        self.content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn has_attachment(&self) -> bool {
        self.image.is_some() || self.file.is_some()
    }

    pub fn is_empty(&self) -> bool {
        let blank = self
            .content
            .as_deref()
            .map(|c| c.trim().is_empty())
            .unwrap_or(true);
        blank && !self.has_attachment()
    }

    /// Attachment metadata for the pending copy of this message.
    pub fn attachment(&self) -> Option<Attachment> {
        self.image
            .as_ref()
            .map(|upload| upload.describe(AttachmentKind::Image))
            .or_else(|| {
                self.file
                    .as_ref()
                    .map(|upload| upload.describe(AttachmentKind::File))
            })
    }
}
