//! Image and file attachments.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    /// Marker shown in previews in place of the attachment itself.
    pub fn marker(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "[image]",
            AttachmentKind::File => "[file]",
        }
    }
}

/// Attachment metadata as carried by a message.
///
/// `url` is only known once the backend has stored the upload; pending
/// messages carry the metadata alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Raw bytes picked by the user, not yet uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Metadata for a local, not yet uploaded copy of this attachment.
    pub fn describe(&self, kind: AttachmentKind) -> Attachment {
        Attachment {
            kind,
            name: self.name.clone(),
            size: self.size(),
            mime_type: self.mime_type.clone(),
            url: None,
        }
    }
}

// Payloads can be megabytes; keep them out of logs.
impl std::fmt::Debug for AttachmentUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentUpload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}
