//! Staging area for the one attachment that goes out with the next send.

use crate::error::{ChatError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use squadlink_messaging::{AttachmentKind, AttachmentUpload};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedAttachment {
    Image {
        upload: AttachmentUpload,
        /// `data:` URI presentation can render directly.
        preview: String,
    },
    File {
        upload: AttachmentUpload,
    },
}

impl StagedAttachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Self::Image { .. } => AttachmentKind::Image,
            Self::File { .. } => AttachmentKind::File,
        }
    }

    pub fn upload(&self) -> &AttachmentUpload {
        match self {
            Self::Image { upload, .. } | Self::File { upload } => upload,
        }
    }

    pub fn preview(&self) -> AttachmentPreview {
        let upload = self.upload();
        AttachmentPreview {
            kind: self.kind(),
            name: upload.name.clone(),
            size: upload.size(),
            mime_type: upload.mime_type.clone(),
            data_uri: match self {
                Self::Image { preview, .. } => Some(preview.clone()),
                Self::File { .. } => None,
            },
        }
    }
}

/// What presentation shows for a staged attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPreview {
    pub kind: AttachmentKind,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data_uri: Option<String>,
}

/// Holds at most one image or one file, never both.
#[derive(Debug)]
pub struct AttachmentStager {
    image_limit: u64,
    file_limit: u64,
    staged: Option<StagedAttachment>,
}

impl AttachmentStager {
    pub fn new(image_limit: u64, file_limit: u64) -> Self {
        Self {
            image_limit,
            file_limit,
            staged: None,
        }
    }

    /// Stage an image, replacing whatever was staged. A rejected image leaves the stage untouched.
    pub fn stage_image(&mut self, upload: AttachmentUpload) -> Result<AttachmentPreview> {
        check_size(&upload, self.image_limit)?;
        if !upload.is_image() {
            return Err(ChatError::validation(format!(
                "{} is not an image ({})",
                upload.name, upload.mime_type
            )));
        }
        let preview = format!(
            "data:{};base64,{}",
            upload.mime_type,
            STANDARD.encode(&upload.bytes)
        );
        debug!(name = %upload.name, size = upload.size(), "image staged");
        Ok(self.put(StagedAttachment::Image { upload, preview }))
    }

    /// Stage a file, replacing whatever was staged. A rejected file leaves the stage untouched.
    pub fn stage_file(&mut self, upload: AttachmentUpload) -> Result<AttachmentPreview> {
        check_size(&upload, self.file_limit)?;
        debug!(name = %upload.name, size = upload.size(), "file staged");
        Ok(self.put(StagedAttachment::File { upload }))
    }

    fn put(&mut self, staged: StagedAttachment) -> AttachmentPreview {
        let preview = staged.preview();
        self.staged = Some(staged);
        preview
    }

    pub fn staged(&self) -> Option<&StagedAttachment> {
        self.staged.as_ref()
    }

    pub fn preview(&self) -> Option<AttachmentPreview> {
        self.staged.as_ref().map(StagedAttachment::preview)
    }

    pub fn clear(&mut self) {
        self.staged = None;
    }
}

fn check_size(upload: &AttachmentUpload, limit: u64) -> Result<()> {
    if upload.bytes.is_empty() {
        return Err(ChatError::validation(format!("{} is empty", upload.name)));
    }
    if upload.size() > limit {
        return Err(ChatError::validation(format!(
            "{} is {} bytes, over the {} byte limit",
            upload.name,
            upload.size(),
            limit
        )));
    }
    Ok(())
}
