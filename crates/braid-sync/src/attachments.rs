//! Attachment store seam.
//!
//! Attachment binaries never pass through the sync engine; they live
//! beside the adapter implementing this trait. The engine only drives
//! upload state forward and gates message pushes on it — a message whose
//! attachments are not all durable remotely is held back, along with
//! everything that descends from it.

use async_trait::async_trait;
use braid_core::{AttachmentId, UploadState};
use thiserror::Error;

/// Errors surfaced by the attachment store.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// The referenced binary is unknown to the store.
    #[error("attachment not found: {0}")]
    NotFound(String),

    /// Transient upload failure; retried on the next pass.
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

/// Binary upload capability for attachments.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Drive one attachment's upload; returns the state it reached.
    ///
    /// Called for attachments in `None` or `Failed` state. The adapter
    /// resolves the binary itself.
    async fn upload(&self, id: &AttachmentId) -> Result<UploadState, AttachmentError>;

    /// Current upload state, polled for in-flight uploads.
    async fn upload_state(&self, id: &AttachmentId) -> Result<UploadState, AttachmentError>;
}
