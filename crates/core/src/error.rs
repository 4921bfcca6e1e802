//! Error types for revstore
//!
//! Every fallible operation in the workspace returns [`Result`]. Variants
//! follow the store's failure taxonomy: input errors (`MalformedRevisionId`,
//! `IllegalArgument`, `InvalidDocumentId`, `InvalidBody`) are raised before
//! any write happens, `DocumentNotFound` and `Conflict` are surfaced to the
//! caller unchanged, and `Storage`/`AttachmentNotSaved` always imply that the
//! enclosing transaction was rolled back.

use std::io;
use thiserror::Error;

/// Result type alias for revstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the document store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (attachment files, lock file, config file)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Revision id does not have the `N-hash` shape
    #[error("Malformed revision id '{0}'")]
    MalformedRevisionId(String),

    /// Document id is empty or uses a reserved prefix
    #[error("Invalid document id '{doc_id}': {reason}")]
    InvalidDocumentId {
        /// The rejected id
        doc_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Document body is not a JSON object or carries reserved fields
    #[error("Invalid document body: {0}")]
    InvalidBody(String),

    /// Requested document or revision is absent
    #[error(
        "Document not found: {doc_id}{}",
        .rev_id.as_ref().map(|r| format!(" (revision {})", r)).unwrap_or_default()
    )]
    DocumentNotFound {
        /// Document id that was looked up
        doc_id: String,
        /// Revision id, when a specific revision was requested
        rev_id: Option<String>,
    },

    /// Create was called for a document whose current revision is live
    #[error("Document already exists: {0}")]
    DocumentAlreadyExists(String),

    /// Optimistic concurrency check failed
    #[error("Conflict on document '{doc_id}': {reason}")]
    Conflict {
        /// Document id
        doc_id: String,
        /// What the writer expected and did not find
        reason: String,
    },

    /// Caller passed arguments that can never succeed
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Attachment could not be streamed, moved or copied
    #[error("Attachment not saved: {0}")]
    AttachmentNotSaved(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation attempted after `Database::close`
    #[error("Database is closed")]
    Closed,
}

impl Error {
    /// Build a storage error from any displayable message
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Build a conflict error
    pub fn conflict(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Conflict {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }

    /// Build an illegal-argument error
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Error::IllegalArgument(msg.into())
    }

    /// Build a not-found error for a whole document
    pub fn not_found(doc_id: impl Into<String>) -> Self {
        Error::DocumentNotFound {
            doc_id: doc_id.into(),
            rev_id: None,
        }
    }

    /// Build a not-found error for a specific revision
    pub fn revision_not_found(doc_id: impl Into<String>, rev_id: impl ToString) -> Self {
        Error::DocumentNotFound {
            doc_id: doc_id.into(),
            rev_id: Some(rev_id.to_string()),
        }
    }

    /// Build an attachment-not-saved error
    pub fn attachment_not_saved(msg: impl Into<String>) -> Self {
        Error::AttachmentNotSaved(msg.into())
    }

    /// Stable machine-readable code for the variant
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::MalformedRevisionId(_) => "malformed_revision_id",
            Error::InvalidDocumentId { .. } => "invalid_document_id",
            Error::InvalidBody(_) => "invalid_body",
            Error::DocumentNotFound { .. } => "not_found",
            Error::DocumentAlreadyExists(_) => "already_exists",
            Error::Conflict { .. } => "conflict",
            Error::IllegalArgument(_) => "illegal_argument",
            Error::AttachmentNotSaved(_) => "attachment_not_saved",
            Error::Storage(_) => "storage",
            Error::Closed => "closed",
        }
    }

    /// True for optimistic-concurrency failures that a caller may retry
    /// after re-reading the document.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// True for not-found errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DocumentNotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
