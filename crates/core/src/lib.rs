//! Core types for revstore
//!
//! This crate defines the foundational types used throughout the system:
//! - RevId: parsed `N-hash` revision identifier with winner ordering
//! - DocumentBody: JSON object body with reserved-field validation
//! - Revision: one node of a document's revision tree
//! - SavedAttachment / BlobKey / Encoding: attachment metadata
//! - DocumentEvent: post-commit change notifications
//! - Error: error taxonomy shared by every crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachment;
pub mod body;
pub mod doc_id;
pub mod error;
pub mod events;
pub mod limits;
pub mod rev_id;
pub mod revision;

pub use attachment::{AttachmentStub, BlobKey, Encoding, SavedAttachment};
pub use body::DocumentBody;
pub use doc_id::{generate_document_id, validate_document_id, validate_local_document_id};
pub use error::{Error, Result};
pub use events::DocumentEvent;
pub use rev_id::{RevId, MAX_GENERATION};
pub use revision::{Changes, LocalDocument, Revision};
