//! Document id validation and generation

use crate::error::{Error, Result};
use uuid::Uuid;

/// Prefix of design documents, the only replicated ids allowed to start with `_`
pub const DESIGN_PREFIX: &str = "_design/";

/// Prefix reserved for non-replicated local documents
pub const LOCAL_PREFIX: &str = "_local/";

/// Check a document id supplied by a caller or a remote peer.
pub fn validate_document_id(doc_id: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidDocumentId {
        doc_id: doc_id.to_string(),
        reason: reason.to_string(),
    };
    if doc_id.is_empty() {
        return Err(invalid("document id must not be empty"));
    }
    if doc_id.starts_with('_') && !doc_id.starts_with(DESIGN_PREFIX) {
        return Err(invalid("only _design/ ids may start with '_'"));
    }
    Ok(())
}

/// Check a local document id. Any non-empty id is accepted.
pub fn validate_local_document_id(doc_id: &str) -> Result<()> {
    if doc_id.is_empty() {
        return Err(Error::InvalidDocumentId {
            doc_id: String::new(),
            reason: "local document id must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Fresh random document id (32 lowercase hex characters)
pub fn generate_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["doc1", "a", "_design/view", "with space", "ü"] {
            assert!(validate_document_id(id).is_ok(), "{}", id);
        }
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", "_foo", "_local/x", "_"] {
            let err = validate_document_id(id).unwrap_err();
            assert!(matches!(err, Error::InvalidDocumentId { .. }), "{}", id);
        }
    }

    #[test]
    fn test_local_ids() {
        assert!(validate_local_document_id("_local/checkpoint").is_ok());
        assert!(validate_local_document_id("").is_err());
    }

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = generate_document_id();
        let b = generate_document_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(validate_document_id(&a).is_ok());
    }
}
