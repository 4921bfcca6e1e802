//! Attachment metadata
//!
//! Blob content lives in a content-addressed directory named by the hex
//! SHA-1 of the stored bytes. These types describe the metadata side: the
//! `attachments` row of a saved attachment and the JSON stub a remote peer
//! sends during replication.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a SHA-1 digest in bytes
pub const BLOB_KEY_LEN: usize = 20;

/// How the stored bytes are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Stored as-is
    #[default]
    Plain,
    /// Stored gzip-compressed
    Gzip,
}

impl Encoding {
    /// Integer stored in the `encoding` column
    pub fn as_i64(self) -> i64 {
        match self {
            Encoding::Plain => 0,
            Encoding::Gzip => 1,
        }
    }

    /// Decode the `encoding` column
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Encoding::Plain),
            1 => Ok(Encoding::Gzip),
            other => Err(Error::storage(format!("unknown attachment encoding {}", other))),
        }
    }
}

/// SHA-1 of a blob's stored bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey([u8; BLOB_KEY_LEN]);

impl BlobKey {
    /// Wrap a raw digest
    pub fn new(bytes: [u8; BLOB_KEY_LEN]) -> Self {
        BlobKey(bytes)
    }

    /// Build from a slice read out of a BLOB column
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; BLOB_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::storage(format!(
                "attachment key has {} bytes, expected {}",
                bytes.len(),
                BLOB_KEY_LEN
            ))
        })?;
        Ok(BlobKey(arr))
    }

    /// Parse a 40-character lowercase or uppercase hex string
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != BLOB_KEY_LEN * 2 {
            return None;
        }
        let mut out = [0u8; BLOB_KEY_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            out[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(BlobKey(out))
    }

    /// Lowercase hex, the blob's file name
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.to_hex())
    }
}

/// Metadata row of a committed attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedAttachment {
    /// Name, unique within the revision
    pub name: String,
    /// Sequence of the revision owning this row
    pub sequence: u64,
    /// Content hash, also the blob file name
    pub key: BlobKey,
    /// MIME type
    pub content_type: String,
    /// Encoding of the stored bytes
    pub encoding: Encoding,
    /// Decoded length in bytes
    pub length: u64,
    /// Stored length in bytes
    pub encoded_length: u64,
    /// Generation at which this content was introduced
    pub revpos: u64,
}

/// Attachment entry as exchanged with a replication peer.
///
/// `stub = true` means "unchanged since `revpos`, copy it forward";
/// otherwise `data` carries the stored bytes as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentStub {
    /// MIME type
    pub content_type: String,
    /// Generation at which this content was introduced
    pub revpos: u64,
    /// Decoded length
    pub length: u64,
    /// Encoding of `data`
    #[serde(default)]
    pub encoding: Encoding,
    /// Metadata only, no data
    #[serde(default)]
    pub stub: bool,
    /// Base64 of the stored bytes when inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_column_values() {
        assert_eq!(Encoding::from_i64(Encoding::Gzip.as_i64()).unwrap(), Encoding::Gzip);
        assert_eq!(Encoding::from_i64(0).unwrap(), Encoding::Plain);
        assert!(Encoding::from_i64(7).is_err());
    }

    #[test]
    fn test_blob_key_hex() {
        let mut raw = [0u8; BLOB_KEY_LEN];
        raw[0] = 0xab;
        raw[19] = 0x01;
        let key = BlobKey::new(raw);
        let hex = key.to_hex();
        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
        assert_eq!(BlobKey::from_hex(&hex), Some(key));
        assert_eq!(BlobKey::from_hex(&hex.to_uppercase()), Some(key));
    }

    #[test]
    fn test_blob_key_rejects_bad_input() {
        assert!(BlobKey::from_hex("abc").is_none());
        assert!(BlobKey::from_hex(&"zz".repeat(20)).is_none());
        assert!(BlobKey::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_stub_defaults() {
        let stub: AttachmentStub =
            serde_json::from_str(r#"{"content_type":"text/plain","revpos":2,"length":5}"#).unwrap();
        assert!(!stub.stub);
        assert_eq!(stub.encoding, Encoding::Plain);
        assert!(stub.data.is_none());
    }
}
