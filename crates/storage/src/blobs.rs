//! Content-addressed blob store
//!
//! Blob files live in one directory and are named by the lowercase hex SHA-1
//! of their stored bytes. Writing is two-phase:
//!
//! 1. [`BlobStore::prepare`] streams the source into a temp file under
//!    `<dir>/tmp` while hashing it. No database access, so it runs outside
//!    any write transaction.
//! 2. [`BlobStore::commit`] inserts the metadata row and then renames the
//!    temp file to its content address. If a file with that name already
//!    exists the temp copy is discarded: identical hash, identical bytes.
//!
//! A failed metadata insert drops the temp file, and a failed rename is
//! returned as an error so the caller's transaction rolls the row back.
//! Neither path leaves an orphaned blob or a row without a blob.
//!
//! The rename happens before the surrounding transaction commits. Callers
//! keep the keys of blobs reported as [`Committed::created_blob`] and hand
//! them to [`BlobStore::discard`] if that transaction rolls back.

use crate::attachments;
use revstore_core::{BlobKey, Encoding, Error, Result, SavedAttachment};
use rusqlite::Connection;
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

const TMP_DIR_NAME: &str = "tmp";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Attachment variants
// ============================================================================

/// Attachment supplied by a caller, not yet streamed anywhere
pub struct UnsavedAttachment {
    /// Attachment name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// Encoding of the bytes `source` yields
    pub encoding: Encoding,
    /// Byte source, read exactly once
    pub source: Box<dyn Read + Send>,
    /// Decoded length. Required for gzip; checked against the stream for plain.
    pub length: Option<u64>,
    /// Generation that introduced this content; defaults to the revision's own
    pub revpos: Option<u64>,
}

impl UnsavedAttachment {
    /// Plain attachment from in-memory bytes
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let length = bytes.len() as u64;
        UnsavedAttachment {
            name: name.into(),
            content_type: content_type.into(),
            encoding: Encoding::Plain,
            source: Box::new(io::Cursor::new(bytes)),
            length: Some(length),
            revpos: None,
        }
    }

    /// Plain attachment read from a file
    pub fn from_file(
        name: impl Into<String>,
        content_type: impl Into<String>,
        path: &Path,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(UnsavedAttachment {
            name: name.into(),
            content_type: content_type.into(),
            encoding: Encoding::Plain,
            source: Box::new(file),
            length: Some(length),
            revpos: None,
        })
    }
}

impl fmt::Debug for UnsavedAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsavedAttachment")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("encoding", &self.encoding)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Attachment streamed to a temp file and hashed, awaiting commit
#[derive(Debug)]
pub struct PreparedAttachment {
    /// Attachment name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// Encoding of the stored bytes
    pub encoding: Encoding,
    /// SHA-1 of the stored bytes
    pub key: BlobKey,
    /// Decoded length
    pub length: u64,
    /// Stored length
    pub encoded_length: u64,
    /// Generation that introduced this content, if dictated by the source
    pub revpos: Option<u64>,
    temp: NamedTempFile,
}

impl PreparedAttachment {
    /// Location of the temp file (removed on drop unless committed)
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }
}

/// An attachment in any stage of its life.
#[derive(Debug)]
pub enum Attachment {
    /// Caller-supplied stream
    Unsaved(UnsavedAttachment),
    /// Hashed temp file
    Prepared(PreparedAttachment),
    /// Committed metadata row
    Saved(SavedAttachment),
}

impl Attachment {
    /// Attachment name
    pub fn name(&self) -> &str {
        match self {
            Attachment::Unsaved(a) => &a.name,
            Attachment::Prepared(a) => &a.name,
            Attachment::Saved(a) => &a.name,
        }
    }
}

impl From<UnsavedAttachment> for Attachment {
    fn from(a: UnsavedAttachment) -> Self {
        Attachment::Unsaved(a)
    }
}

impl From<PreparedAttachment> for Attachment {
    fn from(a: PreparedAttachment) -> Self {
        Attachment::Prepared(a)
    }
}

impl From<SavedAttachment> for Attachment {
    fn from(a: SavedAttachment) -> Self {
        Attachment::Saved(a)
    }
}

// ============================================================================
// BlobStore
// ============================================================================

/// Outcome of [`BlobStore::commit`]
#[derive(Debug, Clone)]
pub struct Committed {
    /// The inserted metadata row
    pub saved: SavedAttachment,
    /// True if this call created the blob file
    pub created_blob: bool,
}

/// Result of a purge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Blob files kept because a row references them
    pub retained: usize,
    /// Blob files deleted
    pub removed: usize,
}

/// Directory of content-addressed blob files
#[derive(Debug)]
pub struct BlobStore {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a blob directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let tmp_dir = dir.join(TMP_DIR_NAME);
        std::fs::create_dir_all(&tmp_dir)?;
        Ok(BlobStore { dir, tmp_dir })
    }

    /// Blob directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob file for `key`
    pub fn path_for(&self, key: &BlobKey) -> PathBuf {
        self.dir.join(key.to_hex())
    }

    /// True if a blob file for `key` exists
    pub fn contains(&self, key: &BlobKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Stream `attachment` into a temp file, hashing as it goes.
    ///
    /// # Errors
    ///
    /// `AttachmentNotSaved` on any I/O failure or when a declared plain
    /// length does not match the bytes read. The temp file is removed.
    pub fn prepare(&self, attachment: UnsavedAttachment) -> Result<PreparedAttachment> {
        let UnsavedAttachment {
            name,
            content_type,
            encoding,
            mut source,
            length,
            revpos,
        } = attachment;

        let not_saved =
            |e: io::Error| Error::attachment_not_saved(format!("attachment '{}': {}", name, e));

        let mut temp = NamedTempFile::new_in(&self.tmp_dir).map_err(not_saved)?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(not_saved(e)),
            };
            hasher.update(&buf[..n]);
            temp.write_all(&buf[..n]).map_err(not_saved)?;
            written += n as u64;
        }
        temp.flush().map_err(not_saved)?;

        let length = match (encoding, length) {
            (Encoding::Plain, Some(declared)) if declared != written => {
                return Err(Error::attachment_not_saved(format!(
                    "attachment '{}': declared length {} but read {} bytes",
                    name, declared, written
                )));
            }
            (Encoding::Plain, _) => written,
            (Encoding::Gzip, Some(declared)) => declared,
            (Encoding::Gzip, None) => {
                return Err(Error::attachment_not_saved(format!(
                    "attachment '{}': gzip attachments need a decoded length",
                    name
                )));
            }
        };

        let digest = hasher.finalize();
        let key = BlobKey::from_slice(digest.as_slice())?;
        debug!(target: "revstore::attachments", name = %name, key = %key, bytes = written, "Prepared attachment");

        Ok(PreparedAttachment {
            name,
            content_type,
            encoding,
            key,
            length,
            encoded_length: written,
            revpos,
            temp,
        })
    }

    /// Insert the metadata row for `prepared` on `sequence`, then move the
    /// temp file into place. `revpos` is used when the attachment does not
    /// carry its own.
    pub fn commit(
        &self,
        conn: &Connection,
        prepared: PreparedAttachment,
        sequence: u64,
        revpos: u64,
    ) -> Result<Committed> {
        let saved = SavedAttachment {
            name: prepared.name,
            sequence,
            key: prepared.key,
            content_type: prepared.content_type,
            encoding: prepared.encoding,
            length: prepared.length,
            encoded_length: prepared.encoded_length,
            revpos: prepared.revpos.unwrap_or(revpos),
        };
        // On failure `prepared.temp` is dropped here and the file removed.
        attachments::insert(conn, &saved)?;

        let dest = self.path_for(&saved.key);
        let created_blob = match prepared.temp.persist_noclobber(&dest) {
            Ok(_) => {
                debug!(target: "revstore::attachments", key = %saved.key, sequence, "Stored new blob");
                true
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists || dest.is_file() => {
                // `e.file` drops here, deleting the duplicate temp file.
                debug!(target: "revstore::attachments", key = %saved.key, sequence, "Blob already present");
                false
            }
            Err(e) => {
                error!(
                    target: "revstore::attachments",
                    key = %saved.key,
                    error = %e.error,
                    "Failed to move attachment into blob store"
                );
                return Err(Error::attachment_not_saved(format!(
                    "moving attachment '{}' into place: {}",
                    saved.name, e.error
                )));
            }
        };
        Ok(Committed { saved, created_blob })
    }

    /// Delete blob files created by a transaction that rolled back.
    pub fn discard(&self, keys: &[BlobKey]) {
        for key in keys {
            match std::fs::remove_file(self.path_for(key)) {
                Ok(()) => debug!(target: "revstore::attachments", key = %key, "Discarded blob of rolled back write"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    target: "revstore::attachments",
                    key = %key,
                    error = %e,
                    "Could not discard blob of rolled back write; compaction will remove it"
                ),
            }
        }
    }

    /// Open a blob for reading
    pub fn open_blob(&self, attachment: &SavedAttachment) -> Result<File> {
        File::open(self.path_for(&attachment.key)).map_err(|e| {
            Error::storage(format!(
                "blob {} for attachment '{}' unreadable: {}",
                attachment.key, attachment.name, e
            ))
        })
    }

    /// Read a blob's stored bytes
    pub fn read(&self, attachment: &SavedAttachment) -> Result<Vec<u8>> {
        let mut file = self.open_blob(attachment)?;
        let mut out = Vec::with_capacity(attachment.encoded_length as usize);
        file.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Delete every blob file that no metadata row references.
    ///
    /// Files whose names are not blob keys are left alone.
    pub fn purge(&self, conn: &Connection) -> Result<PurgeStats> {
        let referenced = attachments::referenced_keys(conn)?;
        let mut stats = PurgeStats::default();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(BlobKey::from_hex) else {
                continue;
            };
            if referenced.contains(&key) {
                stats.retained += 1;
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => stats.removed += 1,
                Err(e) => warn!(
                    target: "revstore::attachments",
                    key = %key,
                    error = %e,
                    "Could not delete unreferenced blob"
                ),
            }
        }
        info!(
            target: "revstore::attachments",
            retained = stats.retained,
            removed = stats.removed,
            "Purged blob store"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revs::{insert_doc_id, insert_revision, NewRevision};
    use crate::schema;
    use revstore_core::RevId;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BlobStore, Connection, u64) {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::open(temp.path().join("attachments")).unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        schema::configure(&conn, schema::Synchronous::Normal, false).unwrap();
        schema::migrate(&mut conn).unwrap();
        let doc = insert_doc_id(&conn, "doc1").unwrap();
        let rev = RevId::parse("1-a").unwrap();
        let seq = insert_revision(
            &conn,
            &NewRevision {
                doc_numeric_id: doc,
                rev_id: &rev,
                parent: None,
                current: true,
                deleted: false,
                available: true,
                json: Some(&b"{}"[..]),
            },
        )
        .unwrap();
        (temp, store, conn, seq)
    }

    fn blob_files(store: &BlobStore) -> usize {
        std::fs::read_dir(store.dir())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .count()
    }

    #[test]
    fn test_prepare_hashes_content() {
        let (_temp, store, _conn, _) = setup();
        let prepared = store
            .prepare(UnsavedAttachment::from_bytes("a.txt", "text/plain", b"hello".to_vec()))
            .unwrap();
        // sha1("hello")
        assert_eq!(
            prepared.key.to_hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(prepared.length, 5);
        assert_eq!(prepared.encoded_length, 5);
        assert!(prepared.temp_path().exists());
    }

    #[test]
    fn test_prepare_rejects_length_mismatch() {
        let (_temp, store, _conn, _) = setup();
        let mut unsaved = UnsavedAttachment::from_bytes("a.txt", "text/plain", b"hello".to_vec());
        unsaved.length = Some(99);
        let err = store.prepare(unsaved).unwrap_err();
        assert!(matches!(err, Error::AttachmentNotSaved(_)));
        assert_eq!(std::fs::read_dir(&store.tmp_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_moves_file_and_reads_back() {
        let (_temp, store, conn, seq) = setup();
        let prepared = store
            .prepare(UnsavedAttachment::from_bytes("a.txt", "text/plain", b"hello".to_vec()))
            .unwrap();
        let committed = store.commit(&conn, prepared, seq, 1).unwrap();
        assert!(committed.created_blob);
        let saved = committed.saved;
        assert!(store.contains(&saved.key));
        assert_eq!(store.read(&saved).unwrap(), b"hello");
        assert_eq!(saved.revpos, 1);
    }

    #[test]
    fn test_identical_content_is_stored_once() {
        let (_temp, store, conn, seq) = setup();
        let mut created = Vec::new();
        for name in ["a.txt", "b.txt"] {
            let prepared = store
                .prepare(UnsavedAttachment::from_bytes(name, "text/plain", b"same".to_vec()))
                .unwrap();
            created.push(store.commit(&conn, prepared, seq, 1).unwrap().created_blob);
        }
        assert_eq!(created, vec![true, false]);
        assert_eq!(blob_files(&store), 1);
        assert_eq!(attachments::for_sequence(&conn, seq).unwrap().len(), 2);
        assert_eq!(std::fs::read_dir(&store.tmp_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_row_insert_leaves_no_blob() {
        let (_temp, store, conn, _) = setup();
        let prepared = store
            .prepare(UnsavedAttachment::from_bytes("a.txt", "text/plain", b"orphan".to_vec()))
            .unwrap();
        let temp_path = prepared.temp_path().to_path_buf();
        // sequence 999 does not exist: foreign key violation
        assert!(store.commit(&conn, prepared, 999, 1).is_err());
        assert_eq!(blob_files(&store), 0);
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_discard_removes_created_blobs() {
        let (_temp, store, conn, seq) = setup();
        let prepared = store
            .prepare(UnsavedAttachment::from_bytes("a.txt", "text/plain", b"gone".to_vec()))
            .unwrap();
        let committed = store.commit(&conn, prepared, seq, 1).unwrap();
        assert_eq!(blob_files(&store), 1);

        store.discard(&[committed.saved.key]);
        assert_eq!(blob_files(&store), 0);
        // already gone is fine
        store.discard(&[committed.saved.key]);
    }

    #[test]
    fn test_purge_removes_unreferenced() {
        let (_temp, store, conn, seq) = setup();
        let prepared = store
            .prepare(UnsavedAttachment::from_bytes("a.txt", "text/plain", b"keep".to_vec()))
            .unwrap();
        store.commit(&conn, prepared, seq, 1).unwrap();
        std::fs::write(store.dir().join("0".repeat(40)), b"stray").unwrap();
        std::fs::write(store.dir().join("README"), b"not a blob").unwrap();

        let stats = store.purge(&conn).unwrap();
        assert_eq!(stats, PurgeStats { retained: 1, removed: 1 });
        assert!(store.dir().join("README").exists());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_key_is_sha1_of_content(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
                let (_temp, store, _conn, _) = setup();
                let expected = BlobKey::from_slice(Sha1::digest(&bytes).as_slice()).unwrap();
                let prepared = store
                    .prepare(UnsavedAttachment::from_bytes("p.bin", "application/octet-stream", bytes.clone()))
                    .unwrap();
                prop_assert_eq!(prepared.key, expected);
                prop_assert_eq!(prepared.length, bytes.len() as u64);
                prop_assert_eq!(std::fs::read(prepared.temp_path()).unwrap(), bytes);
            }
        }
    }
}
