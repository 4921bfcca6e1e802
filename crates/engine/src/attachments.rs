//! Attaching blobs to a freshly inserted revision

use crate::transaction::Transaction;
use revstore_core::{Error, Result};
use revstore_storage::{attachments, Attachment};
use std::collections::BTreeSet;
use tracing::debug;

impl Transaction<'_> {
    /// Give the revision at `sequence` its attachments.
    ///
    /// Everything the parent had is copied forward except names listed in
    /// `removed` or replaced by one of `incoming`. Prepared attachments are
    /// committed with `revpos = generation`; saved attachments from any
    /// revision are copied by `(sequence, name)`.
    pub(crate) fn apply_attachments(
        &mut self,
        parent: Option<u64>,
        sequence: u64,
        generation: u64,
        incoming: Vec<Attachment>,
        removed: &BTreeSet<String>,
    ) -> Result<()> {
        let conn = self.connection();
        let mut names = BTreeSet::new();
        for attachment in &incoming {
            if !names.insert(attachment.name().to_string()) {
                return Err(Error::illegal_argument(format!(
                    "attachment '{}' given more than once",
                    attachment.name()
                )));
            }
        }

        if let Some(parent) = parent {
            for existing in attachments::for_sequence(conn, parent)? {
                if removed.contains(&existing.name) || names.contains(&existing.name) {
                    continue;
                }
                attachments::copy_forward(conn, parent, sequence, Some(&existing.name))?;
            }
        }

        for attachment in incoming {
            match attachment {
                Attachment::Unsaved(unsaved) => {
                    return Err(Error::illegal_argument(format!(
                        "attachment '{}' must be prepared before the transaction starts",
                        unsaved.name
                    )));
                }
                Attachment::Prepared(prepared) => {
                    self.commit_attachment(prepared, sequence, generation)?;
                }
                Attachment::Saved(saved) => {
                    if !self.blobs().contains(&saved.key) {
                        return Err(Error::attachment_not_saved(format!(
                            "blob {} for attachment '{}' is missing",
                            saved.key, saved.name
                        )));
                    }
                    attachments::copy_forward(conn, saved.sequence, sequence, Some(&saved.name))?;
                }
            }
        }
        debug!(target: "revstore::attachments", sequence, "Applied attachments");
        Ok(())
    }
}
