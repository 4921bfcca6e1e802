//! In-memory revision tree of one document
//!
//! The tree is a projection of `revs` rows, rebuilt on demand and never
//! written back. Nodes live in a flat arena indexed by position, with a
//! sequence -> index map and parent/child links stored as indices, so
//! traversals are iterative and depth is bounded only by memory.
//!
//! A document may own several disconnected trees (a forest) when
//! replication grafts a history with no locally known ancestor. Rows can
//! arrive in any order: a node whose parent has not been inserted yet is
//! kept as a root and adopted once the parent shows up.

use revstore_core::{Error, Result, RevId, Revision};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct Node {
    revision: Revision,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// All known revisions of one document
#[derive(Debug, Clone)]
pub struct RevisionTree {
    doc_id: String,
    nodes: Vec<Node>,
    by_sequence: HashMap<u64, usize>,
    /// Nodes whose parent sequence has not been inserted yet, keyed by that sequence
    waiting_for_parent: HashMap<u64, Vec<usize>>,
}

impl RevisionTree {
    /// Empty tree for `doc_id`
    pub fn new(doc_id: impl Into<String>) -> Self {
        RevisionTree {
            doc_id: doc_id.into(),
            nodes: Vec::new(),
            by_sequence: HashMap::new(),
            waiting_for_parent: HashMap::new(),
        }
    }

    /// Build a tree from stored rows, in any order
    pub fn from_revisions(
        doc_id: impl Into<String>,
        revisions: impl IntoIterator<Item = Revision>,
    ) -> Result<Self> {
        let mut tree = RevisionTree::new(doc_id);
        for revision in revisions {
            tree.insert(revision)?;
        }
        Ok(tree)
    }

    /// Document id
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Number of revisions
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no revision has been inserted
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a revision. Links it under its parent when the parent is known,
    /// otherwise it becomes a root.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for a revision of another document, a duplicate
    /// sequence, or a child whose generation is not its parent's plus one.
    pub fn insert(&mut self, revision: Revision) -> Result<()> {
        if revision.doc_id != self.doc_id {
            return Err(Error::illegal_argument(format!(
                "revision of '{}' inserted into tree of '{}'",
                revision.doc_id, self.doc_id
            )));
        }
        if self.by_sequence.contains_key(&revision.sequence) {
            return Err(Error::illegal_argument(format!(
                "sequence {} already in tree of '{}'",
                revision.sequence, self.doc_id
            )));
        }

        let parent_idx = match revision.parent {
            Some(parent_seq) => self.by_sequence.get(&parent_seq).copied(),
            None => None,
        };
        if let Some(p) = parent_idx {
            check_generation(&self.nodes[p].revision, &revision)?;
        }
        // Check orphans before mutating anything.
        let orphans = self
            .waiting_for_parent
            .get(&revision.sequence)
            .cloned()
            .unwrap_or_default();
        for &orphan in &orphans {
            check_generation(&revision, &self.nodes[orphan].revision)?;
        }

        let idx = self.nodes.len();
        let sequence = revision.sequence;
        if let (Some(parent_seq), None) = (revision.parent, parent_idx) {
            self.waiting_for_parent.entry(parent_seq).or_default().push(idx);
        }
        self.nodes.push(Node {
            revision,
            parent: parent_idx,
            children: Vec::new(),
        });
        self.by_sequence.insert(sequence, idx);
        if let Some(p) = parent_idx {
            self.nodes[p].children.push(idx);
        }

        self.waiting_for_parent.remove(&sequence);
        for orphan in orphans {
            self.nodes[orphan].parent = Some(idx);
            self.nodes[idx].children.push(orphan);
        }
        Ok(())
    }

    /// Revision by sequence
    pub fn get(&self, sequence: u64) -> Option<&Revision> {
        self.by_sequence
            .get(&sequence)
            .map(|&idx| &self.nodes[idx].revision)
    }

    /// Exact match on `(doc_id, rev_id)`. When the id occurs in more than
    /// one disconnected tree, the most recently inserted row is returned.
    pub fn lookup(&self, doc_id: &str, rev_id: &RevId) -> Option<&Revision> {
        if doc_id != self.doc_id {
            return None;
        }
        self.nodes
            .iter()
            .filter(|n| &n.revision.rev_id == rev_id)
            .map(|n| &n.revision)
            .max_by_key(|r| r.sequence)
    }

    /// Direct child of `parent_sequence` with id `rev_id`
    pub fn lookup_child(&self, parent_sequence: u64, rev_id: &RevId) -> Option<&Revision> {
        let &idx = self.by_sequence.get(&parent_sequence)?;
        self.nodes[idx]
            .children
            .iter()
            .map(|&c| &self.nodes[c].revision)
            .find(|r| &r.rev_id == rev_id)
    }

    /// Direct children of `sequence`, in insertion order
    pub fn children(&self, sequence: u64) -> Vec<&Revision> {
        match self.by_sequence.get(&sequence) {
            Some(&idx) => self.nodes[idx]
                .children
                .iter()
                .map(|&c| &self.nodes[c].revision)
                .collect(),
            None => Vec::new(),
        }
    }

    /// True if nothing has `sequence` as its parent
    pub fn is_leaf(&self, sequence: u64) -> bool {
        self.by_sequence
            .get(&sequence)
            .map(|&idx| self.nodes[idx].children.is_empty())
            .unwrap_or(false)
    }

    /// Revisions with no children, ordered by sequence
    pub fn leaves(&self) -> Vec<&Revision> {
        let mut leaves: Vec<&Revision> = self
            .nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| &n.revision)
            .collect();
        leaves.sort_by_key(|r| r.sequence);
        leaves
    }

    /// Leaves, optionally skipping tombstones
    pub fn leaf_revisions(&self, include_deleted: bool) -> Vec<&Revision> {
        self.leaves()
            .into_iter()
            .filter(|r| include_deleted || !r.deleted)
            .collect()
    }

    /// Revision ids of all leaves
    pub fn leaf_revision_ids(&self) -> BTreeSet<String> {
        self.leaves().iter().map(|r| r.rev_id.to_string()).collect()
    }

    /// Nodes with no linked parent, keyed by sequence
    pub fn roots(&self) -> BTreeMap<u64, &Revision> {
        self.nodes
            .iter()
            .filter(|n| n.parent.is_none())
            .map(|n| (n.revision.sequence, &n.revision))
            .collect()
    }

    /// Distance from the nearest root along the parent chain
    pub fn depth(&self, sequence: u64) -> Option<usize> {
        let mut idx = *self.by_sequence.get(&sequence)?;
        let mut depth = 0;
        while let Some(parent) = self.nodes[idx].parent {
            depth += 1;
            idx = parent;
        }
        Some(depth)
    }

    /// Revisions from `sequence` up to its root (leaf first). Empty if the
    /// sequence is unknown.
    pub fn path_to_root(&self, sequence: u64) -> Vec<&Revision> {
        let mut path = Vec::new();
        let mut cursor = self.by_sequence.get(&sequence).copied();
        while let Some(idx) = cursor {
            path.push(&self.nodes[idx].revision);
            cursor = self.nodes[idx].parent;
        }
        path
    }

    /// Revision ids from the root down to `sequence` (ascending generation)
    pub fn history(&self, sequence: u64) -> Vec<RevId> {
        let mut ids: Vec<RevId> = self
            .path_to_root(sequence)
            .into_iter()
            .map(|r| r.rev_id.clone())
            .collect();
        ids.reverse();
        ids
    }

    /// More than one leaf, deleted or not
    pub fn has_conflicts(&self) -> bool {
        self.nodes.iter().filter(|n| n.children.is_empty()).count() > 1
    }

    /// The leaf flagged `current`
    pub fn current_revision(&self) -> Option<&Revision> {
        self.nodes
            .iter()
            .filter(|n| n.children.is_empty() && n.revision.current)
            .map(|n| &n.revision)
            .max_by_key(|r| r.sequence)
    }

    /// Every revision in sequence order
    pub fn revisions(&self) -> Vec<&Revision> {
        let mut all: Vec<&Revision> = self.nodes.iter().map(|n| &n.revision).collect();
        all.sort_by_key(|r| r.sequence);
        all
    }
}

fn check_generation(parent: &Revision, child: &Revision) -> Result<()> {
    if child.generation() != parent.generation() + 1 {
        return Err(Error::illegal_argument(format!(
            "revision {} cannot be a child of {}: generations must increase by one",
            child.rev_id, parent.rev_id
        )));
    }
    Ok(())
}
