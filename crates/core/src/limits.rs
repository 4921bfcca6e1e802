//! Query limits
//!
//! SQLite caps the number of host parameters per statement. Multi-key
//! lookups (`revs_diff`, `documents_with_ids`) are chunked so a single
//! statement never binds more than the configured limit.

/// Default cap on bound parameters per statement
pub const DEFAULT_QUERY_PLACEHOLDER_LIMIT: usize = 500;

/// Smallest usable cap: one slot for the document id plus one key
pub const MIN_QUERY_PLACEHOLDER_LIMIT: usize = 2;

/// Default page size for the change feed when a caller passes zero
pub const DEFAULT_CHANGES_LIMIT: usize = 100;
