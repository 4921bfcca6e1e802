//! Process-wide registry of open databases
//!
//! Opening the same canonical path twice returns the same `Arc<Database>`,
//! so only one SQLite connection and one lock file exist per store.
//! Entries are weak; a store leaves the registry when its last `Arc` drops
//! or when it is closed.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Weak;

use super::Database;

/// Global registry of open databases (canonical path -> weak reference)
pub static OPEN_DATABASES: Lazy<Mutex<HashMap<PathBuf, Weak<Database>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Drop the entry for `path` unless it points at a different live instance.
pub(crate) fn forget(path: &Path, instance: *const Database) {
    let mut registry = OPEN_DATABASES.lock();
    let stale = match registry.get(path) {
        Some(weak) => weak.as_ptr() == instance || weak.strong_count() == 0,
        None => false,
    };
    if stale {
        registry.remove(path);
    }
}
