//! SQLite helpers shared by the table modules

use revstore_core::{Error, Result};

/// Attach a short description of the failed step to a rusqlite error.
pub trait SqlContext<T> {
    /// Convert into [`Error::Storage`] prefixed with `what`
    fn context(self, what: &str) -> Result<T>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn context(self, what: &str) -> Result<T> {
        self.map_err(|e| Error::storage(format!("{}: {}", what, e)))
    }
}

/// `?,?,?` with `n` placeholders
pub fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Sequences are stored as SQLite INTEGER (i64).
pub(crate) fn seq_to_sql(sequence: u64) -> i64 {
    sequence as i64
}

pub(crate) fn seq_from_sql(value: i64) -> u64 {
    value as u64
}

/// Wrap a domain error so it can leave a rusqlite row-mapping closure.
pub(crate) fn conversion_error(column: usize, e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Blob, Box::new(e))
}
