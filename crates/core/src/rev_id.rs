//! Revision identifiers
//!
//! A revision id has the shape `<generation>-<suffix>`. The generation is a
//! positive integer counting edits from the document's first revision; the
//! suffix is an opaque string. Ordering is CouchDB-compatible: higher
//! generation wins, and equal generations are broken by comparing the
//! suffixes as strings (byte order, never numerically).

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Highest generation a revision id may carry. Generations are stored in
/// signed 64-bit SQLite columns.
pub const MAX_GENERATION: u64 = i64::MAX as u64;

/// Parsed revision id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevId {
    generation: u64,
    suffix: String,
}

impl RevId {
    /// Build a revision id from its parts.
    ///
    /// # Errors
    ///
    /// `MalformedRevisionId` if `generation` is zero or above
    /// [`MAX_GENERATION`], or `suffix` is empty.
    pub fn new(generation: u64, suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        if generation == 0 || generation > MAX_GENERATION || suffix.is_empty() {
            return Err(Error::MalformedRevisionId(format!("{}-{}", generation, suffix)));
        }
        Ok(RevId { generation, suffix })
    }

    /// Parse `N-hash`.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || Error::MalformedRevisionId(s.to_string());
        let (prefix, suffix) = s.split_once('-').ok_or_else(malformed)?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let generation: u64 = prefix.parse().map_err(|_| malformed())?;
        if generation == 0 || generation > MAX_GENERATION || suffix.is_empty() {
            return Err(malformed());
        }
        Ok(RevId {
            generation,
            suffix: suffix.to_string(),
        })
    }

    /// Generation of a revision id string without keeping the parsed value.
    pub fn generation_of(s: &str) -> Result<u64> {
        Self::parse(s).map(|r| r.generation)
    }

    /// First revision of a new document (generation 1, fresh suffix).
    pub fn first() -> Self {
        RevId {
            generation: 1,
            suffix: fresh_suffix(),
        }
    }

    /// Child revision id: generation + 1 with a fresh suffix.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if `self` is already at [`MAX_GENERATION`].
    pub fn next(&self) -> Result<Self> {
        let generation = self
            .generation
            .checked_add(1)
            .filter(|g| *g <= MAX_GENERATION)
            .ok_or_else(|| Error::illegal_argument(format!("revision {} has no successor generation", self)))?;
        Ok(RevId {
            generation,
            suffix: fresh_suffix(),
        })
    }

    /// Generation number
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Opaque suffix after the dash
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// True if `self` beats `other` in winner selection.
    pub fn wins_over(&self, other: &RevId) -> bool {
        self > other
    }
}

fn fresh_suffix() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Ord for RevId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.suffix.as_bytes().cmp(other.suffix.as_bytes()))
    }
}

impl PartialOrd for RevId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.suffix)
    }
}

impl FromStr for RevId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RevId::parse(s)
    }
}

impl Serialize for RevId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RevId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RevId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_valid() {
        let rev = RevId::parse("12-abc").unwrap();
        assert_eq!(rev.generation(), 12);
        assert_eq!(rev.suffix(), "abc");
        assert_eq!(rev.to_string(), "12-abc");
    }

    #[test]
    fn test_parse_keeps_dashes_in_suffix() {
        let rev = RevId::parse("3-a-b-c").unwrap();
        assert_eq!(rev.generation(), 3);
        assert_eq!(rev.suffix(), "a-b-c");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "abc", "-abc", "0-abc", "x-abc", "1-", "+1-abc", " 1-abc"] {
            let err = RevId::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::MalformedRevisionId(_)),
                "expected malformed for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_first_and_next() {
        let first = RevId::first();
        assert_eq!(first.generation(), 1);
        assert_eq!(first.suffix().len(), 32);

        let second = first.next().unwrap();
        assert_eq!(second.generation(), 2);
        assert_ne!(first.suffix(), second.suffix());
    }

    #[test]
    fn test_generation_upper_bound() {
        let top = RevId::parse(&format!("{}-a", MAX_GENERATION)).unwrap();
        assert!(matches!(top.next(), Err(Error::IllegalArgument(_))));

        for bad in [format!("{}-a", MAX_GENERATION + 1), format!("{}-a", u64::MAX)] {
            assert!(matches!(RevId::parse(&bad), Err(Error::MalformedRevisionId(_))));
        }
        assert!(RevId::new(u64::MAX, "a").is_err());
    }

    #[test]
    fn test_ordering_generation_first() {
        let low = RevId::parse("2-zzz").unwrap();
        let high = RevId::parse("10-aaa").unwrap();
        assert!(high.wins_over(&low));
    }

    #[test]
    fn test_ordering_suffix_is_string_compare() {
        // "9" > "10" as strings
        let a = RevId::parse("4-9").unwrap();
        let b = RevId::parse("4-10").unwrap();
        assert!(a.wins_over(&b));

        let d = RevId::parse("4-d").unwrap();
        let x = RevId::parse("4-x").unwrap();
        assert!(x.wins_over(&d));
    }

    #[test]
    fn test_serde_as_string() {
        let rev = RevId::parse("5-cafe").unwrap();
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"5-cafe\"");
        let back: RevId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);

        let bad: std::result::Result<RevId, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_next_increments_generation(generation in 1u64..1_000_000, suffix in "[a-f0-9]{1,32}") {
            let rev = RevId::new(generation, suffix).unwrap();
            prop_assert_eq!(rev.next().unwrap().generation(), rev.generation() + 1);
        }

        #[test]
        fn prop_display_parse_identity(generation in 1u64..1_000_000, suffix in "[a-z0-9-]{1,40}") {
            let rev = RevId::new(generation, suffix).unwrap();
            let parsed = RevId::parse(&rev.to_string()).unwrap();
            prop_assert_eq!(parsed, rev);
        }
    }
}
