//! Materialized Path Codec
//!
//! A materialized path is the ordered list of sibling ranks from the root down to
//! a node. The root is `[1]`. The text encoding joins ranks with `.` and is the
//! only format ever written to the `mpathN` columns, so decoding failures are
//! integrity errors.

pub mod columns;

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use columns::{MPathLayout, PathPredicate};

const SEPARATOR: char = '.';

/// Materialized path: one positive sibling rank per level, root first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MPath(Vec<u64>);

impl MPath {
    /// The root path `[1]`.
    pub fn root() -> Self {
        MPath(vec![1])
    }

    /// Build a path from raw ranks. Every rank must be positive.
    pub fn new(ranks: Vec<u64>) -> Result<Self, StorageError> {
        if ranks.is_empty() {
            return Err(StorageError::Codec("empty materialized path".to_string()));
        }
        if ranks.iter().any(|r| *r == 0) {
            return Err(StorageError::Codec(format!(
                "materialized path {:?} contains a zero rank",
                ranks
            )));
        }
        Ok(MPath(ranks))
    }

    pub fn ranks(&self) -> &[u64] {
        &self.0
    }

    /// Depth of the node, root is level 1.
    pub fn level(&self) -> usize {
        self.0.len()
    }

    /// Sibling rank, the last segment.
    pub fn rank(&self) -> u64 {
        self.0[self.0.len() - 1]
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Parent path, `None` for a top-level path.
    pub fn parent(&self) -> Option<MPath> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(MPath(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Proper ancestors, nearest first.
    pub fn ancestors(&self) -> Vec<MPath> {
        (1..self.0.len())
            .rev()
            .map(|len| MPath(self.0[..len].to_vec()))
            .collect()
    }

    /// Path of the child with the given rank.
    pub fn child(&self, rank: u64) -> MPath {
        let mut ranks = self.0.clone();
        ranks.push(rank);
        MPath(ranks)
    }

    /// True when `self` lies strictly below `other`.
    pub fn is_descendant_of(&self, other: &MPath) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }

    /// Re-root `self` from `from` onto `to`, keeping the relative suffix.
    pub fn rebase(&self, from: &MPath, to: &MPath) -> Option<MPath> {
        if self != from && !self.is_descendant_of(from) {
            return None;
        }
        let mut ranks = to.0.clone();
        ranks.extend_from_slice(&self.0[from.0.len()..]);
        Some(MPath(ranks))
    }

    /// Text encoding stored in the database.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 3);
        for (i, rank) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(&rank.to_string());
        }
        out
    }

    pub fn decode(encoded: &str) -> Result<Self, StorageError> {
        if encoded.is_empty() {
            return Err(StorageError::Codec("empty materialized path".to_string()));
        }
        let ranks = encoded
            .split(SEPARATOR)
            .map(|seg| {
                if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(StorageError::Codec(format!(
                        "malformed segment {:?} in {:?}",
                        seg, encoded
                    )));
                }
                seg.parse::<u64>().map_err(|e| {
                    StorageError::Codec(format!("segment {:?} in {:?}: {}", seg, encoded, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        MPath::new(ranks)
    }

    /// Stable digest of the encoding, backing the unique exact-path index.
    pub fn digest(&self) -> String {
        blake3::hash(self.encode().as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for MPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<MPath> for String {
    fn from(path: MPath) -> Self {
        path.encode()
    }
}

impl TryFrom<String> for MPath {
    type Error = StorageError;

    fn try_from(encoded: String) -> Result<Self, Self::Error> {
        MPath::decode(&encoded)
    }
}

/// Lowest free sibling rank given the ranks currently in use.
///
/// When there are fewer children than the highest rank, a freed slot exists at or
/// below the child count and the lowest one is returned. Otherwise the next rank
/// after the maximum is allocated.
pub fn first_available_rank(ranks: &[u64]) -> u64 {
    if ranks.is_empty() {
        return 1;
    }
    let count = ranks.len() as u64;
    let max = ranks.iter().copied().max().unwrap_or(0);
    if count < max {
        let mut used: Vec<u64> = ranks.iter().copied().filter(|r| *r <= count).collect();
        used.sort_unstable();
        used.dedup();
        let mut expected = 1;
        for r in used {
            if r != expected {
                break;
            }
            expected += 1;
        }
        if expected <= count {
            return expected;
        }
    }
    max + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode() {
        let p = MPath::new(vec![1, 12, 3]).unwrap();
        assert_eq!(p.encode(), "1.12.3");
        assert_eq!(MPath::decode("1.12.3").unwrap(), p);
        assert_eq!(MPath::root().encode(), "1");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for bad in ["", ".", "1..2", "1.a", "1.-2", "1.0", "1.2."] {
            assert!(MPath::decode(bad).is_err(), "{:?} should not decode", bad);
        }
    }

    #[test]
    fn test_parent_and_ancestors() {
        let p = MPath::new(vec![1, 4, 2, 9]).unwrap();
        assert_eq!(p.level(), 4);
        assert_eq!(p.rank(), 9);
        assert_eq!(p.parent().unwrap().encode(), "1.4.2");
        let ancestors: Vec<String> = p.ancestors().iter().map(|a| a.encode()).collect();
        assert_eq!(ancestors, vec!["1.4.2", "1.4", "1"]);
        assert!(MPath::root().parent().is_none());
        assert!(MPath::root().ancestors().is_empty());
    }

    #[test]
    fn test_descendant_is_not_textual_prefix() {
        let a = MPath::new(vec![1, 1]).unwrap();
        let b = MPath::new(vec![1, 12, 3]).unwrap();
        assert!(!b.is_descendant_of(&a));
        assert!(b.is_descendant_of(&MPath::root()));
        assert!(!a.is_descendant_of(&a));
    }

    #[test]
    fn test_rebase() {
        let from = MPath::new(vec![1, 2]).unwrap();
        let to = MPath::new(vec![1, 5, 1]).unwrap();
        let node = MPath::new(vec![1, 2, 7, 3]).unwrap();
        assert_eq!(node.rebase(&from, &to).unwrap().encode(), "1.5.1.7.3");
        assert_eq!(from.rebase(&from, &to).unwrap(), to);
        assert!(MPath::new(vec![1, 3]).unwrap().rebase(&from, &to).is_none());
    }

    #[test]
    fn test_first_available_rank() {
        assert_eq!(first_available_rank(&[]), 1);
        assert_eq!(first_available_rank(&[1, 2, 3]), 4);
        assert_eq!(first_available_rank(&[1, 3]), 2);
        assert_eq!(first_available_rank(&[2, 3]), 1);
        assert_eq!(first_available_rank(&[1, 2, 7]), 3);
        assert_eq!(first_available_rank(&[5]), 1);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(ranks in proptest::collection::vec(1u64..100_000, 1..40)) {
            let p = MPath::new(ranks.clone()).unwrap();
            let decoded = MPath::decode(&p.encode()).unwrap();
            prop_assert_eq!(decoded.ranks(), &ranks[..]);
        }

        #[test]
        fn prop_ancestors_are_proper_prefixes(ranks in proptest::collection::vec(1u64..1000, 1..20)) {
            let p = MPath::new(ranks).unwrap();
            for a in p.ancestors() {
                prop_assert!(p.is_descendant_of(&a));
            }
            prop_assert_eq!(p.ancestors().len(), p.level() - 1);
        }

        #[test]
        fn prop_allocated_rank_is_free(ranks in proptest::collection::btree_set(1u64..50, 0..30)) {
            let ranks: Vec<u64> = ranks.into_iter().collect();
            let next = first_available_rank(&ranks);
            prop_assert!(!ranks.contains(&next));
            prop_assert!(next <= ranks.iter().copied().max().unwrap_or(0) + 1);
        }
    }
}
