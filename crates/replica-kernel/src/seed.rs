//! Hierarchical deterministic seeds
//!
//! A [`SeedTree`] node is a 32-byte Blake3 digest. Children are derived from
//! the parent digest plus an `(index, name)` key, so the same key always
//! yields the same child no matter which thread asks or in which order.

use crate::error::SeedError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

const ROOT_DOMAIN: &[u8] = b"replica.seed.root.v1";
const CHILD_DOMAIN: &[u8] = b"replica.seed.child.v1";

/// Node of a deterministic seed hierarchy
///
/// Immutable and cheap to clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedTree {
    digest: [u8; 32],
    depth: u32,
}

impl SeedTree {
    /// Create a root node from an integer seed
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ROOT_DOMAIN);
        hasher.update(&seed.to_le_bytes());
        Self {
            digest: *hasher.finalize().as_bytes(),
            depth: 0,
        }
    }

    /// Derive the child identified by `(index, name)`
    ///
    /// # Errors
    /// Returns [`SeedError::InvalidSeedIndex`] for negative indices.
    pub fn spawn(&self, index: i64, name: &str) -> Result<Self, SeedError> {
        let index = u64::try_from(index).map_err(|_| SeedError::InvalidSeedIndex {
            index,
            name: name.to_string(),
        })?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(CHILD_DOMAIN);
        hasher.update(&self.digest);
        hasher.update(&index.to_le_bytes());
        // length prefix keeps ("ab", "c") and ("a", "bc") style keys apart
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());

        Ok(Self {
            digest: *hasher.finalize().as_bytes(),
            depth: self.depth + 1,
        })
    }

    /// Single large integer summarizing this node
    #[inline]
    #[must_use]
    pub fn cumulative(&self) -> u128 {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.digest[..16]);
        u128::from_le_bytes(bytes)
    }

    /// Pseudo-random generator seeded from this node
    #[inline]
    #[must_use]
    pub fn rng(&self) -> StdRng {
        StdRng::from_seed(self.digest)
    }

    /// Distance from the root
    #[inline]
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Short hex form (first 8 bytes) for logs and reports
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.digest[..8])
    }
}

impl Default for SeedTree {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Display for SeedTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.short(), self.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn spawn_is_deterministic() {
        let root = SeedTree::new(42);
        let a = root.spawn(0, "R-A").unwrap();
        let b = root.spawn(0, "R-A").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cumulative(), b.cumulative());
    }

    #[test]
    fn children_differ_by_index_and_name() {
        let root = SeedTree::new(42);
        let a0 = root.spawn(0, "R-A").unwrap();
        let a1 = root.spawn(1, "R-A").unwrap();
        let b0 = root.spawn(0, "R-B").unwrap();
        assert_ne!(a0, a1);
        assert_ne!(a0, b0);
        assert_ne!(a1, b0);
    }

    #[test]
    fn spawn_independent_of_call_order() {
        let root = SeedTree::new(7);
        let first = root.spawn(3, "x").unwrap();
        let _ = root.spawn(1, "y").unwrap();
        let _ = root.spawn(2, "z").unwrap();
        assert_eq!(root.spawn(3, "x").unwrap(), first);
    }

    #[test]
    fn negative_index_rejected() {
        let root = SeedTree::new(1);
        let err = root.spawn(-1, "R-A").unwrap_err();
        assert!(matches!(err, SeedError::InvalidSeedIndex { index: -1, .. }));
    }

    #[test]
    fn name_length_prefix_separates_keys() {
        let root = SeedTree::new(1);
        assert_ne!(root.spawn(0, "ab").unwrap(), root.spawn(0, "a").unwrap());
        assert_ne!(root.spawn(0, "").unwrap(), root.spawn(0, "\0").unwrap());
    }

    #[test]
    fn rng_reproducible() {
        let node = SeedTree::new(9).spawn(2, "run").unwrap();
        let mut first = node.rng();
        let mut second = node.rng();
        for _ in 0..4 {
            assert_eq!(first.gen::<u64>(), second.gen::<u64>());
        }
    }

    #[test]
    fn depth_tracks_generations() {
        let root = SeedTree::new(0);
        let grandchild = root.spawn(0, "a").unwrap().spawn(5, "b").unwrap();
        assert_eq!(root.depth(), 0);
        assert_eq!(grandchild.depth(), 2);
    }
}
