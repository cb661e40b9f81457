//! Sparse Merkle Tree over coin slots.
//!
//! Every child block commits to one of these: leaf `slot` holds the hash of
//! the transaction that moved coin `slot` in that block, and every other leaf
//! is the default leaf. Only the non-default nodes are stored.

use crate::errors::CoreError;
use crate::proofs::{check_depth, check_slot, default_node, hash_pair, Proof, MAX_DEPTH};
use crate::types::{Hash, Slot};
use std::collections::BTreeMap;
use std::fmt;

/// A fixed-depth Sparse Merkle Tree keyed by slot.
#[derive(Clone)]
pub struct SparseMerkleTree {
    /// Number of hashing levels between a leaf and the root
    depth: u8,
    /// Non-default nodes per level; `levels[0]` holds the leaves and
    /// `levels[depth]` at most the root
    levels: Vec<BTreeMap<u64, Hash>>,
    /// The root hash of the tree
    root: Hash,
}

impl SparseMerkleTree {
    /// Builds a full-depth tree from a sparse set of `(slot, leaf hash)` pairs.
    pub fn new<I>(leaves: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (Slot, Hash)>,
    {
        Self::with_depth(MAX_DEPTH, leaves)
    }

    /// Builds a tree of the given depth from a sparse set of leaves.
    ///
    /// Later entries for the same slot replace earlier ones.
    pub fn with_depth<I>(depth: u8, leaves: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (Slot, Hash)>,
    {
        check_depth(depth)?;

        let mut level0 = BTreeMap::new();
        for (slot, leaf) in leaves {
            check_slot(depth, slot)?;
            level0.insert(slot, leaf);
        }

        let mut levels = Vec::with_capacity(depth as usize + 1);
        levels.push(level0);

        for level in 0..depth {
            let current = &levels[level as usize];
            let mut parents = BTreeMap::new();

            for (&index, &node) in current {
                let sibling_index = index ^ 1;
                if index % 2 == 1 && current.contains_key(&sibling_index) {
                    // Already folded together with its left sibling.
                    continue;
                }

                let sibling = current
                    .get(&sibling_index)
                    .copied()
                    .unwrap_or_else(|| default_node(level));

                let parent = if index % 2 == 0 {
                    hash_pair(&node, &sibling)
                } else {
                    hash_pair(&sibling, &node)
                };
                parents.insert(index >> 1, parent);
            }

            levels.push(parents);
        }

        let root = levels[depth as usize]
            .get(&0)
            .copied()
            .unwrap_or_else(|| default_node(depth));

        Ok(Self { depth, levels, root })
    }

    /// Returns the root hash of the tree.
    pub fn root(&self) -> Hash {
        self.root
    }

    /// Returns the depth of the tree.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Returns the number of non-default leaves.
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    /// Returns true when the tree commits to no leaves at all.
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Returns the leaf stored at `slot`, if any.
    pub fn get(&self, slot: Slot) -> Option<Hash> {
        self.levels[0].get(&slot).copied()
    }

    /// Generates a proof for `slot`.
    ///
    /// For a slot that holds no leaf this is a non-inclusion proof: it verifies
    /// against the root only together with the default leaf.
    pub fn create_proof(&self, slot: Slot) -> Result<Proof, CoreError> {
        check_slot(self.depth, slot)?;

        let mut bitmask = 0u64;
        let mut siblings = Vec::new();
        let mut index = slot;

        for level in 0..self.depth {
            if let Some(sibling) = self.levels[level as usize].get(&(index ^ 1)) {
                bitmask |= 1u64 << level;
                siblings.push(*sibling);
            }
            index >>= 1;
        }

        Ok(Proof::new(bitmask, siblings))
    }

    /// Verifies `proof` for `leaf` at `slot` against this tree's root.
    pub fn verify(&self, proof: &Proof, slot: Slot, leaf: Hash) -> bool {
        proof.verify(self.depth, self.root, slot, leaf)
    }
}

impl fmt::Debug for SparseMerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseMerkleTree")
            .field("depth", &self.depth)
            .field("root", &self.root)
            .field("leaves", &self.len())
            .finish()
    }
}

impl fmt::Display for SparseMerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SMT {{ depth: {}, root: {:?}, leaves: {} }}",
            self.depth,
            self.root,
            self.len()
        )
    }
}
