//! Merkle proof implementation for the Plasma Cash sparse Merkle tree.
//!
//! A proof carries one bit per tree level and the sibling hashes for the levels
//! whose bit is set. Levels whose bit is clear use the default node of that
//! level, which keeps proofs for sparse trees short.
//!
//! Wire format: an 8-byte big-endian bitmask (bit `i` describes the sibling at
//! level `i`, level 0 being the leaves) followed by the present siblings,
//! 32 bytes each, in leaf-to-root order.

use crate::errors::CoreError;
use crate::types::{Hash, Slot};
use byteorder::{BigEndian, ByteOrder};
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The maximum (and default) depth of the tree.
pub const MAX_DEPTH: u8 = 64;

lazy_static! {
    /// Default node for each level of an empty subtree, from the leaf level
    /// (`DEFAULT_NODES[0]`) up to the empty root of a full-depth tree.
    pub static ref DEFAULT_NODES: Vec<Hash> = {
        let mut nodes = Vec::with_capacity(MAX_DEPTH as usize + 1);
        nodes.push(Hash::from(keccak256([0u8; 32])));
        for level in 1..=MAX_DEPTH as usize {
            let below = nodes[level - 1];
            nodes.push(hash_pair(&below, &below));
        }
        nodes
    };

    /// The leaf value of an absent slot.
    pub static ref DEFAULT_LEAF: Hash = DEFAULT_NODES[0];
}

/// Hashes two child nodes into their parent.
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    Hash::from(keccak256(buf))
}

/// Returns the default node at `level`.
pub fn default_node(level: u8) -> Hash {
    DEFAULT_NODES[level as usize]
}

/// Checks that a tree of `depth` levels is supported.
pub fn check_depth(depth: u8) -> Result<(), CoreError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(CoreError::InvalidDepth(depth));
    }
    Ok(())
}

/// Checks that `depth` is supported and `slot` fits in a tree of that depth.
pub fn check_slot(depth: u8, slot: Slot) -> Result<(), CoreError> {
    check_depth(depth)?;
    if depth < MAX_DEPTH && slot >> depth != 0 {
        return Err(CoreError::SlotOutOfRange { slot, depth });
    }
    Ok(())
}

/// A Merkle proof for one slot of a sparse Merkle tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Bit `i` is set when the sibling at level `i` is carried in `siblings`
    pub bitmask: u64,
    /// The non-default sibling hashes, leaf level first
    pub siblings: Vec<Hash>,
}

impl Proof {
    /// Creates a new Merkle proof.
    pub fn new(bitmask: u64, siblings: Vec<Hash>) -> Self {
        Self { bitmask, siblings }
    }

    /// A proof where every sibling is a default node.
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    /// Serializes the proof into its wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 8];
        BigEndian::write_u64(&mut out, self.bitmask);
        for sibling in &self.siblings {
            out.extend_from_slice(sibling.as_bytes());
        }
        out
    }

    /// Parses a proof from its wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < 8 || (bytes.len() - 8) % 32 != 0 {
            return Err(CoreError::InvalidProofLength(bytes.len()));
        }

        let bitmask = BigEndian::read_u64(&bytes[..8]);
        let siblings: Vec<Hash> = bytes[8..].chunks(32).map(Hash::from_slice).collect();

        let declared = bitmask.count_ones() as usize;
        if declared != siblings.len() {
            return Err(CoreError::ProofBitmaskMismatch {
                declared,
                actual: siblings.len(),
            });
        }

        Ok(Self { bitmask, siblings })
    }

    /// Replays the proof from `leaf` at `slot` and returns the resulting root.
    pub fn compute_root(&self, depth: u8, slot: Slot, leaf: Hash) -> Result<Hash, CoreError> {
        check_slot(depth, slot)?;

        if depth < MAX_DEPTH && self.bitmask >> depth != 0 {
            return Err(CoreError::ProofBitmaskMismatch {
                declared: self.bitmask.count_ones() as usize,
                actual: self.siblings.len(),
            });
        }
        let declared = self.bitmask.count_ones() as usize;
        if declared != self.siblings.len() {
            return Err(CoreError::ProofBitmaskMismatch {
                declared,
                actual: self.siblings.len(),
            });
        }

        let mut siblings = self.siblings.iter();
        let mut index = slot;
        let mut current = leaf;

        for level in 0..depth {
            let sibling = if self.bitmask & (1u64 << level) != 0 {
                *siblings.next().ok_or(CoreError::ProofBitmaskMismatch {
                    declared,
                    actual: self.siblings.len(),
                })?
            } else {
                default_node(level)
            };

            current = if index % 2 == 0 {
                hash_pair(&current, &sibling)
            } else {
                hash_pair(&sibling, &current)
            };
            index >>= 1;
        }

        Ok(current)
    }

    /// Verifies that `leaf` sits at `slot` under `root`.
    ///
    /// Passing [`DEFAULT_LEAF`] turns this into a non-inclusion check: it holds
    /// only if the slot is empty in the committed tree.
    pub fn verify(&self, depth: u8, root: Hash, slot: Slot, leaf: Hash) -> bool {
        match self.compute_root(depth, slot, leaf) {
            Ok(computed) => computed == root,
            Err(e) => {
                tracing::debug!("Proof for slot {} rejected: {}", slot, e);
                false
            }
        }
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proof {{ bitmask: {:#018x}, siblings: {} hashes }}",
            self.bitmask,
            self.siblings.len()
        )
    }
}
