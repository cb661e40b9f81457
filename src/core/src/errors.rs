//! Error types for the core crate.

use thiserror::Error;

/// Errors that can occur in the core crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Error when a transaction record cannot be decoded.
    #[error("Invalid transaction encoding: {0}")]
    InvalidEncoding(String),

    /// Error when a transaction carries a denomination other than one.
    #[error("Invalid denomination: expected 1, got {0}")]
    InvalidDenomination(u64),

    /// Error when a signature is malformed or cannot be recovered.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Error when a serialized proof has an impossible length.
    #[error("Invalid proof length: {0} bytes")]
    InvalidProofLength(usize),

    /// Error when the proof bitmask disagrees with the attached siblings.
    #[error("Proof bitmask mismatch: bitmask declares {declared} siblings, proof carries {actual}")]
    ProofBitmaskMismatch {
        /// The number of siblings the bitmask declares
        declared: usize,
        /// The number of siblings actually present
        actual: usize,
    },

    /// Error when a slot does not fit in the tree.
    #[error("Slot {slot} out of range for a tree of depth {depth}")]
    SlotOutOfRange {
        /// The offending slot
        slot: u64,
        /// The depth of the tree
        depth: u8,
    },

    /// Error when a tree depth is not supported.
    #[error("Invalid tree depth: {0} (expected 1..=64)")]
    InvalidDepth(u8),
}
