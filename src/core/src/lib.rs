//! Core primitives for the Plasma Cash exit game.
//!
//! This crate provides the building blocks the exit game validates claims
//! with: the fixed-depth Sparse Merkle Tree that operator blocks commit to,
//! its inclusion and non-inclusion proofs, and the canonical coin transfer
//! record together with its signature recovery.

pub mod errors;
pub mod proofs;
pub mod smt;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use errors::CoreError;
pub use proofs::{Proof, DEFAULT_LEAF};
pub use smt::SparseMerkleTree;
pub use transaction::Transaction;
pub use types::{Address, Amount, AssetMode, AssetRef, BlockNumber, Hash, Slot, Timestamp};
