//! Committed child blocks and deposit blocks.
//!
//! Child blocks take the block numbers that are multiples of the interval and
//! carry a sparse Merkle root. Deposits take the numbers in between and carry
//! the deposit transaction hash of the single coin they create, so an operator
//! can never publish a child block that shadows a deposit.

use crate::errors::ExitGameError;
use plasma_core::proofs::DEFAULT_LEAF;
use plasma_core::{BlockNumber, Hash, Proof, Slot, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A committed block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildBlock {
    /// The Merkle root, or the deposit transaction hash for deposit blocks
    pub root: Hash,
    /// When the block was recorded
    pub created_at: Timestamp,
}

/// Append-only record of block roots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockLedger {
    /// Spacing of child block numbers
    interval: u64,
    /// Depth of the committed trees
    depth: u8,
    /// Every recorded block by number
    blocks: BTreeMap<BlockNumber, ChildBlock>,
    /// The highest child block number
    last_child_block: BlockNumber,
    /// The highest deposit block number
    last_deposit_block: BlockNumber,
}

impl BlockLedger {
    /// Creates an empty ledger.
    pub fn new(interval: u64, depth: u8) -> Self {
        Self {
            interval,
            depth,
            blocks: BTreeMap::new(),
            last_child_block: 0,
            last_deposit_block: 0,
        }
    }

    /// Returns true if `number` lies in the deposit range.
    pub fn is_deposit_block(&self, number: BlockNumber) -> bool {
        number % self.interval != 0
    }

    /// Returns the highest recorded block of either kind.
    pub fn current_block(&self) -> BlockNumber {
        self.last_child_block.max(self.last_deposit_block)
    }

    /// Returns the root recorded at `number`.
    pub fn root_at(&self, number: BlockNumber) -> Option<Hash> {
        self.blocks.get(&number).map(|b| b.root)
    }

    /// Returns the spacing of child block numbers.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Returns the depth of the committed trees.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Checks that `root` may be recorded as child block `number`.
    fn check_submission(&self, number: BlockNumber, root: Hash) -> Result<(), ExitGameError> {
        if number == 0 || self.is_deposit_block(number) {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: number,
                reason: format!("child blocks are non-zero multiples of {}", self.interval),
            });
        }
        if number == self.last_child_block {
            // Once a later deposit exists only an identical root is accepted.
            let unchanged = self.root_at(number) == Some(root);
            if unchanged || self.last_deposit_block < number {
                return Ok(());
            }
            return Err(ExitGameError::StaleOrFutureBlock {
                block: number,
                reason: format!("deposit block {} recorded since", self.last_deposit_block),
            });
        }
        if number < self.last_child_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: number,
                reason: format!("last child block is {}", self.last_child_block),
            });
        }
        if number <= self.last_deposit_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: number,
                reason: format!("deposit block {} already recorded", self.last_deposit_block),
            });
        }
        Ok(())
    }

    /// Records a child block root.
    ///
    /// Resubmitting the latest child block number replaces its root until a
    /// deposit is recorded after it.
    pub fn submit_block(&mut self, number: BlockNumber, root: Hash, now: Timestamp) -> Result<(), ExitGameError> {
        self.check_submission(number, root)?;

        if self.blocks.contains_key(&number) {
            debug!("Overwriting root of child block {}", number);
        }
        self.blocks.insert(number, ChildBlock { root, created_at: now });
        self.last_child_block = number;

        info!("Recorded child block {} with root {:?}", number, root);
        Ok(())
    }

    /// Returns the block number the next deposit will take.
    pub fn next_deposit_block(&self) -> Result<BlockNumber, ExitGameError> {
        let next = self.current_block() + 1;
        if !self.is_deposit_block(next) {
            return Err(ExitGameError::DepositRangeExhausted(next));
        }
        Ok(next)
    }

    /// Records the deposit block for a new coin at `slot`.
    pub fn record_deposit(&mut self, slot: Slot, deposit_hash: Hash, now: Timestamp) -> Result<BlockNumber, ExitGameError> {
        let number = self.next_deposit_block()?;
        self.blocks.insert(number, ChildBlock { root: deposit_hash, created_at: now });
        self.last_deposit_block = number;

        debug!("Recorded deposit block {} for slot {}", number, slot);
        Ok(number)
    }

    /// Checks that `tx_hash` is the transaction of `slot` in block `number`.
    pub fn check_included(&self, slot: Slot, tx_hash: Hash, number: BlockNumber, proof: &Proof) -> Result<(), ExitGameError> {
        let block = self.known_block(number)?;

        let included = if self.is_deposit_block(number) {
            tx_hash == block.root
        } else {
            proof.verify(self.depth, block.root, slot, tx_hash)
        };

        if !included {
            return Err(ExitGameError::InvalidMerkleProof { slot, block: number });
        }
        Ok(())
    }

    /// Checks that `slot` did not move at all in child block `number`.
    pub fn check_absent(&self, slot: Slot, number: BlockNumber, proof: &Proof) -> Result<(), ExitGameError> {
        let block = self.known_block(number)?;

        if self.is_deposit_block(number) {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: number,
                reason: "deposit blocks always hold their coin".to_string(),
            });
        }
        if !proof.verify(self.depth, block.root, slot, *DEFAULT_LEAF) {
            return Err(ExitGameError::InvalidMerkleProof { slot, block: number });
        }
        Ok(())
    }

    fn known_block(&self, number: BlockNumber) -> Result<&ChildBlock, ExitGameError> {
        self.blocks.get(&number).ok_or_else(|| ExitGameError::StaleOrFutureBlock {
            block: number,
            reason: "no such block".to_string(),
        })
    }
}
