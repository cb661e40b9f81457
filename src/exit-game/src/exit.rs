//! Exit and challenge records, and the evidence used to create them.

use crate::events::ChallengeKind;
use plasma_core::{Address, Amount, BlockNumber, Hash, Proof, Slot, Timestamp, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an exit, unique for the lifetime of a game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExitId(pub u64);

impl fmt::Display for ExitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit#{}", self.0)
    }
}

/// Processing order of exits. Lower sorts first.
///
/// Exits are ordered by the block of the exiting transaction; at the same
/// height a deposit exit sorts before an exit out of a child block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExitPriority {
    /// Block of the exiting transaction
    pub exit_block: BlockNumber,
    /// 0 for deposit exits, 1 otherwise
    pub origin: u8,
    /// The exiting coin
    pub slot: Slot,
}

impl ExitPriority {
    /// Computes the priority of an exit.
    pub fn new(slot: Slot, prev_block: BlockNumber, exit_block: BlockNumber) -> Self {
        Self {
            exit_block,
            origin: if prev_block == 0 { 0 } else { 1 },
            slot,
        }
    }
}

/// A pending counter-claim against an exit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Hash of the cited transaction; identifies the challenge within its exit
    pub tx_hash: Hash,
    /// The exit being challenged
    pub exit_id: ExitId,
    /// Block the cited transaction is included in
    pub challenging_block: BlockNumber,
    /// Owner who must sign a later spend to answer the challenge, if any can
    pub implicated_owner: Option<Address>,
    /// Who raised the challenge
    pub challenger: Address,
    /// Bond locked by the challenger
    pub bond: Amount,
    /// When the challenge was raised
    pub created_at: Timestamp,
    /// How the exit was challenged
    pub kind: ChallengeKind,
}

/// An exit in progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub id: ExitId,
    pub slot: Slot,
    /// Owner named by the exiting transaction
    pub exitor: Address,
    /// Owner named by the parent transaction
    pub prev_owner: Address,
    /// Hash of the parent transaction, when one was proven
    pub prev_tx_hash: Option<Hash>,
    pub prev_block: BlockNumber,
    pub exit_block: BlockNumber,
    pub priority: ExitPriority,
    /// Bond locked by the exitor
    pub bond: Amount,
    pub created_at: Timestamp,
    /// Challenges ever raised against this exit
    pub challenge_count: u64,
    /// Unanswered challenges in registration order
    pub challenges: Vec<Challenge>,
    /// True if the parent was claimed rather than proven
    pub optimistic: bool,
}

impl Exit {
    /// Returns true for exits of a coin straight out of its deposit.
    pub fn is_deposit_exit(&self) -> bool {
        self.prev_block == 0
    }

    /// Returns the challenge citing `tx_hash`, if one is pending.
    pub fn challenge(&self, tx_hash: Hash) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.tx_hash == tx_hash)
    }
}

/// A signed transaction claimed to be included in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub block: BlockNumber,
    pub tx: Transaction,
    pub proof: Proof,
    pub signature: Vec<u8>,
}

/// The parent of a transaction cited in a challenge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub block: BlockNumber,
    pub tx: Transaction,
    pub proof: Proof,
}

/// Arguments of a regular exit.
///
/// `prev_tx` and `prev_proof` are ignored for deposit exits (`prev_block == 0`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRequest {
    pub slot: Slot,
    pub prev_tx: Option<Transaction>,
    pub exit_tx: Transaction,
    pub prev_proof: Proof,
    pub exit_proof: Proof,
    /// Signature over the exiting transaction
    pub signature: Vec<u8>,
    pub prev_block: BlockNumber,
    pub exit_block: BlockNumber,
}

/// Arguments of an exit whose parent is claimed but not proven.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticExitRequest {
    pub slot: Slot,
    pub exit_tx: Transaction,
    pub exit_proof: Proof,
    pub signature: Vec<u8>,
    pub exit_block: BlockNumber,
}

/// How a matured exit was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The coin now belongs to the exitor on the root chain
    Finalized { owner: Address },
    /// The exit was discarded and its bond paid to `rewarded`
    Invalidated { rewarded: Address },
}
