//! Error types for the exit game.

use crate::registry::CoinState;
use plasma_core::{Address, Amount, BlockNumber, CoreError, Hash, Slot, Timestamp};
use thiserror::Error;

/// Errors that can occur while driving the exit game.
///
/// Every error aborts the whole call: no coin, exit, challenge or bond record
/// is modified and no event is published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExitGameError {
    /// Error when a signature does not recover to the required owner.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Error when a transaction is not included where it claims to be.
    #[error("Invalid Merkle proof for slot {slot} in block {block}")]
    InvalidMerkleProof {
        /// The slot being proven
        slot: Slot,
        /// The block the proof was checked against
        block: BlockNumber,
    },

    /// Error when a block number is unknown, out of order or on the wrong range.
    #[error("Stale or future block {block}: {reason}")]
    StaleOrFutureBlock {
        /// The offending block number
        block: BlockNumber,
        /// Why the block was rejected
        reason: String,
    },

    /// Error when a coin is not in the state an operation requires.
    #[error("Coin {slot} is {actual:?}, expected {expected:?}")]
    CoinNotInExpectedState {
        /// The coin
        slot: Slot,
        /// The state the operation requires
        expected: CoinState,
        /// The state the coin is in
        actual: CoinState,
    },

    /// Error when an exit is started on a coin that is already exiting.
    #[error("Coin {0} is already exiting")]
    AlreadyExiting(Slot),

    /// Error when no coin is registered at a slot.
    #[error("Unknown coin: {0}")]
    UnknownCoin(Slot),

    /// Error when a deposit targets a slot that is already registered.
    #[error("Slot {0} is already registered")]
    SlotAlreadyRegistered(Slot),

    /// Error when no deposit block number is left before the next child block.
    #[error("No deposit block left before child block boundary (next would be {0})")]
    DepositRangeExhausted(BlockNumber),

    /// Error when the attached value or a bonded balance is too small.
    #[error("Insufficient bond: required {required}, available {available}")]
    InsufficientBond {
        /// The amount required
        required: Amount,
        /// The amount available
        available: Amount,
    },

    /// Error when a challenge or response arrives after its deadline.
    #[error("Window expired at {deadline} (now {now})")]
    WindowExpired {
        /// The deadline that passed
        deadline: Timestamp,
        /// The current time
        now: Timestamp,
    },

    /// Error when an exit is finalized before it matures.
    #[error("Window not elapsed: exit matures at {matures_at} (now {now})")]
    WindowNotElapsed {
        /// When the exit matures
        matures_at: Timestamp,
        /// The current time
        now: Timestamp,
    },

    /// Error when the caller may not perform an operation.
    #[error("Unauthorized caller {caller:?}, expected {expected:?}")]
    UnauthorizedCaller {
        /// The caller
        caller: Address,
        /// The only address allowed to make the call
        expected: Address,
    },

    /// Error when an exit still has challenges waiting for a response.
    #[error("Exit of coin {slot} has {count} unresolved challenges")]
    UnresolvedChallengesRemain {
        /// The coin
        slot: Slot,
        /// The number of pending challenges
        count: usize,
    },

    /// Error when the exiting transaction was not signed by the parent's owner.
    #[error("Owner chain broken: parent owned by {expected:?}, exit signed by {signer:?}")]
    MismatchedOwnerChain {
        /// The owner named by the parent transaction
        expected: Address,
        /// The address that signed the exiting transaction
        signer: Address,
    },

    /// Error when a transaction does not fit the claim it is used for.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Error when a challenge cites history that agrees with the exit.
    #[error("Challenge on coin {0} does not contradict the exit")]
    ChallengeDoesNotContradict(Slot),

    /// Error when the same transaction is used to challenge an exit twice.
    #[error("Transaction {0:?} already challenges this exit")]
    DuplicateChallenge(Hash),

    /// Error when a response names a challenge that does not exist.
    #[error("No pending challenge for transaction {0:?}")]
    UnknownChallenge(Hash),

    /// Error when a core primitive rejects its input.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Error when the configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error when a snapshot cannot be written or read.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl ExitGameError {
    /// Maps a signature failure from the core crate onto the exit-game taxonomy.
    pub(crate) fn from_signature(error: CoreError) -> Self {
        match error {
            CoreError::InvalidSignature(msg) => ExitGameError::InvalidSignature(msg),
            other => ExitGameError::Core(other),
        }
    }
}
