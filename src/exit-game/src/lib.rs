//! Exit game for a Plasma Cash root chain.
//!
//! This crate holds the root-chain side of the protocol: the ledger of
//! committed blocks, the registry of deposited coins, bond custody, and the
//! exit and challenge state machine that decides who may take a coin back out
//! of the child chain.

pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod exit;
pub mod game;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod vault;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ExitGameConfig;
pub use errors::ExitGameError;
pub use events::{ChallengeKind, Event, EventSink, NullSink};
pub use exit::{Challenge, Evidence, Exit, ExitId, ExitOutcome, ExitPriority, ExitRequest, OptimisticExitRequest, ParentLink};
pub use game::ExitGame;
pub use ledger::BlockLedger;
pub use registry::{Coin, CoinRegistry, CoinState};
pub use snapshot::{Snapshot, SnapshotStore};
pub use vault::{Balance, BondOp, BondVault};
