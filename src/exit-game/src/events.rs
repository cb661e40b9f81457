//! Notifications published by the exit game.

use plasma_core::{Address, Amount, BlockNumber, Hash, Slot};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// The four ways an exit can be challenged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// The exitor spent the coin after the exiting transaction
    After,
    /// The parent's owner spent the coin between parent and exit
    Between,
    /// Older history may lead to a different rightful owner
    Before,
    /// The exit's parent is not what the exit claims
    WrongParent,
}

impl ChallengeKind {
    /// Returns a short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::After => "after",
            ChallengeKind::Between => "between",
            ChallengeKind::Before => "before",
            ChallengeKind::WrongParent => "wrong_parent",
        }
    }
}

/// An observable state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A coin was deposited
    Deposit {
        slot: Slot,
        owner: Address,
        block: BlockNumber,
        denomination: Amount,
    },
    /// A child block root was recorded
    BlockSubmitted { number: BlockNumber, root: Hash },
    /// An exit was started
    ExitStarted { slot: Slot, exitor: Address },
    /// An exit was challenged
    Challenged {
        slot: Slot,
        challenger: Address,
        kind: ChallengeKind,
        tx_hash: Hash,
    },
    /// A pending challenge was answered
    ChallengeResponded { slot: Slot, tx_hash: Hash },
    /// An exit was cancelled by its exitor
    ExitCancelled { slot: Slot, owner: Address },
    /// An exit matured unchallenged
    ExitFinalized { slot: Slot, owner: Address },
    /// An exit was shown to be invalid
    ExitInvalidated { slot: Slot, exitor: Address },
    /// A bond was returned to its owner
    BondFreed { owner: Address, amount: Amount },
    /// A bond was forfeited to another account
    BondSlashed { from: Address, to: Address, amount: Amount },
    /// An exited coin was withdrawn
    Withdrew {
        slot: Slot,
        owner: Address,
        denomination: Amount,
        to_operator: bool,
    },
    /// Withdrawable bond balance was withdrawn
    WithdrewBonds { from: Address, amount: Amount },
}

/// Receives published events, in order.
pub trait EventSink: Send {
    /// Publishes one event.
    fn publish(&mut self, event: Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&mut self, _event: Event) {}
}

impl EventSink for Vec<Event> {
    fn publish(&mut self, event: Event) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<Event> {
    fn publish(&mut self, event: Event) {
        if self.send(event).is_err() {
            warn!("Event receiver dropped");
        }
    }
}
