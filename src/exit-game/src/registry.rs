//! Registry of deposited coins.

use crate::errors::ExitGameError;
use crate::exit::ExitId;
use byteorder::{BigEndian, ByteOrder};
use ethers::utils::keccak256;
use plasma_core::{Address, AssetRef, BlockNumber, Slot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Lifecycle state of a coin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinState {
    /// Held in the child chain
    Deposited,
    /// An exit is in progress
    Exiting,
    /// The exit finalized and the asset awaits withdrawal
    Exited,
}

/// A deposited coin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// The coin's slot
    pub slot: Slot,
    /// The deposit block that created the coin
    pub deposit_block: BlockNumber,
    /// The depositor, replaced by the exitor once an exit finalizes
    pub owner: Address,
    /// Current lifecycle state
    pub state: CoinState,
    /// The live exit while the coin is exiting
    pub exit: Option<ExitId>,
    /// The asset the coin stands for
    pub asset: AssetRef,
}

impl Coin {
    /// Creates a freshly deposited coin.
    pub fn new(slot: Slot, deposit_block: BlockNumber, owner: Address, asset: AssetRef) -> Self {
        Self {
            slot,
            deposit_block,
            owner,
            state: CoinState::Deposited,
            exit: None,
            asset,
        }
    }

    /// Fails unless the coin is in `expected`.
    pub fn expect_state(&self, expected: CoinState) -> Result<(), ExitGameError> {
        if self.state != expected {
            return Err(ExitGameError::CoinNotInExpectedState {
                slot: self.slot,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}

/// All coins that have been deposited and not yet withdrawn.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoinRegistry {
    coins: HashMap<Slot, Coin>,
    /// Deposits ever made, used to derive fresh slots
    num_coins: u64,
}

impl CoinRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the slot the next deposit of `asset` by `owner` will take.
    ///
    /// The slot is the leading eight bytes of
    /// `keccak256(num_coins || owner || contract || uid)`, truncated to fit a
    /// tree of `depth` levels.
    pub fn derive_slot(&self, owner: Address, asset: &AssetRef, depth: u8) -> Slot {
        let mut preimage = Vec::with_capacity(8 + 20 + 20 + 32);
        preimage.extend_from_slice(&self.num_coins.to_be_bytes());
        preimage.extend_from_slice(owner.as_bytes());
        preimage.extend_from_slice(asset.contract.as_bytes());
        let mut uid = [0u8; 32];
        asset.uid.to_big_endian(&mut uid);
        preimage.extend_from_slice(&uid);

        let digest = keccak256(&preimage);
        let slot = BigEndian::read_u64(&digest[..8]);
        if depth >= 64 {
            slot
        } else {
            slot & ((1u64 << depth) - 1)
        }
    }

    /// Returns the number of deposits ever registered.
    pub fn num_coins(&self) -> u64 {
        self.num_coins
    }

    /// Returns the number of coins currently held.
    pub fn len(&self) -> usize {
        self.coins.len()
    }

    /// Returns true if no coins are held.
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Returns true if `slot` is taken.
    pub fn contains(&self, slot: Slot) -> bool {
        self.coins.contains_key(&slot)
    }

    /// Returns the state of the coin at `slot`.
    pub fn state_of(&self, slot: Slot) -> Option<CoinState> {
        self.coins.get(&slot).map(|c| c.state)
    }

    /// Returns the slots of every coin in `state`, in ascending order.
    pub fn slots_in_state(&self, state: CoinState) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.coins.values().filter(|c| c.state == state).map(|c| c.slot).collect();
        slots.sort_unstable();
        slots
    }

    /// Gets a coin.
    pub fn get(&self, slot: Slot) -> Result<&Coin, ExitGameError> {
        self.coins.get(&slot).ok_or(ExitGameError::UnknownCoin(slot))
    }

    /// Gets a coin for update.
    pub fn get_mut(&mut self, slot: Slot) -> Result<&mut Coin, ExitGameError> {
        self.coins.get_mut(&slot).ok_or(ExitGameError::UnknownCoin(slot))
    }

    /// Checks that `slot` is free for a new deposit.
    pub fn check_free(&self, slot: Slot) -> Result<(), ExitGameError> {
        if self.contains(slot) {
            return Err(ExitGameError::SlotAlreadyRegistered(slot));
        }
        Ok(())
    }

    /// Registers a new coin.
    pub fn insert(&mut self, coin: Coin) -> Result<(), ExitGameError> {
        self.check_free(coin.slot)?;
        debug!("Registered coin {} for {:?}", coin.slot, coin.owner);
        self.coins.insert(coin.slot, coin);
        self.num_coins += 1;
        Ok(())
    }

    /// Removes a coin, returning it.
    pub fn remove(&mut self, slot: Slot) -> Result<Coin, ExitGameError> {
        self.coins.remove(&slot).ok_or(ExitGameError::UnknownCoin(slot))
    }

    /// Iterates over the held coins in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.coins.values()
    }
}
