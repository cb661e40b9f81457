//! Bond custody.
//!
//! Every account holds a bonded balance, locked behind open exits and
//! challenges, and a withdrawable balance it may pull at any time. Bond
//! movements are applied in batches: a batch either applies in full or
//! leaves every balance untouched.

use crate::errors::ExitGameError;
use plasma_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Balances of one account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Locked behind open exits and challenges
    pub bonded: Amount,
    /// Free to withdraw
    pub withdrawable: Amount,
}

/// A single bond movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondOp {
    /// Locks freshly attached value as bond
    Lock { owner: Address, amount: Amount },
    /// Credits freshly attached value as withdrawable
    Credit { owner: Address, amount: Amount },
    /// Moves bond back to the owner's withdrawable balance
    Free { owner: Address, amount: Amount },
    /// Moves bond from one account to another's withdrawable balance
    Slash { from: Address, to: Address, amount: Amount },
}

/// Holds every account's bonds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BondVault {
    balances: HashMap<Address, Balance>,
}

impl BondVault {
    /// Creates an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the balances of `owner`.
    pub fn balance_of(&self, owner: Address) -> Balance {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    /// Returns the total value held, bonded and withdrawable.
    pub fn total(&self) -> Amount {
        self.balances
            .values()
            .fold(Amount::zero(), |acc, b| acc.saturating_add(b.bonded).saturating_add(b.withdrawable))
    }

    /// Computes the balances `ops` would produce, without applying them.
    fn stage(&self, ops: &[BondOp]) -> Result<HashMap<Address, Balance>, ExitGameError> {
        let mut staged: HashMap<Address, Balance> = HashMap::new();

        for op in ops {
            match *op {
                BondOp::Lock { owner, amount } => {
                    let balance = staged.entry(owner).or_insert_with(|| self.balance_of(owner));
                    balance.bonded = add(balance.bonded, amount)?;
                }
                BondOp::Credit { owner, amount } => {
                    let balance = staged.entry(owner).or_insert_with(|| self.balance_of(owner));
                    balance.withdrawable = add(balance.withdrawable, amount)?;
                }
                BondOp::Free { owner, amount } => {
                    let balance = staged.entry(owner).or_insert_with(|| self.balance_of(owner));
                    balance.bonded = sub(balance.bonded, amount)?;
                    balance.withdrawable = add(balance.withdrawable, amount)?;
                }
                BondOp::Slash { from, to, amount } => {
                    let source = staged.entry(from).or_insert_with(|| self.balance_of(from));
                    source.bonded = sub(source.bonded, amount)?;
                    let target = staged.entry(to).or_insert_with(|| self.balance_of(to));
                    target.withdrawable = add(target.withdrawable, amount)?;
                }
            }
        }

        Ok(staged)
    }

    /// Applies `ops` atomically.
    pub fn settle(&mut self, ops: &[BondOp]) -> Result<(), ExitGameError> {
        let staged = self.stage(ops).map_err(|e| {
            warn!("Rejected bond batch of {} ops: {}", ops.len(), e);
            e
        })?;

        for (owner, balance) in staged {
            if balance == Balance::default() {
                self.balances.remove(&owner);
            } else {
                self.balances.insert(owner, balance);
            }
        }

        debug!("Settled {} bond ops", ops.len());
        Ok(())
    }

    /// Drains the withdrawable balance of `owner`, returning the amount.
    pub fn withdraw(&mut self, owner: Address) -> Amount {
        let Some(balance) = self.balances.get_mut(&owner) else {
            return Amount::zero();
        };

        let amount = std::mem::take(&mut balance.withdrawable);
        if *balance == Balance::default() {
            self.balances.remove(&owner);
        }
        amount
    }
}

fn add(a: Amount, b: Amount) -> Result<Amount, ExitGameError> {
    a.checked_add(b).ok_or(ExitGameError::InsufficientBond {
        required: b,
        available: Amount::MAX - a,
    })
}

fn sub(a: Amount, b: Amount) -> Result<Amount, ExitGameError> {
    a.checked_sub(b).ok_or(ExitGameError::InsufficientBond {
        required: b,
        available: a,
    })
}
