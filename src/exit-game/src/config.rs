//! Configuration for the exit game.

use crate::errors::ExitGameError;
use anyhow::Result;
use plasma_core::proofs::MAX_DEPTH;
use plasma_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One day in seconds.
pub const DAY: u64 = 24 * 60 * 60;

/// Parameters of the exit game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitGameConfig {
    /// Seconds an exit must wait before it can be finalized
    pub maturity_period: u64,
    /// Seconds after an exit starts during which it can be challenged with
    /// older history
    pub challenge_window: u64,
    /// Bond attached to every exit
    pub exit_bond: Amount,
    /// Bond attached to every bonded challenge
    pub challenge_bond: Amount,
    /// Child blocks are numbered in multiples of this; deposits fill the gaps
    pub child_block_interval: u64,
    /// Depth of the sparse Merkle trees committed in child blocks
    pub tree_depth: u8,
    /// The operator account, reported on withdrawals it makes
    pub operator: Address,
}

impl Default for ExitGameConfig {
    fn default() -> Self {
        Self {
            maturity_period: 7 * DAY,
            challenge_window: 7 * DAY / 2,
            // 0.1 ether
            exit_bond: Amount::exp10(17),
            challenge_bond: Amount::exp10(17),
            child_block_interval: 1000,
            tree_depth: MAX_DEPTH,
            operator: Address::zero(),
        }
    }
}

impl ExitGameConfig {
    /// Loads configuration from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Checks that the parameters describe a playable game.
    pub fn validate(&self) -> Result<(), ExitGameError> {
        if self.maturity_period == 0 {
            return Err(ExitGameError::Config("maturity period must be positive".to_string()));
        }
        if self.challenge_window > self.maturity_period {
            return Err(ExitGameError::Config(format!(
                "challenge window {} exceeds maturity period {}",
                self.challenge_window, self.maturity_period
            )));
        }
        if self.child_block_interval < 2 {
            return Err(ExitGameError::Config(
                "child block interval must leave room for deposits".to_string(),
            ));
        }
        if self.tree_depth == 0 || self.tree_depth > MAX_DEPTH {
            return Err(ExitGameError::Config(format!(
                "tree depth {} outside 1..={}",
                self.tree_depth, MAX_DEPTH
            )));
        }
        Ok(())
    }
}
