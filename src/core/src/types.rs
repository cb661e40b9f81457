//! Core types for the Plasma Cash exit game.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 20-byte root-chain account address.
pub type Address = ethers::types::Address;

/// A 32-byte keccak hash.
pub type Hash = ethers::types::H256;

/// Native-asset amount, 256 bits wide like the root chain's.
pub type Amount = U256;

/// Unique identifier of a non-fungible coin.
pub type Slot = u64;

/// Root-chain block number of a committed child block or deposit.
pub type BlockNumber = u64;

/// Seconds since the unix epoch.
pub type Timestamp = u64;

/// The kind of asset a coin stands for on the root chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetMode {
    /// Native currency
    Eth,
    /// Fungible token contract
    Erc20,
    /// Non-fungible token contract
    Erc721,
}

/// Reference to the deposited asset backing a coin.
///
/// The exit game never interprets this beyond deriving a slot from it; the
/// custody adapter that releases the asset on withdrawal is responsible for
/// checking that `contract` is genuine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// The kind of asset
    pub mode: AssetMode,
    /// The token contract (zero for the native currency)
    pub contract: Address,
    /// The token id for non-fungible assets, zero otherwise
    pub uid: U256,
    /// The amount locked behind the coin
    pub denomination: U256,
}

impl AssetRef {
    /// A native-currency deposit of `denomination`.
    pub fn eth(denomination: U256) -> Self {
        Self {
            mode: AssetMode::Eth,
            contract: Address::zero(),
            uid: U256::zero(),
            denomination,
        }
    }

    /// A single non-fungible token.
    pub fn erc721(contract: Address, uid: U256) -> Self {
        Self {
            mode: AssetMode::Erc721,
            contract,
            uid,
            denomination: U256::one(),
        }
    }

    /// A fungible token deposit of `denomination`.
    pub fn erc20(contract: Address, denomination: U256) -> Self {
        Self {
            mode: AssetMode::Erc20,
            contract,
            uid: U256::zero(),
            denomination,
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Asset {{ mode: {:?}, contract: {:?}, uid: {}, denomination: {} }}",
            self.mode, self.contract, self.uid, self.denomination
        )
    }
}
