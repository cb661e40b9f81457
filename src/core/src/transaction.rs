//! Canonical coin transfer records.
//!
//! A transaction moves exactly one coin to `new_owner` and references the block
//! in which the coin last moved. Its encoding is the RLP list
//! `[slot, prev_block, denomination, new_owner]`. Signatures are produced the
//! way root-chain wallets sign a 32-byte digest (`eth_sign`), so the recovered
//! key is bound to the transaction hash prefixed with the personal-message
//! header.

use crate::errors::CoreError;
use crate::types::{Address, BlockNumber, Hash, Slot};
use ethers::types::{RecoveryMessage, Signature};
use ethers::utils::keccak256;
use ethers::utils::rlp::{Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every coin carries exactly one unit.
pub const DENOMINATION: u64 = 1;

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// A transfer of one coin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The coin being moved
    pub slot: Slot,
    /// The block holding the coin's previous transaction, zero for a deposit
    pub prev_block: BlockNumber,
    /// Always one
    pub denomination: u64,
    /// The owner after this transfer
    pub new_owner: Address,
}

impl Transaction {
    /// Creates a new transfer of `slot` to `new_owner`.
    pub fn new(slot: Slot, prev_block: BlockNumber, new_owner: Address) -> Self {
        Self {
            slot,
            prev_block,
            denomination: DENOMINATION,
            new_owner,
        }
    }

    /// The implicit self-transfer that a deposit of `slot` stands for.
    pub fn deposit(slot: Slot, owner: Address) -> Self {
        Self::new(slot, 0, owner)
    }

    /// Returns true if this is a deposit transaction.
    pub fn is_deposit(&self) -> bool {
        self.prev_block == 0
    }

    /// Encodes the transaction canonically.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(4);
        stream.append(&self.slot);
        stream.append(&self.prev_block);
        stream.append(&self.denomination);
        stream.append(&self.new_owner);
        stream.out().to_vec()
    }

    /// Decodes a canonically encoded transaction.
    ///
    /// Anything that does not re-encode to the exact same bytes is rejected,
    /// so a transaction has a single valid encoding and a single hash.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let rlp = Rlp::new(bytes);
        let count = rlp
            .item_count()
            .map_err(|e| CoreError::InvalidEncoding(e.to_string()))?;
        if !rlp.is_list() || count != 4 {
            return Err(CoreError::InvalidEncoding(format!(
                "expected a list of 4 items, got {}",
                count
            )));
        }

        let decode_err = |e: ethers::utils::rlp::DecoderError| CoreError::InvalidEncoding(e.to_string());
        let tx = Self {
            slot: rlp.val_at(0).map_err(decode_err)?,
            prev_block: rlp.val_at(1).map_err(decode_err)?,
            denomination: rlp.val_at(2).map_err(decode_err)?,
            new_owner: rlp.val_at(3).map_err(decode_err)?,
        };

        if tx.denomination != DENOMINATION {
            return Err(CoreError::InvalidDenomination(tx.denomination));
        }
        if tx.encode() != bytes {
            return Err(CoreError::InvalidEncoding("non-canonical encoding".to_string()));
        }

        Ok(tx)
    }

    /// Computes the hash committed to in child blocks.
    ///
    /// Deposits have no encoded predecessor, so their hash is the hash of the
    /// slot alone. That is also the root recorded for the deposit block.
    pub fn hash(&self) -> Hash {
        if self.is_deposit() {
            deposit_hash(self.slot)
        } else {
            Hash::from(keccak256(self.encode()))
        }
    }

    /// Recovers the address that signed this transaction.
    pub fn recover_signer(&self, signature: &[u8]) -> Result<Address, CoreError> {
        recover(self.hash(), signature)
    }

    /// Checks that `signature` over this transaction was made by `expected`.
    pub fn verify_signer(&self, signature: &[u8], expected: Address) -> Result<(), CoreError> {
        let signer = self.recover_signer(signature)?;
        if signer != expected {
            return Err(CoreError::InvalidSignature(format!(
                "signed by {:?}, expected {:?}",
                signer, expected
            )));
        }
        Ok(())
    }
}

/// Hash of the deposit transaction for `slot`.
pub fn deposit_hash(slot: Slot) -> Hash {
    Hash::from(keccak256(slot.to_be_bytes()))
}

/// Recovers the signer of `hash` from a 65-byte `eth_sign` signature.
pub fn recover(hash: Hash, signature: &[u8]) -> Result<Address, CoreError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CoreError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let signature = Signature::try_from(signature)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

    signature
        .recover(RecoveryMessage::Data(hash.as_bytes().to_vec()))
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction {{ slot: {}, prev_block: {}, denomination: {}, new_owner: {:?} }}",
            self.slot, self.prev_block, self.denomination, self.new_owner
        )
    }
}
