//! Persistent snapshots of the exit game state.

use crate::errors::ExitGameError;
use crate::exit::Exit;
use crate::ledger::BlockLedger;
use crate::registry::CoinRegistry;
use crate::vault::BondVault;
use plasma_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything needed to rebuild an exit game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the snapshot was taken
    pub taken_at: Timestamp,
    /// Committed blocks
    pub ledger: BlockLedger,
    /// Deposited coins
    pub registry: CoinRegistry,
    /// Bond balances
    pub vault: BondVault,
    /// Open exits in processing order
    pub exits: Vec<Exit>,
    /// Id of the next exit
    pub next_exit_id: u64,
}

impl Snapshot {
    /// Serializes the snapshot with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExitGameError> {
        bincode::serialize(self).map_err(|e| ExitGameError::Snapshot(e.to_string()))
    }

    /// Deserializes a snapshot written by [`Snapshot::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExitGameError> {
        bincode::deserialize(bytes).map_err(|e| ExitGameError::Snapshot(e.to_string()))
    }
}

/// A snapshot file on disk.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    /// The snapshot file
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store writing to `path`, creating its parent directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ExitGameError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ExitGameError::Snapshot(e.to_string()))?;
        }
        Ok(Self { path })
    }

    /// Returns the snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `snapshot`, replacing the previous one.
    ///
    /// The file is written beside the target and renamed over it, so a crash
    /// leaves either the old or the new snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), ExitGameError> {
        let bytes = snapshot.to_bytes()?;
        let tmp = self.path.with_extension("tmp");

        fs::write(&tmp, &bytes).map_err(|e| ExitGameError::Snapshot(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| ExitGameError::Snapshot(e.to_string()))?;

        info!("Saved snapshot ({} bytes) to {}", bytes.len(), self.path.display());
        Ok(())
    }

    /// Reads the stored snapshot, if there is one.
    pub fn load(&self) -> Result<Option<Snapshot>, ExitGameError> {
        if !self.path.exists() {
            debug!("No snapshot at {}", self.path.display());
            return Ok(None);
        }

        let bytes = fs::read(&self.path).map_err(|e| ExitGameError::Snapshot(e.to_string()))?;
        Snapshot::from_bytes(&bytes).map(Some)
    }
}
