//! Tests for saving and restoring the exit game.

use crate::fixtures::{challenge_bond, exit_bond, wallet, Chain, History};
use anyhow::Result;
use ethers::signers::Signer;
use plasma_core::Hash;
use exit_game::{CoinState, ExitGame, ExitGameConfig, ExitOutcome, SnapshotStore};
use std::sync::Arc;
use tempfile::tempdir;

/// A game restored mid-dispute carries on where the saved one stopped.
#[test]
fn test_restore_mid_challenge() -> Result<()> {
    let dir = tempdir()?;
    let store = SnapshotStore::new(dir.path().join("state").join("game.snapshot"))?;
    assert!(store.load()?.is_none());

    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    let id = chain.game.start_exit(charlie.address(), exit_bond(), request)?;
    let deposit = chain.evidence(history.deposit_block, &history.deposit, &alice);
    chain
        .game
        .challenge_before(alice.address(), challenge_bond(), history.slot, deposit, None)?;

    store.save(&chain.game.snapshot())?;
    let snapshot = store.load()?.expect("snapshot was saved");
    assert_eq!(snapshot.exits.len(), 1);

    let restored = ExitGame::restore(ExitGameConfig::default(), Arc::new(chain.clock.clone()), snapshot)?;
    assert_eq!(restored.exit_of(id), chain.game.exit(history.slot));
    assert_eq!(restored.challenges(history.slot).len(), 1);
    assert_eq!(restored.root_at(2000), chain.game.root_at(2000));
    chain.game = restored;

    let response = chain.evidence(1000, &history.alice_to_bob, &alice);
    chain
        .game
        .respond_challenge_before(charlie.address(), history.slot, history.deposit.hash(), response)?;

    chain.mature();
    assert_eq!(
        chain.game.finalize_exits()?,
        vec![(history.slot, ExitOutcome::Finalized { owner: charlie.address() })]
    );
    assert_eq!(chain.game.coin(history.slot).map(|coin| coin.state), Some(CoinState::Exited));

    // Exit ids keep counting from the saved game.
    let late = chain.deposit(&wallet(4));
    let next = chain.deposit_exit(&wallet(4), late)?;
    assert!(next.0 > id.0);
    Ok(())
}

/// Saving again replaces the stored snapshot.
#[test]
fn test_snapshot_overwrite() -> Result<()> {
    let dir = tempdir()?;
    let store = SnapshotStore::new(dir.path().join("game.snapshot"))?;

    let mut chain = Chain::new();
    store.save(&chain.game.snapshot())?;
    let slot = chain.deposit(&wallet(1));
    store.save(&chain.game.snapshot())?;

    let snapshot = store.load()?.expect("snapshot was saved");
    assert!(snapshot.registry.contains(slot));
    assert!(!store.path().with_extension("tmp").exists());
    Ok(())
}

#[test]
fn test_config_file_drives_game() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("exit-game.json");

    let config = ExitGameConfig {
        maturity_period: 600,
        challenge_window: 300,
        child_block_interval: 10,
        ..ExitGameConfig::default()
    };
    config.to_file(&path)?;
    let loaded = ExitGameConfig::from_file(&path)?;
    assert_eq!(loaded, config);

    let mut chain = Chain::with_config(loaded);
    let alice = wallet(1);
    let slot = chain.deposit(&alice);
    chain.deposit_exit(&alice, slot)?;

    chain.clock.advance(600);
    assert_eq!(chain.game.finalize_exits()?.len(), 1);

    // Child blocks follow the configured interval.
    chain.submit(10, &[]);
    assert!(chain.game.submit_block(15, Hash::zero()).is_err());

    // A file describing an unplayable game is refused.
    let unplayable = ExitGameConfig {
        maturity_period: 0,
        ..config
    };
    unplayable.to_file(&path)?;
    assert!(ExitGameConfig::from_file(&path).is_err());
    Ok(())
}
