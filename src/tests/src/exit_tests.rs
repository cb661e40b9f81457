//! Tests for starting, finalizing and withdrawing exits.

use crate::fixtures::{exit_bond, one_ether, wallet, Chain, History};
use ethers::signers::Signer;
use exit_game::{CoinState, Event, ExitGameConfig, ExitGameError, ExitOutcome};
use plasma_core::{Address, Amount, Hash, Proof, Transaction};

/// A depositor exits straight out of the deposit block.
#[test]
fn test_deposit_exit_and_withdraw() {
    let mut chain = Chain::new();
    let alice = wallet(1);

    chain.deposit(&wallet(7));
    chain.deposit(&wallet(8));
    let slot = chain.deposit(&alice);
    assert_eq!(chain.deposit_block(slot), 3);

    chain.deposit_exit(&alice, slot).unwrap();
    assert_eq!(chain.game.coin(slot).unwrap().state, CoinState::Exiting);
    assert!(chain.game.coin(slot).unwrap().exit.is_some());

    chain.mature();
    let outcomes = chain.game.finalize_exits().unwrap();
    assert_eq!(outcomes, vec![(slot, ExitOutcome::Finalized { owner: alice.address() })]);
    assert_eq!(chain.game.coin(slot).unwrap().state, CoinState::Exited);
    assert!(chain.game.coin(slot).unwrap().exit.is_none());

    let asset = chain.game.withdraw(alice.address(), slot).unwrap();
    assert_eq!(asset, one_ether());
    assert!(chain.game.coin(slot).is_none());
    assert_eq!(chain.game.withdraw_bonds(alice.address()), exit_bond());

    let events = chain.events();
    assert!(events.contains(&Event::Deposit {
        slot,
        owner: alice.address(),
        block: 3,
        denomination: Amount::exp10(18),
    }));
    assert_eq!(
        events[events.len() - 5..].to_vec(),
        vec![
            Event::ExitStarted { slot, exitor: alice.address() },
            Event::BondFreed { owner: alice.address(), amount: exit_bond() },
            Event::ExitFinalized { slot, owner: alice.address() },
            Event::Withdrew {
                slot,
                owner: alice.address(),
                denomination: Amount::exp10(18),
                to_operator: false,
            },
            Event::WithdrewBonds { from: alice.address(), amount: exit_bond() },
        ]
    );
}

/// The last owner of a transferred coin exits with its two latest transactions.
#[test]
fn test_exit_from_child_blocks() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    chain.game.start_exit(charlie.address(), exit_bond(), request).unwrap();

    let exit = chain.game.exit(history.slot).unwrap();
    assert_eq!(exit.prev_owner, bob.address());
    assert_eq!(exit.prev_tx_hash, Some(history.alice_to_bob.hash()));

    chain.mature();
    assert_eq!(
        chain.game.finalize_exit(history.slot).unwrap(),
        ExitOutcome::Finalized { owner: charlie.address() }
    );

    assert!(matches!(
        chain.game.withdraw(alice.address(), history.slot),
        Err(ExitGameError::UnauthorizedCaller { .. })
    ));
    chain.game.withdraw(charlie.address(), history.slot).unwrap();
}

#[test]
fn test_finalize_before_maturity_fails() {
    let mut chain = Chain::new();
    let alice = wallet(1);
    let slot = chain.deposit(&alice);
    chain.deposit_exit(&alice, slot).unwrap();

    chain.clock.advance(chain.game.config().maturity_period - 1);
    assert!(matches!(
        chain.game.finalize_exit(slot),
        Err(ExitGameError::WindowNotElapsed { .. })
    ));
    assert!(chain.game.finalize_exits().unwrap().is_empty());

    chain.clock.advance(1);
    assert_eq!(chain.game.finalize_exits().unwrap().len(), 1);
}

/// At most one exit per coin.
#[test]
fn test_no_double_exit() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    chain.game.start_exit(charlie.address(), exit_bond(), request.clone()).unwrap();

    assert_eq!(
        chain.game.start_exit(charlie.address(), exit_bond(), request),
        Err(ExitGameError::AlreadyExiting(history.slot))
    );
    assert_eq!(
        chain.deposit_exit(&alice, history.slot),
        Err(ExitGameError::AlreadyExiting(history.slot))
    );
    assert_eq!(chain.game.pending_exits().len(), 1);

    // Once the coin has exited it cannot be exited again either.
    chain.mature();
    chain.game.finalize_exits().unwrap();
    assert_eq!(
        chain.deposit_exit(&alice, history.slot),
        Err(ExitGameError::CoinNotInExpectedState {
            slot: history.slot,
            expected: CoinState::Deposited,
            actual: CoinState::Exited,
        })
    );
}

#[test]
fn test_exit_signed_by_wrong_owner() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let request = chain.exit_request(
        Some((1000, &history.alice_to_bob)),
        2000,
        &history.bob_to_charlie,
        &charlie,
    );
    assert_eq!(
        chain.game.start_exit(charlie.address(), exit_bond(), request),
        Err(ExitGameError::MismatchedOwnerChain {
            expected: bob.address(),
            signer: charlie.address(),
        })
    );
    assert_eq!(chain.game.coin(history.slot).unwrap().state, CoinState::Deposited);
}

#[test]
fn test_exit_with_bad_proof() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let mut request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    request.exit_proof = Proof::new(1, vec![Hash::repeat_byte(9)]);
    assert_eq!(
        chain.game.start_exit(charlie.address(), exit_bond(), request),
        Err(ExitGameError::InvalidMerkleProof { slot: history.slot, block: 2000 })
    );

    // An exit citing a block that was never committed.
    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 3000, &history.bob_to_charlie, &bob);
    assert!(matches!(
        chain.game.start_exit(charlie.address(), exit_bond(), request),
        Err(ExitGameError::StaleOrFutureBlock { block: 3000, .. })
    ));
    assert!(chain.game.pending_exits().is_empty());
}

/// Only the new owner of the exiting transaction may start the exit.
#[test]
fn test_exit_by_stranger() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    assert_eq!(
        chain.game.start_exit(bob.address(), exit_bond(), request),
        Err(ExitGameError::UnauthorizedCaller {
            caller: bob.address(),
            expected: charlie.address(),
        })
    );
}

/// Exits finalize in priority order, not in the order they were started.
#[test]
fn test_exits_finalize_in_priority_order() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let dave = wallet(4);

    let history = History::build(&mut chain, &alice, &bob, &charlie);
    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    chain.game.start_exit(charlie.address(), exit_bond(), request).unwrap();

    chain.clock.advance(60);
    let late_deposit = chain.deposit(&dave);
    assert_eq!(chain.deposit_block(late_deposit), 2001);

    chain.deposit_exit(&dave, late_deposit).unwrap();

    let order: Vec<_> = chain.game.pending_exits().iter().map(|exit| exit.slot).collect();
    assert_eq!(order, vec![history.slot, late_deposit]);

    chain.mature();
    let outcomes = chain.game.finalize_exits().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, history.slot);
    assert_eq!(outcomes[1].0, late_deposit);
}

/// A deposit exit outranks a child block exit at a later height even when it
/// was started last.
#[test]
fn test_deposit_exit_outranks_later_child_exit() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let dave = wallet(4);

    let early = chain.deposit(&dave);
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 2000, &history.bob_to_charlie, &bob);
    chain.game.start_exit(charlie.address(), exit_bond(), request).unwrap();
    chain.clock.advance(3600);
    chain.deposit_exit(&dave, early).unwrap();

    let order: Vec<_> = chain.game.pending_exits().iter().map(|exit| exit.slot).collect();
    assert_eq!(order, vec![early, history.slot]);

    // A matured exit does not wait behind an immature exit of another coin.
    chain.clock.advance(chain.game.config().maturity_period - 3600);
    let outcomes = chain.game.finalize_exits().unwrap();
    assert_eq!(outcomes, vec![(history.slot, ExitOutcome::Finalized { owner: charlie.address() })]);

    chain.clock.advance(3600);
    let outcomes = chain.game.finalize_exits().unwrap();
    assert_eq!(outcomes, vec![(early, ExitOutcome::Finalized { owner: dave.address() })]);
}

#[test]
fn test_cancel_exit() {
    let mut chain = Chain::new();
    let alice = wallet(1);
    let slot = chain.deposit(&alice);
    chain.deposit_exit(&alice, slot).unwrap();

    chain.game.cancel_exits(alice.address(), &[slot]).unwrap();
    assert_eq!(chain.game.coin(slot).unwrap().state, CoinState::Deposited);
    assert!(chain.game.pending_exits().is_empty());
    assert_eq!(chain.game.balance_of(alice.address()).withdrawable, exit_bond());

    // The coin can be exited again afterwards.
    chain.deposit_exit(&alice, slot).unwrap();
    assert!(chain.events().contains(&Event::ExitCancelled { slot, owner: alice.address() }));
}

#[test]
fn test_withdraw_reports_operator() {
    let alice = wallet(1);
    let mut config = ExitGameConfig::default();
    config.operator = alice.address();
    let mut chain = Chain::with_config(config);

    let slot = chain.deposit(&alice);
    chain.deposit_exit(&alice, slot).unwrap();
    chain.mature();
    chain.game.finalize_exit(slot).unwrap();
    chain.game.withdraw(alice.address(), slot).unwrap();

    assert!(chain.events().iter().any(|event| matches!(
        event,
        Event::Withdrew { to_operator: true, .. }
    )));
}

#[test]
fn test_withdraw_requires_exited_coin() {
    let mut chain = Chain::new();
    let alice = wallet(1);
    let slot = chain.deposit(&alice);

    assert!(matches!(
        chain.game.withdraw(alice.address(), slot),
        Err(ExitGameError::CoinNotInExpectedState { .. })
    ));
    assert_eq!(
        chain.game.withdraw(alice.address(), 42),
        Err(ExitGameError::UnknownCoin(42))
    );
    assert_eq!(chain.game.withdraw_bonds(Address::repeat_byte(9)), Amount::zero());
}

#[test]
fn test_exit_tx_must_reference_parent_block() {
    let mut chain = Chain::new();
    let (alice, bob, charlie) = (wallet(1), wallet(2), wallet(3));
    let history = History::build(&mut chain, &alice, &bob, &charlie);

    // The exiting transaction skips over its claimed parent.
    let skipping = Transaction::new(history.slot, history.deposit_block, charlie.address());
    chain.submit(3000, &[&skipping]);
    let request = chain.exit_request(Some((1000, &history.alice_to_bob)), 3000, &skipping, &bob);

    assert!(matches!(
        chain.game.start_exit(charlie.address(), exit_bond(), request),
        Err(ExitGameError::InvalidTransaction(_))
    ));
}
