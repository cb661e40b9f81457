//! Tests for sparse Merkle commitments as the exit game consumes them.

use exit_game::BlockLedger;
use plasma_core::proofs::DEFAULT_LEAF;
use plasma_core::{Address, CoreError, Hash, Proof, Slot, SparseMerkleTree, Transaction};
use rand::Rng;
use std::collections::BTreeMap;

fn random_leaves(rng: &mut impl Rng, count: usize) -> BTreeMap<Slot, Hash> {
    (0..count)
        .map(|_| (rng.gen::<u64>(), Hash::from(rng.gen::<[u8; 32]>())))
        .collect()
}

#[test]
fn test_proofs_survive_the_wire() {
    let mut rng = rand::thread_rng();
    let leaves = random_leaves(&mut rng, 50);
    let tree = SparseMerkleTree::new(leaves.clone()).unwrap();
    assert_eq!(tree.len(), leaves.len());

    for (&slot, &leaf) in &leaves {
        let bytes = tree.create_proof(slot).unwrap().to_bytes();
        let proof = Proof::from_bytes(&bytes).unwrap();

        assert_eq!(bytes.len(), 8 + 32 * proof.siblings.len());
        assert!(tree.verify(&proof, slot, leaf));
        assert!(!tree.verify(&proof, slot, *DEFAULT_LEAF));
    }
}

#[test]
fn test_absent_slots() {
    let mut rng = rand::thread_rng();
    let leaves = random_leaves(&mut rng, 20);
    let tree = SparseMerkleTree::new(leaves.clone()).unwrap();

    for _ in 0..20 {
        let slot = rng.gen::<u64>();
        if leaves.contains_key(&slot) {
            continue;
        }
        let proof = tree.create_proof(slot).unwrap();
        assert!(tree.verify(&proof, slot, *DEFAULT_LEAF));
        assert!(!tree.verify(&proof, slot, Hash::from(rng.gen::<[u8; 32]>())));
    }
}

#[test]
fn test_shallow_tree() {
    let tree = SparseMerkleTree::with_depth(
        8,
        vec![(0, Hash::repeat_byte(1)), (255, Hash::repeat_byte(2))],
    )
    .unwrap();
    assert_eq!(tree.depth(), 8);

    let proof = tree.create_proof(255).unwrap();
    assert!(proof.verify(8, tree.root(), 255, Hash::repeat_byte(2)));
    assert_eq!(
        tree.create_proof(256),
        Err(CoreError::SlotOutOfRange { slot: 256, depth: 8 })
    );
    assert!(SparseMerkleTree::with_depth(8, vec![(300, Hash::repeat_byte(3))]).is_err());
}

#[test]
fn test_malformed_proofs_are_rejected() {
    assert_eq!(Proof::from_bytes(&[0u8; 7]), Err(CoreError::InvalidProofLength(7)));
    assert!(Proof::from_bytes(&[0u8; 40]).is_err());

    // The bitmask declares one sibling but none follow.
    let mut bytes = vec![0u8; 8];
    bytes[7] = 1;
    assert_eq!(
        Proof::from_bytes(&bytes),
        Err(CoreError::ProofBitmaskMismatch { declared: 1, actual: 0 })
    );
}

/// Transactions committed by the operator are provable against the ledger.
#[test]
fn test_ledger_checks_committed_transactions() {
    let mut rng = rand::thread_rng();
    let owner = Address::repeat_byte(7);
    let txs: Vec<Transaction> = (0..10)
        .map(|_| Transaction::new(rng.gen::<u64>(), 1, owner))
        .collect();
    let tree = SparseMerkleTree::new(txs.iter().map(|tx| (tx.slot, tx.hash()))).unwrap();

    let mut ledger = BlockLedger::new(1000, 64);
    ledger.submit_block(1000, tree.root(), 0).unwrap();

    for tx in &txs {
        let proof = tree.create_proof(tx.slot).unwrap();
        assert!(ledger.check_included(tx.slot, tx.hash(), 1000, &proof).is_ok());
        assert!(ledger.check_absent(tx.slot, 1000, &proof).is_err());
    }

    let stranger = txs[0].slot ^ 1;
    if txs.iter().all(|tx| tx.slot != stranger) {
        let proof = tree.create_proof(stranger).unwrap();
        assert!(ledger.check_absent(stranger, 1000, &proof).is_ok());
    }
}
