//! The exit game.
//!
//! `ExitGame` owns every piece of root-chain state: the block ledger, the coin
//! registry, the open exits and the bond vault. Each public operation checks
//! all of its preconditions against the current state before it touches
//! anything, then settles its bond movements as one batch and applies the rest.
//! A call that returns an error has changed nothing and published nothing.

use crate::clock::Clock;
use crate::config::ExitGameConfig;
use crate::errors::ExitGameError;
use crate::events::{ChallengeKind, Event, EventSink, NullSink};
use crate::exit::{
    Challenge, Evidence, Exit, ExitId, ExitOutcome, ExitPriority, ExitRequest, OptimisticExitRequest, ParentLink,
};
use crate::ledger::BlockLedger;
use crate::metrics;
use crate::registry::{Coin, CoinRegistry, CoinState};
use crate::snapshot::Snapshot;
use crate::vault::{Balance, BondOp, BondVault};
use plasma_core::proofs::{check_slot, DEFAULT_LEAF};
use plasma_core::transaction::deposit_hash;
use plasma_core::{Address, Amount, AssetRef, BlockNumber, Hash, Proof, Slot, Timestamp, Transaction};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Root-chain side of a Plasma Cash chain.
pub struct ExitGame {
    /// Game parameters
    config: ExitGameConfig,
    /// Source of `now` for every window check
    clock: Arc<dyn Clock>,
    /// Committed blocks
    ledger: BlockLedger,
    /// Deposited coins
    registry: CoinRegistry,
    /// Exit and challenge bonds
    vault: BondVault,
    /// Open exits by slot
    exits: HashMap<Slot, Exit>,
    /// Open exits in processing order
    queue: BTreeMap<ExitPriority, Slot>,
    /// Id of the next exit
    next_exit_id: u64,
    /// Where events go
    sink: Box<dyn EventSink>,
}

impl ExitGame {
    /// Creates an empty game.
    pub fn new(config: ExitGameConfig, clock: Arc<dyn Clock>) -> Result<Self, ExitGameError> {
        config.validate()?;
        let ledger = BlockLedger::new(config.child_block_interval, config.tree_depth);

        Ok(Self {
            config,
            clock,
            ledger,
            registry: CoinRegistry::new(),
            vault: BondVault::new(),
            exits: HashMap::new(),
            queue: BTreeMap::new(),
            next_exit_id: 0,
            sink: Box::new(NullSink),
        })
    }

    /// Sends events to `sink` from now on.
    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Rebuilds a game from a snapshot.
    pub fn restore(config: ExitGameConfig, clock: Arc<dyn Clock>, snapshot: Snapshot) -> Result<Self, ExitGameError> {
        config.validate()?;
        if snapshot.ledger.interval() != config.child_block_interval || snapshot.ledger.depth() != config.tree_depth {
            return Err(ExitGameError::Snapshot(format!(
                "snapshot ledger uses interval {} and depth {}, configuration {} and {}",
                snapshot.ledger.interval(),
                snapshot.ledger.depth(),
                config.child_block_interval,
                config.tree_depth
            )));
        }

        let mut exits = HashMap::new();
        let mut queue = BTreeMap::new();
        for exit in snapshot.exits {
            if snapshot.registry.state_of(exit.slot) != Some(CoinState::Exiting) {
                return Err(ExitGameError::Snapshot(format!("exit on coin {} that is not exiting", exit.slot)));
            }
            queue.insert(exit.priority, exit.slot);
            exits.insert(exit.slot, exit);
        }
        metrics::PENDING_EXITS.set(exits.len() as f64);

        info!("Restored exit game with {} coins and {} open exits", snapshot.registry.len(), exits.len());

        Ok(Self {
            config,
            clock,
            ledger: snapshot.ledger,
            registry: snapshot.registry,
            vault: snapshot.vault,
            exits,
            queue,
            next_exit_id: snapshot.next_exit_id,
            sink: Box::new(NullSink),
        })
    }

    /// Captures the full state of the game.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            taken_at: self.now(),
            ledger: self.ledger.clone(),
            registry: self.registry.clone(),
            vault: self.vault.clone(),
            exits: self.queue.values().filter_map(|slot| self.exits.get(slot)).cloned().collect(),
            next_exit_id: self.next_exit_id,
        }
    }

    // Deposits and blocks

    /// Deposits a coin for `asset`, returning its slot.
    pub fn deposit(&mut self, owner: Address, asset: AssetRef) -> Result<Slot, ExitGameError> {
        let slot = self.registry.derive_slot(owner, &asset, self.config.tree_depth);
        self.register_deposit(owner, slot, asset)?;
        Ok(slot)
    }

    /// Deposits a coin at a slot chosen by the custody adapter, returning its
    /// deposit block.
    pub fn register_deposit(&mut self, owner: Address, slot: Slot, asset: AssetRef) -> Result<BlockNumber, ExitGameError> {
        self.record_deposit(owner, slot, asset).map_err(rejected("deposit"))
    }

    fn record_deposit(&mut self, owner: Address, slot: Slot, asset: AssetRef) -> Result<BlockNumber, ExitGameError> {
        check_slot(self.config.tree_depth, slot)?;
        self.registry.check_free(slot)?;

        let now = self.now();
        let block = self.ledger.record_deposit(slot, deposit_hash(slot), now)?;
        let denomination = asset.denomination;
        self.registry.insert(Coin::new(slot, block, owner, asset))?;

        info!("Coin {} deposited by {:?} in block {}", slot, owner, block);
        self.emit(Event::Deposit {
            slot,
            owner,
            block,
            denomination,
        });
        Ok(block)
    }

    /// Records a child block root.
    pub fn submit_block(&mut self, number: BlockNumber, root: Hash) -> Result<(), ExitGameError> {
        let now = self.now();
        self.ledger.submit_block(number, root, now).map_err(rejected("submit_block"))?;
        self.emit(Event::BlockSubmitted { number, root });
        Ok(())
    }

    // Exits

    /// Starts an exit from the two most recent transactions of a coin.
    ///
    /// For a deposit exit (`prev_block == 0`) the exiting transaction is the
    /// deposit itself, signed by the depositor. Otherwise the exiting
    /// transaction must be signed by the owner the parent transaction names.
    /// `attached` must cover the exit bond; any excess becomes withdrawable.
    pub fn start_exit(&mut self, caller: Address, attached: Amount, request: ExitRequest) -> Result<ExitId, ExitGameError> {
        self.check_exit(caller, attached, request).map_err(rejected("start_exit"))
    }

    fn check_exit(&mut self, caller: Address, attached: Amount, request: ExitRequest) -> Result<ExitId, ExitGameError> {
        let now = self.now();
        let slot = request.slot;
        let coin = self.startable_coin(slot)?;
        let exit_tx = &request.exit_tx;

        check_exiting_tx(caller, slot, exit_tx)?;
        if exit_tx.prev_block != request.prev_block {
            return Err(ExitGameError::InvalidTransaction(format!(
                "exiting transaction references block {}, not {}",
                exit_tx.prev_block, request.prev_block
            )));
        }
        let ops = bond_ops(caller, attached, self.config.exit_bond)?;

        let (prev_owner, prev_tx_hash) = if request.prev_block == 0 {
            if request.exit_block != coin.deposit_block {
                return Err(ExitGameError::StaleOrFutureBlock {
                    block: request.exit_block,
                    reason: format!("deposit exits cite deposit block {}", coin.deposit_block),
                });
            }
            self.check_history_tx(coin, request.exit_block, exit_tx, &request.exit_proof)?;
            check_signer(exit_tx, &request.signature, exit_tx.new_owner)?;
            (exit_tx.new_owner, None)
        } else {
            let prev_tx = request
                .prev_tx
                .as_ref()
                .ok_or_else(|| ExitGameError::InvalidTransaction("parent transaction required".to_string()))?;
            if request.prev_block >= request.exit_block {
                return Err(ExitGameError::StaleOrFutureBlock {
                    block: request.exit_block,
                    reason: format!("exit block must follow parent block {}", request.prev_block),
                });
            }
            self.check_history_tx(coin, request.prev_block, prev_tx, &request.prev_proof)?;
            self.check_history_tx(coin, request.exit_block, exit_tx, &request.exit_proof)?;

            let signer = exit_tx.recover_signer(&request.signature).map_err(ExitGameError::from_signature)?;
            if signer != prev_tx.new_owner {
                return Err(ExitGameError::MismatchedOwnerChain {
                    expected: prev_tx.new_owner,
                    signer,
                });
            }
            (prev_tx.new_owner, Some(prev_tx.hash()))
        };

        let exit = Exit {
            id: ExitId(self.next_exit_id),
            slot,
            exitor: caller,
            prev_owner,
            prev_tx_hash,
            prev_block: request.prev_block,
            exit_block: request.exit_block,
            priority: ExitPriority::new(slot, request.prev_block, request.exit_block),
            bond: self.config.exit_bond,
            created_at: now,
            challenge_count: 0,
            challenges: Vec::new(),
            optimistic: false,
        };
        self.open_exit(&ops, exit)
    }

    /// Starts an exit that claims its parent block without proving it.
    ///
    /// The signer of the exiting transaction is taken to be the parent's
    /// owner. An exit whose claimed parent is wrong is refuted with
    /// [`ExitGame::challenge_wrong_parent`].
    pub fn start_optimistic_exit(
        &mut self,
        caller: Address,
        attached: Amount,
        request: OptimisticExitRequest,
    ) -> Result<ExitId, ExitGameError> {
        self.check_optimistic_exit(caller, attached, request)
            .map_err(rejected("start_optimistic_exit"))
    }

    fn check_optimistic_exit(
        &mut self,
        caller: Address,
        attached: Amount,
        request: OptimisticExitRequest,
    ) -> Result<ExitId, ExitGameError> {
        let now = self.now();
        let slot = request.slot;
        let coin = self.startable_coin(slot)?;
        let exit_tx = &request.exit_tx;
        let prev_block = exit_tx.prev_block;

        check_exiting_tx(caller, slot, exit_tx)?;
        if exit_tx.is_deposit() {
            return Err(ExitGameError::InvalidTransaction(
                "deposit exits prove their own history".to_string(),
            ));
        }
        if prev_block >= request.exit_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: request.exit_block,
                reason: format!("exit block must follow parent block {}", prev_block),
            });
        }
        let ops = bond_ops(caller, attached, self.config.exit_bond)?;

        self.check_history_tx(coin, request.exit_block, exit_tx, &request.exit_proof)?;
        let signer = exit_tx.recover_signer(&request.signature).map_err(ExitGameError::from_signature)?;

        let prev_tx_hash = if self.ledger.is_deposit_block(prev_block) {
            if prev_block != coin.deposit_block {
                return Err(ExitGameError::StaleOrFutureBlock {
                    block: prev_block,
                    reason: format!("coin {} was deposited in block {}", slot, coin.deposit_block),
                });
            }
            if signer != coin.owner {
                return Err(ExitGameError::MismatchedOwnerChain {
                    expected: coin.owner,
                    signer,
                });
            }
            Some(deposit_hash(slot))
        } else {
            if self.ledger.root_at(prev_block).is_none() {
                return Err(ExitGameError::StaleOrFutureBlock {
                    block: prev_block,
                    reason: "no such block".to_string(),
                });
            }
            None
        };

        let exit = Exit {
            id: ExitId(self.next_exit_id),
            slot,
            exitor: caller,
            prev_owner: signer,
            prev_tx_hash,
            prev_block,
            exit_block: request.exit_block,
            priority: ExitPriority::new(slot, prev_block, request.exit_block),
            bond: self.config.exit_bond,
            created_at: now,
            challenge_count: 0,
            challenges: Vec::new(),
            optimistic: true,
        };
        self.open_exit(&ops, exit)
    }

    fn open_exit(&mut self, ops: &[BondOp], exit: Exit) -> Result<ExitId, ExitGameError> {
        self.vault.settle(ops)?;

        let coin = self.registry.get_mut(exit.slot)?;
        coin.state = CoinState::Exiting;
        coin.exit = Some(exit.id);

        let (id, slot, exitor) = (exit.id, exit.slot, exit.exitor);
        info!(
            "{} started on coin {} by {:?} (blocks {} -> {}{})",
            id,
            slot,
            exitor,
            exit.prev_block,
            exit.exit_block,
            if exit.optimistic { ", optimistic" } else { "" }
        );

        self.next_exit_id += 1;
        self.queue.insert(exit.priority, slot);
        self.exits.insert(slot, exit);

        metrics::EXITS_STARTED.inc();
        metrics::PENDING_EXITS.set(self.exits.len() as f64);
        self.emit(Event::ExitStarted { slot, exitor });
        Ok(id)
    }

    // Challenges

    /// Invalidates an exit by showing that the exitor spent the coin after
    /// the exiting transaction.
    pub fn challenge_after(
        &mut self,
        caller: Address,
        attached: Amount,
        slot: Slot,
        evidence: Evidence,
    ) -> Result<(), ExitGameError> {
        self.check_challenge_after(caller, attached, slot, evidence)
            .map_err(rejected("challenge_after"))
    }

    fn check_challenge_after(
        &mut self,
        caller: Address,
        attached: Amount,
        slot: Slot,
        evidence: Evidence,
    ) -> Result<(), ExitGameError> {
        let now = self.now();
        let (coin, exit) = self.exiting(slot)?;
        self.check_before_maturity(exit, now)?;

        if evidence.block <= exit.exit_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: evidence.block,
                reason: format!("spend must follow exit block {}", exit.exit_block),
            });
        }
        if evidence.tx.prev_block != exit.exit_block {
            return Err(ExitGameError::InvalidTransaction(format!(
                "spend references block {}, not exit block {}",
                evidence.tx.prev_block, exit.exit_block
            )));
        }
        let ops = bond_ops(caller, attached, self.config.challenge_bond)?;
        self.check_history_tx(coin, evidence.block, &evidence.tx, &evidence.proof)?;
        check_signer(&evidence.tx, &evidence.signature, exit.exitor)?;

        self.invalidate(slot, caller, ops, evidence.tx.hash(), ChallengeKind::After)
    }

    /// Invalidates an exit by showing that the parent's owner spent the coin
    /// between the parent and the exiting transaction.
    pub fn challenge_between(
        &mut self,
        caller: Address,
        attached: Amount,
        slot: Slot,
        evidence: Evidence,
    ) -> Result<(), ExitGameError> {
        self.check_challenge_between(caller, attached, slot, evidence)
            .map_err(rejected("challenge_between"))
    }

    fn check_challenge_between(
        &mut self,
        caller: Address,
        attached: Amount,
        slot: Slot,
        evidence: Evidence,
    ) -> Result<(), ExitGameError> {
        let now = self.now();
        let (coin, exit) = self.exiting(slot)?;
        self.check_before_maturity(exit, now)?;

        if evidence.block <= exit.prev_block || evidence.block >= exit.exit_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: evidence.block,
                reason: format!("spend must lie between blocks {} and {}", exit.prev_block, exit.exit_block),
            });
        }
        if evidence.tx.prev_block != exit.prev_block {
            return Err(ExitGameError::InvalidTransaction(format!(
                "spend references block {}, not parent block {}",
                evidence.tx.prev_block, exit.prev_block
            )));
        }
        let ops = bond_ops(caller, attached, self.config.challenge_bond)?;
        self.check_history_tx(coin, evidence.block, &evidence.tx, &evidence.proof)?;
        check_signer(&evidence.tx, &evidence.signature, exit.prev_owner)?;

        self.invalidate(slot, caller, ops, evidence.tx.hash(), ChallengeKind::Between)
    }

    /// Challenges an exit with older history of the coin.
    ///
    /// The challenge stays pending until the exitor answers it with a later
    /// spend by the owner the cited transaction names. A non-deposit
    /// transaction must come with its parent so its signature can be checked.
    pub fn challenge_before(
        &mut self,
        caller: Address,
        attached: Amount,
        slot: Slot,
        evidence: Evidence,
        parent: Option<ParentLink>,
    ) -> Result<(), ExitGameError> {
        self.check_challenge_before(caller, attached, slot, evidence, parent)
            .map_err(rejected("challenge_before"))
    }

    fn check_challenge_before(
        &mut self,
        caller: Address,
        attached: Amount,
        slot: Slot,
        evidence: Evidence,
        parent: Option<ParentLink>,
    ) -> Result<(), ExitGameError> {
        let now = self.now();
        let (coin, exit) = self.exiting(slot)?;
        self.check_challenge_window(exit, now)?;

        if exit.is_deposit_exit() {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: evidence.block,
                reason: "deposit exits have no earlier history".to_string(),
            });
        }
        if evidence.block > exit.prev_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: evidence.block,
                reason: format!("history must not follow parent block {}", exit.prev_block),
            });
        }

        let tx_hash = evidence.tx.hash();
        if exit.prev_tx_hash == Some(tx_hash) {
            return Err(ExitGameError::ChallengeDoesNotContradict(slot));
        }
        if exit.challenge(tx_hash).is_some() {
            return Err(ExitGameError::DuplicateChallenge(tx_hash));
        }
        let ops = bond_ops(caller, attached, self.config.challenge_bond)?;

        self.check_history_tx(coin, evidence.block, &evidence.tx, &evidence.proof)?;
        if evidence.tx.is_deposit() {
            check_signer(&evidence.tx, &evidence.signature, evidence.tx.new_owner)?;
        } else {
            let parent = parent.ok_or_else(|| {
                ExitGameError::InvalidTransaction("parent of the cited transaction required".to_string())
            })?;
            if parent.block != evidence.tx.prev_block {
                return Err(ExitGameError::InvalidTransaction(format!(
                    "cited transaction references block {}, parent given for {}",
                    evidence.tx.prev_block, parent.block
                )));
            }
            self.check_history_tx(coin, parent.block, &parent.tx, &parent.proof)?;
            check_signer(&evidence.tx, &evidence.signature, parent.tx.new_owner)?;
        }

        let challenge = Challenge {
            tx_hash,
            exit_id: exit.id,
            challenging_block: evidence.block,
            implicated_owner: Some(evidence.tx.new_owner),
            challenger: caller,
            bond: self.config.challenge_bond,
            created_at: now,
            kind: ChallengeKind::Before,
        };
        self.register_challenge(slot, &ops, challenge)
    }

    /// Challenges the parent an exit claims.
    ///
    /// With a transaction, shows that the coin went to someone other than the
    /// exit's claimed parent owner in the parent block. Without one, `proof`
    /// must show that the coin did not move in the parent block at all.
    /// Neither can be answered, and neither carries a bond.
    pub fn challenge_wrong_parent(
        &mut self,
        caller: Address,
        slot: Slot,
        block: BlockNumber,
        tx: Option<Transaction>,
        proof: Proof,
    ) -> Result<(), ExitGameError> {
        self.check_challenge_wrong_parent(caller, slot, block, tx, proof)
            .map_err(rejected("challenge_wrong_parent"))
    }

    fn check_challenge_wrong_parent(
        &mut self,
        caller: Address,
        slot: Slot,
        block: BlockNumber,
        tx: Option<Transaction>,
        proof: Proof,
    ) -> Result<(), ExitGameError> {
        let now = self.now();
        let (coin, exit) = self.exiting(slot)?;
        self.check_challenge_window(exit, now)?;

        if exit.is_deposit_exit() || block != exit.prev_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block,
                reason: format!("exit parent block is {}", exit.prev_block),
            });
        }

        let tx_hash = match &tx {
            Some(tx) => {
                self.check_history_tx(coin, block, tx, &proof)?;
                if tx.new_owner == exit.prev_owner {
                    return Err(ExitGameError::ChallengeDoesNotContradict(slot));
                }
                tx.hash()
            }
            None => {
                self.ledger.check_absent(slot, block, &proof)?;
                *DEFAULT_LEAF
            }
        };
        if exit.challenge(tx_hash).is_some() {
            return Err(ExitGameError::DuplicateChallenge(tx_hash));
        }

        let challenge = Challenge {
            tx_hash,
            exit_id: exit.id,
            challenging_block: block,
            implicated_owner: None,
            challenger: caller,
            bond: Amount::zero(),
            created_at: now,
            kind: ChallengeKind::WrongParent,
        };
        self.register_challenge(slot, &[], challenge)
    }

    fn register_challenge(&mut self, slot: Slot, ops: &[BondOp], challenge: Challenge) -> Result<(), ExitGameError> {
        self.vault.settle(ops)?;

        let exit = self.exits.get_mut(&slot).ok_or(ExitGameError::UnknownCoin(slot))?;
        let (challenger, kind, tx_hash) = (challenge.challenger, challenge.kind, challenge.tx_hash);
        exit.challenge_count += 1;
        exit.challenges.push(challenge);

        info!(
            "Challenge {} on {} of coin {} by {:?} citing {:?} ({} pending)",
            kind.as_str(),
            exit.id,
            slot,
            challenger,
            tx_hash,
            exit.challenges.len()
        );
        metrics::CHALLENGES.with_label_values(&[kind.as_str()]).inc();
        self.emit(Event::Challenged {
            slot,
            challenger,
            kind,
            tx_hash,
        });
        Ok(())
    }

    /// Answers a pending challenge with a later spend by the implicated owner.
    ///
    /// Anyone may answer. The challenger's bond is returned in full.
    pub fn respond_challenge_before(
        &mut self,
        caller: Address,
        slot: Slot,
        challenged_tx_hash: Hash,
        evidence: Evidence,
    ) -> Result<(), ExitGameError> {
        self.check_response(caller, slot, challenged_tx_hash, evidence)
            .map_err(rejected("respond_challenge_before"))
    }

    fn check_response(
        &mut self,
        caller: Address,
        slot: Slot,
        challenged_tx_hash: Hash,
        evidence: Evidence,
    ) -> Result<(), ExitGameError> {
        let now = self.now();
        let (coin, exit) = self.exiting(slot)?;
        self.check_before_maturity(exit, now)?;

        let challenge = exit
            .challenge(challenged_tx_hash)
            .ok_or(ExitGameError::UnknownChallenge(challenged_tx_hash))?;
        let implicated = challenge.implicated_owner.ok_or_else(|| {
            ExitGameError::InvalidTransaction(format!("challenge {:?} cannot be answered", challenged_tx_hash))
        })?;

        if evidence.block <= challenge.challenging_block {
            return Err(ExitGameError::StaleOrFutureBlock {
                block: evidence.block,
                reason: format!("response must follow challenge block {}", challenge.challenging_block),
            });
        }
        if evidence.tx.prev_block != challenge.challenging_block {
            return Err(ExitGameError::InvalidTransaction(format!(
                "response references block {}, not challenge block {}",
                evidence.tx.prev_block, challenge.challenging_block
            )));
        }
        self.check_history_tx(coin, evidence.block, &evidence.tx, &evidence.proof)?;
        check_signer(&evidence.tx, &evidence.signature, implicated)?;

        let ops = if challenge.bond.is_zero() {
            Vec::new()
        } else {
            vec![BondOp::Free {
                owner: challenge.challenger,
                amount: challenge.bond,
            }]
        };
        self.vault.settle(&ops)?;

        let exit = self.exits.get_mut(&slot).ok_or(ExitGameError::UnknownCoin(slot))?;
        exit.challenges.retain(|c| c.tx_hash != challenged_tx_hash);
        info!(
            "Challenge {:?} on coin {} answered by {:?} ({} pending)",
            challenged_tx_hash,
            slot,
            caller,
            exit.challenges.len()
        );

        metrics::RESPONSES.inc();
        self.emit(Event::ChallengeResponded {
            slot,
            tx_hash: challenged_tx_hash,
        });
        self.publish_bond_ops(&ops);
        Ok(())
    }

    /// Slashes the exitor in favour of `challenger` and closes the exit.
    fn invalidate(
        &mut self,
        slot: Slot,
        challenger: Address,
        mut ops: Vec<BondOp>,
        tx_hash: Hash,
        kind: ChallengeKind,
    ) -> Result<(), ExitGameError> {
        let exit = self.exits.get(&slot).ok_or(ExitGameError::UnknownCoin(slot))?;
        ops.push(BondOp::Slash {
            from: exit.exitor,
            to: challenger,
            amount: exit.bond,
        });
        ops.push(BondOp::Free {
            owner: challenger,
            amount: self.config.challenge_bond,
        });
        ops.extend(pending_refunds(exit));
        self.vault.settle(&ops)?;

        let exit = self.close_exit(slot, CoinState::Deposited)?;
        info!("{} on coin {} invalidated by {} challenge from {:?}", exit.id, slot, kind.as_str(), challenger);

        metrics::CHALLENGES.with_label_values(&[kind.as_str()]).inc();
        metrics::EXITS_INVALIDATED.inc();
        self.emit(Event::Challenged {
            slot,
            challenger,
            kind,
            tx_hash,
        });
        self.publish_bond_ops(&ops);
        self.emit(Event::ExitInvalidated {
            slot,
            exitor: exit.exitor,
        });
        Ok(())
    }

    // Resolution

    /// Finalizes the exit of one coin once it has matured.
    pub fn finalize_exit(&mut self, slot: Slot) -> Result<ExitOutcome, ExitGameError> {
        self.check_finalize_exit(slot).map_err(rejected("finalize_exit"))
    }

    fn check_finalize_exit(&mut self, slot: Slot) -> Result<ExitOutcome, ExitGameError> {
        let now = self.now();
        let (_, exit) = self.exiting(slot)?;
        let matures_at = self.matures_at(exit);
        if now < matures_at {
            return Err(ExitGameError::WindowNotElapsed { matures_at, now });
        }

        self.resolve(&[slot])?
            .pop()
            .map(|(_, outcome)| outcome)
            .ok_or(ExitGameError::UnknownCoin(slot))
    }

    /// Finalizes every matured exit, in priority order.
    ///
    /// Exits that have not matured are left alone.
    pub fn finalize_exits(&mut self) -> Result<Vec<(Slot, ExitOutcome)>, ExitGameError> {
        let now = self.now();
        let matured: Vec<Slot> = self
            .queue
            .values()
            .copied()
            .filter(|slot| self.exits.get(slot).map_or(false, |exit| now >= self.matures_at(exit)))
            .collect();

        debug!("Finalizing {} of {} open exits", matured.len(), self.exits.len());
        self.resolve(&matured).map_err(rejected("finalize_exits"))
    }

    /// Resolves matured exits. An exit with no pending challenge is paid out;
    /// otherwise its bond goes to the earliest pending challenger and every
    /// challenger gets their own bond back.
    fn resolve(&mut self, slots: &[Slot]) -> Result<Vec<(Slot, ExitOutcome)>, ExitGameError> {
        let mut ops = Vec::new();
        let mut outcomes = Vec::with_capacity(slots.len());

        for &slot in slots {
            let exit = self.exits.get(&slot).ok_or(ExitGameError::UnknownCoin(slot))?;
            match exit.challenges.first() {
                None => {
                    ops.push(BondOp::Free {
                        owner: exit.exitor,
                        amount: exit.bond,
                    });
                    outcomes.push((slot, ExitOutcome::Finalized { owner: exit.exitor }));
                }
                Some(first) => {
                    ops.push(BondOp::Slash {
                        from: exit.exitor,
                        to: first.challenger,
                        amount: exit.bond,
                    });
                    ops.extend(pending_refunds(exit));
                    outcomes.push((
                        slot,
                        ExitOutcome::Invalidated {
                            rewarded: first.challenger,
                        },
                    ));
                }
            }
        }
        self.vault.settle(&ops)?;
        self.publish_bond_ops(&ops);

        for &(slot, outcome) in &outcomes {
            match outcome {
                ExitOutcome::Finalized { owner } => {
                    let exit = self.close_exit(slot, CoinState::Exited)?;
                    info!("{} on coin {} finalized for {:?}", exit.id, slot, owner);
                    metrics::EXITS_FINALIZED.inc();
                    self.emit(Event::ExitFinalized { slot, owner });
                }
                ExitOutcome::Invalidated { rewarded } => {
                    let exit = self.close_exit(slot, CoinState::Deposited)?;
                    info!(
                        "{} on coin {} invalidated by {} pending challenges, bond to {:?}",
                        exit.id,
                        slot,
                        exit.challenges.len(),
                        rewarded
                    );
                    metrics::EXITS_INVALIDATED.inc();
                    self.emit(Event::ExitInvalidated {
                        slot,
                        exitor: exit.exitor,
                    });
                }
            }
        }

        Ok(outcomes)
    }

    /// Cancels the caller's exits on `slots` and refunds their bonds.
    ///
    /// Every slot is checked before any exit is cancelled. An exit with
    /// pending challenges cannot be cancelled.
    pub fn cancel_exits(&mut self, caller: Address, slots: &[Slot]) -> Result<(), ExitGameError> {
        self.check_cancel_exits(caller, slots).map_err(rejected("cancel_exits"))
    }

    fn check_cancel_exits(&mut self, caller: Address, slots: &[Slot]) -> Result<(), ExitGameError> {
        let slots: BTreeSet<Slot> = slots.iter().copied().collect();
        let mut ops = Vec::with_capacity(slots.len());

        for &slot in &slots {
            let (_, exit) = self.exiting(slot)?;
            if exit.exitor != caller {
                return Err(ExitGameError::UnauthorizedCaller {
                    caller,
                    expected: exit.exitor,
                });
            }
            if !exit.challenges.is_empty() {
                return Err(ExitGameError::UnresolvedChallengesRemain {
                    slot,
                    count: exit.challenges.len(),
                });
            }
            ops.push(BondOp::Free {
                owner: caller,
                amount: exit.bond,
            });
        }
        self.vault.settle(&ops)?;
        self.publish_bond_ops(&ops);

        for slot in slots {
            let exit = self.close_exit(slot, CoinState::Deposited)?;
            info!("{} on coin {} cancelled", exit.id, slot);
            self.emit(Event::ExitCancelled { slot, owner: caller });
        }
        Ok(())
    }

    /// Releases a finalized coin to its owner, returning the asset for the
    /// custody adapter to transfer.
    pub fn withdraw(&mut self, caller: Address, slot: Slot) -> Result<AssetRef, ExitGameError> {
        self.check_withdraw(caller, slot).map_err(rejected("withdraw"))
    }

    fn check_withdraw(&mut self, caller: Address, slot: Slot) -> Result<AssetRef, ExitGameError> {
        let coin = self.registry.get(slot)?;
        coin.expect_state(CoinState::Exited)?;
        if coin.owner != caller {
            return Err(ExitGameError::UnauthorizedCaller {
                caller,
                expected: coin.owner,
            });
        }

        let coin = self.registry.remove(slot)?;
        let to_operator = coin.owner == self.config.operator;
        info!("Coin {} withdrawn by {:?}", slot, coin.owner);

        self.emit(Event::Withdrew {
            slot,
            owner: coin.owner,
            denomination: coin.asset.denomination,
            to_operator,
        });
        Ok(coin.asset)
    }

    /// Pays out the caller's withdrawable bond balance.
    pub fn withdraw_bonds(&mut self, caller: Address) -> Amount {
        let amount = self.vault.withdraw(caller);
        if !amount.is_zero() {
            info!("{:?} withdrew {} in bonds", caller, amount);
            self.emit(Event::WithdrewBonds { from: caller, amount });
        }
        amount
    }

    // Accessors

    /// Returns the game parameters.
    pub fn config(&self) -> &ExitGameConfig {
        &self.config
    }

    /// Returns the coin at `slot`.
    pub fn coin(&self, slot: Slot) -> Option<&Coin> {
        self.registry.get(slot).ok()
    }

    /// Returns the open exit on `slot`.
    pub fn exit(&self, slot: Slot) -> Option<&Exit> {
        self.exits.get(&slot)
    }

    /// Returns the open exit with `id`.
    pub fn exit_of(&self, id: ExitId) -> Option<&Exit> {
        self.exits.values().find(|exit| exit.id == id)
    }

    /// Returns the pending challenges against the exit on `slot`.
    pub fn challenges(&self, slot: Slot) -> &[Challenge] {
        self.exits.get(&slot).map(|exit| exit.challenges.as_slice()).unwrap_or(&[])
    }

    /// Returns the bond balances of `owner`.
    pub fn balance_of(&self, owner: Address) -> Balance {
        self.vault.balance_of(owner)
    }

    /// Returns the open exits in processing order.
    pub fn pending_exits(&self) -> Vec<&Exit> {
        self.queue.values().filter_map(|slot| self.exits.get(slot)).collect()
    }

    /// Returns the root recorded for block `number`.
    pub fn root_at(&self, number: BlockNumber) -> Option<Hash> {
        self.ledger.root_at(number)
    }

    /// Returns the block ledger.
    pub fn ledger(&self) -> &BlockLedger {
        &self.ledger
    }

    /// Returns the coin registry.
    pub fn registry(&self) -> &CoinRegistry {
        &self.registry
    }

    // Helpers

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn emit(&mut self, event: Event) {
        debug!("Publishing {:?}", event);
        self.sink.publish(event);
    }

    fn publish_bond_ops(&mut self, ops: &[BondOp]) {
        for op in ops {
            match *op {
                BondOp::Free { owner, amount } if !amount.is_zero() => self.emit(Event::BondFreed { owner, amount }),
                BondOp::Slash { from, to, amount } if !amount.is_zero() => {
                    self.emit(Event::BondSlashed { from, to, amount })
                }
                _ => {}
            }
        }
    }

    fn matures_at(&self, exit: &Exit) -> Timestamp {
        exit.created_at.saturating_add(self.config.maturity_period)
    }

    fn check_before_maturity(&self, exit: &Exit, now: Timestamp) -> Result<(), ExitGameError> {
        let deadline = self.matures_at(exit);
        if now >= deadline {
            return Err(ExitGameError::WindowExpired { deadline, now });
        }
        Ok(())
    }

    fn check_challenge_window(&self, exit: &Exit, now: Timestamp) -> Result<(), ExitGameError> {
        let deadline = exit.created_at.saturating_add(self.config.challenge_window);
        if now > deadline {
            return Err(ExitGameError::WindowExpired { deadline, now });
        }
        Ok(())
    }

    fn startable_coin(&self, slot: Slot) -> Result<&Coin, ExitGameError> {
        let coin = self.registry.get(slot)?;
        match coin.state {
            CoinState::Deposited => Ok(coin),
            CoinState::Exiting => Err(ExitGameError::AlreadyExiting(slot)),
            actual => Err(ExitGameError::CoinNotInExpectedState {
                slot,
                expected: CoinState::Deposited,
                actual,
            }),
        }
    }

    fn exiting(&self, slot: Slot) -> Result<(&Coin, &Exit), ExitGameError> {
        let coin = self.registry.get(slot)?;
        coin.expect_state(CoinState::Exiting)?;
        let exit = self.exits.get(&slot).ok_or(ExitGameError::CoinNotInExpectedState {
            slot,
            expected: CoinState::Exiting,
            actual: coin.state,
        })?;
        Ok((coin, exit))
    }

    /// Removes the exit on `slot` and moves its coin to `state`.
    fn close_exit(&mut self, slot: Slot, state: CoinState) -> Result<Exit, ExitGameError> {
        let exit = self.exits.remove(&slot).ok_or(ExitGameError::UnknownCoin(slot))?;
        self.queue.remove(&exit.priority);

        let coin = self.registry.get_mut(slot)?;
        coin.state = state;
        coin.exit = None;
        if state == CoinState::Exited {
            coin.owner = exit.exitor;
        }

        metrics::PENDING_EXITS.set(self.exits.len() as f64);
        Ok(exit)
    }

    /// Checks that `tx` is a transaction of `coin` included in `block`.
    fn check_history_tx(
        &self,
        coin: &Coin,
        block: BlockNumber,
        tx: &Transaction,
        proof: &Proof,
    ) -> Result<(), ExitGameError> {
        if tx.slot != coin.slot {
            return Err(ExitGameError::InvalidTransaction(format!(
                "transaction moves coin {}, not {}",
                tx.slot, coin.slot
            )));
        }

        if self.ledger.is_deposit_block(block) {
            if !tx.is_deposit() || block != coin.deposit_block || tx.new_owner != coin.owner {
                return Err(ExitGameError::InvalidTransaction(format!(
                    "block {} only holds the deposit of coin {} to {:?}",
                    block, coin.slot, coin.owner
                )));
            }
        } else {
            if tx.is_deposit() {
                return Err(ExitGameError::InvalidTransaction(format!(
                    "deposit transaction outside deposit block {}",
                    coin.deposit_block
                )));
            }
            if block < coin.deposit_block {
                return Err(ExitGameError::StaleOrFutureBlock {
                    block,
                    reason: format!("coin {} was deposited in block {}", coin.slot, coin.deposit_block),
                });
            }
            if tx.prev_block >= block {
                return Err(ExitGameError::InvalidTransaction(format!(
                    "transaction in block {} references later block {}",
                    block, tx.prev_block
                )));
            }
        }

        self.ledger.check_included(coin.slot, tx.hash(), block, proof)
    }
}

/// Bond movements for `attached` value paying a `required` bond.
fn bond_ops(caller: Address, attached: Amount, required: Amount) -> Result<Vec<BondOp>, ExitGameError> {
    if attached < required {
        return Err(ExitGameError::InsufficientBond {
            required,
            available: attached,
        });
    }

    let mut ops = vec![BondOp::Lock {
        owner: caller,
        amount: required,
    }];
    let excess = attached - required;
    if !excess.is_zero() {
        ops.push(BondOp::Credit {
            owner: caller,
            amount: excess,
        });
    }
    Ok(ops)
}

/// Refunds for every bonded challenge pending on `exit`.
fn pending_refunds(exit: &Exit) -> impl Iterator<Item = BondOp> + '_ {
    exit.challenges
        .iter()
        .filter(|c| !c.bond.is_zero())
        .map(|c| BondOp::Free {
            owner: c.challenger,
            amount: c.bond,
        })
}

fn check_exiting_tx(caller: Address, slot: Slot, tx: &Transaction) -> Result<(), ExitGameError> {
    if tx.slot != slot {
        return Err(ExitGameError::InvalidTransaction(format!(
            "exiting transaction moves coin {}, not {}",
            tx.slot, slot
        )));
    }
    if tx.new_owner != caller {
        return Err(ExitGameError::UnauthorizedCaller {
            caller,
            expected: tx.new_owner,
        });
    }
    Ok(())
}

fn check_signer(tx: &Transaction, signature: &[u8], expected: Address) -> Result<(), ExitGameError> {
    tx.verify_signer(signature, expected).map_err(ExitGameError::from_signature)
}

fn rejected(operation: &'static str) -> impl Fn(ExitGameError) -> ExitGameError {
    move |e| {
        warn!("Rejected {}: {}", operation, e);
        e
    }
}
