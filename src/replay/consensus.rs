/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus thread.
//!
//! The consensus thread is a loop that, on every iteration:
//! 1. Takes at most one completed FEC set from shred ingest, waiting for up to [`POLL_INTERVAL`]. When
//!    the set completes a block whose parent has been replayed, the block is executed on top of its
//!    parent's fork and inserted into the fork pool and the fork-choice tree, and the votes carried
//!    by the block are tallied.
//! 2. Tallies every vote the network has received since the previous iteration.
//! 3. Votes for the head of the heaviest chain, if this validator has a keypair and the head is at a
//!    higher slot than its previous vote.
//!
//! Whenever a tallied vote finalizes a block, the root advance is applied: the pruned forks' states are
//! discarded, shred ingest stops accepting shreds at or below the new root, and the finalized blocks
//! are checked against the blockstore.
//!
//! Blocks and votes that arrive ahead of their parent or block are held, but only within `slot_horizon`
//! slots above the finalized root. Held votes must come from validators in the current stake table,
//! and at most one is held per validator and slot.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::{
    bft::{Bft, BftError, RootAdvance},
    events::*,
    execution::{Blockstore, Execution},
    forks::{Fork, ForkError, ForkHandle},
    ghost::GhostError,
    networking::Network,
    turbine::{fec_set::CompletedFecSet, ingest::ShredIngest},
    types::{
        data_types::{Slot, SlotHash},
        keypair::Keypair,
        vote::Vote,
    },
};

use super::assembler::{AssembledBlock, BlockAssembler};

/// How long the consensus thread waits for a completed FEC set before polling for votes.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// State shared between the consensus thread and the [`Replay`](super::Replay) handle.
pub(crate) struct ConsensusState {
    pub(crate) bft: Bft,
    pub(crate) last_vote_slot: Option<Slot>,
}

pub(crate) type SharedState = Arc<Mutex<ConsensusState>>;

pub(crate) fn lock(state: &SharedState) -> MutexGuard<ConsensusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Consensus<E: Execution, N: Network> {
    pub(crate) state: SharedState,
    pub(crate) execution: E,
    pub(crate) network: N,
    pub(crate) ingest: ShredIngest<N>,
    pub(crate) blockstore: Option<Box<dyn Blockstore>>,
    pub(crate) keypair: Option<Keypair>,
    pub(crate) completed_sets: Receiver<CompletedFecSet>,
    pub(crate) event_publisher: Option<Sender<Event>>,
    pub(crate) early_vote_max: usize,
    pub(crate) slot_horizon: u64,
    assembler: BlockAssembler,
    // Assembled blocks whose parent has not been replayed yet.
    orphans: BTreeMap<Slot, AssembledBlock>,
    // Votes for blocks that have not been replayed yet, by slot.
    early_votes: BTreeMap<Slot, Vec<Vote>>,
}

impl<E: Execution, N: Network> Consensus<E, N> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        state: SharedState,
        execution: E,
        network: N,
        ingest: ShredIngest<N>,
        blockstore: Option<Box<dyn Blockstore>>,
        keypair: Option<Keypair>,
        completed_sets: Receiver<CompletedFecSet>,
        event_publisher: Option<Sender<Event>>,
        early_vote_max: usize,
        slot_horizon: u64,
    ) -> Self {
        Self {
            state,
            execution,
            network,
            ingest,
            blockstore,
            keypair,
            completed_sets,
            event_publisher,
            early_vote_max,
            slot_horizon,
            assembler: BlockAssembler::new(),
            orphans: BTreeMap::new(),
            early_votes: BTreeMap::new(),
        }
    }

    pub(crate) fn start(mut self, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("consensus thread disconnected from main thread")
                }
            }

            match self.completed_sets.recv_timeout(POLL_INTERVAL) {
                Ok(set) => self.on_completed_set(set),
                Err(RecvTimeoutError::Timeout) => (),
                // Every shred ingest handle is gone, only votes can still arrive.
                Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
            }

            while let Some(signed_vote) = self.network.recv_vote() {
                if signed_vote.is_correct() {
                    self.on_vote(signed_vote.vote);
                } else {
                    log::debug!(
                        "dropping gossiped vote with an invalid signature for slot {}",
                        signed_vote.vote.key.slot
                    );
                }
            }

            self.vote_for_head();
        })
    }

    pub(crate) fn on_completed_set(&mut self, set: CompletedFecSet) {
        let key = set.key();
        Event::publish(
            &self.event_publisher,
            Event::CompleteFecSet(CompleteFecSetEvent {
                timestamp: SystemTime::now(),
                key,
            }),
        );
        let root = lock(&self.state).bft.finalized_root().slot;
        if key.slot <= root {
            log::debug!("ignoring completed FEC set {} at or below the root", key);
            return;
        }
        if !self.within_horizon(key.slot, root) {
            log::debug!("ignoring completed FEC set {} beyond slot {}", key, self.horizon(root));
            return self.reject_block(key.slot, RejectBlockReason::Capacity);
        }

        match self.assembler.insert(set) {
            Ok(Some(block)) => {
                self.orphans.insert(block.slot, block);
                self.replay_orphans();
            }
            Ok(None) => (),
            Err(err) => {
                log::debug!("dropping the FEC sets of slot {}: {:?}", key.slot, err);
                self.reject_block(key.slot, RejectBlockReason::Malformed);
            }
        }
    }

    // Replay every orphan whose parent is in the fork pool, lowest slot first, until none is left.
    fn replay_orphans(&mut self) {
        loop {
            let (ready, root) = {
                let state = lock(&self.state);
                let root = state.bft.finalized_root();
                let ready = self
                    .orphans
                    .values()
                    .find(|block| {
                        block.parent_slot <= root.slot
                            || state.bft.forks().query(block.parent_slot).is_some()
                    })
                    .map(|block| block.slot);
                (ready, root)
            };
            let Some(slot) = ready else { return };
            let Some(block) = self.orphans.remove(&slot) else { return };

            if block.parent_slot < root.slot {
                self.reject_block(block.slot, RejectBlockReason::NotExtendable);
            } else {
                self.replay_block(block);
            }
        }
    }

    fn replay_block(&mut self, block: AssembledBlock) {
        let (parent, handle) = match self.acquire_fork(&block) {
            Ok(acquired) => acquired,
            Err(reason) => return self.reject_block(block.slot, reason),
        };

        let executed = match self.execution.execute(&parent, block.slot, &block.bytes) {
            Ok(executed) => executed,
            Err(err) => {
                if let Err(release_err) = lock(&self.state).bft.release_fork(handle) {
                    log::error!("failed to release fork for slot {}: {:?}", block.slot, release_err);
                }
                return self.reject_block(block.slot, RejectBlockReason::Execution(err));
            }
        };

        let inserted = lock(&self.state)
            .bft
            .insert_block(handle, executed.state, executed.hash);
        let key = match inserted {
            Ok(key) => key,
            Err(err) => {
                log::debug!("cannot insert the block of slot {}: {:?}", block.slot, err);
                self.execution.discard(executed.state);
                let reason = match err {
                    BftError::GhostError(GhostError::NodeCapacityExhausted { .. }) => {
                        RejectBlockReason::Capacity
                    }
                    _ => RejectBlockReason::NotExtendable,
                };
                return self.reject_block(block.slot, reason);
            }
        };

        Event::publish(
            &self.event_publisher,
            Event::InsertBlock(InsertBlockEvent {
                timestamp: SystemTime::now(),
                block: key,
                parent: SlotHash::new(parent.slot, parent.hash),
            }),
        );

        for vote in executed.votes {
            self.on_vote(vote);
        }
        if let Some(votes) = self.early_votes.remove(&key.slot) {
            for vote in votes {
                self.on_vote(vote);
            }
        }
    }

    pub(crate) fn on_vote(&mut self, vote: Vote) {
        let result = lock(&self.state).bft.tally_vote(&vote.validator, vote.key);
        match result {
            Ok(tally) => {
                Event::publish(
                    &self.event_publisher,
                    Event::ReceiveVote(ReceiveVoteEvent {
                        timestamp: SystemTime::now(),
                        vote,
                        level: tally.level,
                    }),
                );
                if let Some(advance) = tally.advanced {
                    self.on_root_advance(advance);
                }
            }
            Err(BftError::GhostError(GhostError::UnknownKey { key })) => {
                self.hold_early_vote(vote, key)
            }
            Err(err) => log::debug!("vote for slot {} not tallied: {:?}", vote.key.slot, err),
        }
    }

    fn acquire_fork(&self, block: &AssembledBlock) -> Result<(Fork, ForkHandle), RejectBlockReason> {
        let mut state = lock(&self.state);
        let parent = match state.bft.forks().query(block.parent_slot) {
            Some((_, parent)) => parent.clone(),
            None => return Err(RejectBlockReason::NotExtendable),
        };
        match state.bft.acquire_fork(block.slot, block.parent_slot) {
            Ok(handle) => Ok((parent, handle)),
            Err(err) => {
                log::debug!("cannot acquire a fork for slot {}: {:?}", block.slot, err);
                match err {
                    BftError::ForkError(ForkError::Exhausted { .. }) => Err(RejectBlockReason::Capacity),
                    _ => Err(RejectBlockReason::NotExtendable),
                }
            }
        }
    }

    fn hold_early_vote(&mut self, vote: Vote, key: SlotHash) {
        {
            let state = lock(&self.state);
            let root = state.bft.finalized_root().slot;
            if !state.bft.stake_table().contains(&vote.validator) {
                log::debug!("not holding early vote for slot {} from an unstaked validator", key.slot);
                return;
            }
            if !self.within_horizon(key.slot, root) {
                log::debug!("not holding early vote for slot {} beyond slot {}", key.slot, self.horizon(root));
                return;
            }
        }
        let votes = self.early_votes.entry(key.slot).or_default();
        if votes.len() < self.early_vote_max
            && !votes.iter().any(|held| held.validator == vote.validator)
        {
            votes.push(vote);
        }
    }

    fn horizon(&self, root: Slot) -> Slot {
        root.saturating_add(self.slot_horizon)
    }

    fn within_horizon(&self, slot: Slot, root: Slot) -> bool {
        slot <= self.horizon(root)
    }

    /// Number of votes held until their block is replayed.
    pub(crate) fn held_early_votes(&self) -> usize {
        self.early_votes.values().map(Vec::len).sum()
    }

    /// Number of assembled blocks waiting for their parent.
    pub(crate) fn held_orphans(&self) -> usize {
        self.orphans.len()
    }

    fn on_root_advance(&mut self, advance: RootAdvance) {
        for block in &advance.finalized {
            self.check_finalized(block);
            Event::publish(
                &self.event_publisher,
                Event::FinalizeBlock(FinalizeBlockEvent {
                    timestamp: SystemTime::now(),
                    block: *block,
                }),
            );
        }
        for fork in advance.pruned_forks {
            self.execution.discard(fork.state);
            Event::publish(
                &self.event_publisher,
                Event::PruneFork(PruneForkEvent {
                    timestamp: SystemTime::now(),
                    slot: fork.slot,
                }),
            );
        }

        let root = advance.root.slot;
        self.ingest.set_root(root);
        self.assembler.prune(root);
        self.orphans.retain(|slot, _| *slot > root);
        self.early_votes.retain(|slot, _| *slot > root);
        log::debug!(
            "root advanced to slot {}: holding {} orphans and {} early votes",
            root,
            self.held_orphans(),
            self.held_early_votes()
        );
    }

    // A disagreement with the ledger means this validator's view of finality cannot be trusted.
    fn check_finalized(&self, block: &SlotHash) {
        let Some(blockstore) = &self.blockstore else { return };
        if let Some(recorded) = blockstore.finalized_hash(block.slot) {
            if recorded != block.hash {
                panic!(
                    "slot {} finalized with hash {}, but the blockstore records {}",
                    block.slot, block.hash, recorded
                );
            }
        }
    }

    pub(crate) fn vote_for_head(&mut self) {
        let Some(keypair) = &self.keypair else { return };
        let head = {
            let state = lock(&self.state);
            let head = state.bft.head();
            let voted_higher = state
                .last_vote_slot
                .map_or(false, |last_vote_slot| last_vote_slot >= head.slot);
            if voted_higher || head.slot <= state.bft.finalized_root().slot {
                return;
            }
            head
        };

        let signed_vote = keypair.sign_vote(head);
        lock(&self.state).last_vote_slot = Some(head.slot);
        self.network.broadcast_vote(signed_vote.clone());
        Event::publish(
            &self.event_publisher,
            Event::Vote(VoteEvent {
                timestamp: SystemTime::now(),
                vote: signed_vote.vote,
            }),
        );
        self.on_vote(signed_vote.vote);
    }

    fn reject_block(&mut self, slot: Slot, reason: RejectBlockReason) {
        Event::publish(
            &self.event_publisher,
            Event::RejectBlock(RejectBlockEvent {
                timestamp: SystemTime::now(),
                slot,
                reason,
            }),
        );
    }
}
