/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the consensus thread, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::{
    bft::CommitmentLevel,
    execution::ExecuteError,
    turbine::shred::FecSetKey,
    types::{
        data_types::{Epoch, Slot, SlotHash, TotalStake},
        vote::Vote,
    },
};

pub enum Event {
    // Events that change the fork pool, the fork-choice tree or the finalized root.
    InsertBlock(InsertBlockEvent),
    FinalizeBlock(FinalizeBlockEvent),
    PruneFork(PruneForkEvent),
    UpdateStakeTable(UpdateStakeTableEvent),
    // Events that involve votes.
    Vote(VoteEvent),
    ReceiveVote(ReceiveVoteEvent),
    // Replay events.
    StartReplay(StartReplayEvent),
    CompleteFecSet(CompleteFecSetEvent),
    RejectBlock(RejectBlockEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            if event_publisher.send(event).is_err() {
                log::debug!("event bus is gone, dropping event");
            }
        }
    }
}

/// A block was executed, and entered the fork pool and the fork-choice tree.
pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: SlotHash,
    pub parent: SlotHash,
}

/// A block became finalized.
pub struct FinalizeBlockEvent {
    pub timestamp: SystemTime,
    pub block: SlotHash,
}

/// A fork was released from the fork pool because it does not descend from the finalized root.
pub struct PruneForkEvent {
    pub timestamp: SystemTime,
    pub slot: Slot,
}

pub struct UpdateStakeTableEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub total_stake: TotalStake,
}

/// This validator broadcast a vote.
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

/// A vote, from gossip or from inside a block, was tallied.
pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
    pub level: CommitmentLevel,
}

pub struct StartReplayEvent {
    pub timestamp: SystemTime,
    pub root: SlotHash,
    pub restored: bool,
}

/// The consensus thread took a completed FEC set from shred ingest.
pub struct CompleteFecSetEvent {
    pub timestamp: SystemTime,
    pub key: FecSetKey,
}

/// A reassembled block was dropped without entering the fork pool.
pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub slot: Slot,
    pub reason: RejectBlockReason,
}

pub enum RejectBlockReason {
    Execution(ExecuteError),
    /// The block's FEC sets could not be joined into a block: a payload was malformed, or the sets
    /// disagree on the parent slot or on which set is the last one.
    Malformed,
    /// The fork pool or the fork-choice tree is full.
    Capacity,
    /// The block's parent is not in the fork pool, or the block's slot already has a fork.
    NotExtendable,
}
