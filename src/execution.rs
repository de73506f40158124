/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable block execution and ledger storage.
//!
//! The consensus core treats execution state as opaque [`ExecutionHandle`]s. It asks an
//! [`Execution`] engine to execute every reassembled block against its parent fork's state, and
//! tells the engine when a fork's state can be discarded.

use crate::{
    forks::Fork,
    types::{
        data_types::{CryptoHash, ExecutionHandle, Slot},
        vote::Vote,
    },
};

/// Methods that a type needs to implement to serve as the validator's execution engine.
///
/// Implementations are expected to be *deterministic*: executing the same block against the same
/// parent state must produce the same state and bank hash on every validator.
pub trait Execution: Send + 'static {
    /// Execute the block produced in `slot`, whose bytes are `block`, on top of `parent`'s state.
    ///
    /// # Return value
    /// If the block is valid, the new state, the block's bank hash and the votes carried by the
    /// block's transactions (with their signatures already verified). Else, the reason why the block
    /// is invalid.
    fn execute(&mut self, parent: &Fork, slot: Slot, block: &[u8]) -> Result<ExecutedBlock, ExecuteError>;

    /// Called when `state` no longer belongs to any fork, because its fork was pruned or its block
    /// failed to execute.
    fn discard(&mut self, _state: ExecutionHandle) {}
}

/// The result of executing one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedBlock {
    pub state: ExecutionHandle,
    pub hash: CryptoHash,
    pub votes: Vec<Vote>,
}

/// Enumerates the circumstances in which an [`Execution`] engine could reject a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteError {
    /// The block's bytes could not be parsed into transactions.
    MalformedBlock,

    /// The contents of the block, on top of its parent, are invalid in the view of the runtime's
    /// validation rules.
    InvalidBlock,
}

/// Read access to the validator's ledger, used to cross-check finality.
pub trait Blockstore: Send + 'static {
    /// Get the hash that the ledger has recorded as finalized for `slot`, if it has recorded one.
    fn finalized_hash(&self, slot: Slot) -> Option<CryptoHash>;
}
