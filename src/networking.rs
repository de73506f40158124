/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable gossip and repair.
//!
//! The consensus core does not speak any wire protocol. Users provide an implementation of
//! [`Network`] that carries votes over gossip and asks peers for missing shreds.

use crate::{turbine::shred::FecSetKey, types::vote::SignedVote};

pub trait Network: Clone + Send + 'static {
    /// Send this validator's vote to all peers without blocking.
    fn broadcast_vote(&mut self, vote: SignedVote);

    /// Ask peers for the shreds of a FEC set that could not be reassembled, without blocking.
    fn request_repair(&mut self, key: FecSetKey);

    /// Receive a vote gossiped by any peer. Returns immediately with a `None` if no vote is available
    /// now.
    fn recv_vote(&mut self) -> Option<SignedVote>;
}
