/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus core of a slot-based proof-of-stake validator.
//!
//! Blocks arrive as erasure-coded shreds. The [shred reassembler](turbine) recovers each FEC set from
//! any `k` of its shreds, the [replay stage](replay) joins the sets of a slot into a block and executes
//! it, and the result becomes a [fork](forks) in a bounded fork pool and a node in the stake-weighted
//! [fork-choice tree](ghost). Votes, from blocks and from gossip, are [tallied](bft) against the
//! epoch's stake table: a block that validators holding two thirds of the stake voted for (directly or
//! through a descendant) is finalized, the finalized root advances to it, and every fork that does not
//! descend from it is pruned.
//!
//! The state of the consensus core can be persisted as an [image](snapshot) and restored on restart.
//!
//! Users provide the execution engine ([`Execution`](execution::Execution)), peer-to-peer networking
//! ([`Network`](networking::Network)) and optionally a ledger to cross-check finality against
//! ([`Blockstore`](execution::Blockstore)), and start everything with
//! [`ReplaySpec`](replay::ReplaySpec).

pub mod arena;

pub mod bft;

pub mod config;

pub mod event_bus;

pub mod events;

pub mod execution;

pub mod forks;

pub mod ghost;

pub mod logging;

pub mod networking;

pub mod replay;

pub mod snapshot;

pub mod turbine;

pub mod types;
