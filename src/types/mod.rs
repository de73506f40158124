//! Types used across multiple components of the consensus core.
//!
//! Types specific to a single component, e.g., ghost nodes or FEC sets, can be found in that
//! component's module.

pub mod data_types;

pub mod keypair;

pub mod stake_table;

pub mod vote;
