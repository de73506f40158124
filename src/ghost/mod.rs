/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Stake-weighted fork choice.
//!
//! # The ghost tree
//!
//! [`Ghost`] mirrors every executed block as a [`GhostNode`] keyed by [`SlotHash`](crate::types::data_types::SlotHash).
//! Each node tracks two quantities:
//! 1. **Stake**: the sum of the stake of validators whose latest vote is for exactly this node.
//! 2. **Weight**: the node's stake plus the weight of all of its children, i.e., the stake of every
//!    validator whose latest vote is for this node or one of its descendants.
//!
//! Since a vote for a block is also a vote for each of its ancestors, weight is what matters for fork
//! choice and finality.
//!
//! # Votes
//!
//! Only a validator's latest vote counts. When a validator votes again (for a strictly higher slot),
//! the stake recorded with its previous vote is subtracted along the previous vote's path to the root,
//! and its current stake is added along the new vote's path. Every validator therefore contributes to
//! exactly one leaf-to-root path at any time.
//!
//! # Head
//!
//! [`Ghost::head`] implements the greedy heaviest-observed-subtree rule: starting at the root, descend
//! into the heaviest child until reaching a leaf. Ties are broken by lower slot, then by the
//! lexicographically smaller hash, so that any two observers with the same latest votes pick the same
//! head regardless of the order in which they saw those votes.

pub mod tree;

pub use tree::{Ghost, GhostError, GhostNode, NodeHandle};
