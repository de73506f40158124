/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fork tree and its frontier.
//!
//! # Forks
//!
//! A [`Fork`] is a candidate chain tip together with the execution state produced by executing its
//! block. Forks are records in a bounded pool (an [`Arena`](crate::arena::Arena) of capacity
//! `forks_max`) and link to their parent fork by handle, so the pool as a whole is a tree rooted at
//! the most recently finalized fork.
//!
//! # Frontier
//!
//! The frontier is the set of forks that have not been extended yet: the tips that new blocks are
//! expected to build on. Inserting a fork into the frontier removes its parent from it.
//!
//! # Reclaiming capacity
//!
//! [`Forks::prune`] is the only operation that returns pool capacity: when a slot is finalized it
//! becomes the new root, and every fork that does not descend from it is released. A pool that is
//! never pruned eventually fails [`Forks::acquire`] with [`ForkError::Exhausted`].

pub mod fork_tree;

pub use fork_tree::{Fork, ForkError, ForkHandle, Forks};
