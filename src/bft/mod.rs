/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Vote tallying and finality.
//!
//! [`Bft`] owns the fork pool ([`Forks`](crate::forks::Forks)), the fork-choice tree
//! ([`Ghost`](crate::ghost::Ghost)) and the current epoch's [`StakeTable`](crate::types::stake_table::StakeTable).
//! Every vote is looked up in the stake table and forwarded to ghost. The subtree weight of the voted
//! block then decides its [`CommitmentLevel`]:
//!
//! |Level|Condition|
//! |---|---|
//! |[`Finalized`](CommitmentLevel::Finalized)|`3 * weight >= 2 * total_stake`|
//! |[`OptimisticallyConfirmed`](CommitmentLevel::OptimisticallyConfirmed)|`2 * weight >= total_stake`|
//! |[`Processed`](CommitmentLevel::Processed)|otherwise|
//!
//! Since a vote for a block also counts for its ancestors, a vote can raise the commitment level of
//! blocks above the one it names. When a block that is higher than the current root becomes
//! finalized, the root advances to it, and ghost and the fork pool are pruned in the same step.
//!
//! Finality is monotonic: the finalized root only ever moves to higher slots on the same chain.

pub mod tally;

pub use tally::{Bft, BftError, CommitmentLevel, RootAdvance, Tally};
