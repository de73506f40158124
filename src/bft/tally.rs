/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Main type: [`Bft`].

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;
use std::collections::BTreeMap;

use crate::{
    forks::{Fork, ForkError, ForkHandle, Forks},
    ghost::{tree::GhostImage, Ghost, GhostError},
    types::{
        data_types::{CryptoHash, Epoch, ExecutionHandle, Slot, SlotHash, TotalStake},
        stake_table::{StakeTable, StakeTableBytes},
    },
};

/// How settled a block is, from weakest to strongest.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum CommitmentLevel {
    /// The block has been executed and inserted into the fork-choice tree.
    Processed,
    /// Validators holding at least half of the total stake voted for the block or a descendant.
    OptimisticallyConfirmed,
    /// Validators holding at least two thirds of the total stake voted for the block or a
    /// descendant. Finalized blocks are never reverted.
    Finalized,
}

impl CommitmentLevel {
    /// Classify a block whose subtree carries `weight` out of `total_stake`.
    pub fn classify(weight: TotalStake, total_stake: TotalStake) -> CommitmentLevel {
        let (weight, total_stake) = (weight.int(), total_stake.int());
        if total_stake == 0 {
            CommitmentLevel::Processed
        } else if 3 * weight >= 2 * total_stake {
            CommitmentLevel::Finalized
        } else if 2 * weight >= total_stake {
            CommitmentLevel::OptimisticallyConfirmed
        } else {
            CommitmentLevel::Processed
        }
    }
}

/// Outcome of [`Bft::tally_vote`].
#[derive(Debug)]
pub struct Tally {
    /// Commitment level of the voted block after the vote was counted.
    pub level: CommitmentLevel,
    /// Set if the vote finalized a block above the previous root.
    pub advanced: Option<RootAdvance>,
}

/// Outcome of moving the finalized root.
#[derive(Debug)]
pub struct RootAdvance {
    /// The new finalized root.
    pub root: SlotHash,
    /// Blocks that became finalized with this advance, in ascending slot order, ending with `root`.
    pub finalized: Vec<SlotHash>,
    /// Forks released from the fork pool. Their execution state can be discarded.
    pub pruned_forks: Vec<Fork>,
    /// Blocks removed from the fork-choice tree.
    pub pruned_nodes: Vec<SlotHash>,
}

/// The tally engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Bft {
    forks: Forks,
    ghost: Ghost,
    stake_table: StakeTable,
    // Highest level each slot above the root has reached.
    commitments: BTreeMap<Slot, CommitmentLevel>,
    // The finalized chain, up to `history_max` slots back from the root.
    finalized: BTreeMap<Slot, CryptoHash>,
    history_max: usize,
    root: SlotHash,
    snapshot_slot: Slot,
}

impl Bft {
    /// Start tallying from the block `root`, whose execution state is `root_state`.
    ///
    /// `root` is usually the slot of the snapshot the validator booted from. It is taken to be
    /// finalized.
    pub fn new(
        forks_max: usize,
        ghost_node_max: usize,
        ghost_vote_max: usize,
        root: SlotHash,
        root_state: ExecutionHandle,
        stake_table: StakeTable,
    ) -> Result<Bft, BftError> {
        let forks = Forks::new(forks_max, root.slot, root_state, root.hash)?;
        let mut ghost = Ghost::new(ghost_node_max, ghost_vote_max);
        ghost.leaf_insert(root, None)?;

        let mut finalized = BTreeMap::new();
        finalized.insert(root.slot, root.hash);

        Ok(Bft {
            forks,
            ghost,
            stake_table,
            commitments: BTreeMap::new(),
            finalized,
            history_max: forks_max,
            root,
            snapshot_slot: root.slot,
        })
    }

    /// Replace the stake table wholesale, e.g., at an epoch boundary.
    ///
    /// Votes counted before the update are re-weighted with the validators' stake in the new table
    /// (see [`Ghost::rebase_stakes`]): votes of validators absent from it stop counting. The new
    /// weights are classified with the next tallied vote.
    pub fn epoch_stake_update(&mut self, stake_table: StakeTable) -> Result<(), BftError> {
        if stake_table.epoch() < self.stake_table.epoch() {
            return Err(BftError::StaleEpoch {
                current: self.stake_table.epoch(),
                update: stake_table.epoch(),
            });
        }
        log::debug!(
            "stake table updated to epoch {}: {} validators, total stake {}",
            stake_table.epoch(),
            stake_table.len(),
            stake_table.total_stake()
        );
        self.ghost.rebase_stakes(&stake_table);
        self.stake_table = stake_table;
        Ok(())
    }

    /// Take a fork from the pool for the block at `slot`, built on `parent_slot`.
    pub fn acquire_fork(&mut self, slot: Slot, parent_slot: Slot) -> Result<ForkHandle, BftError> {
        Ok(self.forks.acquire(slot, parent_slot)?)
    }

    /// Give back a fork whose block could not be executed.
    pub fn release_fork(&mut self, handle: ForkHandle) -> Result<Fork, BftError> {
        Ok(self.forks.release(handle)?)
    }

    /// Record that the block of the acquired fork `handle` executed into `state` with bank hash
    /// `hash`: the fork becomes a chain tip and the block enters the fork-choice tree.
    ///
    /// If ghost cannot take the block, the fork is released again and the error is returned.
    pub fn insert_block(
        &mut self,
        handle: ForkHandle,
        state: ExecutionHandle,
        hash: CryptoHash,
    ) -> Result<SlotHash, BftError> {
        let fork = self
            .forks
            .get(handle)
            .ok_or(ForkError::StaleHandle { handle })?;
        let slot = fork.slot;
        let parent_slot = fork
            .parent_slot
            .ok_or(ForkError::NotALeaf { slot: fork.slot })?;
        let parent_key = match self.forks.query(parent_slot) {
            Some((_, parent)) => SlotHash::new(parent.slot, parent.hash),
            None => return Err(BftError::UnknownSlot { slot: parent_slot }),
        };
        let key = SlotHash::new(slot, hash);

        if let Err(err) = self.ghost.leaf_insert(key, Some(parent_key)) {
            self.forks.release(handle)?;
            return Err(err.into());
        }
        self.forks.set_executed(handle, state, hash)?;
        self.forks.insert_frontier(handle)?;
        self.commitments
            .entry(slot)
            .or_insert(CommitmentLevel::Processed);
        Ok(key)
    }

    /// Count `validator`'s vote for `key`.
    ///
    /// The vote carries the validator's stake in the current stake table. Validators absent from the
    /// table are tallied with weight 0: the vote is accepted but does not change any weight.
    ///
    /// The returned [`Tally`] carries the commitment level of `key`. If the vote finalized `key` or
    /// one of its ancestors above the current root, the root has been advanced to the highest such
    /// block (see [`root_advance`](Self::root_advance)) and the returned tally says so.
    pub fn tally_vote(
        &mut self,
        validator: &VerifyingKey,
        key: SlotHash,
    ) -> Result<Tally, BftError> {
        if key.slot < self.root.slot {
            return match self.finalized.get(&key.slot) {
                Some(hash) if *hash == key.hash => Ok(Tally {
                    level: CommitmentLevel::Finalized,
                    advanced: None,
                }),
                _ => Err(BftError::BelowRoot {
                    key,
                    root: self.root,
                }),
            };
        }
        if !self.ghost.contains(&key) {
            log::debug!("rejecting vote for unknown block at slot {}", key.slot);
            return Err(GhostError::UnknownKey { key }.into());
        }

        match self.stake_table.stake(validator) {
            Some(stake) => self.ghost.vote_update(validator, key, stake)?,
            None => log::debug!(
                "vote for slot {} from a validator outside epoch {} carries no stake",
                key.slot,
                self.stake_table.epoch()
            ),
        }

        let total_stake = self.stake_table.total_stake();
        let mut level = CommitmentLevel::Finalized;
        let mut newly_finalized = None;
        let mut cursor = Some(key);
        while let Some(current) = cursor {
            if current.slot <= self.root.slot {
                break;
            }
            let weight = self.ghost.weight(&current).unwrap_or_default();
            let current_level = CommitmentLevel::classify(weight, total_stake);
            if current == key {
                level = current_level;
            }
            let cached = self
                .commitments
                .entry(current.slot)
                .or_insert(CommitmentLevel::Processed);
            *cached = (*cached).max(current_level);

            if current_level == CommitmentLevel::Finalized && newly_finalized.is_none() {
                newly_finalized = Some(current);
            }
            cursor = self.ghost.parent(&current);
        }

        let advanced = match newly_finalized {
            Some(new_root) => Some(self.advance_to(new_root)?),
            None => None,
        };
        Ok(Tally { level, advanced })
    }

    /// Make the block at `new_root_slot` the finalized root.
    ///
    /// The fork pool and the fork-choice tree are pruned to the new root in the same call: every fork
    /// and every block that does not descend from it is released.
    pub fn root_advance(&mut self, new_root_slot: Slot) -> Result<RootAdvance, BftError> {
        if new_root_slot <= self.root.slot {
            return Err(BftError::RootNotAfterCurrent {
                root: self.root.slot,
                requested: new_root_slot,
            });
        }
        let key = match self.forks.query(new_root_slot) {
            Some((_, fork)) => SlotHash::new(fork.slot, fork.hash),
            None => {
                return Err(BftError::UnknownSlot {
                    slot: new_root_slot,
                })
            }
        };
        if !self.ghost.contains(&key) {
            return Err(GhostError::UnknownKey { key }.into());
        }
        self.advance_to(key)
    }

    fn advance_to(&mut self, new_root: SlotHash) -> Result<RootAdvance, BftError> {
        match self.forks.query(new_root.slot) {
            Some((_, fork)) if fork.hash == new_root.hash => (),
            _ => {
                return Err(BftError::UnknownSlot {
                    slot: new_root.slot,
                })
            }
        }

        let mut finalized = Vec::new();
        let mut cursor = Some(new_root);
        while let Some(current) = cursor {
            if current.slot <= self.root.slot {
                break;
            }
            finalized.push(current);
            cursor = self.ghost.parent(&current);
        }
        finalized.reverse();

        let pruned_nodes = self.ghost.prune(new_root)?;
        let pruned_forks = self.forks.prune(new_root.slot)?;

        for key in &finalized {
            self.finalized.insert(key.slot, key.hash);
        }
        while self.finalized.len() > self.history_max {
            self.finalized.pop_first();
        }

        self.commitments.retain(|slot, _| *slot > new_root.slot);
        for pruned in &pruned_nodes {
            if pruned.slot > new_root.slot && self.ghost.query_slot(pruned.slot).is_empty() {
                self.commitments.remove(&pruned.slot);
            }
        }

        log::debug!(
            "root advanced from slot {} to slot {}, {} forks released",
            self.root.slot,
            new_root.slot,
            pruned_forks.len()
        );
        self.root = new_root;

        Ok(RootAdvance {
            root: new_root,
            finalized,
            pruned_forks,
            pruned_nodes,
        })
    }

    /// Get the highest commitment level the block at `slot` reached.
    ///
    /// Slots at or below the finalized root report [`Finalized`](CommitmentLevel::Finalized) if they
    /// are on the finalized chain (and within the retained history), and `None` otherwise.
    pub fn commitment(&self, slot: Slot) -> Option<CommitmentLevel> {
        if slot <= self.root.slot {
            self.finalized
                .contains_key(&slot)
                .then_some(CommitmentLevel::Finalized)
        } else {
            self.commitments.get(&slot).copied()
        }
    }

    /// Get the hash of the finalized block at `slot`, if it is within the retained history.
    pub fn finalized_hash(&self, slot: Slot) -> Option<CryptoHash> {
        self.finalized.get(&slot).copied()
    }

    /// The finalized root: the highest finalized block.
    pub fn finalized_root(&self) -> SlotHash {
        self.root
    }

    /// The slot tallying started from.
    pub fn snapshot_slot(&self) -> Slot {
        self.snapshot_slot
    }

    /// Get the head of the heaviest chain.
    pub fn head(&self) -> SlotHash {
        self.ghost.head().unwrap_or(self.root)
    }

    pub fn forks(&self) -> &Forks {
        &self.forks
    }

    pub fn ghost(&self) -> &Ghost {
        &self.ghost
    }

    pub fn stake_table(&self) -> &StakeTable {
        &self.stake_table
    }

    pub(crate) fn to_image(&self) -> BftImage {
        BftImage {
            forks: self.forks.clone(),
            ghost: self.ghost.to_image(),
            stake_table: StakeTableBytes::from(&self.stake_table),
            commitments: self.commitments.clone(),
            finalized: self.finalized.clone(),
            history_max: self.history_max as u64,
            root: self.root,
            snapshot_slot: self.snapshot_slot,
        }
    }
}

/// Intermediate representation of [`Bft`] for serialization.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct BftImage {
    forks: Forks,
    ghost: GhostImage,
    stake_table: StakeTableBytes,
    commitments: BTreeMap<Slot, CommitmentLevel>,
    finalized: BTreeMap<Slot, CryptoHash>,
    history_max: u64,
    root: SlotHash,
    snapshot_slot: Slot,
}

impl BftImage {
    pub(crate) fn root(&self) -> SlotHash {
        self.root
    }
}

impl TryFrom<BftImage> for Bft {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(value: BftImage) -> Result<Self, Self::Error> {
        Ok(Bft {
            forks: value.forks,
            ghost: Ghost::try_from(value.ghost)?,
            stake_table: StakeTable::try_from(value.stake_table)?,
            commitments: value.commitments,
            finalized: value.finalized,
            history_max: value.history_max as usize,
            root: value.root,
            snapshot_slot: value.snapshot_slot,
        })
    }
}

/// Enumerates the ways an operation on [`Bft`] can fail.
#[derive(Debug, PartialEq, Eq)]
pub enum BftError {
    /// See: [`ForkError`].
    ForkError(ForkError),

    /// See: [`GhostError`].
    GhostError(GhostError),

    /// There is no fork at `slot` in the fork pool.
    UnknownSlot { slot: Slot },

    /// The finalized root can only move to higher slots.
    RootNotAfterCurrent { root: Slot, requested: Slot },

    /// The vote is for a block below the finalized root that is not on the finalized chain.
    BelowRoot { key: SlotHash, root: SlotHash },

    /// The stake table is for an epoch before the current one.
    StaleEpoch { current: Epoch, update: Epoch },
}

impl From<ForkError> for BftError {
    fn from(value: ForkError) -> Self {
        BftError::ForkError(value)
    }
}

impl From<GhostError> for BftError {
    fn from(value: GhostError) -> Self {
        BftError::GhostError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::Stake;
    use ed25519_dalek::SigningKey;

    fn validator(seed: u8) -> VerifyingKey {
        SigningKey::from_bytes(&[seed; 32]).verifying_key()
    }

    fn hash(slot: u64) -> CryptoHash {
        CryptoHash::new([slot as u8; 32])
    }

    fn key(slot: u64) -> SlotHash {
        SlotHash::new(Slot::new(slot), hash(slot))
    }

    // Validators 1..=4 with stakes 10, 20, 30 and 40.
    fn bft() -> Bft {
        let mut stake_table = StakeTable::new(Epoch::new(0));
        for (seed, stake) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            stake_table.put(&validator(seed), Stake::new(stake));
        }
        Bft::new(16, 16, 16, key(0), ExecutionHandle::new(0), stake_table).unwrap()
    }

    fn insert(bft: &mut Bft, slot: u64, parent_slot: u64) {
        let handle = bft
            .acquire_fork(Slot::new(slot), Slot::new(parent_slot))
            .unwrap();
        bft.insert_block(handle, ExecutionHandle::new(slot), hash(slot))
            .unwrap();
    }

    // 0 - 1 - 2 - 5
    fn chain() -> Bft {
        let mut bft = bft();
        insert(&mut bft, 1, 0);
        insert(&mut bft, 2, 1);
        insert(&mut bft, 5, 2);
        bft
    }

    #[test]
    fn classify_uses_two_thirds_and_one_half() {
        let total = TotalStake::new(100);
        let classify = |weight| CommitmentLevel::classify(TotalStake::new(weight), total);
        assert_eq!(classify(67), CommitmentLevel::Finalized);
        assert_eq!(classify(66), CommitmentLevel::OptimisticallyConfirmed);
        assert_eq!(classify(50), CommitmentLevel::OptimisticallyConfirmed);
        assert_eq!(classify(49), CommitmentLevel::Processed);
        assert_eq!(
            CommitmentLevel::classify(TotalStake::new(0), TotalStake::new(0)),
            CommitmentLevel::Processed
        );
    }

    #[test]
    fn seventy_percent_finalizes() {
        let mut bft = chain();
        let tally = bft.tally_vote(&validator(3), key(5)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Processed);
        assert!(tally.advanced.is_none());

        let tally = bft.tally_vote(&validator(4), key(5)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Finalized);
        let advanced = tally.advanced.unwrap();
        assert_eq!(advanced.root, key(5));
        assert_eq!(advanced.finalized, vec![key(1), key(2), key(5)]);
        assert_eq!(bft.finalized_root(), key(5));
        assert_eq!(bft.commitment(Slot::new(2)), Some(CommitmentLevel::Finalized));
    }

    #[test]
    fn thirty_percent_stays_processed() {
        let mut bft = chain();
        bft.tally_vote(&validator(1), key(5)).unwrap();
        let tally = bft.tally_vote(&validator(2), key(5)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Processed);
        assert_eq!(bft.finalized_root(), key(0));
        assert_eq!(bft.commitment(Slot::new(5)), Some(CommitmentLevel::Processed));
    }

    #[test]
    fn half_the_stake_confirms_optimistically() {
        let mut bft = chain();
        bft.tally_vote(&validator(1), key(5)).unwrap();
        let tally = bft.tally_vote(&validator(4), key(5)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::OptimisticallyConfirmed);
        assert_eq!(
            bft.commitment(Slot::new(1)),
            Some(CommitmentLevel::OptimisticallyConfirmed)
        );
    }

    #[test]
    fn votes_on_descendants_finalize_ancestors() {
        // 0 - 1 - 2
        //      \
        //       3
        let mut bft = bft();
        insert(&mut bft, 1, 0);
        insert(&mut bft, 2, 1);
        insert(&mut bft, 3, 1);

        bft.tally_vote(&validator(3), key(2)).unwrap();
        let tally = bft.tally_vote(&validator(4), key(3)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Processed);
        let advanced = tally.advanced.unwrap();
        assert_eq!(advanced.root, key(1));
        assert!(advanced.pruned_forks.iter().any(|fork| fork.slot == Slot::new(0)));
        assert_eq!(bft.forks().len(), 3);
    }

    #[test]
    fn finality_never_moves_backwards() {
        let mut bft = chain();
        bft.tally_vote(&validator(3), key(2)).unwrap();
        bft.tally_vote(&validator(4), key(2)).unwrap();
        assert_eq!(bft.finalized_root(), key(2));

        assert_eq!(
            bft.root_advance(Slot::new(1)).unwrap_err(),
            BftError::RootNotAfterCurrent {
                root: Slot::new(2),
                requested: Slot::new(1)
            }
        );
        let tally = bft.tally_vote(&validator(1), key(1)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Finalized);
        assert_eq!(bft.finalized_root(), key(2));

        // The 70 % that finalized slot 2 move on to slot 5, which therefore finalizes too.
        bft.tally_vote(&validator(3), key(5)).unwrap();
        let tally = bft.tally_vote(&validator(4), key(5)).unwrap();
        assert_eq!(tally.advanced.unwrap().root, key(5));
        assert!(bft.finalized_root().slot > Slot::new(2));
    }

    #[test]
    fn conflicting_branch_is_pruned_on_root_advance() {
        // 0 - 1 - 2
        //  \
        //   3
        let mut bft = bft();
        insert(&mut bft, 1, 0);
        insert(&mut bft, 2, 1);
        insert(&mut bft, 3, 0);

        let advanced = bft.root_advance(Slot::new(2)).unwrap();
        let released: Vec<Slot> = advanced.pruned_forks.iter().map(|fork| fork.slot).collect();
        assert_eq!(released, vec![Slot::new(0), Slot::new(1), Slot::new(3)]);
        assert!(!bft.ghost().contains(&key(3)));
        assert_eq!(bft.commitment(Slot::new(3)), None);
        assert_eq!(
            bft.tally_vote(&validator(1), key(3)).unwrap_err(),
            BftError::GhostError(GhostError::UnknownKey { key: key(3) })
        );
    }

    #[test]
    fn votes_from_unstaked_validators_carry_no_weight() {
        let mut bft = chain();
        let tally = bft.tally_vote(&validator(9), key(5)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Processed);
        assert_eq!(bft.ghost().weight(&key(5)), Some(TotalStake::new(0)));
    }

    #[test]
    fn unknown_block_votes_are_rejected() {
        let mut bft = chain();
        let unknown = SlotHash::new(Slot::new(5), CryptoHash::new([0xff; 32]));
        assert_eq!(
            bft.tally_vote(&validator(1), unknown).unwrap_err(),
            BftError::GhostError(GhostError::UnknownKey { key: unknown })
        );
    }

    fn root_weight(bft: &Bft) -> u128 {
        bft.ghost()
            .weight(&bft.finalized_root())
            .unwrap_or_default()
            .int()
    }

    #[test]
    fn departed_validator_stake_does_not_count_after_epoch_change() {
        // Epoch 0: validators 1..=3 with 40, 30 and 30.
        let mut stake_table = StakeTable::new(Epoch::new(0));
        for (seed, stake) in [(1, 40), (2, 30), (3, 30)] {
            stake_table.put(&validator(seed), Stake::new(stake));
        }
        let mut bft =
            Bft::new(16, 16, 16, key(0), ExecutionHandle::new(0), stake_table).unwrap();
        insert(&mut bft, 1, 0);
        insert(&mut bft, 2, 1);
        bft.tally_vote(&validator(1), key(1)).unwrap();
        assert_eq!(root_weight(&bft), 40);

        // Epoch 1: validator 1 leaves and validator 4 joins with 40.
        let mut stake_table = StakeTable::new(Epoch::new(1));
        for (seed, stake) in [(2, 30), (3, 30), (4, 40)] {
            stake_table.put(&validator(seed), Stake::new(stake));
        }
        bft.epoch_stake_update(stake_table).unwrap();
        assert_eq!(root_weight(&bft), 0);

        let tally = bft.tally_vote(&validator(2), key(2)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Processed);
        assert!(tally.advanced.is_none());
        assert_eq!(bft.finalized_root(), key(0));

        let tally = bft.tally_vote(&validator(4), key(2)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Finalized);
        assert_eq!(bft.finalized_root(), key(2));
    }

    #[test]
    fn root_weight_is_the_current_stake_of_voters_after_epoch_change() {
        let mut bft = chain();
        for seed in 1..=3 {
            bft.tally_vote(&validator(seed), key(5)).unwrap();
        }
        assert_eq!(root_weight(&bft), 60);

        // Validators 1 and 3 stay with new stakes; validator 2 leaves.
        let mut stake_table = StakeTable::new(Epoch::new(1));
        for (seed, stake) in [(1, 5), (3, 15), (4, 80)] {
            stake_table.put(&validator(seed), Stake::new(stake));
        }
        bft.epoch_stake_update(stake_table).unwrap();

        assert_eq!(root_weight(&bft), 20);
        assert!(root_weight(&bft) <= bft.stake_table().total_stake().int());
        assert_eq!(bft.ghost().latest_vote(&validator(2)), None);
        bft.ghost().verify_integrity().unwrap();
    }

    #[test]
    fn new_validators_can_vote_after_epoch_change() {
        let mut stake_table = StakeTable::new(Epoch::new(0));
        for seed in [1, 2] {
            stake_table.put(&validator(seed), Stake::new(10));
        }
        let mut bft = Bft::new(16, 16, 2, key(0), ExecutionHandle::new(0), stake_table).unwrap();
        insert(&mut bft, 1, 0);
        insert(&mut bft, 2, 1);
        bft.tally_vote(&validator(1), key(1)).unwrap();
        bft.tally_vote(&validator(2), key(1)).unwrap();
        assert_eq!(bft.finalized_root(), key(1));

        let mut stake_table = StakeTable::new(Epoch::new(1));
        for seed in [3, 4] {
            stake_table.put(&validator(seed), Stake::new(10));
        }
        bft.epoch_stake_update(stake_table).unwrap();

        bft.tally_vote(&validator(3), key(2)).unwrap();
        let tally = bft.tally_vote(&validator(4), key(2)).unwrap();
        assert_eq!(tally.level, CommitmentLevel::Finalized);
        assert_eq!(bft.finalized_root(), key(2));
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let mut bft = bft();
        bft.epoch_stake_update(StakeTable::new(Epoch::new(3)))
            .unwrap();
        assert_eq!(
            bft.epoch_stake_update(StakeTable::new(Epoch::new(2))),
            Err(BftError::StaleEpoch {
                current: Epoch::new(3),
                update: Epoch::new(2)
            })
        );
    }
}
