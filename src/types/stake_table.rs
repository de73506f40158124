/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-epoch table of validator identities and their stakes.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{collections::HashMap, slice};

use super::data_types::{Epoch, Stake, TotalStake, VerifyingKeyBytes};

pub use ed25519_dalek::VerifyingKey;

/// Stores the identities of the validators staked in one epoch and the stake of each.
///
/// ## Ordering of validators
///
/// `StakeTable` internally maintains the list of validators in ascending order of their
/// `VerifyingKey`s, and avails the methods [`validators`](StakeTable::validators) and
/// [`validators_and_stakes`](StakeTable::validators_and_stakes) that walk them in this order.
///
/// ## Lifecycle
///
/// A stake table is built once per epoch and then swapped in wholesale by
/// [`Bft::epoch_stake_update`](crate::bft::Bft::epoch_stake_update). It is read-only while the epoch
/// lasts.
#[derive(Clone, PartialEq, Debug)]
pub struct StakeTable {
    epoch: Epoch,
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
    stakes: HashMap<VerifyingKey, Stake>,
    total_stake: TotalStake,
}

impl Default for StakeTable {
    fn default() -> Self {
        StakeTable::new(Epoch::new(0))
    }
}

impl StakeTable {
    /// Create an empty stake table for `epoch`.
    pub fn new(epoch: Epoch) -> StakeTable {
        Self {
            epoch,
            validators: Vec::new(),
            stakes: HashMap::new(),
            total_stake: TotalStake::new(0),
        }
    }

    /// Put a `validator` with the specified `stake` into the table, placing them in a position that
    /// preserves the [ordering of validators](Self#ordering-of-validators).
    ///
    /// If `validator` is already in the table, its stake is replaced instead.
    pub fn put(&mut self, validator: &VerifyingKey, stake: Stake) {
        let validator_bytes = validator.to_bytes();
        match self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            Ok(_) => (),
            Err(insert_pos) => self.validators.insert(insert_pos, *validator),
        }

        self.stakes.insert(*validator, stake);
        self.total_stake = self.sum_stakes();
    }

    /// Remove `validator` from the table, returning its stake if it was in the table.
    pub fn remove(&mut self, validator: &VerifyingKey) -> Option<Stake> {
        let validator_bytes = validator.to_bytes();
        let pos = self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()?;
        self.validators.remove(pos);
        let removed = self.stakes.remove(validator);
        self.total_stake = self.sum_stakes();
        removed
    }

    /// Get the epoch this table is for.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Get the stake of `validator`, if it is staked in this epoch.
    pub fn stake(&self, validator: &VerifyingKey) -> Option<Stake> {
        self.stakes.get(validator).copied()
    }

    /// Get the sum of the stakes of all validators in the table.
    pub fn total_stake(&self) -> TotalStake {
        self.total_stake
    }

    /// Check whether the table contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.stakes.contains_key(validator)
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get each validator and its stake, in ascending order of the validators' verifying keys.
    pub fn validators_and_stakes(&self) -> Vec<(VerifyingKey, Stake)> {
        self.validators
            .iter()
            .filter_map(|v| self.stake(v).map(|stake| (*v, stake)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sum_stakes(&self) -> TotalStake {
        let mut total_stake = TotalStake::new(0);
        for stake in self.stakes.values() {
            total_stake += *stake
        }
        total_stake
    }
}

/// Intermediate representation of [`StakeTable`] for safe serialization and deserialization.
///
/// ## Rationale
///
/// [`ed25519_dalek::VerifyingKey`] does not implement the Borsh traits. This type replaces it with
/// [`VerifyingKeyBytes`], which makes it straightforward to serialize, but also means that instances
/// of it are not guaranteed to contain valid Ed25519 verifying keys. Conversion into `StakeTable`
/// using `TryFrom` is therefore fallible.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct StakeTableBytes {
    epoch: Epoch,
    // In the same ascending order as `StakeTable::validators`.
    stakes: Vec<(VerifyingKeyBytes, Stake)>,
}

impl TryFrom<StakeTableBytes> for StakeTable {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(value: StakeTableBytes) -> Result<Self, Self::Error> {
        let mut stake_table = StakeTable::new(value.epoch);
        for (validator_bytes, stake) in value.stakes {
            let validator = VerifyingKey::from_bytes(&validator_bytes)?;
            stake_table.put(&validator, stake);
        }
        Ok(stake_table)
    }
}

impl From<&StakeTable> for StakeTableBytes {
    fn from(value: &StakeTable) -> Self {
        StakeTableBytes {
            epoch: value.epoch,
            stakes: value
                .validators_and_stakes()
                .into_iter()
                .map(|(validator, stake)| (validator.to_bytes(), stake))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn validator(seed: u8) -> VerifyingKey {
        SigningKey::from_bytes(&[seed; 32]).verifying_key()
    }

    #[test]
    fn validators_are_kept_in_ascending_key_order() {
        let mut stake_table = StakeTable::new(Epoch::new(3));
        for seed in [9u8, 1, 5, 7] {
            stake_table.put(&validator(seed), Stake::new(seed as u64));
        }

        let keys: Vec<[u8; 32]> = stake_table.validators().map(|v| v.to_bytes()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(stake_table.total_stake(), TotalStake::new(22));
    }

    #[test]
    fn put_replaces_and_remove_updates_total() {
        let mut stake_table = StakeTable::new(Epoch::new(0));
        stake_table.put(&validator(1), Stake::new(10));
        stake_table.put(&validator(1), Stake::new(40));
        stake_table.put(&validator(2), Stake::new(5));
        assert_eq!(stake_table.len(), 2);
        assert_eq!(stake_table.total_stake(), TotalStake::new(45));

        assert_eq!(stake_table.remove(&validator(1)), Some(Stake::new(40)));
        assert_eq!(stake_table.remove(&validator(1)), None);
        assert_eq!(stake_table.total_stake(), TotalStake::new(5));
    }

    #[test]
    fn bytes_form_converts_back_to_an_equal_table() {
        let mut stake_table = StakeTable::new(Epoch::new(7));
        stake_table.put(&validator(4), Stake::new(100));
        stake_table.put(&validator(8), Stake::new(1));

        let bytes: StakeTableBytes = (&stake_table).into();
        let restored = StakeTable::try_from(bytes).unwrap();
        assert_eq!(restored, stake_table);
    }
}
