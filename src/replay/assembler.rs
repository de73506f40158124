/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Joins the completed FEC sets of each slot into that slot's block.

use std::collections::BTreeMap;

use crate::{
    turbine::{erasure::ErasureError, fec_set::CompletedFecSet},
    types::data_types::Slot,
};

/// The bytes of one block, joined from all of its FEC sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AssembledBlock {
    pub(crate) slot: Slot,
    pub(crate) parent_slot: Slot,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Default)]
struct SlotSets {
    parent_slot: Option<Slot>,
    last_index: Option<u32>,
    payloads: BTreeMap<u32, Vec<u8>>,
}

impl SlotSets {
    fn is_complete(&self) -> bool {
        match self.last_index {
            Some(last_index) => {
                self.payloads.len() as u64 == last_index as u64 + 1
                    && self.payloads.keys().next_back() == Some(&last_index)
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub(crate) struct BlockAssembler {
    slots: BTreeMap<Slot, SlotSets>,
}

impl BlockAssembler {
    pub(crate) fn new() -> BlockAssembler {
        BlockAssembler::default()
    }

    /// Add a completed set. Returns the block of the set's slot once the sets with indices `0` through
    /// the one flagged last in its slot have all been added.
    ///
    /// On error, every set collected for the slot so far is dropped.
    pub(crate) fn insert(
        &mut self,
        set: CompletedFecSet,
    ) -> Result<Option<AssembledBlock>, AssembleError> {
        let slot = set.slot();
        let result = self.try_insert(set);
        if result.is_err() {
            self.slots.remove(&slot);
        }
        result
    }

    fn try_insert(&mut self, set: CompletedFecSet) -> Result<Option<AssembledBlock>, AssembleError> {
        let key = set.key();
        let parent_slot = set
            .parent_slot()
            .ok_or(AssembleError::Inconsistent { slot: key.slot })?;
        let payload = set.payload().map_err(AssembleError::Payload)?;

        let sets = self.slots.entry(key.slot).or_default();
        if *sets.parent_slot.get_or_insert(parent_slot) != parent_slot {
            return Err(AssembleError::Inconsistent { slot: key.slot });
        }
        if set.is_last_in_slot() {
            if *sets.last_index.get_or_insert(key.fec_set_index) != key.fec_set_index {
                return Err(AssembleError::Inconsistent { slot: key.slot });
            }
        }
        if let Some(last_index) = sets.last_index {
            let highest = sets.payloads.keys().next_back().copied().unwrap_or(0);
            if highest.max(key.fec_set_index) > last_index {
                return Err(AssembleError::Inconsistent { slot: key.slot });
            }
        }
        sets.payloads.insert(key.fec_set_index, payload);

        if !sets.is_complete() {
            return Ok(None);
        }
        let sets = self
            .slots
            .remove(&key.slot)
            .ok_or(AssembleError::Inconsistent { slot: key.slot })?;
        Ok(Some(AssembledBlock {
            slot: key.slot,
            parent_slot,
            bytes: sets.payloads.into_values().flatten().collect(),
        }))
    }

    /// Drop the sets of every slot at or below `root`.
    pub(crate) fn prune(&mut self, root: Slot) {
        self.slots.retain(|slot, _| *slot > root);
    }

    pub(crate) fn pending_slots(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug)]
pub(crate) enum AssembleError {
    Payload(ErasureError),
    /// The sets of the slot disagree with each other.
    Inconsistent { slot: Slot },
}
