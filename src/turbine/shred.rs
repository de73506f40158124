/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shreds: the erasure-coded fragments that blocks are broadcast as.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};

use crate::types::data_types::Slot;

/// Identifies one FEC set: the `fec_set_index`-th erasure-coded batch of the block produced in `slot`.
///
/// The derived ordering compares `slot` first, so the smallest key is the oldest set.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct FecSetKey {
    pub slot: Slot,
    pub fec_set_index: u32,
}

impl FecSetKey {
    pub const fn new(slot: Slot, fec_set_index: u32) -> Self {
        Self {
            slot,
            fec_set_index,
        }
    }
}

impl Display for FecSetKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.fec_set_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum ShredKind {
    /// Carries one shard of the set's framed block data.
    Data,
    /// Carries one Reed–Solomon recovery shard.
    Parity,
}

/// One fragment of a FEC set.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Shred {
    pub slot: Slot,
    /// Distance to the parent block's slot.
    pub parent_offset: u16,
    pub fec_set_index: u32,
    /// Position among the set's shreds of the same kind.
    pub index: u32,
    pub kind: ShredKind,
    /// Set on every shred of the last FEC set of the slot.
    pub last_in_slot: bool,
    pub payload: Vec<u8>,
}

impl Shred {
    pub fn fec_set_key(&self) -> FecSetKey {
        FecSetKey::new(self.slot, self.fec_set_index)
    }

    /// Get the parent block's slot, or `None` if the offset points before slot 0 or at the shred's
    /// own slot.
    pub fn parent_slot(&self) -> Option<Slot> {
        if self.parent_offset == 0 {
            return None;
        }
        self.slot.checked_sub(self.parent_offset as u64)
    }

    pub fn is_data(&self) -> bool {
        self.kind == ShredKind::Data
    }
}
