/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! FEC sets being collected, and completed FEC sets.
//!
//! Incomplete sets live in the resolver's [`Arena`](crate::arena::Arena) and own one buffer per
//! shred position, so the number of buffered shreds is bounded by the arena's capacity times
//! `data_shred_count + parity_shred_count`.

use crate::{arena::Handle, types::data_types::Slot};

use super::{
    erasure::{self, ErasureError},
    shred::{FecSetKey, Shred, ShredKind},
};

/// Checked reference to an incomplete FEC set in the resolver's pool.
pub type FecSetHandle = Handle;

/// Why a shred was not accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// `index` is not below the number of shreds of its kind in a set.
    IndexOutOfRange { kind: ShredKind, index: u32 },

    /// Every shred payload must be `shred_payload_size` bytes long.
    PayloadSize { expected: usize, actual: usize },

    /// The parent offset is 0 or points before slot 0.
    InvalidParentOffset { slot: Slot, parent_offset: u16 },

    /// The shred disagrees with shreds of the same set already received about the parent or about
    /// whether the set is the last of its slot.
    InconsistentMetadata { key: FecSetKey },

    /// The shred completed the set, but the set could not be recovered from its shreds. The set is
    /// dropped and reported as a gap.
    Unrecoverable { key: FecSetKey },
}

pub(crate) enum Insertion {
    Duplicate,
    Accepted,
    /// The set now has enough shreds to be recovered.
    Recoverable,
}

#[derive(Clone, Debug)]
pub(crate) struct FecSet {
    key: FecSetKey,
    parent_offset: u16,
    last_in_slot: bool,
    data: Vec<Option<Vec<u8>>>,
    parity: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl FecSet {
    /// Create an empty set with the metadata of its first shred, `first`.
    pub(crate) fn new(first: &Shred, data_shred_count: usize, parity_shred_count: usize) -> FecSet {
        FecSet {
            key: first.fec_set_key(),
            parent_offset: first.parent_offset,
            last_in_slot: first.last_in_slot,
            data: vec![None; data_shred_count],
            parity: vec![None; parity_shred_count],
            received: 0,
        }
    }

    pub(crate) fn insert(&mut self, shred: Shred) -> Result<Insertion, RejectReason> {
        if shred.parent_offset != self.parent_offset || shred.last_in_slot != self.last_in_slot {
            return Err(RejectReason::InconsistentMetadata { key: self.key });
        }
        let position = match shred.kind {
            ShredKind::Data => self.data.get_mut(shred.index as usize),
            ShredKind::Parity => self.parity.get_mut(shred.index as usize),
        }
        .ok_or(RejectReason::IndexOutOfRange {
            kind: shred.kind,
            index: shred.index,
        })?;

        if position.is_some() {
            return Ok(Insertion::Duplicate);
        }
        *position = Some(shred.payload);
        self.received += 1;

        if self.received >= self.data.len() {
            Ok(Insertion::Recoverable)
        } else {
            Ok(Insertion::Accepted)
        }
    }

    /// Recover the set's data shards.
    pub(crate) fn complete(&self, shard_size: usize) -> Result<CompletedFecSet, ErasureError> {
        let data = erasure::recover(&self.data, &self.parity, shard_size)?;
        Ok(CompletedFecSet {
            key: self.key,
            parent_offset: self.parent_offset,
            last_in_slot: self.last_in_slot,
            data,
        })
    }
}

/// A FEC set whose data shreds have all been received or recovered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedFecSet {
    key: FecSetKey,
    parent_offset: u16,
    last_in_slot: bool,
    data: Vec<Vec<u8>>,
}

impl CompletedFecSet {
    pub fn key(&self) -> FecSetKey {
        self.key
    }

    pub fn slot(&self) -> Slot {
        self.key.slot
    }

    /// Get the slot of the block this set's block builds on.
    pub fn parent_slot(&self) -> Option<Slot> {
        self.key.slot.checked_sub(self.parent_offset as u64)
    }

    /// Whether this is the last FEC set of its slot.
    pub fn is_last_in_slot(&self) -> bool {
        self.last_in_slot
    }

    /// The set's data shards, in index order.
    pub fn data_shreds(&self) -> &[Vec<u8>] {
        &self.data
    }

    /// Get the chunk of block bytes carried by this set, with the framing removed.
    pub fn payload(&self) -> Result<Vec<u8>, ErasureError> {
        erasure::unframe(&self.data)
    }
}
