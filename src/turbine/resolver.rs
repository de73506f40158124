/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Main type: [`FecResolver`].

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::{arena::Arena, config::FecConfiguration, types::data_types::Slot};

use super::{
    erasure::ErasureError,
    fec_set::{CompletedFecSet, FecSet, FecSetHandle, Insertion, RejectReason},
    shred::{FecSetKey, Shred, ShredKind},
};

/// Outcome of [`FecResolver::add_shred`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddResult {
    /// The shred's position in its set was already filled, or its set has already completed.
    Duplicate,
    /// The shred was stored; its set is not complete yet.
    Accepted,
    /// The shred completed its set. Emitted exactly once per set.
    Completed(CompletedFecSet),
    /// The shred belongs to a set that is too old to be tracked.
    Expired,
    /// The shred is malformed or contradicts its set.
    Rejected(RejectReason),
}

/// Reassembles FEC sets from shreds arriving in any order, possibly duplicated.
///
/// ## Windows
///
/// At most `active_depth` incomplete sets accept shreds. Opening one more moves the oldest
/// (lowest slot, then lowest set index) active set into the partial window, where it can still
/// complete. When the partial window overflows its `partial_depth`, its oldest set is dropped and
/// reported as a gap, see [`take_gaps`](Self::take_gaps). Shreds for a dropped set open it afresh,
/// so that repair can fill the gap.
///
/// The last `complete_depth` completed sets stay readable through [`completed`](Self::completed).
/// The keys of the `retained_depth` highest completed sets are remembered, so that late shreds of
/// these sets are reported as [`Duplicate`](AddResult::Duplicate). When a key is forgotten, the
/// expiry watermark rises to it: shreds of sets at or below the watermark that are not tracked
/// anymore are [`Expired`](AddResult::Expired).
pub struct FecResolver {
    config: FecConfiguration,
    pool: Arena<FecSet>,
    index: HashMap<FecSetKey, FecSetHandle>,
    active: BTreeSet<FecSetKey>,
    partial: BTreeSet<FecSetKey>,
    complete: VecDeque<CompletedFecSet>,
    retained: BTreeSet<FecSetKey>,
    expired_through: Option<FecSetKey>,
    gaps: Vec<FecSetKey>,
}

impl FecResolver {
    pub fn new(config: FecConfiguration) -> Result<FecResolver, ErasureError> {
        config
            .validate()
            .map_err(|_| ErasureError::InvalidParameters)?;
        Ok(FecResolver {
            config,
            pool: Arena::with_capacity(config.active_depth + config.partial_depth),
            index: HashMap::new(),
            active: BTreeSet::new(),
            partial: BTreeSet::new(),
            complete: VecDeque::with_capacity(config.complete_depth),
            retained: BTreeSet::new(),
            expired_through: None,
            gaps: Vec::new(),
        })
    }

    /// Add a shred to its FEC set.
    pub fn add_shred(&mut self, shred: Shred) -> AddResult {
        if let Err(reason) = self.check(&shred) {
            log::debug!("rejecting shred of set {}: {:?}", shred.fec_set_key(), reason);
            return AddResult::Rejected(reason);
        }

        let key = shred.fec_set_key();
        if self.retained.contains(&key) {
            return AddResult::Duplicate;
        }
        let handle = match self.index.get(&key) {
            Some(handle) => *handle,
            None if self.is_expired(key) => return AddResult::Expired,
            None => self.open(&shred),
        };

        let set = self
            .pool
            .get_mut(handle)
            .expect("indexed FEC sets are in the pool");
        match set.insert(shred) {
            Err(reason) => {
                log::debug!("rejecting shred of set {}: {:?}", key, reason);
                AddResult::Rejected(reason)
            }
            Ok(Insertion::Duplicate) => AddResult::Duplicate,
            Ok(Insertion::Accepted) => AddResult::Accepted,
            Ok(Insertion::Recoverable) => self.complete(key),
        }
    }

    /// Stop tracking everything at or below the finalized `root` slot.
    pub fn set_root(&mut self, root: Slot) {
        let watermark = FecSetKey::new(root, u32::MAX);
        self.raise_watermark(watermark);

        let stale: Vec<FecSetKey> = self
            .index
            .keys()
            .filter(|key| **key <= watermark)
            .copied()
            .collect();
        for key in stale {
            self.remove_set(key);
        }
        self.retained.retain(|key| key.slot > root);
        self.complete.retain(|set| set.slot() > root);
    }

    /// Take the keys of the sets dropped since the last call without completing. These should be
    /// requested from repair.
    pub fn take_gaps(&mut self) -> Vec<FecSetKey> {
        std::mem::take(&mut self.gaps)
    }

    /// Get a set from the complete window.
    pub fn completed(&self, key: FecSetKey) -> Option<&CompletedFecSet> {
        self.complete.iter().find(|set| set.key() == key)
    }

    /// Sets at or below this key that are not tracked anymore are expired.
    pub fn expired_through(&self) -> Option<FecSetKey> {
        self.expired_through
    }

    pub fn is_active(&self, key: FecSetKey) -> bool {
        self.active.contains(&key)
    }

    pub fn is_partial(&self, key: FecSetKey) -> bool {
        self.partial.contains(&key)
    }

    pub fn config(&self) -> &FecConfiguration {
        &self.config
    }

    fn check(&self, shred: &Shred) -> Result<(), RejectReason> {
        if shred.payload.len() != self.config.shred_payload_size {
            return Err(RejectReason::PayloadSize {
                expected: self.config.shred_payload_size,
                actual: shred.payload.len(),
            });
        }
        let count = match shred.kind {
            ShredKind::Data => self.config.data_shred_count,
            ShredKind::Parity => self.config.parity_shred_count,
        };
        if shred.index as usize >= count {
            return Err(RejectReason::IndexOutOfRange {
                kind: shred.kind,
                index: shred.index,
            });
        }
        if shred.parent_slot().is_none() {
            return Err(RejectReason::InvalidParentOffset {
                slot: shred.slot,
                parent_offset: shred.parent_offset,
            });
        }
        Ok(())
    }

    fn is_expired(&self, key: FecSetKey) -> bool {
        self.expired_through
            .map_or(false, |watermark| key <= watermark)
    }

    // Open a new set for `first`, making room in the active window first.
    fn open(&mut self, first: &Shred) -> FecSetHandle {
        if self.active.len() >= self.config.active_depth {
            if let Some(oldest) = self.active.pop_first() {
                self.partial.insert(oldest);
            }
        }
        if self.partial.len() > self.config.partial_depth {
            if let Some(dropped) = self.partial.pop_first() {
                log::debug!("FEC set {} left the partial window incomplete", dropped);
                self.remove_set(dropped);
                self.gaps.push(dropped);
            }
        }

        let key = first.fec_set_key();
        let set = FecSet::new(
            first,
            self.config.data_shred_count,
            self.config.parity_shred_count,
        );
        // At most `active_depth - 1` active and `partial_depth` partial sets remain at this point.
        let handle = match self.pool.insert(set) {
            Ok(handle) => handle,
            Err(_) => panic!("FEC set pool holds every active and partial set"),
        };
        self.index.insert(key, handle);
        self.active.insert(key);
        handle
    }

    fn complete(&mut self, key: FecSetKey) -> AddResult {
        let set = match self.remove_set(key) {
            Some(set) => set,
            None => panic!("FEC set {} completed but was not tracked", key),
        };
        match set.complete(self.config.shred_payload_size) {
            Ok(completed) => {
                self.retain(key);
                if self.complete.len() >= self.config.complete_depth {
                    self.complete.pop_front();
                }
                self.complete.push_back(completed.clone());
                AddResult::Completed(completed)
            }
            Err(err) => {
                log::warn!("FEC set {} could not be recovered: {:?}", key, err);
                self.gaps.push(key);
                AddResult::Rejected(RejectReason::Unrecoverable { key })
            }
        }
    }

    fn retain(&mut self, key: FecSetKey) {
        self.retained.insert(key);
        if self.retained.len() > self.config.retained_depth {
            if let Some(forgotten) = self.retained.pop_first() {
                self.raise_watermark(forgotten);
            }
        }
    }

    fn raise_watermark(&mut self, key: FecSetKey) {
        if self.expired_through.map_or(true, |watermark| key > watermark) {
            self.expired_through = Some(key);
        }
    }

    fn remove_set(&mut self, key: FecSetKey) -> Option<FecSet> {
        let handle = self.index.remove(&key)?;
        self.active.remove(&key);
        self.partial.remove(&key);
        self.pool.remove(handle)
    }
}
