/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Main type: [`Forks`].

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{BTreeMap, HashMap};

use crate::{
    arena::{Arena, Handle},
    types::data_types::{CryptoHash, ExecutionHandle, Slot},
};

/// Checked reference to a [`Fork`] in the fork pool.
pub type ForkHandle = Handle;

/// A candidate chain tip together with the execution state produced by its block.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Fork {
    pub slot: Slot,
    /// Slot of the parent block. `None` only for the fork the pool was created with.
    pub parent_slot: Option<Slot>,
    /// Execution state after this fork's block. Starts out as the parent's state when the fork is
    /// acquired and is replaced by [`Forks::set_executed`].
    pub state: ExecutionHandle,
    /// Bank hash of this fork's block. Zero until the block has been executed.
    pub hash: CryptoHash,
    parent: Option<ForkHandle>,
    child_count: u32,
}

impl Fork {
    fn root(slot: Slot, state: ExecutionHandle, hash: CryptoHash) -> Self {
        Self {
            slot,
            parent_slot: None,
            state,
            hash,
            parent: None,
            child_count: 0,
        }
    }

    /// Number of forks currently in the pool that extend this one.
    pub fn child_count(&self) -> u32 {
        self.child_count
    }
}

/// The fork pool, its slot index and the frontier.
///
/// There is at most one fork per slot.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Forks {
    pool: Arena<Fork>,
    slots: BTreeMap<Slot, ForkHandle>,
    frontier: BTreeMap<Slot, ForkHandle>,
    root: ForkHandle,
}

impl Forks {
    /// Create a fork pool holding at most `forks_max` forks, containing only the fork at `root_slot`
    /// (typically the snapshot slot), which is also the only element of the frontier.
    pub fn new(
        forks_max: usize,
        root_slot: Slot,
        root_state: ExecutionHandle,
        root_hash: CryptoHash,
    ) -> Result<Self, ForkError> {
        let mut pool = Arena::with_capacity(forks_max);
        let root = pool
            .insert(Fork::root(root_slot, root_state, root_hash))
            .map_err(|_| ForkError::Exhausted { forks_max })?;

        let mut slots = BTreeMap::new();
        slots.insert(root_slot, root);
        let mut frontier = BTreeMap::new();
        frontier.insert(root_slot, root);

        Ok(Self {
            pool,
            slots,
            frontier,
            root,
        })
    }

    /// Take a free fork from the pool for the block at `slot` and link it as a child of the fork at
    /// `parent_slot`.
    ///
    /// The new fork is not in the frontier yet; call [`insert_frontier`](Self::insert_frontier) once
    /// its block has executed successfully, or [`release`](Self::release) if it did not.
    pub fn acquire(&mut self, slot: Slot, parent_slot: Slot) -> Result<ForkHandle, ForkError> {
        if self.slots.contains_key(&slot) {
            return Err(ForkError::SlotExists { slot });
        }
        if slot <= parent_slot {
            return Err(ForkError::SlotNotAfterParent { slot, parent_slot });
        }
        let parent = *self
            .slots
            .get(&parent_slot)
            .ok_or(ForkError::UnknownParent { parent_slot })?;
        let parent_state = self.fork(parent)?.state;

        let fork = Fork {
            slot,
            parent_slot: Some(parent_slot),
            state: parent_state,
            hash: CryptoHash::default(),
            parent: Some(parent),
            child_count: 0,
        };
        let handle = self.pool.insert(fork).map_err(|_| {
            log::warn!("fork pool exhausted at {} forks", self.pool.capacity());
            ForkError::Exhausted {
                forks_max: self.pool.capacity(),
            }
        })?;

        self.fork_mut(parent)?.child_count += 1;
        self.slots.insert(slot, handle);
        Ok(handle)
    }

    /// Record the result of executing `handle`'s block.
    pub fn set_executed(
        &mut self,
        handle: ForkHandle,
        state: ExecutionHandle,
        hash: CryptoHash,
    ) -> Result<(), ForkError> {
        let fork = self.fork_mut(handle)?;
        fork.state = state;
        fork.hash = hash;
        Ok(())
    }

    /// Make `handle` a chain tip. Its parent stops being one, since it now has a descendant.
    pub fn insert_frontier(&mut self, handle: ForkHandle) -> Result<(), ForkError> {
        let fork = self.fork(handle)?;
        let (slot, parent_slot) = (fork.slot, fork.parent_slot);

        if let Some(parent_slot) = parent_slot {
            self.frontier.remove(&parent_slot);
        }
        self.frontier.insert(slot, handle);
        Ok(())
    }

    /// Give an acquired fork back to the pool, e.g., because its block failed to execute.
    ///
    /// Only forks without children can be released this way, and never the root.
    pub fn release(&mut self, handle: ForkHandle) -> Result<Fork, ForkError> {
        let fork = self.fork(handle)?;
        if handle == self.root || fork.child_count > 0 {
            return Err(ForkError::NotALeaf { slot: fork.slot });
        }
        let (slot, parent) = (fork.slot, fork.parent);

        if let Some(parent) = parent {
            self.fork_mut(parent)?.child_count -= 1;
        }
        if self.frontier.get(&slot) == Some(&handle) {
            self.frontier.remove(&slot);
        }
        self.slots.remove(&slot);
        self.pool
            .remove(handle)
            .ok_or(ForkError::StaleHandle { handle })
    }

    /// Make the fork at `root_slot` the root of the tree and release every fork that does not
    /// descend from it.
    ///
    /// This releases every fork below `root_slot` (none of which can be an ancestor of a live fork
    /// once the root's own parent link is cut) as well as tips that branched off before the root and
    /// therefore conflict with it. Frontier entries that are released are removed from the frontier.
    ///
    /// Returns the released forks in ascending slot order so that the caller can discard their
    /// execution state.
    pub fn prune(&mut self, root_slot: Slot) -> Result<Vec<Fork>, ForkError> {
        let new_root = *self
            .slots
            .get(&root_slot)
            .ok_or(ForkError::RootNotFound { slot: root_slot })?;

        let mut descends_from_root: HashMap<ForkHandle, bool> = HashMap::new();
        descends_from_root.insert(new_root, true);
        for handle in self.pool.handles() {
            self.descends_from(handle, &mut descends_from_root);
        }

        let mut released = Vec::new();
        for (handle, live) in descends_from_root {
            if live {
                continue;
            }
            if let Some(fork) = self.pool.remove(handle) {
                self.slots.remove(&fork.slot);
                if self.frontier.get(&fork.slot) == Some(&handle) {
                    self.frontier.remove(&fork.slot);
                }
                released.push(fork);
            }
        }

        let root_fork = self.fork_mut(new_root)?;
        root_fork.parent = None;
        self.root = new_root;

        released.sort_by_key(|fork| fork.slot);
        if !released.is_empty() {
            log::debug!(
                "pruned {} forks below root slot {}, {} remain",
                released.len(),
                root_slot,
                self.pool.len()
            );
        }
        Ok(released)
    }

    // Walk up from `handle` until reaching a fork whose liveness is already known, then fill in the
    // whole walked path with that answer.
    fn descends_from(&self, handle: ForkHandle, memo: &mut HashMap<ForkHandle, bool>) -> bool {
        let mut path = Vec::new();
        let mut cursor = Some(handle);
        let live = loop {
            match cursor {
                None => break false,
                Some(current) => {
                    if let Some(known) = memo.get(&current) {
                        break *known;
                    }
                    path.push(current);
                    cursor = self.pool.get(current).and_then(|fork| fork.parent);
                }
            }
        };
        for visited in path {
            memo.insert(visited, live);
        }
        live
    }

    pub fn get(&self, handle: ForkHandle) -> Option<&Fork> {
        self.pool.get(handle)
    }

    /// Get the fork at `slot`, if there is one in the pool.
    pub fn query(&self, slot: Slot) -> Option<(ForkHandle, &Fork)> {
        let handle = *self.slots.get(&slot)?;
        self.pool.get(handle).map(|fork| (handle, fork))
    }

    /// Get the current root fork.
    pub fn root(&self) -> (ForkHandle, &Fork) {
        let root = self
            .pool
            .get(self.root)
            .expect("the root fork is never released");
        (self.root, root)
    }

    /// Iterate through the frontier in ascending slot order.
    pub fn frontier(&self) -> impl Iterator<Item = (ForkHandle, &Fork)> {
        self.frontier
            .values()
            .filter_map(|handle| self.pool.get(*handle).map(|fork| (*handle, fork)))
    }

    pub fn is_frontier(&self, slot: Slot) -> bool {
        self.frontier.contains_key(&slot)
    }

    /// Number of forks in use.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The pool's `forks_max`.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    fn fork(&self, handle: ForkHandle) -> Result<&Fork, ForkError> {
        self.pool.get(handle).ok_or(ForkError::StaleHandle { handle })
    }

    fn fork_mut(&mut self, handle: ForkHandle) -> Result<&mut Fork, ForkError> {
        self.pool
            .get_mut(handle)
            .ok_or(ForkError::StaleHandle { handle })
    }
}

/// Enumerates the ways an operation on [`Forks`] can fail.
#[derive(Debug, PartialEq, Eq)]
pub enum ForkError {
    /// All `forks_max` forks are in use. The caller must prune or reject the block.
    Exhausted { forks_max: usize },

    /// No fork in the pool is at the slot the new block builds on.
    UnknownParent { parent_slot: Slot },

    /// A fork for this slot is already in the pool.
    SlotExists { slot: Slot },

    /// A block must be in a later slot than its parent.
    SlotNotAfterParent { slot: Slot, parent_slot: Slot },

    /// The handle refers to a fork that has since been released.
    StaleHandle { handle: ForkHandle },

    /// Tried to release a fork that other forks still build on, or the root.
    NotALeaf { slot: Slot },

    /// The requested root slot has no fork in the pool.
    RootNotFound { slot: Slot },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(int: u64) -> Slot {
        Slot::new(int)
    }

    fn forks(forks_max: usize) -> Forks {
        Forks::new(
            forks_max,
            slot(0),
            ExecutionHandle::new(0),
            CryptoHash::new([0u8; 32]),
        )
        .unwrap()
    }

    // Acquire, execute and insert into the frontier in one step.
    fn extend(forks: &mut Forks, child: u64, parent: u64) -> ForkHandle {
        let handle = forks.acquire(slot(child), slot(parent)).unwrap();
        forks
            .set_executed(handle, ExecutionHandle::new(child), CryptoHash::new([child as u8; 32]))
            .unwrap();
        forks.insert_frontier(handle).unwrap();
        handle
    }

    fn frontier_slots(forks: &Forks) -> Vec<u64> {
        forks.frontier().map(|(_, fork)| fork.slot.int()).collect()
    }

    #[test]
    fn fifth_fork_exhausts_pool_of_four() {
        let mut forks = forks(4);
        extend(&mut forks, 1, 0);
        extend(&mut forks, 2, 1);
        extend(&mut forks, 3, 2);
        assert_eq!(forks.len(), 4);

        assert_eq!(
            forks.acquire(slot(4), slot(3)),
            Err(ForkError::Exhausted { forks_max: 4 })
        );
    }

    #[test]
    fn acquire_requires_known_parent() {
        let mut forks = forks(8);
        assert_eq!(
            forks.acquire(slot(5), slot(4)),
            Err(ForkError::UnknownParent {
                parent_slot: slot(4)
            })
        );
    }

    #[test]
    fn acquired_fork_inherits_parent_state() {
        let mut forks = forks(8);
        extend(&mut forks, 1, 0);
        let handle = forks.acquire(slot(2), slot(1)).unwrap();
        assert_eq!(forks.get(handle).unwrap().state, ExecutionHandle::new(1));
    }

    #[test]
    fn frontier_holds_only_unextended_tips() {
        let mut forks = forks(8);
        extend(&mut forks, 1, 0);
        extend(&mut forks, 2, 1);
        extend(&mut forks, 3, 1);
        assert_eq!(frontier_slots(&forks), vec![2, 3]);

        extend(&mut forks, 4, 3);
        assert_eq!(frontier_slots(&forks), vec![2, 4]);
    }

    #[test]
    fn release_undoes_acquire() {
        let mut pool = forks(3);
        let one = extend(&mut pool, 1, 0);
        let two = pool.acquire(slot(2), slot(1)).unwrap();
        assert!(matches!(pool.release(one), Err(ForkError::NotALeaf { .. })));

        pool.release(two).unwrap();
        assert_eq!(pool.get(one).unwrap().child_count(), 0);
        assert!(pool.query(slot(2)).is_none());
        assert_eq!(pool.get(two), None);
        assert_eq!(frontier_slots(&pool), vec![1]);

        // The released slot can be acquired again.
        assert!(pool.acquire(slot(2), slot(1)).is_ok());
    }

    #[test]
    fn prune_releases_ancestors_and_conflicting_tips() {
        // 0 - 1 - 2 - 4
        //      \
        //       3 - 5
        let mut forks = forks(8);
        extend(&mut forks, 1, 0);
        extend(&mut forks, 2, 1);
        extend(&mut forks, 3, 1);
        extend(&mut forks, 4, 2);
        extend(&mut forks, 5, 3);

        let released = forks.prune(slot(2)).unwrap();
        let released_slots: Vec<u64> = released.iter().map(|fork| fork.slot.int()).collect();
        assert_eq!(released_slots, vec![0, 1, 3, 5]);

        assert_eq!(forks.len(), 2);
        assert_eq!(forks.root().1.slot, slot(2));
        assert_eq!(frontier_slots(&forks), vec![4]);

        // Capacity is reclaimed: six more forks fit next to the two that survived.
        for child in 5..=10 {
            extend(&mut forks, child, child - 1);
        }
        assert_eq!(forks.len(), 8);
        assert_eq!(
            forks.acquire(slot(11), slot(10)),
            Err(ForkError::Exhausted { forks_max: 8 })
        );
    }

    #[test]
    fn prune_to_unknown_slot_fails() {
        let mut forks = forks(4);
        assert_eq!(
            forks.prune(slot(9)),
            Err(ForkError::RootNotFound { slot: slot(9) })
        );
    }
}
