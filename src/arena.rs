/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fixed-capacity pool of records addressed by generational handles.
//!
//! The fork pool, the ghost node pool and the FEC set pool are all bounded structures whose
//! elements link to one another (parent/child) and get recycled as the chain advances. Instead of
//! owning pointers, every element lives in an [`Arena`] slot, and links are [`Handle`]s: the slot's
//! index plus the generation the slot was in when the element was inserted.
//!
//! Removing an element bumps its slot's generation, so a handle kept around after its element was
//! released no longer resolves: [`Arena::get`] returns `None` instead of silently yielding whatever
//! element was later placed in the recycled slot.

use borsh::{BorshDeserialize, BorshSerialize};

/// A checked reference to an element of an [`Arena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Position of the referenced slot in the arena.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// A pool of at most `capacity` elements of type `T`.
///
/// Slots are allocated lazily, so a large capacity costs nothing until it is used. Vacated slots are
/// reused last-in-first-out.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Arena<T> {
    slots: Vec<Entry<T>>,
    free: Vec<u32>,
    capacity: u64,
    len: u64,
}

impl<T> Arena<T> {
    /// Create an empty arena that will hold at most `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity: capacity as u64,
            len: 0,
        }
    }

    /// Place `value` into a vacant slot. Returns the value back if the arena is full.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(Handle {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() as u64 >= self.capacity {
            return Err(value);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Entry {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(Handle {
            index,
            generation: 0,
        })
    }

    /// Release the element referenced by `handle`, returning it. Returns `None` if `handle` is stale.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Iterate over occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Get the handles of all occupied slots, in index order.
    pub fn handles(&self) -> Vec<Handle> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}
