/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" newtypes that are passed around and inspected by the fork tree, ghost, bft and turbine
//! modules but have no active behavior of their own.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::AddAssign,
};

/// Number of a slot, the unit of time in which at most one leader produces at most one block.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Slot(u64);

impl Slot {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the slot `offset` slots before this one, or `None` if that would be before slot 0.
    pub fn checked_sub(&self, offset: u64) -> Option<Slot> {
        self.0.checked_sub(offset).map(Slot)
    }

    /// Get the slot `offset` slots after this one, stopping at the last representable slot.
    pub fn saturating_add(&self, offset: u64) -> Slot {
        Slot(self.0.saturating_add(offset))
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A 32-byte hash, used as the bank hash of an executed block.
///
/// Ordering is lexicographic over the bytes. Fork choice relies on this to break ties.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one block: the slot it was produced in and its bank hash. Two different blocks produced
/// in the same slot (leader equivocation) have different `SlotHash`es.
///
/// The derived ordering compares `slot` first, then `hash`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct SlotHash {
    pub slot: Slot,
    pub hash: CryptoHash,
}

impl SlotHash {
    pub const fn new(slot: Slot, hash: CryptoHash) -> Self {
        Self { slot, hash }
    }
}

/// The stake delegated to a single validator in an epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Stake(u64);

impl Stake {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of several [`Stake`]s.
///
/// The inner type is `u128`, wider than the `u64` that `Stake` wraps around, so that summing up the
/// stakes of every validator in an epoch can never overflow.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct TotalStake(u128);

impl TotalStake {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }

    /// Subtract `stake`, returning `None` if the result would be negative.
    pub fn checked_sub(&self, stake: Stake) -> Option<TotalStake> {
        self.0.checked_sub(stake.0 as u128).map(TotalStake)
    }
}

impl Display for TotalStake {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<Stake> for TotalStake {
    fn add_assign(&mut self, rhs: Stake) {
        self.0.add_assign(rhs.0 as u128)
    }
}

impl AddAssign<TotalStake> for TotalStake {
    fn add_assign(&mut self, rhs: TotalStake) {
        self.0.add_assign(rhs.0)
    }
}

impl From<Stake> for TotalStake {
    fn from(value: Stake) -> Self {
        TotalStake(value.0 as u128)
    }
}

/// Number of an epoch. Stake tables are fixed for the duration of one epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Epoch(u64);

impl Epoch {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Opaque reference to the account state that the execution engine produced for a fork. The
/// consensus core stores and hands these back but never looks inside.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct ExecutionHandle(u64);

impl ExecutionHandle {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Bytes of an Ed25519 signature.
pub type SignatureBytes = [u8; 64];

/// Bytes of an Ed25519 verifying key.
pub type VerifyingKeyBytes = [u8; 32];
