/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persisted images of the consensus state.
//!
//! A [`ConsensusImage`] captures everything [`Replay`](crate::replay::Replay) needs to resume: the
//! fork pool (including the positions and generations of its slots), the frontier, the fork-choice
//! tree with every validator's latest vote, the stake table, the commitment cache and the finalized
//! root, and the slot of this validator's own latest vote.
//!
//! ## Byte format
//!
//! [`ConsensusImage::to_bytes`] produces the SHA-256 hash of the Borsh-serialized image, followed by
//! the Borsh-serialized image. [`ConsensusImage::from_bytes`] rejects bytes whose hash does not match.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256 as CryptoHasher};
use std::io;

use crate::{
    bft::{tally::BftImage, Bft},
    types::data_types::{Slot, SlotHash},
};

const CHECKSUM_SIZE: usize = 32;

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ConsensusImage {
    bft: BftImage,
    last_vote_slot: Option<Slot>,
}

impl ConsensusImage {
    pub(crate) fn new(bft: &Bft, last_vote_slot: Option<Slot>) -> ConsensusImage {
        ConsensusImage {
            bft: bft.to_image(),
            last_vote_slot,
        }
    }

    /// The finalized root at the time the image was taken.
    pub fn finalized_root(&self) -> SlotHash {
        self.bft.root()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let body = self.try_to_vec().map_err(ImageError::Serialize)?;
        let checksum: [u8; CHECKSUM_SIZE] = CryptoHasher::digest(&body).into();

        let mut bytes = Vec::with_capacity(CHECKSUM_SIZE + body.len());
        bytes.extend_from_slice(&checksum);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ConsensusImage, ImageError> {
        if bytes.len() < CHECKSUM_SIZE {
            return Err(ImageError::Truncated { len: bytes.len() });
        }
        let (checksum, body) = bytes.split_at(CHECKSUM_SIZE);
        let expected: [u8; CHECKSUM_SIZE] = CryptoHasher::digest(body).into();
        if checksum != expected {
            return Err(ImageError::ChecksumMismatch);
        }
        ConsensusImage::try_from_slice(body).map_err(ImageError::Deserialize)
    }

    /// Rebuild the tally engine and get the slot of this validator's latest vote.
    pub(crate) fn restore(self) -> Result<(Bft, Option<Slot>), ImageError> {
        let bft = Bft::try_from(self.bft).map_err(ImageError::InvalidValidatorKey)?;
        Ok((bft, self.last_vote_slot))
    }
}

/// Enumerates the ways saving or loading a [`ConsensusImage`] can fail.
#[derive(Debug)]
pub enum ImageError {
    Serialize(io::Error),
    Deserialize(io::Error),
    /// The bytes are too short to even hold a checksum.
    Truncated { len: usize },
    /// The bytes were corrupted.
    ChecksumMismatch,
    /// A verifying key in the image is not a valid Ed25519 point.
    InvalidValidatorKey(ed25519_dalek::SignatureError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        data_types::{CryptoHash, Epoch, ExecutionHandle, Stake},
        stake_table::StakeTable,
    };
    use ed25519_dalek::SigningKey;

    fn key(slot: u64) -> SlotHash {
        SlotHash::new(Slot::new(slot), CryptoHash::new([slot as u8; 32]))
    }

    fn bft() -> Bft {
        let validators: Vec<_> = (1..=3)
            .map(|seed| SigningKey::from_bytes(&[seed; 32]).verifying_key())
            .collect();
        let mut stake_table = StakeTable::new(Epoch::new(1));
        for validator in &validators {
            stake_table.put(validator, Stake::new(10));
        }

        let mut bft = Bft::new(8, 8, 8, key(0), ExecutionHandle::new(0), stake_table).unwrap();
        for (slot, parent) in [(1, 0), (2, 1), (3, 1), (4, 2)] {
            let handle = bft.acquire_fork(Slot::new(slot), Slot::new(parent)).unwrap();
            bft.insert_block(handle, ExecutionHandle::new(slot), key(slot).hash)
                .unwrap();
        }
        bft.tally_vote(&validators[0], key(4)).unwrap();
        bft.tally_vote(&validators[1], key(3)).unwrap();
        bft
    }

    #[test]
    fn restored_image_equals_original() {
        let bft = bft();
        let bytes = ConsensusImage::new(&bft, Some(Slot::new(4)))
            .to_bytes()
            .unwrap();

        let image = ConsensusImage::from_bytes(&bytes).unwrap();
        assert_eq!(image.finalized_root(), key(0));
        let (restored, last_vote_slot) = image.restore().unwrap();

        assert_eq!(restored, bft);
        assert_eq!(last_vote_slot, Some(Slot::new(4)));
        restored.ghost().verify_integrity().unwrap();
    }

    #[test]
    fn corrupted_image_is_rejected() {
        let mut bytes = ConsensusImage::new(&bft(), None).to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        assert!(matches!(
            ConsensusImage::from_bytes(&bytes),
            Err(ImageError::ChecksumMismatch)
        ));
        assert!(matches!(
            ConsensusImage::from_bytes(&bytes[..5]),
            Err(ImageError::Truncated { len: 5 })
        ));
    }
}
