/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validator ballots, as delivered by gossip or found inside executed blocks.

use borsh::BorshSerialize;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::data_types::{SignatureBytes, SlotHash};

/// A validator's ballot for one block. Voting for a block implicitly votes for all of its ancestors.
///
/// Votes reaching [`Bft::tally_vote`](crate::bft::Bft::tally_vote) are assumed to have had their
/// signatures checked already by whoever delivered them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vote {
    pub validator: VerifyingKey,
    pub key: SlotHash,
}

impl Vote {
    pub fn new(validator: VerifyingKey, key: SlotHash) -> Self {
        Self { validator, key }
    }

    /// Get the bytes that are signed over to form a [`SignedVote`].
    pub(crate) fn message_bytes(&self) -> Vec<u8> {
        // Serializing a `SlotHash` into a `Vec` cannot fail.
        self.key.try_to_vec().unwrap_or_default()
    }
}

/// A [`Vote`] together with the voter's signature over it. This is what gets broadcast over gossip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedVote {
    pub vote: Vote,
    pub signature: SignatureBytes,
}

impl SignedVote {
    /// Verify that `signature` was created by `vote.validator` over the vote's message bytes.
    pub fn is_correct(&self) -> bool {
        let signature = Signature::from_bytes(&self.signature);
        self.vote
            .validator
            .verify(&self.vote.message_bytes(), &signature)
            .is_ok()
    }
}
