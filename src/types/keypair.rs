/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The signer capability handed to [`Replay`](crate::replay::Replay) at construction.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

use super::{
    data_types::SlotHash,
    vote::{SignedVote, Vote},
};

/// A facade around [`SigningKey`] that signs this validator's votes and exposes its identity.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Create a vote for `key` signed by this keypair.
    pub fn sign_vote(&self, key: SlotHash) -> SignedVote {
        let vote = Vote::new(self.public(), key);
        let signature = self.0.sign(&vote.message_bytes()).to_bytes();
        SignedVote { vote, signature }
    }
}
