use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

use tvu_consensus::{
    execution::{ExecuteError, ExecutedBlock, Execution},
    forks::Fork,
    types::data_types::{CryptoHash, ExecutionHandle, Slot},
};

pub(crate) const INVALID_BLOCK_PREFIX: &[u8] = b"invalid";

/// An execution engine whose bank hash is the SHA-256 hash of the parent's bank hash, the slot and
/// the block's bytes. Blocks starting with [`INVALID_BLOCK_PREFIX`] are invalid.
#[derive(Clone, Default)]
pub(crate) struct HashChainExecution {
    next_state: u64,
    pub(crate) discarded: Arc<Mutex<Vec<ExecutionHandle>>>,
}

impl HashChainExecution {
    pub(crate) fn bank_hash(parent_hash: CryptoHash, slot: Slot, block: &[u8]) -> CryptoHash {
        let mut hasher = Sha256::new();
        hasher.update(parent_hash.bytes());
        hasher.update(slot.int().to_le_bytes());
        hasher.update(block);
        CryptoHash::new(hasher.finalize().into())
    }
}

impl Execution for HashChainExecution {
    fn execute(&mut self, parent: &Fork, slot: Slot, block: &[u8]) -> Result<ExecutedBlock, ExecuteError> {
        if block.starts_with(INVALID_BLOCK_PREFIX) {
            return Err(ExecuteError::InvalidBlock);
        }
        self.next_state += 1;
        Ok(ExecutedBlock {
            state: ExecutionHandle::new(self.next_state),
            hash: Self::bank_hash(parent.hash, slot, block),
            votes: Vec::new(),
        })
    }

    fn discard(&mut self, state: ExecutionHandle) {
        self.discarded.lock().unwrap().push(state)
    }
}
