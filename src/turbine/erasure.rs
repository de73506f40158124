/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reed–Solomon coding of FEC sets.
//!
//! ## Framing
//!
//! Each FEC set carries one chunk of a block. The chunk is prefixed with its length as a big-endian
//! `u64` and zero-padded to `data_shred_count * shred_payload_size` bytes, then cut into
//! `data_shred_count` data shards. `parity_shred_count` recovery shards are computed over the data
//! shards. Any `data_shred_count` of the resulting shreds recover the chunk exactly.

use reed_solomon_simd::{Error as RsError, ReedSolomonDecoder, ReedSolomonEncoder};

use super::shred::{Shred, ShredKind};
use crate::{config::FecConfiguration, types::data_types::Slot};

const LENGTH_PREFIX_SIZE: usize = 8;

/// Cuts blocks into shreds.
#[derive(Clone, Debug)]
pub struct Shredder {
    config: FecConfiguration,
}

impl Shredder {
    pub fn new(config: FecConfiguration) -> Result<Shredder, ErasureError> {
        if config.validate().is_err()
            || config.data_shred_count * config.shred_payload_size <= LENGTH_PREFIX_SIZE
        {
            return Err(ErasureError::InvalidParameters);
        }
        Ok(Shredder { config })
    }

    /// Number of block bytes that fit into one FEC set.
    pub fn set_capacity(&self) -> usize {
        self.config.data_shred_count * self.config.shred_payload_size - LENGTH_PREFIX_SIZE
    }

    /// Cut `block`, produced in `slot` on top of `parent_slot`, into FEC sets and encode each of
    /// them. An empty block still produces one set.
    ///
    /// Shreds are returned grouped by set, data shreds before parity shreds.
    pub fn shred(&self, slot: Slot, parent_slot: Slot, block: &[u8]) -> Result<Vec<Shred>, ErasureError> {
        let parent_offset = slot
            .int()
            .checked_sub(parent_slot.int())
            .filter(|offset| *offset > 0)
            .and_then(|offset| u16::try_from(offset).ok())
            .ok_or(ErasureError::InvalidParentSlot { slot, parent_slot })?;

        let mut chunks: Vec<&[u8]> = block.chunks(self.set_capacity()).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let set_count = chunks.len();
        if u32::try_from(set_count).is_err() {
            return Err(ErasureError::TooManySets { set_count });
        }

        let shard_size = self.config.shred_payload_size;
        let mut shreds =
            Vec::with_capacity(set_count * (self.config.data_shred_count + self.config.parity_shred_count));
        for (fec_set_index, chunk) in chunks.into_iter().enumerate() {
            let last_in_slot = fec_set_index + 1 == set_count;

            let mut framed = Vec::with_capacity(self.config.data_shred_count * shard_size);
            framed.extend_from_slice(&(chunk.len() as u64).to_be_bytes());
            framed.extend_from_slice(chunk);
            framed.resize(self.config.data_shred_count * shard_size, 0);

            let data_shards: Vec<Vec<u8>> = framed.chunks(shard_size).map(|shard| shard.to_vec()).collect();
            let parity_shards = encode(&data_shards, self.config.parity_shred_count, shard_size)?;

            let make_shred = |kind, index: usize, payload: Vec<u8>| Shred {
                slot,
                parent_offset,
                fec_set_index: fec_set_index as u32,
                index: index as u32,
                kind,
                last_in_slot,
                payload,
            };
            shreds.extend(
                data_shards
                    .into_iter()
                    .enumerate()
                    .map(|(index, payload)| make_shred(ShredKind::Data, index, payload)),
            );
            shreds.extend(
                parity_shards
                    .into_iter()
                    .enumerate()
                    .map(|(index, payload)| make_shred(ShredKind::Parity, index, payload)),
            );
        }
        Ok(shreds)
    }
}

/// Compute `parity_count` recovery shards over `data_shards`, which must all be `shard_size` long.
pub(crate) fn encode(
    data_shards: &[Vec<u8>],
    parity_count: usize,
    shard_size: usize,
) -> Result<Vec<Vec<u8>>, ErasureError> {
    let mut encoder = ReedSolomonEncoder::new(data_shards.len(), parity_count, shard_size)
        .map_err(ErasureError::Codec)?;
    for shard in data_shards {
        encoder.add_original_shard(shard).map_err(ErasureError::Codec)?;
    }
    let parity_shards = encoder
        .encode()
        .map_err(ErasureError::Codec)?
        .recovery_iter()
        .map(|shard| shard.to_vec())
        .collect();
    Ok(parity_shards)
}

/// Reconstruct every data shard of a set from the shreds that arrived.
///
/// `data` and `parity` hold one entry per position, `None` where nothing arrived. At least
/// `data.len()` entries in total must be `Some`. Parity shards that arrived are checked against the
/// reconstructed data, so a set mixing shreds of different encodings is detected.
pub(crate) fn recover(
    data: &[Option<Vec<u8>>],
    parity: &[Option<Vec<u8>>],
    shard_size: usize,
) -> Result<Vec<Vec<u8>>, ErasureError> {
    let required = data.len();
    let available = data.iter().chain(parity).filter(|shard| shard.is_some()).count();
    if available < required {
        return Err(ErasureError::NotEnoughShreds { available, required });
    }

    let mut recovered: Vec<Option<Vec<u8>>> = data.to_vec();
    if recovered.iter().any(|shard| shard.is_none()) {
        let mut decoder = ReedSolomonDecoder::new(data.len(), parity.len(), shard_size)
            .map_err(ErasureError::Codec)?;
        for (index, shard) in data.iter().enumerate() {
            if let Some(shard) = shard {
                decoder
                    .add_original_shard(index, shard)
                    .map_err(ErasureError::Codec)?;
            }
        }
        for (index, shard) in parity.iter().enumerate() {
            if let Some(shard) = shard {
                decoder
                    .add_recovery_shard(index, shard)
                    .map_err(ErasureError::Codec)?;
            }
        }
        let result = decoder.decode().map_err(ErasureError::Codec)?;
        for (index, shard) in result.restored_original_iter() {
            if let Some(slot) = recovered.get_mut(index) {
                *slot = Some(shard.to_vec());
            }
        }
    }

    let recovered: Vec<Vec<u8>> = recovered
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(ErasureError::Inconsistent)?;

    if parity.iter().any(|shard| shard.is_some()) {
        let expected = encode(&recovered, parity.len(), shard_size)?;
        for (received, expected) in parity.iter().zip(expected.iter()) {
            if let Some(received) = received {
                if received != expected {
                    return Err(ErasureError::Inconsistent);
                }
            }
        }
    }
    Ok(recovered)
}

/// Strip the framing off a set's data shards, returning the chunk of block bytes they carry.
pub(crate) fn unframe(data_shards: &[Vec<u8>]) -> Result<Vec<u8>, ErasureError> {
    let framed: Vec<u8> = data_shards.concat();
    let prefix: [u8; LENGTH_PREFIX_SIZE] = framed
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(ErasureError::InvalidDataLength)?;
    let len = u64::from_be_bytes(prefix) as usize;
    framed
        .get(LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE.saturating_add(len))
        .map(|chunk| chunk.to_vec())
        .ok_or(ErasureError::InvalidDataLength)
}

/// Enumerates the ways encoding or recovering a FEC set can fail.
#[derive(Debug)]
pub enum ErasureError {
    /// The [`FecConfiguration`] cannot be used for coding.
    InvalidParameters,

    /// The parent slot must be before the block's slot, by at most `u16::MAX` slots.
    InvalidParentSlot { slot: Slot, parent_slot: Slot },

    /// The block needs more FEC sets than can be numbered.
    TooManySets { set_count: usize },

    /// Error from the Reed–Solomon codec.
    Codec(RsError),

    /// Fewer than `data_shred_count` shreds arrived.
    NotEnoughShreds { available: usize, required: usize },

    /// The shreds of the set do not belong to one encoding.
    Inconsistent,

    /// The length prefix does not fit in the set.
    InvalidDataLength,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::fec_configuration;
    use rand::{seq::SliceRandom, SeedableRng};

    fn split(shreds: &[Shred], k: usize, m: usize) -> (Vec<Option<Vec<u8>>>, Vec<Option<Vec<u8>>>) {
        let mut data = vec![None; k];
        let mut parity = vec![None; m];
        for shred in shreds {
            match shred.kind {
                ShredKind::Data => data[shred.index as usize] = Some(shred.payload.clone()),
                ShredKind::Parity => parity[shred.index as usize] = Some(shred.payload.clone()),
            }
        }
        (data, parity)
    }

    #[test]
    fn three_of_five_recover_missing_data_shred() {
        let shredder = Shredder::new(fec_configuration()).unwrap();
        let block: Vec<u8> = (0..150).map(|i| i as u8).collect();
        let shreds = shredder.shred(Slot::new(4), Slot::new(3), &block).unwrap();
        assert_eq!(shreds.len(), 5);

        // Data shreds 0 and 1 and parity shred 0. Data shred 2 is never transmitted.
        let arrived = vec![shreds[0].clone(), shreds[1].clone(), shreds[3].clone()];
        let (data, parity) = split(&arrived, 3, 2);
        let recovered = recover(&data, &parity, 64).unwrap();

        assert_eq!(recovered[2], shreds[2].payload);
        assert_eq!(unframe(&recovered).unwrap(), block);
    }

    #[test]
    fn any_k_of_k_plus_m_recover_in_any_order() {
        let shredder = Shredder::new(fec_configuration()).unwrap();
        let block = b"the quick brown fox jumps over the lazy dog".to_vec();
        let shreds = shredder.shred(Slot::new(9), Slot::new(8), &block).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for missing_a in 0..5 {
            for missing_b in (missing_a + 1)..5 {
                let mut arrived: Vec<Shred> = shreds
                    .iter()
                    .enumerate()
                    .filter(|(position, _)| *position != missing_a && *position != missing_b)
                    .map(|(_, shred)| shred.clone())
                    .collect();
                arrived.shuffle(&mut rng);

                let (data, parity) = split(&arrived, 3, 2);
                let recovered = recover(&data, &parity, 64).unwrap();
                assert_eq!(unframe(&recovered).unwrap(), block);
            }
        }
    }

    #[test]
    fn large_block_spans_several_sets() {
        let shredder = Shredder::new(fec_configuration()).unwrap();
        let block = vec![0xab; shredder.set_capacity() * 2 + 1];
        let shreds = shredder.shred(Slot::new(2), Slot::new(1), &block).unwrap();

        assert_eq!(shreds.len(), 15);
        assert!(shreds.iter().all(|shred| shred.fec_set_index < 3));
        assert!(shreds
            .iter()
            .all(|shred| shred.last_in_slot == (shred.fec_set_index == 2)));
    }

    #[test]
    fn empty_block_is_one_set() {
        let shredder = Shredder::new(fec_configuration()).unwrap();
        let shreds = shredder.shred(Slot::new(2), Slot::new(1), &[]).unwrap();
        assert_eq!(shreds.len(), 5);
        let (data, _) = split(&shreds, 3, 2);
        let data: Vec<Vec<u8>> = data.into_iter().map(|shard| shard.unwrap()).collect();
        assert_eq!(unframe(&data).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn mixed_encodings_are_detected() {
        let shredder = Shredder::new(fec_configuration()).unwrap();
        let a = shredder.shred(Slot::new(2), Slot::new(1), b"first").unwrap();
        let b = shredder.shred(Slot::new(2), Slot::new(1), b"second").unwrap();

        let arrived = vec![a[0].clone(), a[1].clone(), a[2].clone(), b[3].clone()];
        let (data, parity) = split(&arrived, 3, 2);
        assert!(matches!(
            recover(&data, &parity, 64),
            Err(ErasureError::Inconsistent)
        ));
    }

    #[test]
    fn too_few_shreds_fail() {
        let data = vec![Some(vec![0; 64]), None, None];
        let parity = vec![Some(vec![0; 64]), None];
        assert!(matches!(
            recover(&data, &parity, 64),
            Err(ErasureError::NotEnoughShreds {
                available: 2,
                required: 3
            })
        ));
    }
}
