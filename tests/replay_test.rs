/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! End-to-end tests of the replay stage: shreds go in, finality comes out.

mod common;

use std::sync::mpsc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;
use tvu_consensus::{
    bft::CommitmentLevel,
    config::StartupMode,
    event_bus::EventHandlers,
    events::RejectBlockReason,
    replay::{Replay, ReplaySpec},
    types::{
        data_types::{CryptoHash, Epoch, ExecutionHandle, Slot, SlotHash, Stake},
        keypair::Keypair,
        stake_table::StakeTable,
    },
};

use common::{
    configuration,
    execution::{HashChainExecution, INVALID_BLOCK_PREFIX},
    logging::setup_logger,
    lossy_shreds,
    network::{mock_network, NetworkStub},
    wait_until,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn genesis() -> SlotHash {
    SlotHash::new(Slot::new(0), CryptoHash::new([0; 32]))
}

fn block(slot: u64) -> Vec<u8> {
    (0..700u32).map(|i| (i as u64 * 31 + slot) as u8).collect()
}

fn start_validators(count: usize) -> Vec<Replay<NetworkStub>> {
    let keypairs: Vec<SigningKey> = (0..count).map(|_| SigningKey::generate(&mut OsRng)).collect();
    let mut stake_table = StakeTable::new(Epoch::new(0));
    for keypair in &keypairs {
        stake_table.put(&keypair.verifying_key(), Stake::new(100));
    }
    let networks = mock_network(keypairs.iter().map(SigningKey::verifying_key));

    keypairs
        .into_iter()
        .zip(networks)
        .map(|(keypair, network)| {
            ReplaySpec::builder()
                .configuration(configuration())
                .startup(StartupMode::Live {
                    root: genesis(),
                    root_state: ExecutionHandle::new(0),
                    stake_table: stake_table.clone(),
                })
                .execution(HashChainExecution::default())
                .network(network)
                .keypair(Keypair::new(keypair))
                .build()
                .start()
                .unwrap()
        })
        .collect()
}

fn expected_hash(slots: impl Iterator<Item = u64>) -> CryptoHash {
    let mut parent = genesis();
    for slot in slots {
        parent = SlotHash::new(
            Slot::new(slot),
            HashChainExecution::bank_hash(parent.hash, Slot::new(slot), &block(slot)),
        );
    }
    parent.hash
}

#[test]
fn four_validators_finalize_a_chain_from_lossy_shreds() {
    setup_logger(LevelFilter::Info);
    let validators = start_validators(4);

    for slot in 1..=5 {
        for validator in &validators {
            let mut ingest = validator.shred_ingest();
            for shred in lossy_shreds(slot, slot - 1, &block(slot)) {
                ingest.add_shred(shred);
            }
        }
    }

    for validator in &validators {
        wait_until(TIMEOUT, || validator.finalized_root().slot == Slot::new(5));
    }
    for validator in &validators {
        assert_eq!(validator.finalized_root().hash, expected_hash(1..=5));
        assert_eq!(validator.finalized_hash(Slot::new(3)), Some(expected_hash(1..=3)));
        assert_eq!(validator.commitment(Slot::new(2)), Some(CommitmentLevel::Finalized));
        assert!(validator.last_vote_slot().is_some());
    }
}

#[test]
fn blocks_arriving_before_their_parent_are_replayed_in_order() {
    setup_logger(LevelFilter::Info);
    let validators = start_validators(1);
    let validator = &validators[0];
    let mut ingest = validator.shred_ingest();

    // Slot 3 builds on slot 1; slot 2 is skipped by the leader schedule.
    for shred in lossy_shreds(3, 1, &block(3)) {
        ingest.add_shred(shred);
    }
    for shred in lossy_shreds(1, 0, &block(1)) {
        ingest.add_shred(shred);
    }

    wait_until(TIMEOUT, || validator.finalized_root().slot == Slot::new(3));
    assert_eq!(validator.finalized_root().hash, expected_hash([1, 3].into_iter()));
    assert_eq!(validator.commitment(Slot::new(2)), None);
}

#[test]
fn invalid_blocks_are_rejected_and_their_children_never_replay() {
    setup_logger(LevelFilter::Info);
    let keypair = SigningKey::generate(&mut OsRng);
    let mut stake_table = StakeTable::new(Epoch::new(0));
    stake_table.put(&keypair.verifying_key(), Stake::new(1));
    let network = mock_network([keypair.verifying_key()].into_iter()).remove(0);

    let (rejections, rejected) = mpsc::channel();
    let mut event_handlers = EventHandlers::default();
    event_handlers.on_reject_block(move |event| {
        if let RejectBlockReason::Execution(_) = event.reason {
            let _ = rejections.send(event.slot);
        }
    });

    let execution = HashChainExecution::default();
    let discarded = execution.discarded.clone();
    let validator = ReplaySpec::builder()
        .configuration(configuration())
        .startup(StartupMode::Live {
            root: genesis(),
            root_state: ExecutionHandle::new(0),
            stake_table,
        })
        .execution(execution)
        .network(network)
        .keypair(Keypair::new(keypair))
        .event_handlers(event_handlers)
        .build()
        .start()
        .unwrap();
    let mut ingest = validator.shred_ingest();

    let mut invalid = INVALID_BLOCK_PREFIX.to_vec();
    invalid.extend_from_slice(&block(1));
    for shred in lossy_shreds(1, 0, &invalid) {
        ingest.add_shred(shred);
    }
    assert_eq!(rejected.recv_timeout(TIMEOUT).unwrap(), Slot::new(1));

    for shred in lossy_shreds(2, 1, &block(2)) {
        ingest.add_shred(shred);
    }
    for shred in lossy_shreds(3, 0, &block(3)) {
        ingest.add_shred(shred);
    }
    wait_until(TIMEOUT, || validator.finalized_root().slot == Slot::new(3));
    assert_eq!(validator.commitment(Slot::new(2)), None);

    // Only the state of the previous root is discarded: the invalid block never produced one.
    wait_until(TIMEOUT, || !discarded.lock().unwrap().is_empty());
    assert_eq!(*discarded.lock().unwrap(), vec![ExecutionHandle::new(0)]);
}
