/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread-safe entry point for shreds arriving from the network.

use std::sync::{
    mpsc::SyncSender,
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::{networking::Network, types::data_types::Slot};

use super::{
    fec_set::CompletedFecSet,
    resolver::{AddResult, FecResolver},
    shred::Shred,
};

/// Shared handle to one [`FecResolver`].
///
/// Clones can be moved into any number of network threads. Completed FEC sets are handed to the
/// consensus thread through a bounded channel: when the consensus thread falls behind,
/// [`add_shred`](Self::add_shred) blocks until it catches up. Gaps are reported to the network's
/// repair service as they appear.
#[derive(Clone)]
pub struct ShredIngest<N: Network> {
    resolver: Arc<Mutex<FecResolver>>,
    handoff: SyncSender<CompletedFecSet>,
    network: N,
}

impl<N: Network> ShredIngest<N> {
    pub fn new(resolver: FecResolver, handoff: SyncSender<CompletedFecSet>, network: N) -> Self {
        Self {
            resolver: Arc::new(Mutex::new(resolver)),
            handoff,
            network,
        }
    }

    pub fn add_shred(&mut self, shred: Shred) -> AddResult {
        let (result, gaps) = {
            let mut resolver = self.lock();
            let result = resolver.add_shred(shred);
            (result, resolver.take_gaps())
        };

        for gap in gaps {
            self.network.request_repair(gap);
        }
        if let AddResult::Completed(set) = &result {
            if self.handoff.send(set.clone()).is_err() {
                log::warn!(
                    "consensus thread is gone, dropping completed FEC set {}",
                    set.key()
                );
            }
        }
        result
    }

    /// See [`FecResolver::set_root`].
    pub fn set_root(&self, root: Slot) {
        self.lock().set_root(root)
    }

    // A panic in another ingest thread leaves the resolver in a consistent state, since every
    // operation on it completes before the guard is dropped.
    fn lock(&self) -> MutexGuard<FecResolver> {
        self.resolver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::fec_configuration,
        turbine::{erasure::Shredder, shred::FecSetKey},
        types::vote::SignedVote,
    };
    use std::{sync::mpsc, thread, time::Duration};

    #[derive(Clone, Default)]
    struct RecordingNetwork {
        repairs: Arc<Mutex<Vec<FecSetKey>>>,
    }

    impl Network for RecordingNetwork {
        fn broadcast_vote(&mut self, _: SignedVote) {}

        fn request_repair(&mut self, key: FecSetKey) {
            self.repairs.lock().unwrap().push(key)
        }

        fn recv_vote(&mut self) -> Option<SignedVote> {
            None
        }
    }

    fn shreds(slot: u64) -> Vec<Shred> {
        Shredder::new(fec_configuration())
            .unwrap()
            .shred(Slot::new(slot), Slot::new(slot - 1), b"payload")
            .unwrap()
    }

    #[test]
    fn full_handoff_channel_blocks_ingest() {
        let (sender, receiver) = mpsc::sync_channel(1);
        let resolver = FecResolver::new(fec_configuration()).unwrap();
        let mut ingest = ShredIngest::new(resolver, sender, RecordingNetwork::default());

        let producer = thread::spawn(move || {
            for slot in 1..=2 {
                for shred in shreds(slot) {
                    ingest.add_shred(shred);
                }
            }
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!producer.is_finished());

        assert_eq!(receiver.recv().unwrap().slot(), Slot::new(1));
        assert_eq!(receiver.recv().unwrap().slot(), Slot::new(2));
        producer.join().unwrap();
    }

    #[test]
    fn clones_share_one_resolver_and_gaps_are_repaired() {
        let (sender, receiver) = mpsc::sync_channel(16);
        let network = RecordingNetwork::default();
        let resolver = FecResolver::new(fec_configuration()).unwrap();
        let ingest = ShredIngest::new(resolver, sender, network.clone());

        // Two threads each deliver every shred of slot 1; the set is handed off once.
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let mut ingest = ingest.clone();
                thread::spawn(move || {
                    for shred in shreds(1) {
                        ingest.add_shred(shred);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(receiver.try_recv().unwrap().slot(), Slot::new(1));
        assert!(receiver.try_recv().is_err());

        // One data shred each for slots 2 to 8 overflows the partial window once.
        let mut ingest = ingest;
        for slot in 2..=8 {
            ingest.add_shred(shreds(slot).remove(0));
        }
        assert_eq!(
            *network.repairs.lock().unwrap(),
            vec![FecSetKey::new(Slot::new(2), 0)]
        );
    }
}
