use std::time::{Duration, Instant};
use std::thread;

use tvu_consensus::{
    config::{Configuration, FecConfiguration},
    turbine::{erasure::Shredder, shred::Shred},
    types::data_types::Slot,
};

pub(crate) mod execution;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) fn configuration() -> Configuration {
    Configuration::builder()
        .forks_max(16)
        .ghost_node_max(32)
        .ghost_vote_max(8)
        .fec(fec_configuration())
        .handoff_capacity(16)
        .log_events(true)
        .build()
}

pub(crate) fn fec_configuration() -> FecConfiguration {
    FecConfiguration::builder()
        .data_shred_count(4)
        .parity_shred_count(2)
        .shred_payload_size(128)
        .active_depth(8)
        .partial_depth(4)
        .complete_depth(8)
        .retained_depth(32)
        .build()
}

/// Shred `block` the way a leader would, then drop the first data shred and the last parity shred of
/// every FEC set so that every set has to be recovered.
pub(crate) fn lossy_shreds(slot: u64, parent_slot: u64, block: &[u8]) -> Vec<Shred> {
    let config = fec_configuration();
    let per_set = config.data_shred_count + config.parity_shred_count;
    Shredder::new(config)
        .unwrap()
        .shred(Slot::new(slot), Slot::new(parent_slot), block)
        .unwrap()
        .into_iter()
        .enumerate()
        .filter(|(position, _)| {
            let position = position % per_set;
            position != 0 && position != per_set - 1
        })
        .map(|(_, shred)| shred)
        .collect()
}

/// Poll `condition` until it holds, failing the test after `timeout`.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", timeout);
        thread::sleep(Duration::from_millis(10));
    }
}
