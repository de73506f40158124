/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and start the replay stage of a validator.
//!
//! The replay stage ties the other components together. Shreds handed to the
//! [`ShredIngest`] (from any number of network threads) are reassembled into FEC sets. The
//! consensus thread joins each slot's sets into a block, executes the block on top of
//! its parent's fork, tallies the votes carried by blocks and gossiped by peers, votes for the head of
//! the heaviest chain, and advances the finalized root.
//!
//! ## Starting the replay stage
//!
//! ```ignore
//! let replay =
//!     ReplaySpec::builder()
//!     .configuration(configuration)
//!     .startup(StartupMode::Live { root, root_state, stake_table })
//!     .execution(execution)
//!     .network(network)
//!     .keypair(keypair)
//!     .build()
//!     .start()?;
//!
//! let mut ingest = replay.shred_ingest();
//! ingest.add_shred(shred);
//! ```
//!
//! ### Required setters
//! - `.configuration(...)`
//! - `.startup(...)`
//! - `.execution(...)`
//! - `.network(...)`
//!
//! ### Optional setters
//! - `.keypair(...)`: without a keypair, the validator follows consensus without voting.
//! - `.blockstore(...)`: finalized blocks are checked against the blockstore's record, and the
//!   consensus thread panics on a mismatch.
//! - `.event_handlers(...)`: handlers for the [events](crate::events) published by the consensus
//!   thread.
//!
//! Dropping the returned [`Replay`] stops the consensus thread and the event bus thread. Shred ingest
//! handles outlive it, but their completed sets are no longer consumed.

pub(crate) mod assembler;

pub(crate) mod consensus;

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;
use typed_builder::TypedBuilder;

use crate::{
    bft::{Bft, BftError, CommitmentLevel},
    config::{Configuration, ConfigurationError, StartupMode},
    event_bus::{start_event_bus, EventHandlers},
    events::*,
    execution::{Blockstore, Execution},
    networking::Network,
    snapshot::{ConsensusImage, ImageError},
    turbine::{erasure::ErasureError, ingest::ShredIngest, resolver::FecResolver},
    types::{
        data_types::{CryptoHash, Slot, SlotHash},
        keypair::Keypair,
        stake_table::StakeTable,
    },
};

use consensus::{lock, Consensus, ConsensusState, SharedState};

/// Stores everything required to start the replay stage.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplaySpec]. On the builder call the following methods to construct a valid [ReplaySpec].

    Required:
    - `.configuration(...)`
    - `.startup(...)`
    - `.execution(...)`
    - `.network(...)`

    Optional:
    - `.keypair(...)`
    - `.blockstore(...)`
    - `.event_handlers(...)`
"))]
pub struct ReplaySpec<E: Execution, N: Network> {
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set how the consensus state is brought up. Required."))]
    startup: StartupMode,
    #[builder(setter(doc = "Set the execution engine. The argument must implement the [Execution] trait. Required."))]
    execution: E,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network] trait. Required."))]
    network: N,
    #[builder(default, setter(strip_option, doc = "Set the keypair this validator votes with. Optional."))]
    keypair: Option<Keypair>,
    #[builder(default, setter(transform = |blockstore: impl Blockstore| Some(Box::new(blockstore) as Box<dyn Blockstore>),
    doc = "Set the blockstore that finalized blocks are checked against. Optional."))]
    blockstore: Option<Box<dyn Blockstore>>,
    #[builder(default, setter(doc = "Set the handlers of the events published by the consensus thread. Optional."))]
    event_handlers: EventHandlers,
}

impl<E: Execution, N: Network> ReplaySpec<E, N> {
    /// Start the consensus thread, and the event bus thread if any event handlers are registered or
    /// event logging is enabled.
    pub fn start(self) -> Result<Replay<N>, ReplayError> {
        let config = self.configuration;
        config.validate()?;

        let (bft, last_vote_slot, restored) = match self.startup {
            StartupMode::Live {
                root,
                root_state,
                stake_table,
            } => {
                let bft = Bft::new(
                    config.forks_max,
                    config.ghost_node_max,
                    config.ghost_vote_max,
                    root,
                    root_state,
                    stake_table,
                )?;
                (bft, None, false)
            }
            StartupMode::Restore { image } => {
                let (bft, last_vote_slot) = image.restore()?;
                (bft, last_vote_slot, true)
            }
        };
        let root = bft.finalized_root();

        let (handoff, completed_sets) = mpsc::sync_channel(config.handoff_capacity);
        let mut resolver = FecResolver::new(config.fec)?;
        resolver.set_root(root.slot);
        let ingest = ShredIngest::new(resolver, handoff, self.network.clone());

        let mut event_handlers = self.event_handlers;
        if config.log_events {
            event_handlers.add_loggers();
        }
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let event_bus = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                Some((event_bus, event_bus_shutdown))
            }
            None => None,
        };

        Event::publish(
            &event_publisher,
            Event::StartReplay(StartReplayEvent {
                timestamp: SystemTime::now(),
                root,
                restored,
            }),
        );

        let state: SharedState = Arc::new(Mutex::new(ConsensusState {
            bft,
            last_vote_slot,
        }));
        let (consensus_shutdown, consensus_shutdown_receiver) = mpsc::channel();
        let consensus = Consensus::new(
            state.clone(),
            self.execution,
            self.network,
            ingest.clone(),
            self.blockstore,
            self.keypair,
            completed_sets,
            event_publisher.clone(),
            config.ghost_vote_max,
            config.forks_max as u64,
        )
        .start(consensus_shutdown_receiver);

        Ok(Replay {
            state,
            ingest,
            event_publisher,
            consensus: Some(consensus),
            consensus_shutdown,
            event_bus,
        })
    }
}

/// A handle to the background threads of the replay stage. When this value is dropped, the threads
/// are shut down.
pub struct Replay<N: Network> {
    state: SharedState,
    ingest: ShredIngest<N>,
    event_publisher: Option<Sender<Event>>,
    consensus: Option<JoinHandle<()>>,
    consensus_shutdown: Sender<()>,
    event_bus: Option<(JoinHandle<()>, Sender<()>)>,
}

impl<N: Network> Replay<N> {
    /// Get a handle that network threads hand received shreds to.
    pub fn shred_ingest(&self) -> ShredIngest<N> {
        self.ingest.clone()
    }

    /// Capture the current consensus state.
    pub fn image(&self) -> ConsensusImage {
        let state = lock(&self.state);
        ConsensusImage::new(&state.bft, state.last_vote_slot)
    }

    /// Replace the stake table, e.g., at an epoch boundary. See [`Bft::epoch_stake_update`].
    pub fn update_stake_table(&self, stake_table: StakeTable) -> Result<(), BftError> {
        let (epoch, total_stake) = (stake_table.epoch(), stake_table.total_stake());
        lock(&self.state).bft.epoch_stake_update(stake_table)?;
        Event::publish(
            &self.event_publisher,
            Event::UpdateStakeTable(UpdateStakeTableEvent {
                timestamp: SystemTime::now(),
                epoch,
                total_stake,
            }),
        );
        Ok(())
    }

    pub fn finalized_root(&self) -> SlotHash {
        lock(&self.state).bft.finalized_root()
    }

    pub fn finalized_hash(&self, slot: Slot) -> Option<CryptoHash> {
        lock(&self.state).bft.finalized_hash(slot)
    }

    pub fn head(&self) -> SlotHash {
        lock(&self.state).bft.head()
    }

    pub fn commitment(&self, slot: Slot) -> Option<CommitmentLevel> {
        lock(&self.state).bft.commitment(slot)
    }

    /// Slot of the latest block this validator voted for.
    pub fn last_vote_slot(&self) -> Option<Slot> {
        lock(&self.state).last_vote_slot
    }
}

impl<N: Network> Drop for Replay<N> {
    fn drop(&mut self) {
        // The consensus thread publishes events, so it is stopped before the event bus.
        if self.consensus_shutdown.send(()).is_ok() {
            if let Some(consensus) = self.consensus.take() {
                if consensus.join().is_err() {
                    log::error!("consensus thread panicked");
                }
            }
        }

        if let Some((event_bus, event_bus_shutdown)) = self.event_bus.take() {
            let _ = event_bus_shutdown.send(());
            if event_bus.join().is_err() {
                log::error!("event bus thread panicked");
            }
        }
    }
}

/// Enumerates the ways the replay stage can fail to start.
#[derive(Debug)]
pub enum ReplayError {
    Configuration(ConfigurationError),
    Erasure(ErasureError),
    Bft(BftError),
    Image(ImageError),
}

impl From<ConfigurationError> for ReplayError {
    fn from(value: ConfigurationError) -> Self {
        ReplayError::Configuration(value)
    }
}

impl From<ErasureError> for ReplayError {
    fn from(value: ErasureError) -> Self {
        ReplayError::Erasure(value)
    }
}

impl From<BftError> for ReplayError {
    fn from(value: BftError) -> Self {
        ReplayError::Bft(value)
    }
}

impl From<ImageError> for ReplayError {
    fn from(value: ImageError) -> Self {
        ReplayError::Image(value)
    }
}
