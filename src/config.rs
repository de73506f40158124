/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of the consensus core and of the shred reassembler, and the startup mode.
//!
//! Both configuration types are built with their `builder()` methods, and should be checked with
//! [`Configuration::validate`] before they are used to construct anything. [`Replay::start`](crate::replay::Replay::start)
//! does so itself.

use typed_builder::TypedBuilder;

use crate::{
    snapshot::ConsensusImage,
    types::{
        data_types::{ExecutionHandle, SlotHash},
        stake_table::StakeTable,
    },
};

/// Largest number of data or parity shreds in one FEC set supported by the Reed–Solomon codec.
pub const MAX_SHREDS_PER_KIND: usize = 32768;

/// Parameters of the consensus core.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.forks_max(...)`
    - `.ghost_node_max(...)`
    - `.ghost_vote_max(...)`
    - `.fec(...)`
    - `.handoff_capacity(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the capacity of the fork pool. Must be a power of two, at least the number of slots in an epoch. Required."))]
    pub forks_max: usize,
    #[builder(setter(doc = "Set the maximum number of blocks in the fork-choice tree. Must be at least `forks_max`. Required."))]
    pub ghost_node_max: usize,
    #[builder(setter(doc = "Set the maximum number of distinct validators whose votes the fork-choice tree tracks. Required."))]
    pub ghost_vote_max: usize,
    #[builder(setter(doc = "Set the [configuration](FecConfiguration) of the shred reassembler. Required."))]
    pub fec: FecConfiguration,
    #[builder(setter(doc = "Set the number of completed FEC sets that can wait for the consensus thread before shred ingest blocks. Required."))]
    pub handoff_capacity: usize,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

impl Configuration {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.forks_max < 2 || !self.forks_max.is_power_of_two() {
            return Err(ConfigurationError::ForksMaxNotPowerOfTwo {
                forks_max: self.forks_max,
            });
        }
        if self.ghost_node_max < self.forks_max {
            return Err(ConfigurationError::GhostNodeMaxBelowForksMax {
                ghost_node_max: self.ghost_node_max,
                forks_max: self.forks_max,
            });
        }
        if self.ghost_vote_max == 0 {
            return Err(ConfigurationError::Zero {
                parameter: "ghost_vote_max",
            });
        }
        if self.handoff_capacity == 0 {
            return Err(ConfigurationError::Zero {
                parameter: "handoff_capacity",
            });
        }
        self.fec.validate()
    }
}

/// Parameters of the [shred reassembler](crate::turbine::resolver::FecResolver).
///
/// ## Windows
///
/// - `active_depth`: number of incomplete FEC sets that accept shreds.
/// - `partial_depth`: number of incomplete FEC sets evicted from the active window that can still
///   complete from late shreds.
/// - `complete_depth`: number of completed FEC sets that stay readable.
/// - `retained_depth`: number of completed FEC set keys remembered for duplicate detection.
#[derive(TypedBuilder, Clone, Copy, Debug, PartialEq, Eq)]
#[builder(builder_method(doc = "
    Create a builder for building a [FecConfiguration]. Every parameter is required.
"))]
pub struct FecConfiguration {
    #[builder(setter(doc = "Set the number of data shreds per FEC set (k). Required."))]
    pub data_shred_count: usize,
    #[builder(setter(doc = "Set the number of parity shreds per FEC set (m). Required."))]
    pub parity_shred_count: usize,
    #[builder(setter(doc = "Set the payload size in bytes of every shred. Must be even. Required."))]
    pub shred_payload_size: usize,
    #[builder(setter(doc = "Set the depth of the active window. Required."))]
    pub active_depth: usize,
    #[builder(setter(doc = "Set the depth of the partial window. Required."))]
    pub partial_depth: usize,
    #[builder(setter(doc = "Set the depth of the complete window. Required."))]
    pub complete_depth: usize,
    #[builder(setter(doc = "Set the depth of the retained window. Required."))]
    pub retained_depth: usize,
}

impl FecConfiguration {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (parameter, value) in [
            ("data_shred_count", self.data_shred_count),
            ("parity_shred_count", self.parity_shred_count),
            ("shred_payload_size", self.shred_payload_size),
            ("active_depth", self.active_depth),
            ("partial_depth", self.partial_depth),
            ("complete_depth", self.complete_depth),
            ("retained_depth", self.retained_depth),
        ] {
            if value == 0 {
                return Err(ConfigurationError::Zero { parameter });
            }
        }
        if self.data_shred_count > MAX_SHREDS_PER_KIND || self.parity_shred_count > MAX_SHREDS_PER_KIND
        {
            return Err(ConfigurationError::TooManyShreds {
                data_shred_count: self.data_shred_count,
                parity_shred_count: self.parity_shred_count,
            });
        }
        if self.shred_payload_size % 2 != 0 {
            return Err(ConfigurationError::OddShredPayloadSize {
                shred_payload_size: self.shred_payload_size,
            });
        }
        Ok(())
    }
}

/// How the consensus core is brought up.
pub enum StartupMode {
    /// Start from a finalized block, typically the slot of the snapshot the validator booted from.
    Live {
        root: SlotHash,
        root_state: ExecutionHandle,
        stake_table: StakeTable,
    },
    /// Resume from a persisted [`ConsensusImage`].
    Restore { image: ConsensusImage },
}

/// Enumerates the ways a [`Configuration`] can be invalid.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    ForksMaxNotPowerOfTwo { forks_max: usize },
    GhostNodeMaxBelowForksMax { ghost_node_max: usize, forks_max: usize },
    Zero { parameter: &'static str },
    TooManyShreds { data_shred_count: usize, parity_shred_count: usize },
    OddShredPayloadSize { shred_payload_size: usize },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fec_configuration() -> FecConfiguration {
        FecConfiguration::builder()
            .data_shred_count(3)
            .parity_shred_count(2)
            .shred_payload_size(64)
            .active_depth(4)
            .partial_depth(2)
            .complete_depth(4)
            .retained_depth(8)
            .build()
    }

    fn configuration() -> Configuration {
        Configuration::builder()
            .forks_max(8)
            .ghost_node_max(8)
            .ghost_vote_max(4)
            .fec(fec_configuration())
            .handoff_capacity(4)
            .log_events(false)
            .build()
    }

    #[test]
    fn valid_configuration_passes() {
        assert_eq!(configuration().validate(), Ok(()));
    }

    #[test]
    fn forks_max_must_be_a_power_of_two() {
        let mut config = configuration();
        config.forks_max = 6;
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::ForksMaxNotPowerOfTwo { forks_max: 6 })
        );
    }

    #[test]
    fn odd_shred_payload_size_is_rejected() {
        let mut config = configuration();
        config.fec.shred_payload_size = 63;
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::OddShredPayloadSize {
                shred_payload_size: 63
            })
        );
    }

    #[test]
    fn zero_depth_is_rejected() {
        let mut config = configuration();
        config.fec.partial_depth = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::Zero {
                parameter: "partial_depth"
            })
        );
    }
}
