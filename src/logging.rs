/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via
//! [`Configuration::log_events`](crate::config::Configuration::log_events).
//!
//! The consensus core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveVote](crate::events::ReceiveVoteEvent) is printed:
//!
//! ```text
//! ReceiveVote, 1701329264, Id5u7f6, 42, fNGCJyk, OptimisticallyConfirmed
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the voter's verifying
//!   key.
//! - The fourth value is the slot of the voted block.
//! - The fifth value is the first seven characters of the Base64 encoding of the voted block's hash.
//! - The sixth value is the commitment level of the voted block after the vote was tallied.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const FINALIZE_BLOCK: &str = "FinalizeBlock";
pub const PRUNE_FORK: &str = "PruneFork";
pub const UPDATE_STAKE_TABLE: &str = "UpdateStakeTable";

pub const VOTE: &str = "Vote";
pub const RECEIVE_VOTE: &str = "ReceiveVote";

pub const START_REPLAY: &str = "StartReplay";
pub const COMPLETE_FEC_SET: &str = "CompleteFecSet";
pub const REJECT_BLOCK: &str = "RejectBlock";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                insert_block_event.block.slot,
                first_seven_base64_chars(&insert_block_event.block.hash.bytes()),
                insert_block_event.parent.slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_block_event: &FinalizeBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FINALIZE_BLOCK,
                secs_since_unix_epoch(finalize_block_event.timestamp),
                finalize_block_event.block.slot,
                first_seven_base64_chars(&finalize_block_event.block.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneForkEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_fork_event: &PruneForkEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_FORK,
                secs_since_unix_epoch(prune_fork_event.timestamp),
                prune_fork_event.slot
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateStakeTableEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_stake_table_event: &UpdateStakeTableEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_STAKE_TABLE,
                secs_since_unix_epoch(update_stake_table_event.timestamp),
                update_stake_table_event.epoch,
                update_stake_table_event.total_stake
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.vote.key.slot,
                first_seven_base64_chars(&vote_event.vote.key.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                first_seven_base64_chars(&receive_vote_event.vote.validator.to_bytes()),
                receive_vote_event.vote.key.slot,
                first_seven_base64_chars(&receive_vote_event.vote.key.hash.bytes()),
                receive_vote_event.level
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartReplayEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_replay_event: &StartReplayEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_REPLAY,
                secs_since_unix_epoch(start_replay_event.timestamp),
                start_replay_event.root.slot,
                first_seven_base64_chars(&start_replay_event.root.hash.bytes()),
                if start_replay_event.restored { "Restore" } else { "Live" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteFecSetEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_fec_set_event: &CompleteFecSetEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMPLETE_FEC_SET,
                secs_since_unix_epoch(complete_fec_set_event.timestamp),
                complete_fec_set_event.key.slot,
                complete_fec_set_event.key.fec_set_index
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                reject_block_event.slot,
                reject_block_reason_info(&reject_block_event.reason)
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn reject_block_reason_info(reason: &RejectBlockReason) -> String {
    match reason {
        RejectBlockReason::Execution(err) => format!("Execution: {:?}", err),
        RejectBlockReason::Malformed => String::from("Malformed"),
        RejectBlockReason::Capacity => String::from("Capacity"),
        RejectBlockReason::NotExtendable => String::from("NotExtendable"),
    }
}
