/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that fires user-registered and logging handlers for published [events](crate::events).

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the handlers for each event type. A handler is called every time an event of its type is
/// published.
///
/// Handlers run on a dedicated thread, in the order the events were published. A slow handler
/// delays the handlers of later events but never the consensus thread.
#[derive(Default)]
pub struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) finalize_block_handlers: Vec<HandlerPtr<FinalizeBlockEvent>>,
    pub(crate) prune_fork_handlers: Vec<HandlerPtr<PruneForkEvent>>,
    pub(crate) update_stake_table_handlers: Vec<HandlerPtr<UpdateStakeTableEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) start_replay_handlers: Vec<HandlerPtr<StartReplayEvent>>,
    pub(crate) complete_fec_set_handlers: Vec<HandlerPtr<CompleteFecSetEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
}

impl EventHandlers {
    /// Add the default logging handler for every event type, after the handlers registered so far.
    pub(crate) fn add_loggers(&mut self) {
        self.insert_block_handlers.push(InsertBlockEvent::get_logger());
        self.finalize_block_handlers.push(FinalizeBlockEvent::get_logger());
        self.prune_fork_handlers.push(PruneForkEvent::get_logger());
        self.update_stake_table_handlers
            .push(UpdateStakeTableEvent::get_logger());
        self.vote_handlers.push(VoteEvent::get_logger());
        self.receive_vote_handlers.push(ReceiveVoteEvent::get_logger());
        self.start_replay_handlers.push(StartReplayEvent::get_logger());
        self.complete_fec_set_handlers
            .push(CompleteFecSetEvent::get_logger());
        self.reject_block_handlers.push(RejectBlockEvent::get_logger());
    }

    /// Register a handler for [`InsertBlockEvent`]s.
    pub fn on_insert_block(&mut self, handler: impl Fn(&InsertBlockEvent) + Send + 'static) {
        self.insert_block_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`FinalizeBlockEvent`]s.
    pub fn on_finalize_block(&mut self, handler: impl Fn(&FinalizeBlockEvent) + Send + 'static) {
        self.finalize_block_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`PruneForkEvent`]s.
    pub fn on_prune_fork(&mut self, handler: impl Fn(&PruneForkEvent) + Send + 'static) {
        self.prune_fork_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`UpdateStakeTableEvent`]s.
    pub fn on_update_stake_table(
        &mut self,
        handler: impl Fn(&UpdateStakeTableEvent) + Send + 'static,
    ) {
        self.update_stake_table_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`VoteEvent`]s.
    pub fn on_vote(&mut self, handler: impl Fn(&VoteEvent) + Send + 'static) {
        self.vote_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`ReceiveVoteEvent`]s.
    pub fn on_receive_vote(&mut self, handler: impl Fn(&ReceiveVoteEvent) + Send + 'static) {
        self.receive_vote_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`StartReplayEvent`]s.
    pub fn on_start_replay(&mut self, handler: impl Fn(&StartReplayEvent) + Send + 'static) {
        self.start_replay_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`CompleteFecSetEvent`]s.
    pub fn on_complete_fec_set(&mut self, handler: impl Fn(&CompleteFecSetEvent) + Send + 'static) {
        self.complete_fec_set_handlers.push(Box::new(handler))
    }

    /// Register a handler for [`RejectBlockEvent`]s.
    pub fn on_reject_block(&mut self, handler: impl Fn(&RejectBlockEvent) + Send + 'static) {
        self.reject_block_handlers.push(Box::new(handler))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.finalize_block_handlers.is_empty()
            && self.prune_fork_handlers.is_empty()
            && self.update_stake_table_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.start_replay_handlers.is_empty()
            && self.complete_fec_set_handlers.is_empty()
            && self.reject_block_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) => self
                .insert_block_handlers
                .iter()
                .for_each(|handler| handler(&insert_block_event)),

            Event::FinalizeBlock(finalize_block_event) => self
                .finalize_block_handlers
                .iter()
                .for_each(|handler| handler(&finalize_block_event)),

            Event::PruneFork(prune_fork_event) => self
                .prune_fork_handlers
                .iter()
                .for_each(|handler| handler(&prune_fork_event)),

            Event::UpdateStakeTable(update_stake_table_event) => self
                .update_stake_table_handlers
                .iter()
                .for_each(|handler| handler(&update_stake_table_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::StartReplay(start_replay_event) => self
                .start_replay_handlers
                .iter()
                .for_each(|handler| handler(&start_replay_event)),

            Event::CompleteFecSet(complete_fec_set_event) => self
                .complete_fec_set_handlers
                .iter()
                .for_each(|handler| handler(&complete_fec_set_event)),

            Event::RejectBlock(reject_block_event) => self
                .reject_block_handlers
                .iter()
                .for_each(|handler| handler(&reject_block_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // The consensus thread (event publisher) has stopped.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
