/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chokepoint for messages this replica generates.
//!
//! Every outbound replica message is bound to a fresh trusted counter value, broadcast to all
//! peers, and delivered locally through the loopback channel so the generating replica runs the
//! same processing path as its peers: the primary observes its own prepare (and so counts as a
//! commit witness), a backup observes its own commit.
//!
//! Counter acquisition and signing happen inside [`Usig::create_ui`], which is serialized per
//! replica; the counter a message carries is therefore unique and, across the messages this
//! replica generates, strictly increasing.

use std::time::SystemTime;

use crate::app::RequestConsumer;
use crate::events::{CommitEvent, Event, ProposeEvent};
use crate::messages::{Commit, Message, Prepare, Request};
use crate::networking::Network;
use crate::types::basic::ViewNumber;
use crate::usig::Usig;

use super::Protocol;

impl<C: RequestConsumer, N: Network, U: Usig> Protocol<C, N, U> {
    /// As the primary of `view`, bind `request` to a fresh counter value and broadcast the
    /// resulting prepare.
    pub(crate) fn broadcast_prepare(&self, view: ViewNumber, request: Request) {
        let prepare = match Prepare::new(view, self.config.self_id, request, &self.usig) {
            Ok(prepare) => prepare,
            Err(err) => {
                log::warn!("trusted component refused to certify a Prepare: {:?}", err);
                return;
            }
        };

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            prepare: prepare.clone(),
        })
        .publish(&self.event_publisher);
        self.dispatch(Message::Prepare(prepare));
    }

    /// As a backup, endorse `prepare` under a fresh counter value and broadcast the resulting
    /// commit.
    pub(crate) fn broadcast_commit(&self, prepare: &Prepare) {
        let commit = match Commit::new(self.config.self_id, prepare, &self.usig) {
            Ok(commit) => commit,
            Err(err) => {
                log::warn!("trusted component refused to certify a Commit: {:?}", err);
                return;
            }
        };

        Event::Commit(CommitEvent {
            timestamp: SystemTime::now(),
            commit: commit.clone(),
        })
        .publish(&self.event_publisher);
        self.dispatch(Message::Commit(commit));
    }

    // Broadcast to every peer and loop back locally.
    fn dispatch(&self, message: Message) {
        self.network.lock().unwrap().broadcast(message.clone());
        if self.loopback.send(message).is_err() {
            log::debug!("loopback channel closed; replica is shutting down");
        }
    }
}
