/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local replica.
//!
//! ## Event enum
//!
//! Significant occurrences include receiving a client request, broadcasting a prepare or a
//! commit, retiring a request, and a request timer expiring.
//!
//! Each occurrence corresponds to a variant of the [event enum](Event). Each variant tuple in
//! turn contains an inner struct type storing information that summarizes the particular kind of
//! event, always including a timestamp corresponding to the exact time the event occurred.
//!
//! ## Registering event handlers
//!
//! Library users can register event handler closures, which are then internally called by the
//! library's [event bus](crate::event_bus::start_event_bus) thread when the handler's particular
//! event variant happens. Custom handlers are passed to
//! [`Replica::start`](crate::replica::Replica::start); default handlers that log out events can
//! be enabled through the [configuration](crate::config::Configuration::log_events).
//!
//! Events are emitted **after** the corresponding occurrence completes; the
//! [request timeout event](RequestTimeoutEvent) in particular is the externally surfaced
//! liveness signal a future view-change module will consume.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::messages::{Commit, Prepare, Reply, Request};
use crate::types::basic::{ClientId, ReplicaId, SequenceNumber, UsigCounter, ViewNumber};

/// Enumerates all events defined for the library.
pub enum Event {
    // Events that involve receiving a message.
    ReceiveRequest(ReceiveRequestEvent),
    ReceivePrepare(ReceivePrepareEvent),
    ReceiveCommit(ReceiveCommitEvent),

    // Events that involve broadcasting a message this replica generated.
    Propose(ProposeEvent),
    Commit(CommitEvent),

    // Events that advance the per-client lifecycle.
    RetireRequest(RetireRequestEvent),
    SendReply(SendReplyEvent),
    RequestTimeout(RequestTimeoutEvent),
}

impl Event {
    /// Publishes a given instance of the [Event](Event) enum on the event publisher channel (if
    /// the channel is defined).
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A client request passed authentication and was handed to the request processor.
pub struct ReceiveRequestEvent {
    pub timestamp: SystemTime,
    pub request: Request,
}

/// A prepare from a peer passed authentication and was handed to the prepare processor.
pub struct ReceivePrepareEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub prepare: Prepare,
}

/// A commit from a peer passed authentication and was handed to the commit processor.
pub struct ReceiveCommitEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub commit: Commit,
}

/// This replica, as primary, bound a request to a fresh counter value and broadcast the
/// resulting prepare.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub prepare: Prepare,
}

/// This replica, as backup, endorsed a primary's prepare and broadcast the resulting commit.
pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub commit: Commit,
}

/// A request gathered its commit quorum and was handed to the application, in counter order.
pub struct RetireRequestEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub counter: UsigCounter,
    pub client: ClientId,
    pub seq: SequenceNumber,
}

/// The application produced a result and the signed reply was published to the client.
pub struct SendReplyEvent {
    pub timestamp: SystemTime,
    pub reply: Reply,
}

/// A request timer expired before the request retired. The view is the one that was current
/// when the timer was armed; this is the trigger for an eventual view change.
pub struct RequestTimeoutEvent {
    pub timestamp: SystemTime,
    pub client: ClientId,
    pub view: ViewNumber,
}
