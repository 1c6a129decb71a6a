/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The message processing pipeline.
//!
//! [`Protocol`] owns the replica's volatile protocol state and exposes the two ingress points:
//! [`submit_request`](Protocol::submit_request) for the client-facing gateway and
//! [`handle_message`](Protocol::handle_message) for the peer transport. Both validate first
//! (see [validation](crate::validation)) and then hand the message to the stateful processor
//! for its kind:
//!
//! - the request processor ([`requests`]) captures the request's sequence number and, on the
//!   primary, turns the request into a prepare;
//! - the prepare processor ([`prepares`]) enforces primary counter continuity, records the
//!   request as prepared, and on backups answers with a commit;
//! - the commit processor ([`commits`]) accumulates commit certificates and retires requests in
//!   strict counter order, handing them to the application.
//!
//! Messages this replica generates go through the chokepoint in [`outbound`], which binds them
//! to a fresh trusted counter value, broadcasts them, and loops them back into the pipeline
//! through a channel drained by the loopback thread. That way the primary observes its own
//! prepare, a backup its own commit, and the stages stay strictly one-way.
//!
//! Every entry point is safe to invoke concurrently. Serialization lives in the state handles:
//! the per-client capture guard, the per-primary reassembly queue, the commit log (which also
//! serializes execution), and the trusted counter itself.

pub(crate) mod commits;

pub(crate) mod outbound;

pub(crate) mod prepares;

pub(crate) mod requests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::app::RequestConsumer;
use crate::client_state::ClientRegistry;
use crate::config::Configuration;
use crate::events::{Event, ReceiveCommitEvent, ReceivePrepareEvent, ReceiveRequestEvent};
use crate::executor::{OperationExecutor, PendingReply};
use crate::identity::{ClientDirectory, PeerSet};
use crate::messages::Message;
use crate::networking::Network;
use crate::types::basic::{ReplicaId, ViewNumber};
use crate::usig::Usig;
use crate::validation::{validate_commit, validate_prepare, validate_request};

use self::commits::CommitLog;
use self::prepares::ReassemblyQueues;

pub(crate) struct Protocol<C: RequestConsumer, N: Network, U: Usig> {
    pub(crate) config: Configuration,
    pub(crate) peers: PeerSet,
    pub(crate) clients: ClientDirectory,
    pub(crate) usig: U,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) network: Mutex<N>,
    pub(crate) loopback: Sender<Message>,
    pub(crate) executor: OperationExecutor<C>,
    pub(crate) pending_replies: Sender<PendingReply>,
    pub(crate) event_publisher: Option<Sender<Event>>,
    view: AtomicU64,
    pub(crate) reassembly: Mutex<ReassemblyQueues>,
    pub(crate) commit_log: Mutex<CommitLog>,
}

impl<C: RequestConsumer, N: Network, U: Usig> Protocol<C, N, U> {
    /// Construct the pipeline. Returns the protocol handle together with the receiving end of
    /// the loopback channel, which the caller must drain into
    /// [`handle_loopback`](Protocol::handle_loopback).
    pub(crate) fn new(
        config: Configuration,
        peers: PeerSet,
        clients: ClientDirectory,
        usig: U,
        network: N,
        consumer: C,
        registry: Arc<ClientRegistry>,
        pending_replies: Sender<PendingReply>,
        event_publisher: Option<Sender<Event>>,
    ) -> (Arc<Protocol<C, N, U>>, Receiver<Message>) {
        let (loopback, loopback_receiver) = mpsc::channel();
        let window = config.reassembly_window;
        let view = config.initial_view;
        let protocol = Arc::new(Protocol {
            config,
            peers,
            clients,
            usig,
            registry,
            network: Mutex::new(network),
            loopback,
            executor: OperationExecutor::new(consumer),
            pending_replies,
            event_publisher,
            view: AtomicU64::new(view.int()),
            reassembly: Mutex::new(ReassemblyQueues::new(window)),
            commit_log: Mutex::new(CommitLog::new()),
        });
        (protocol, loopback_receiver)
    }

    /// The view this replica currently operates in.
    ///
    /// The value is static today, but every consumer treats it as a parameter so that a future
    /// view-change module only has to store into it.
    pub(crate) fn current_view(&self) -> ViewNumber {
        ViewNumber::new(self.view.load(Ordering::SeqCst))
    }

    /// The primary of `view` in this deployment.
    pub(crate) fn primary(&self, view: ViewNumber) -> ReplicaId {
        view.primary(self.peers.total())
    }

    /// Process a message received from the peer transport.
    ///
    /// Messages that fail validation are logged and dropped; duplicates and messages from other
    /// views are dropped silently at debug level. This method never propagates an error to the
    /// transport.
    pub(crate) fn handle_message(&self, origin: ReplicaId, message: Message) {
        match message {
            Message::Request(request) => {
                if let Err(err) = validate_request(&request, &self.clients) {
                    log::warn!("dropping Request from peer {}: {}", origin, err);
                    return;
                }
                Event::ReceiveRequest(ReceiveRequestEvent {
                    timestamp: SystemTime::now(),
                    request: request.clone(),
                })
                .publish(&self.event_publisher);
                self.process_request(&request);
            }
            Message::Prepare(prepare) => {
                if let Err(err) = validate_prepare(&prepare, &self.peers, &self.clients, &self.usig)
                {
                    log::warn!("dropping Prepare from peer {}: {}", origin, err);
                    return;
                }
                Event::ReceivePrepare(ReceivePrepareEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    prepare: prepare.clone(),
                })
                .publish(&self.event_publisher);
                self.process_prepare(prepare);
            }
            Message::Commit(commit) => {
                if let Err(err) = validate_commit(&commit, &self.peers, &self.clients, &self.usig) {
                    log::warn!("dropping Commit from peer {}: {}", origin, err);
                    return;
                }
                Event::ReceiveCommit(ReceiveCommitEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    commit: commit.clone(),
                })
                .publish(&self.event_publisher);
                self.process_commit(commit);
            }
            Message::Reply(_) => {
                log::debug!("dropping Reply received on the replica transport from {}", origin)
            }
        }
    }

    /// Process a message this replica generated and looped back to itself. Locally generated
    /// messages are trusted; they skip validation but take the same processing path as their
    /// peer-received counterparts.
    pub(crate) fn handle_loopback(&self, message: Message) {
        match message {
            Message::Prepare(prepare) => self.process_prepare(prepare),
            Message::Commit(commit) => self.process_commit(commit),
            other => log::debug!("unexpected {} message on the loopback channel", other.kind()),
        }
    }
}
