/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that [start](Replica::start) a replica, as well as [the type](Replica) which keeps
//! the replica alive.
//!
//! The library works to safely replicate a deterministic application in `n = 2f + 1` processes,
//! up to `f` of which may fail arbitrarily. In our terminology these processes are called
//! 'replicas'. Each replica is identified by a numeric id and an Ed25519 public key, and holds a
//! trusted monotonic counter component reached through the [`Usig`] trait.
//!
//! `Replica::start` wires the processing pipeline from the collaborators the caller supplies:
//! the application, the trusted component, the network, the participant directories. It spawns
//! the long-lived threads: the poller (network ingress), the loopback (locally generated
//! messages), the replier (reply assembly), and, when any handler is registered, the event bus.
//! Dropping the `Replica` shuts the threads down in dependency order.
//!
//! Ingress from the outside world happens through two methods:
//! [`submit_client_request`](Replica::submit_client_request) for the client-facing gateway, and
//! [`handle_peer_message`](Replica::handle_peer_message) for transports that deliver raw frames
//! (transports implementing [`Network`] are instead drained by the poller).

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crate::app::RequestConsumer;
use crate::client_state::ClientRegistry;
use crate::config::Configuration;
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::executor::start_replier;
use crate::identity::{ClientDirectory, PeerSet};
use crate::messages::{Message, Reply, Request};
use crate::networking::{start_polling, Network};
use crate::protocol::Protocol;
use crate::request_timer::{TimeoutHandler, TimeoutProvider};
use crate::types::basic::ReplicaId;
use crate::types::crypto_primitives::Keypair;
use crate::usig::Usig;
use crate::validation::ValidationError;

pub struct Replica<C: RequestConsumer, N: Network, U: Usig> {
    protocol: Option<Arc<Protocol<C, N, U>>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    loopback: Option<JoinHandle<()>>,
    loopback_shutdown: Sender<()>,
    replier: Option<JoinHandle<()>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<C: RequestConsumer, N: Network, U: Usig> Replica<C, N, U> {
    /// Start a replica from its collaborators and configuration.
    ///
    /// The handler parameters register an optional user-defined handler per
    /// [event](crate::events) type; the `request_timeout_handler` in particular is where a
    /// future view-change module plugs in.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is inconsistent with the supplied identities: fewer than 3
    /// replicas, a replica count that is not of the form `2f + 1`, `self_id` not a member of
    /// the peer set, or a keypair that does not match the peer set's key for `self_id`.
    pub fn start(
        consumer: C,
        keypair: Keypair,
        usig: U,
        network: N,
        peers: PeerSet,
        clients: ClientDirectory,
        config: Configuration,
        receive_request_handler: Option<HandlerPtr<ReceiveRequestEvent>>,
        receive_prepare_handler: Option<HandlerPtr<ReceivePrepareEvent>>,
        receive_commit_handler: Option<HandlerPtr<ReceiveCommitEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        commit_handler: Option<HandlerPtr<CommitEvent>>,
        retire_request_handler: Option<HandlerPtr<RetireRequestEvent>>,
        send_reply_handler: Option<HandlerPtr<SendReplyEvent>>,
        request_timeout_handler: Option<HandlerPtr<RequestTimeoutEvent>>,
    ) -> Replica<C, N, U> {
        if peers.total() < 3 {
            panic!(
                "a deployment needs at least 3 replicas to tolerate a fault, got {}",
                peers.total()
            );
        }
        // Commit quorums of f + 1 only intersect when n = 2f + 1 exactly; an even replica
        // count silently loses that guarantee.
        if peers.total() % 2 == 0 {
            panic!(
                "the replica count must be 2f + 1 for some f, got an even number of replicas ({})",
                peers.total()
            );
        }
        match peers.key(config.self_id) {
            None => panic!("replica {} is not a member of the peer set", config.self_id),
            Some(key) if *key != keypair.public() => {
                panic!("keypair does not match the peer set key of replica {}", config.self_id)
            }
            Some(_) => (),
        }

        let event_handlers = EventHandlers::new(
            config.log_events,
            receive_request_handler,
            receive_prepare_handler,
            receive_commit_handler,
            propose_handler,
            commit_handler,
            retire_request_handler,
            send_reply_handler,
            request_timeout_handler,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            let (publisher, subscriber) = mpsc::channel();
            (Some(publisher), Some(subscriber))
        } else {
            (None, None)
        };

        let timeout_provider: TimeoutProvider = {
            // Constant for now; view change will want to lengthen this dynamically.
            let request_timeout = config.request_timeout;
            Arc::new(move || request_timeout)
        };
        let timeout_handler: TimeoutHandler = {
            let event_publisher = event_publisher.clone();
            Arc::new(move |client, view| {
                Event::RequestTimeout(RequestTimeoutEvent {
                    timestamp: SystemTime::now(),
                    client,
                    view,
                })
                .publish(&event_publisher)
            })
        };
        let registry = Arc::new(ClientRegistry::new(timeout_provider, timeout_handler));

        let (pending_replies, pending_receiver) = mpsc::channel();
        let (protocol, loopback_receiver) = Protocol::new(
            config.clone(),
            peers,
            clients,
            usig,
            network.clone(),
            consumer,
            registry.clone(),
            pending_replies,
            event_publisher.clone(),
        );

        let replier = start_replier(
            pending_receiver,
            config.self_id,
            keypair,
            registry,
            event_publisher.clone(),
        );

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(network, protocol.clone(), poller_shutdown_receiver);

        let (loopback_shutdown, loopback_shutdown_receiver) = mpsc::channel();
        let loopback = start_loopback(
            loopback_receiver,
            protocol.clone(),
            loopback_shutdown_receiver,
        );

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(event_handlers, subscriber, shutdown_receiver)),
                    Some(shutdown),
                )
            }
            None => (None, None),
        };

        Replica {
            protocol: Some(protocol),
            poller: Some(poller),
            poller_shutdown,
            loopback: Some(loopback),
            loopback_shutdown,
            replier: Some(replier),
            event_bus,
            event_bus_shutdown,
        }
    }

    /// Submit a client request to this replica, returning the channel its reply arrives on.
    ///
    /// Safe to invoke concurrently from any thread. A retransmitted request is not processed
    /// again; the returned channel is satisfied from the reply cache once (or as soon as) the
    /// operation has executed.
    pub fn submit_client_request(
        &self,
        request: Request,
    ) -> Result<Receiver<Reply>, ValidationError> {
        self.protocol().submit_request(request)
    }

    /// Feed a raw frame received from peer `origin` into the pipeline.
    ///
    /// For transports that deliver bytes instead of typed messages. Invalid frames and messages
    /// are logged and dropped; this method never fails toward the transport.
    pub fn handle_peer_message(&self, origin: ReplicaId, frame: &[u8]) {
        match Message::from_frame(frame) {
            Ok(message) => self.protocol().handle_message(origin, message),
            Err(err) => log::warn!("dropping undecodable frame from peer {}: {:?}", origin, err),
        }
    }

    fn protocol(&self) -> &Arc<Protocol<C, N, U>> {
        self.protocol
            .as_ref()
            .expect("protocol is only dropped on shutdown")
    }
}

impl<C: RequestConsumer, N: Network, U: Usig> Drop for Replica<C, N, U> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important. The event bus goes
        // down first so late events are discarded rather than fired against a half-stopped
        // replica. The poller and loopback threads hold clones of the protocol handle; only
        // after they are joined does dropping our handle disconnect the pending-reply channel,
        // which is what stops the replier.

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }

        let _ = self.loopback_shutdown.send(());
        if let Some(loopback) = self.loopback.take() {
            let _ = loopback.join();
        }

        self.protocol = None;
        if let Some(replier) = self.replier.take() {
            let _ = replier.join();
        }
    }
}

/// Spawn the loopback thread, which drains messages the replica generated and feeds them back
/// into the pipeline until a shutdown signal is received from the parent thread.
fn start_loopback<C: RequestConsumer, N: Network, U: Usig>(
    loopback_receiver: Receiver<Message>,
    protocol: Arc<Protocol<C, N, U>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("loopback thread disconnected from main thread")
            }
        }

        match loopback_receiver.try_recv() {
            Ok(message) => protocol.handle_loopback(message),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => return,
        }
    })
}
