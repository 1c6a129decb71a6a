/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Interface into pluggable peer-to-peer networking, and the poller thread.
//!
//! The library is transport-agnostic: the user supplies an implementation of the [`Network`]
//! trait, and the poller thread started by [`start_polling`] drains it and feeds every received
//! message into the processing pipeline. Transports that deliver raw bytes instead of typed
//! messages decode frames with [`Message::from_frame`](crate::messages::Message::from_frame) and
//! hand them to [`Replica::handle_peer_message`](crate::replica::Replica::handle_peer_message).

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::app::RequestConsumer;
use crate::messages::Message;
use crate::protocol::Protocol;
use crate::types::basic::ReplicaId;
use crate::usig::Usig;

/// Trait for pluggable peer-to-peer networking.
pub trait Network: Clone + Send + 'static {
    /// Send a message to all peers except this replica, without blocking.
    fn broadcast(&mut self, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is
    /// available now.
    fn recv(&mut self) -> Option<(ReplicaId, Message)>;
}

/// Spawn the poller thread, which polls the [`Network`] for messages and feeds them into the
/// pipeline until a shutdown signal is received from the parent thread.
pub(crate) fn start_polling<C: RequestConsumer, N: Network, U: Usig>(
    mut network: N,
    protocol: Arc<Protocol<C, N, U>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("poller thread disconnected from main thread")
            }
        }

        if let Some((origin, message)) = network.recv() {
            protocol.handle_message(origin, message);
        } else {
            thread::yield_now()
        }
    })
}
