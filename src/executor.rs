/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Invocation of the host-supplied application and assembly of client replies.
//!
//! Execution of retired operations is single-threaded by contract: the commit processor invokes
//! the executor in strict counter order under its own serialization, and the executor treats a
//! concurrent entry as a bug in the caller and panics the replica.
//!
//! Awaiting the application's results happens off the processing path, on the replier thread: it
//! consumes the pending results in retirement order, signs a [`Reply`] for each, and publishes
//! it into the client's reply channel.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crate::app::RequestConsumer;
use crate::client_state::ClientRegistry;
use crate::events::{Event, SendReplyEvent};
use crate::messages::Reply;
use crate::types::basic::{ClientId, ExecutionResult, Operation, ReplicaId, SequenceNumber};
use crate::types::crypto_primitives::Keypair;

/// Serializing wrapper around the application.
pub(crate) struct OperationExecutor<C: RequestConsumer> {
    consumer: Mutex<C>,
}

impl<C: RequestConsumer> OperationExecutor<C> {
    pub(crate) fn new(consumer: C) -> OperationExecutor<C> {
        OperationExecutor {
            consumer: Mutex::new(consumer),
        }
    }

    /// Hand `operation` to the application, returning the channel its result arrives on.
    ///
    /// # Panics
    ///
    /// Panics if invoked while another invocation is in progress. Callers must serialize;
    /// contention here means ordering of the replicated state machine is broken.
    pub(crate) fn execute(&self, operation: Operation) -> Receiver<ExecutionResult> {
        let mut consumer = match self.consumer.try_lock() {
            Ok(consumer) => consumer,
            Err(TryLockError::WouldBlock) => panic!("concurrent operation execution detected"),
            Err(TryLockError::Poisoned(err)) => {
                panic!("operation executor poisoned by an earlier panic: {}", err)
            }
        };
        consumer.deliver(operation)
    }
}

/// An executed operation whose result has not been replied to yet.
pub(crate) struct PendingReply {
    pub(crate) client: ClientId,
    pub(crate) seq: SequenceNumber,
    pub(crate) result: Receiver<ExecutionResult>,
}

/// Starts the replier thread. It runs until the sending half of `pending` disconnects, awaiting
/// each pending result in retirement order, signing the reply, and publishing it into the
/// per-client reply channel.
pub(crate) fn start_replier(
    pending: Receiver<PendingReply>,
    self_id: ReplicaId,
    keypair: Keypair,
    registry: Arc<ClientRegistry>,
    event_publisher: Option<std::sync::mpsc::Sender<Event>>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let PendingReply {
            client,
            seq,
            result,
        } = match pending.recv() {
            Ok(pending_reply) => pending_reply,
            Err(_) => return,
        };
        let result = match result.recv() {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "application dropped the result channel: client={} seq={}",
                    client,
                    seq
                );
                continue;
            }
        };
        let reply = Reply::new(self_id, client, seq, result, &keypair);
        registry.client(client).publish_reply(reply.clone());
        Event::SendReply(SendReplyEvent {
            timestamp: SystemTime::now(),
            reply,
        })
        .publish(&event_publisher);
    })
}
