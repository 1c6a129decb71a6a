/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-client replica state: the request sequence lifecycle, reply channels, and the request
//! timer handle.
//!
//! ## Sequence lifecycle
//!
//! Every request sequence number moves through three phases, each recorded at most once and in
//! strictly increasing sequence order per client:
//!
//! 1. **captured**: the request has entered processing. Capturing returns a
//!    [release guard](CaptureGuard) that serializes request processing per client: a later
//!    capture for the same client blocks until the guard is released.
//! 2. **prepared**: the primary's ordering proposal for the request has been accepted.
//! 3. **retired**: the request has gathered its commit quorum and been handed to the
//!    application.
//!
//! The three watermarks obey `captured >= prepared >= retired` at all times. Recording a phase
//! out of order (preparing an uncaptured sequence, retiring an unprepared one) is a bug in the
//! caller, not misbehavior of a peer, and panics the replica.
//!
//! ## Reply channels
//!
//! The reply to a request is published into a per-sequence slot. Each channel handed out
//! receives at most one value; the slot caches the reply, so a channel requested after
//! publication (a client retransmitting an already-executed request) is satisfied immediately.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, Condvar, Mutex, RwLock};

use crate::messages::Reply;
use crate::request_timer::{RequestTimer, TimeoutHandler, TimeoutProvider};
use crate::types::basic::{ClientId, SequenceNumber, ViewNumber};

/// Lazily populated map of per-client state.
///
/// Slot creation takes the registry write lock; all later accesses only read it. Slots live for
/// the lifetime of the process.
pub(crate) struct ClientRegistry {
    slots: RwLock<HashMap<ClientId, Arc<ClientState>>>,
    timeout_provider: TimeoutProvider,
    timeout_handler: TimeoutHandler,
}

impl ClientRegistry {
    pub(crate) fn new(
        timeout_provider: TimeoutProvider,
        timeout_handler: TimeoutHandler,
    ) -> ClientRegistry {
        ClientRegistry {
            slots: RwLock::new(HashMap::new()),
            timeout_provider,
            timeout_handler,
        }
    }

    /// Get the state of `client`, creating it on first mention.
    pub(crate) fn client(&self, client: ClientId) -> Arc<ClientState> {
        if let Some(state) = self.slots.read().unwrap().get(&client) {
            return state.clone();
        }
        let mut slots = self.slots.write().unwrap();
        slots
            .entry(client)
            .or_insert_with(|| {
                Arc::new(ClientState::new(
                    client,
                    self.timeout_provider.clone(),
                    self.timeout_handler.clone(),
                ))
            })
            .clone()
    }
}

#[derive(Default)]
struct SeqLifecycle {
    last_captured: u64,
    last_prepared: u64,
    last_retired: u64,
    capture_held: bool,
}

#[derive(Default)]
struct ReplySlot {
    reply: Option<Reply>,
    waiters: Vec<SyncSender<Reply>>,
}

/// State a replica keeps about a single client.
pub(crate) struct ClientState {
    id: ClientId,
    lifecycle: Mutex<SeqLifecycle>,
    capture_released: Condvar,
    replies: Mutex<HashMap<u64, ReplySlot>>,
    timer: RequestTimer,
}

impl ClientState {
    fn new(
        id: ClientId,
        timeout_provider: TimeoutProvider,
        timeout_handler: TimeoutHandler,
    ) -> ClientState {
        ClientState {
            id,
            lifecycle: Mutex::new(SeqLifecycle::default()),
            capture_released: Condvar::new(),
            replies: Mutex::new(HashMap::new()),
            timer: RequestTimer::new(id, timeout_provider, timeout_handler),
        }
    }

    /// Begin processing of request sequence `seq`.
    ///
    /// Returns `None` if `seq` has already been captured: an earlier attempt already did (or is
    /// doing) the work. Otherwise advances the captured watermark and returns the release guard;
    /// capturing any later sequence of this client blocks until the guard is
    /// [released](CaptureGuard::release).
    pub(crate) fn capture_seq(self: &Arc<Self>, seq: SequenceNumber) -> Option<CaptureGuard> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        loop {
            if seq.int() <= lifecycle.last_captured {
                return None;
            }
            if !lifecycle.capture_held {
                lifecycle.capture_held = true;
                lifecycle.last_captured = seq.int();
                return Some(CaptureGuard {
                    state: self.clone(),
                    released: false,
                });
            }
            lifecycle = self.capture_released.wait(lifecycle).unwrap();
        }
    }

    /// Record request sequence `seq` as prepared. Returns false if it was already prepared.
    ///
    /// # Panics
    ///
    /// Panics if `seq` has not been captured.
    pub(crate) fn prepare_seq(&self, seq: SequenceNumber) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if seq.int() > lifecycle.last_captured {
            panic!(
                "prepare of uncaptured request sequence: client={} seq={}",
                self.id, seq
            );
        }
        if seq.int() <= lifecycle.last_prepared {
            return false;
        }
        lifecycle.last_prepared = seq.int();
        true
    }

    /// Record request sequence `seq` as retired. Returns false if it was already retired.
    ///
    /// # Panics
    ///
    /// Panics if `seq` has not been prepared.
    pub(crate) fn retire_seq(&self, seq: SequenceNumber) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if seq.int() > lifecycle.last_prepared {
            panic!(
                "retire of unprepared request sequence: client={} seq={}",
                self.id, seq
            );
        }
        if seq.int() <= lifecycle.last_retired {
            return false;
        }
        lifecycle.last_retired = seq.int();
        true
    }

    /// A channel that yields the reply to request sequence `seq` once it is available. If the
    /// reply has already been published, the channel is satisfied immediately.
    pub(crate) fn reply_channel(&self, seq: SequenceNumber) -> Receiver<Reply> {
        let (sender, receiver) = mpsc::sync_channel(1);
        let mut replies = self.replies.lock().unwrap();
        let slot = replies.entry(seq.int()).or_default();
        match &slot.reply {
            Some(reply) => {
                let _ = sender.try_send(reply.clone());
            }
            None => slot.waiters.push(sender),
        }
        receiver
    }

    /// Publish the reply to a request, unblocking every waiting channel exactly once.
    pub(crate) fn publish_reply(&self, reply: Reply) {
        let mut replies = self.replies.lock().unwrap();
        let slot = replies.entry(reply.seq.int()).or_default();
        if slot.reply.is_some() {
            log::debug!("reply already published: client={} seq={}", self.id, reply.seq);
            return;
        }
        for waiter in slot.waiters.drain(..) {
            let _ = waiter.try_send(reply.clone());
        }
        slot.reply = Some(reply);
    }

    /// (Re)arm the request timer, capturing `view` now; see [`RequestTimer::start`].
    pub(crate) fn start_timer(&self, view: ViewNumber) {
        self.timer.start(view)
    }

    /// Disarm the request timer if it is running.
    pub(crate) fn stop_timer(&self) {
        self.timer.stop()
    }
}

/// Release handle returned by a successful [capture](ClientState::capture_seq).
///
/// Dropping the guard without calling [`release`](Self::release) also releases, so a processing
/// thread that panics does not wedge the client forever.
pub(crate) struct CaptureGuard {
    state: Arc<ClientState>,
    released: bool,
}

impl CaptureGuard {
    /// Finish the critical section begun by the capture, letting the next request of this client
    /// proceed.
    pub(crate) fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut lifecycle = self.state.lifecycle.lock().unwrap();
        lifecycle.capture_held = false;
        drop(lifecycle);
        self.state.capture_released.notify_all();
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
