/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The prepare processor and the per-primary counter reassembly queue.

use std::collections::{BTreeMap, HashMap};

use crate::app::RequestConsumer;
use crate::messages::Prepare;
use crate::networking::Network;
use crate::types::basic::ReplicaId;
use crate::usig::Usig;

use super::Protocol;

impl<C: RequestConsumer, N: Network, U: Usig> Protocol<C, N, U> {
    /// Process an authenticated prepare.
    ///
    /// Prepares from other views or from a replica that is not the primary of the current view
    /// are dropped. Counter continuity is enforced per primary: a prepare arriving ahead of a
    /// gap is buffered (up to the configured window) and processed once the gap fills, so every
    /// replica accepts a primary's prepares in exactly counter order.
    pub(crate) fn process_prepare(&self, prepare: Prepare) {
        let view = self.current_view();
        if prepare.view != view {
            log::debug!(
                "dropping Prepare for view {} while in view {}",
                prepare.view,
                view
            );
            return;
        }
        let primary = self.primary(view);
        if prepare.replica != primary {
            log::debug!(
                "dropping Prepare from replica {} which is not the primary of view {}",
                prepare.replica,
                view
            );
            return;
        }

        let ready = self
            .reassembly
            .lock()
            .unwrap()
            .admit(primary, prepare);
        for prepare in ready {
            self.accept_prepare(prepare);
        }
    }

    /// Accept a prepare whose counter is the next expected from its primary.
    fn accept_prepare(&self, prepare: Prepare) {
        let client = self.registry.client(prepare.request.client);

        // The embedded request may not have reached this replica directly; capture it if it is
        // new. Either way the prepare itself decides idempotence below.
        if let Some(guard) = client.capture_seq(prepare.request.seq) {
            guard.release();
        }
        if !client.prepare_seq(prepare.request.seq) {
            log::debug!(
                "request already prepared: client={} seq={}",
                prepare.request.client,
                prepare.request.seq
            );
            return;
        }
        client.start_timer(prepare.view);

        let backup = self.config.self_id != prepare.replica;
        self.commit_log.lock().unwrap().register_prepare(&prepare);
        if backup {
            self.broadcast_commit(&prepare);
        }
        self.try_retire();
    }
}

/// Reorder buffers for the prepares of each primary, keyed by the primary's identity.
pub(crate) struct ReassemblyQueues {
    window: usize,
    queues: HashMap<ReplicaId, ReassemblyQueue>,
}

impl ReassemblyQueues {
    pub(crate) fn new(window: usize) -> ReassemblyQueues {
        ReassemblyQueues {
            window,
            queues: HashMap::new(),
        }
    }

    /// Admit `prepare` into the queue of `primary`, returning the prepares that are now ready
    /// to be processed, in counter order.
    pub(crate) fn admit(&mut self, primary: ReplicaId, prepare: Prepare) -> Vec<Prepare> {
        let window = self.window;
        self.queues
            .entry(primary)
            .or_insert_with(|| ReassemblyQueue::new(window))
            .admit(prepare)
    }
}

/// Tracks the next expected counter value of one primary and buffers prepares that arrived
/// ahead of it. Counters start at 1.
struct ReassemblyQueue {
    next: u64,
    window: usize,
    buffered: BTreeMap<u64, Prepare>,
}

impl ReassemblyQueue {
    fn new(window: usize) -> ReassemblyQueue {
        ReassemblyQueue {
            next: 1,
            window,
            buffered: BTreeMap::new(),
        }
    }

    fn admit(&mut self, prepare: Prepare) -> Vec<Prepare> {
        let counter = prepare.ui.counter.int();
        if counter < self.next {
            log::debug!(
                "dropping Prepare with already-processed counter {} (expecting {})",
                counter,
                self.next
            );
            return Vec::new();
        }
        if counter > self.next {
            // Buffer only counters within the window ahead of the next expected one, so a
            // backlog can always still be drained front-to-back.
            if counter > self.next + self.window as u64 {
                log::warn!(
                    "dropping Prepare with counter {} beyond the reassembly window (expecting {})",
                    counter,
                    self.next
                );
                return Vec::new();
            }
            if self.buffered.insert(counter, prepare).is_some() {
                log::debug!("dropping duplicate buffered Prepare with counter {}", counter);
            }
            return Vec::new();
        }

        let mut ready = vec![prepare];
        self.next += 1;
        while let Some(buffered) = self.buffered.remove(&self.next) {
            ready.push(buffered);
            self.next += 1;
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Request;
    use crate::types::basic::{
        ClientId, Operation, SequenceNumber, SignatureBytes, UsigCounter, ViewNumber,
    };
    use crate::usig::UsigIdentifier;

    fn prepare(counter: u64) -> Prepare {
        Prepare {
            view: ViewNumber::init(),
            replica: ReplicaId::new(0),
            request: Request {
                client: ClientId::new(1),
                seq: SequenceNumber::new(counter),
                operation: Operation::new(vec![]),
                signature: SignatureBytes::new([0; 64]),
            },
            ui: UsigIdentifier {
                counter: UsigCounter::new(counter),
                signature: SignatureBytes::new([0; 64]),
            },
        }
    }

    fn counters(ready: Vec<Prepare>) -> Vec<u64> {
        ready.into_iter().map(|p| p.ui.counter.int()).collect()
    }

    #[test]
    fn in_order_prepares_pass_straight_through() {
        let mut queue = ReassemblyQueue::new(4);
        assert_eq!(counters(queue.admit(prepare(1))), vec![1]);
        assert_eq!(counters(queue.admit(prepare(2))), vec![2]);
    }

    #[test]
    fn gap_is_buffered_until_filled_then_drained_in_order() {
        let mut queue = ReassemblyQueue::new(4);
        assert!(queue.admit(prepare(3)).is_empty());
        assert!(queue.admit(prepare(2)).is_empty());
        assert_eq!(counters(queue.admit(prepare(1))), vec![1, 2, 3]);
    }

    #[test]
    fn stale_and_duplicate_counters_are_dropped() {
        let mut queue = ReassemblyQueue::new(4);
        assert_eq!(counters(queue.admit(prepare(1))), vec![1]);
        assert!(queue.admit(prepare(1)).is_empty());
        assert!(queue.admit(prepare(3)).is_empty());
        assert!(queue.admit(prepare(3)).is_empty());
        assert_eq!(counters(queue.admit(prepare(2))), vec![2, 3]);
    }

    #[test]
    fn counters_beyond_the_window_are_dropped() {
        let mut queue = ReassemblyQueue::new(2);
        assert!(queue.admit(prepare(3)).is_empty());
        // Counter 4 lies beyond next + window = 3; it is dropped for good.
        assert!(queue.admit(prepare(4)).is_empty());
        assert_eq!(counters(queue.admit(prepare(1))), vec![1]);
        assert_eq!(counters(queue.admit(prepare(2))), vec![2, 3]);
        assert_eq!(queue.next, 4);
    }
}
