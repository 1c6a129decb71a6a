/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration as specified by the operator.

use std::time::Duration;

use crate::types::basic::{ReplicaId, ViewNumber};

/// Number of out-of-order prepares buffered per primary before newer ones are dropped.
///
/// The default is comfortably larger than the replica count of any sensible deployment of this
/// protocol family, and small enough that a faulty primary cannot grow the buffer without bound.
pub const DEFAULT_REASSEMBLY_WINDOW: usize = 8;

/// Configuration of a single replica.
///
/// The replica set size `n` is not configured here; it is derived from the
/// [`PeerSet`](crate::identity::PeerSet) handed to [`Replica::start`](crate::replica::Replica::start),
/// which validates this configuration against it.
#[derive(Clone)]
pub struct Configuration {
    /// The identity of this replica. Must be a member of the peer set.
    pub self_id: ReplicaId,

    /// The view the replica starts in.
    pub initial_view: ViewNumber,

    /// How long a client request may stay in flight before the liveness alarm fires.
    pub request_timeout: Duration,

    /// Size of the out-of-order prepare buffer kept per primary.
    pub reassembly_window: usize,

    /// Enable the default logging handlers for every event.
    pub log_events: bool,
}

impl Configuration {
    pub fn new(self_id: ReplicaId, request_timeout: Duration) -> Configuration {
        Configuration {
            self_id,
            initial_view: ViewNumber::init(),
            request_timeout,
            reassembly_window: DEFAULT_REASSEMBLY_WINDOW,
            log_events: false,
        }
    }
}
