/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The request processor and applier.

use std::sync::mpsc::Receiver;
use std::time::SystemTime;

use crate::app::RequestConsumer;
use crate::events::{Event, ReceiveRequestEvent};
use crate::messages::{Reply, Request};
use crate::networking::Network;
use crate::usig::Usig;
use crate::validation::ValidationError;

use super::Protocol;

impl<C: RequestConsumer, N: Network, U: Usig> Protocol<C, N, U> {
    /// Entry point for the client-facing gateway.
    ///
    /// Validates the request and returns the channel its reply will arrive on. A retransmitted
    /// request is not processed again, but still gets a channel, satisfied from the reply cache
    /// if the operation has already executed.
    pub(crate) fn submit_request(
        &self,
        request: Request,
    ) -> Result<Receiver<Reply>, ValidationError> {
        crate::validation::validate_request(&request, &self.clients)?;
        Event::ReceiveRequest(ReceiveRequestEvent {
            timestamp: SystemTime::now(),
            request: request.clone(),
        })
        .publish(&self.event_publisher);

        let reply_channel = self
            .registry
            .client(request.client)
            .reply_channel(request.seq);
        self.process_request(&request);
        Ok(reply_channel)
    }

    /// Process an authenticated request. Returns whether this replica had not processed it
    /// before.
    pub(crate) fn process_request(&self, request: &Request) -> bool {
        let client = self.registry.client(request.client);
        let guard = match client.capture_seq(request.seq) {
            Some(guard) => guard,
            None => {
                log::debug!(
                    "request already in processing: client={} seq={}",
                    request.client,
                    request.seq
                );
                return false;
            }
        };

        // A new request has entered processing; arm the liveness alarm with the view captured
        // now, on primary and backup alike.
        let view = self.current_view();
        client.start_timer(view);

        self.apply_request(request);
        guard.release();
        true
    }

    /// Apply a captured request to the replica state. The primary of the current view binds the
    /// request to a fresh counter value and broadcasts the resulting prepare; backups have
    /// nothing to do here and wait for that prepare to arrive.
    fn apply_request(&self, request: &Request) {
        let view = self.current_view();
        if self.primary(view) == self.config.self_id {
            self.broadcast_prepare(view, request.clone());
        }
    }
}
