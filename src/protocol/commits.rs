/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The commit processor: certificate accumulation and in-order retirement.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::SystemTime;

use crate::app::RequestConsumer;
use crate::events::{Event, RetireRequestEvent};
use crate::executor::PendingReply;
use crate::messages::{Commit, Request};
use crate::networking::Network;
use crate::types::basic::{ReplicaId, UsigCounter, ViewNumber};
use crate::usig::Usig;

use super::Protocol;

impl<C: RequestConsumer, N: Network, U: Usig> Protocol<C, N, U> {
    /// Process an authenticated commit.
    ///
    /// The endorsed prepare is processed first (idempotently; the commit carries everything
    /// needed to reconstruct it), so a replica that hears an endorsement before the proposal
    /// itself still makes progress. The commit then contributes its sender to the certificate
    /// for the endorsed counter value.
    pub(crate) fn process_commit(&self, commit: Commit) {
        let view = self.current_view();
        if commit.view != view {
            log::debug!(
                "dropping Commit for view {} while in view {}",
                commit.view,
                view
            );
            return;
        }
        let primary = self.primary(view);
        if commit.primary != primary {
            log::debug!(
                "dropping Commit endorsing replica {} which is not the primary of view {}",
                commit.primary,
                view
            );
            return;
        }

        self.process_prepare(commit.prepare());

        if !self.commit_log.lock().unwrap().add_witness(&commit) {
            log::debug!(
                "dropping duplicate Commit from replica {} for counter {}",
                commit.replica,
                commit.primary_ui.counter
            );
        }
        self.try_retire();
    }

    /// Retire every request whose certificate is complete, in strict counter order.
    ///
    /// Holding the commit log lock across the loop both keeps retirement ordered and serializes
    /// entry into the operation executor. A certificate that completes ahead of a gap waits
    /// until the earlier counters retire first.
    pub(crate) fn try_retire(&self) {
        let mut commit_log = self.commit_log.lock().unwrap();
        let view = self.current_view();
        let quorum = self.peers.commit_quorum();
        while let Some((counter, request)) = commit_log.next_retirable(view, quorum) {
            self.retire(view, counter, request);
        }
    }

    fn retire(&self, view: ViewNumber, counter: UsigCounter, request: Request) {
        let client = self.registry.client(request.client);
        if !client.retire_seq(request.seq) {
            log::debug!(
                "request already retired: client={} seq={}",
                request.client,
                request.seq
            );
            return;
        }

        let result = self.executor.execute(request.operation.clone());
        let _ = self.pending_replies.send(PendingReply {
            client: request.client,
            seq: request.seq,
            result,
        });
        client.stop_timer();

        Event::RetireRequest(RetireRequestEvent {
            timestamp: SystemTime::now(),
            view,
            counter,
            client: request.client,
            seq: request.seq,
        })
        .publish(&self.event_publisher);
    }
}

/// Commit certificates per (view, primary counter), plus the per-view retirement cursor.
pub(crate) struct CommitLog {
    views: HashMap<u64, ViewCommitLog>,
}

struct ViewCommitLog {
    next_retire: u64,
    certificates: BTreeMap<u64, CommitCertificate>,
}

/// The witnesses gathered for one (view, counter) slot. The primary counts as the implicit
/// first witness through its prepare; retirement requires the prepare to have been accepted
/// locally and `f + 1` distinct witnesses in total.
struct CommitCertificate {
    request: Request,
    witnesses: BTreeSet<ReplicaId>,
    prepared: bool,
}

impl CommitLog {
    pub(crate) fn new() -> CommitLog {
        CommitLog {
            views: HashMap::new(),
        }
    }

    fn view_mut(&mut self, view: ViewNumber) -> &mut ViewCommitLog {
        self.views.entry(view.int()).or_insert_with(|| ViewCommitLog {
            next_retire: 1,
            certificates: BTreeMap::new(),
        })
    }

    /// Record that the prepare for (view, counter) has been accepted locally. The primary
    /// becomes the certificate's implicit witness.
    pub(crate) fn register_prepare(&mut self, prepare: &crate::messages::Prepare) {
        let certificate = self
            .view_mut(prepare.view)
            .certificates
            .entry(prepare.ui.counter.int())
            .or_insert_with(|| CommitCertificate {
                request: prepare.request.clone(),
                witnesses: BTreeSet::new(),
                prepared: false,
            });
        certificate.witnesses.insert(prepare.replica);
        certificate.prepared = true;
    }

    /// Contribute a commit's sender to the certificate for the endorsed counter value. Returns
    /// whether the sender is a new witness.
    pub(crate) fn add_witness(&mut self, commit: &Commit) -> bool {
        let certificate = self
            .view_mut(commit.view)
            .certificates
            .entry(commit.primary_ui.counter.int())
            .or_insert_with(|| CommitCertificate {
                request: commit.request.clone(),
                witnesses: BTreeSet::from([commit.primary]),
                prepared: false,
            });
        if certificate.request != commit.request {
            log::warn!(
                "Commit from replica {} endorses counter {} with a different request",
                commit.replica,
                commit.primary_ui.counter
            );
            return false;
        }
        certificate.witnesses.insert(commit.replica)
    }

    /// Pop the next counter of `view` that is ready to retire: its prepare was accepted, its
    /// certificate has `quorum` distinct witnesses, and every earlier counter already retired.
    fn next_retirable(&mut self, view: ViewNumber, quorum: usize) -> Option<(UsigCounter, Request)> {
        let view_log = self.view_mut(view);
        let certificate = view_log.certificates.get(&view_log.next_retire)?;
        if !certificate.prepared || certificate.witnesses.len() < quorum {
            return None;
        }
        let counter = view_log.next_retire;
        view_log.next_retire += 1;
        Some((UsigCounter::new(counter), certificate.request.clone()))
    }
}
