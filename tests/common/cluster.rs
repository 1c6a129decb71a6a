//! Helpers for spinning up a local cluster of replicas over the mock network.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use minbft_rs::{
    config::Configuration,
    events::RequestTimeoutEvent,
    identity::{ClientDirectory, PeerSet},
    messages::{Reply, Request},
    types::basic::{ClientId, Operation, ReplicaId, SequenceNumber, ViewNumber},
    types::crypto_primitives::{Keypair, SigningKey},
    usig::SimUsig,
    Replica,
};
use rand::rngs::OsRng;

use super::app::{DeliveredLog, UppercaseApp};
use super::network::{mock_network, BroadcastLog, NetworkStub};

/// Every request timeout any replica of the cluster has raised.
pub(crate) type TimeoutLog = Arc<Mutex<Vec<(ReplicaId, ClientId, ViewNumber)>>>;

pub(crate) struct ClusterSpec {
    pub(crate) replica_count: u32,
    pub(crate) client_count: u32,
    pub(crate) request_timeout: Duration,
    /// The replicas to actually start. Replicas left out still feature in every directory, so
    /// tests can simulate a silent replica (e.g. a crashed primary).
    pub(crate) start: Vec<u32>,
}

impl ClusterSpec {
    pub(crate) fn all(replica_count: u32, client_count: u32) -> ClusterSpec {
        ClusterSpec {
            replica_count,
            client_count,
            request_timeout: Duration::from_secs(5),
            start: (0..replica_count).collect(),
        }
    }
}

pub(crate) struct Cluster {
    started: Vec<(ReplicaId, Replica<UppercaseApp, NetworkStub, SimUsig>)>,
    /// The execution logs of the started replicas, in the same order as `started`.
    pub(crate) delivered: Vec<(ReplicaId, DeliveredLog)>,
    pub(crate) broadcast_log: BroadcastLog,
    pub(crate) timeouts: TimeoutLog,
    client_keypairs: Vec<(ClientId, Keypair)>,
    /// The simulated trusted components of the replicas that were not started. Tests use these
    /// to craft messages on a silent replica's behalf.
    pub(crate) unused_usigs: Vec<(ReplicaId, SimUsig)>,
}

impl Cluster {
    pub(crate) fn start(spec: ClusterSpec) -> Cluster {
        let replica_keypairs: Vec<Keypair> = (0..spec.replica_count)
            .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
            .collect();
        let peers = PeerSet::new(
            replica_keypairs
                .iter()
                .enumerate()
                .map(|(id, keypair)| (ReplicaId::new(id as u32), keypair.public())),
        );

        let client_keypairs: Vec<(ClientId, Keypair)> = (0..spec.client_count)
            .map(|id| (ClientId::new(id), Keypair::new(SigningKey::generate(&mut OsRng))))
            .collect();
        let clients = ClientDirectory::new(
            client_keypairs
                .iter()
                .map(|(id, keypair)| (*id, keypair.public())),
        );

        let usigs = SimUsig::cluster(spec.replica_count);
        let (networks, broadcast_log) = mock_network(spec.replica_count);
        let timeouts: TimeoutLog = Arc::new(Mutex::new(Vec::new()));

        let mut started = Vec::new();
        let mut delivered = Vec::new();
        let mut unused_usigs = Vec::new();
        for (((id, keypair), usig), network) in (0..spec.replica_count)
            .map(ReplicaId::new)
            .zip(replica_keypairs)
            .zip(usigs)
            .zip(networks)
        {
            if !spec.start.contains(&id.int()) {
                unused_usigs.push((id, usig));
                continue;
            }

            let (app, delivered_log) = UppercaseApp::new();
            let timeout_log = timeouts.clone();
            let replica = Replica::start(
                app,
                keypair,
                usig,
                network,
                peers.clone(),
                clients.clone(),
                Configuration::new(id, spec.request_timeout),
                None,
                None,
                None,
                None,
                None,
                None,
                None,
                Some(Box::new(move |event: &RequestTimeoutEvent| {
                    timeout_log
                        .lock()
                        .unwrap()
                        .push((id, event.client, event.view))
                })),
            );
            started.push((id, replica));
            delivered.push((id, delivered_log));
        }

        Cluster {
            started,
            delivered,
            broadcast_log,
            timeouts,
            client_keypairs,
            unused_usigs,
        }
    }

    pub(crate) fn replica(&self, id: u32) -> &Replica<UppercaseApp, NetworkStub, SimUsig> {
        let id = ReplicaId::new(id);
        &self
            .started
            .iter()
            .find(|(started_id, _)| *started_id == id)
            .expect("replica was started")
            .1
    }

    /// Build a request signed by the given client.
    pub(crate) fn request(&self, client: u32, seq: u64, payload: &[u8]) -> Request {
        let client = ClientId::new(client);
        let keypair = &self
            .client_keypairs
            .iter()
            .find(|(id, _)| *id == client)
            .expect("client exists")
            .1;
        Request::new(
            client,
            SequenceNumber::new(seq),
            Operation::new(payload.to_vec()),
            keypair,
        )
    }

    /// Submit `request` to every started replica (the way a broadcast-happy client would),
    /// returning one reply channel per replica in id order.
    pub(crate) fn submit_to_all(&self, request: &Request) -> Vec<Receiver<Reply>> {
        self.started
            .iter()
            .map(|(_, replica)| {
                replica
                    .submit_client_request(request.clone())
                    .expect("request is well-signed")
            })
            .collect()
    }
}
