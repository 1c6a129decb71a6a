/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identities of the participants of a deployment.
//!
//! A deployment consists of a fixed set of `n = 2f + 1` replicas, identified by [`ReplicaId`]s
//! numbered `0..n`, and a set of clients identified by [`ClientId`]s. Both kinds of participant
//! authenticate their messages with Ed25519 keys; the directories in this module map numeric
//! identifiers to the corresponding verifying keys.

use std::collections::BTreeMap;

use crate::types::basic::{ClientId, ReplicaId};
use crate::types::crypto_primitives::VerifyingKey;

/// The verifying keys of the replica set, keyed by replica identifier.
///
/// The size of the peer set determines `n`, and with it the number of tolerated faulty replicas
/// `f = (n - 1) / 2` and the commit quorum `f + 1`.
#[derive(Clone)]
pub struct PeerSet {
    replicas: BTreeMap<ReplicaId, VerifyingKey>,
}

impl PeerSet {
    pub fn new(replicas: impl IntoIterator<Item = (ReplicaId, VerifyingKey)>) -> PeerSet {
        PeerSet {
            replicas: replicas.into_iter().collect(),
        }
    }

    /// The total number of replicas, `n`.
    pub fn total(&self) -> u32 {
        self.replicas.len() as u32
    }

    /// The maximum number of faulty replicas tolerated, `f`, under `n = 2f + 1`.
    pub fn num_faulty(&self) -> u32 {
        (self.total() - 1) / 2
    }

    /// The number of distinct replicas that must attest a proposal before it is retired, `f + 1`.
    pub fn commit_quorum(&self) -> usize {
        self.num_faulty() as usize + 1
    }

    pub fn contains(&self, replica: ReplicaId) -> bool {
        self.replicas.contains_key(&replica)
    }

    pub fn key(&self, replica: ReplicaId) -> Option<&VerifyingKey> {
        self.replicas.get(&replica)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &VerifyingKey)> {
        self.replicas.iter()
    }
}

/// The verifying keys of the known clients, keyed by client identifier.
///
/// Requests from clients outside the directory fail authentication.
#[derive(Clone)]
pub struct ClientDirectory {
    clients: BTreeMap<ClientId, VerifyingKey>,
}

impl ClientDirectory {
    pub fn new(clients: impl IntoIterator<Item = (ClientId, VerifyingKey)>) -> ClientDirectory {
        ClientDirectory {
            clients: clients.into_iter().collect(),
        }
    }

    pub fn key(&self, client: ClientId) -> Option<&VerifyingKey> {
        self.clients.get(&client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn quorums_follow_replica_count() {
        let peers = PeerSet::new((0..3).map(|id| {
            (
                ReplicaId::new(id),
                SigningKey::generate(&mut OsRng).verifying_key(),
            )
        }));
        assert_eq!(peers.total(), 3);
        assert_eq!(peers.num_faulty(), 1);
        assert_eq!(peers.commit_quorum(), 2);

        let peers = PeerSet::new((0..5).map(|id| {
            (
                ReplicaId::new(id),
                SigningKey::generate(&mut OsRng).verifying_key(),
            )
        }));
        assert_eq!(peers.num_faulty(), 2);
        assert_eq!(peers.commit_quorum(), 3);
    }
}
