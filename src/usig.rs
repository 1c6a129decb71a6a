/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Interface into the trusted Unique Sequential Identifier Generator (USIG).
//!
//! Every replica carries a trusted component holding a monotonic counter and a signing key that
//! never leaves it. Attaching a [`UsigIdentifier`] to an outbound message proves to every other
//! replica that the sender assigned the message a counter value it can never assign again. This
//! is the mechanism that lets the protocol tolerate `f` Byzantine replicas with only `2f + 1`
//! replicas in total.
//!
//! The library consumes the component through the [`Usig`] trait and makes no assumption about
//! how it is realized. A production deployment links an implementation backed by a TEE; the
//! [`SimUsig`] backend provided here runs the same arithmetic in ordinary process memory and is
//! intended for tests and local clusters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{ReplicaId, SignatureBytes, UsigCounter};
use crate::types::crypto_primitives::{
    message_digest, verify_counter_certificate, Keypair, SigningKey, VerifyingKey,
};

/// A USIG-signed unique identifier: a counter value together with the trusted component's
/// signature binding the counter to a message.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct UsigIdentifier {
    pub counter: UsigCounter,
    pub signature: SignatureBytes,
}

/// Reasons the trusted component rejects a create or verify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsigError {
    /// No certification is known for the named replica's trusted component.
    UnknownReplica(ReplicaId),
    /// The signature does not verify against the named replica's trusted component.
    InvalidSignature,
    /// The named replica has already presented this counter value bound to different data.
    CounterReused(UsigCounter),
}

/// Contract of the trusted counter component.
///
/// Implementations must guarantee:
/// - [`create_ui`](Usig::create_ui) assigns strictly increasing counter values starting at 1,
///   with no gaps and no reuse, atomically with respect to concurrent calls;
/// - [`verify_ui`](Usig::verify_ui) accepts an identifier only if it was produced by the named
///   replica's trusted component, and rejects a counter value the named replica has already
///   bound to different data.
///
/// Both methods are safe to invoke concurrently.
pub trait Usig: Send + Sync + 'static {
    /// Assign a fresh counter to `message` and sign the binding.
    fn create_ui(&self, message: &[u8]) -> Result<UsigIdentifier, UsigError>;

    /// Verify that `ui` binds `message` to a counter assigned by `replica`'s trusted component.
    fn verify_ui(
        &self,
        replica: ReplicaId,
        message: &[u8],
        ui: &UsigIdentifier,
    ) -> Result<(), UsigError>;
}

/// Directory of the verifying keys of every replica's simulated trusted component.
///
/// Shared by all [`SimUsig`] instances of a local cluster; stands in for the attestation
/// infrastructure a TEE-backed deployment would use.
pub struct SimUsigDirectory {
    keys: HashMap<ReplicaId, VerifyingKey>,
}

impl SimUsigDirectory {
    pub fn new(keys: impl IntoIterator<Item = (ReplicaId, VerifyingKey)>) -> SimUsigDirectory {
        SimUsigDirectory {
            keys: keys.into_iter().collect(),
        }
    }

    fn key(&self, replica: ReplicaId) -> Option<&VerifyingKey> {
        self.keys.get(&replica)
    }
}

/// Simulation backend for the [`Usig`] contract.
///
/// Holds the "enclave" signing key and counter in ordinary memory. Verification keeps a table of
/// counter values already accepted from each replica together with a digest of the bound data,
/// so presenting the same counter twice with different data fails with
/// [`UsigError::CounterReused`]. Re-verifying an identifier already accepted succeeds, so
/// message re-validation is idempotent.
pub struct SimUsig {
    id: ReplicaId,
    keypair: Keypair,
    counter: Mutex<u64>,
    directory: Arc<SimUsigDirectory>,
    accepted: Mutex<HashMap<ReplicaId, HashMap<u64, [u8; 32]>>>,
}

impl SimUsig {
    pub fn new(id: ReplicaId, keypair: Keypair, directory: Arc<SimUsigDirectory>) -> SimUsig {
        SimUsig {
            id,
            keypair,
            counter: Mutex::new(0),
            directory,
            accepted: Mutex::new(HashMap::new()),
        }
    }

    /// The replica whose trusted component this instance simulates.
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Create the simulated trusted components for a local cluster of `count` replicas, numbered
    /// `0..count`, sharing one directory.
    pub fn cluster(count: u32) -> Vec<SimUsig> {
        let keypairs: Vec<(ReplicaId, Keypair)> = (0..count)
            .map(|id| {
                (
                    ReplicaId::new(id),
                    Keypair::new(SigningKey::generate(&mut rand::rngs::OsRng)),
                )
            })
            .collect();
        let directory = Arc::new(SimUsigDirectory::new(
            keypairs.iter().map(|(id, kp)| (*id, kp.public())),
        ));
        keypairs
            .into_iter()
            .map(|(id, keypair)| SimUsig::new(id, keypair, directory.clone()))
            .collect()
    }

    /// Fault hook: move the counter back so subsequently created identifiers repeat counter
    /// values. Exists so tests can stand in for a compromised replica double-assigning a
    /// counter; never call it anywhere else.
    pub fn rewind_counter(&self, counter: u64) {
        *self.counter.lock().unwrap() = counter;
    }
}

impl Usig for SimUsig {
    fn create_ui(&self, message: &[u8]) -> Result<UsigIdentifier, UsigError> {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let counter = UsigCounter::new(*counter);
        Ok(UsigIdentifier {
            counter,
            signature: self.keypair.certify_counter(counter, message),
        })
    }

    fn verify_ui(
        &self,
        replica: ReplicaId,
        message: &[u8],
        ui: &UsigIdentifier,
    ) -> Result<(), UsigError> {
        let key = self
            .directory
            .key(replica)
            .ok_or(UsigError::UnknownReplica(replica))?;
        if !verify_counter_certificate(key, ui.counter, message, &ui.signature) {
            return Err(UsigError::InvalidSignature);
        }

        let digest = message_digest(message);
        let mut accepted = self.accepted.lock().unwrap();
        let counters = accepted.entry(replica).or_default();
        if let Some(seen) = counters.get(&ui.counter.int()) {
            if *seen != digest {
                return Err(UsigError::CounterReused(ui.counter));
            }
            return Ok(());
        }
        counters.insert(ui.counter.int(), digest);
        Ok(())
    }
}
