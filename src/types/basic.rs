/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert newtypes used throughout the library.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign};

/// Identifier of a replica. Replicas in a deployment of `n` replicas are numbered `0..n`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identifier of a client.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ClientId(u32);

impl ClientId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Sequence number a client assigns to its request. Sequence numbers issued by a correct client
/// are strictly increasing, starting at 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// View number. Determines the primary of the view: `primary = view mod n`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    pub fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Compute the identity of the primary of this view in a deployment of `n` replicas.
    pub fn primary(&self, n: u32) -> ReplicaId {
        ReplicaId::new((self.0 % n as u64) as u32)
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for ViewNumber {
    type Output = ViewNumber;

    fn add(self, rhs: u64) -> Self::Output {
        ViewNumber(self.0.add(rhs))
    }
}

/// Value of a replica's trusted monotonic counter. Counters assigned by a correct replica's
/// trusted component are strictly increasing with no gaps, starting at 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct UsigCounter(u64);

impl UsigCounter {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for UsigCounter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for UsigCounter {
    type Output = UsigCounter;

    fn add(self, rhs: u64) -> Self::Output {
        UsigCounter(self.0.add(rhs))
    }
}

impl AddAssign<u64> for UsigCounter {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

/// Signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub(crate) fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({:02x?}..)", &self.0[..4])
    }
}

/// Opaque operation bytes a client asks the replicated state machine to execute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Operation(Vec<u8>);

impl Operation {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Opaque result bytes the replicated state machine produced for an operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ExecutionResult(Vec<u8>);

impl ExecutionResult {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_rotates_modulo_replica_count() {
        assert_eq!(ViewNumber::new(0).primary(3), ReplicaId::new(0));
        assert_eq!(ViewNumber::new(1).primary(3), ReplicaId::new(1));
        assert_eq!(ViewNumber::new(3).primary(3), ReplicaId::new(0));
        assert_eq!(ViewNumber::new(7).primary(3), ReplicaId::new(1));
    }
}
