/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structured messages exchanged between clients and replicas.
//!
//! ## Messages
//!
//! The protocol involves four types of messages:
//! 1. [`Request`]: sent by a client, asks the replica set to execute an operation.
//! 2. [`Prepare`]: broadcasted by the primary of a view, proposes the ordering of a request under
//!    a fresh trusted counter value.
//! 3. [`Commit`]: broadcasted by a backup, endorses a primary's prepare under the backup's own
//!    trusted counter value.
//! 4. [`Reply`]: sent by every replica to the requesting client once the operation has executed.
//!
//! ## Signing bytes
//!
//! Signing and verification are always performed over the borsh serialization of a message body,
//! excluding the signature (or trusted counter identifier) being created. The associated
//! `signing_bytes` functions are the single source of truth for those serializations; both the
//! senders and the validators go through them, so the bytes cannot drift apart.
//!
//! ## Wire format
//!
//! On the wire every message travels as a length-prefixed frame: a little-endian `u32` byte
//! length followed by the borsh serialization of the [`Message`] union. [`Message::to_frame`] and
//! [`Message::from_frame`] implement the framing and must be kept byte-exact across versions.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{
    ClientId, ExecutionResult, Operation, ReplicaId, SequenceNumber, SignatureBytes, ViewNumber,
};
use crate::types::crypto_primitives::{verify_signature, Keypair, VerifyingKey};
use crate::usig::{Usig, UsigError, UsigIdentifier};

/// A client-signed operation submission.
///
/// Two accepted requests with the same `(client, seq)` always carry the same operation; a
/// mismatch is a protocol violation by the client.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Request {
    pub client: ClientId,
    pub seq: SequenceNumber,
    pub operation: Operation,
    pub signature: SignatureBytes,
}

impl Request {
    /// Create a `Request` for the given `client`, `seq`, and `operation` by signing over the
    /// values with the client's `keypair`.
    pub fn new(
        client: ClientId,
        seq: SequenceNumber,
        operation: Operation,
        keypair: &Keypair,
    ) -> Request {
        let signature = keypair.sign(&Self::signing_bytes(client, seq, &operation));
        Request {
            client,
            seq,
            operation,
            signature,
        }
    }

    pub(crate) fn signing_bytes(
        client: ClientId,
        seq: SequenceNumber,
        operation: &Operation,
    ) -> Vec<u8> {
        borsh::to_vec(&(client, seq, operation)).unwrap()
    }

    pub(crate) fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        verify_signature(
            verifying_key,
            &Self::signing_bytes(self.client, self.seq, &self.operation),
            &self.signature,
        )
    }
}

/// A primary-signed ordering proposal.
///
/// The attached [`UsigIdentifier`] binds the proposal to the primary's trusted counter; counter
/// values from a correct primary are consecutive, so backups process prepares in exactly the
/// order the primary assigned.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Prepare {
    pub view: ViewNumber,
    pub replica: ReplicaId,
    pub request: Request,
    pub ui: UsigIdentifier,
}

impl Prepare {
    /// Create a `Prepare` binding `request` to a fresh counter value of `replica`'s trusted
    /// component.
    pub fn new(
        view: ViewNumber,
        replica: ReplicaId,
        request: Request,
        usig: &impl Usig,
    ) -> Result<Prepare, UsigError> {
        let ui = usig.create_ui(&Self::signing_bytes(view, replica, &request))?;
        Ok(Prepare {
            view,
            replica,
            request,
            ui,
        })
    }

    pub(crate) fn signing_bytes(
        view: ViewNumber,
        replica: ReplicaId,
        request: &Request,
    ) -> Vec<u8> {
        borsh::to_vec(&(view, replica, request)).unwrap()
    }

    /// The bytes the attached trusted counter identifier signs over.
    pub(crate) fn ui_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(self.view, self.replica, &self.request)
    }
}

/// A backup-signed endorsement of a [`Prepare`].
///
/// Carries the full endorsed proposal (request plus the primary's identifier), so a replica that
/// receives an endorsement before the proposal itself can still make progress.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Commit {
    pub view: ViewNumber,
    pub replica: ReplicaId,
    pub primary: ReplicaId,
    pub request: Request,
    pub primary_ui: UsigIdentifier,
    pub ui: UsigIdentifier,
}

impl Commit {
    /// Create a `Commit` in which `replica` endorses `prepare` under a fresh counter value of
    /// its own trusted component.
    pub fn new(
        replica: ReplicaId,
        prepare: &Prepare,
        usig: &impl Usig,
    ) -> Result<Commit, UsigError> {
        let ui = usig.create_ui(&Self::signing_bytes(
            prepare.view,
            replica,
            prepare.replica,
            &prepare.request,
            &prepare.ui,
        ))?;
        Ok(Commit {
            view: prepare.view,
            replica,
            primary: prepare.replica,
            request: prepare.request.clone(),
            primary_ui: prepare.ui.clone(),
            ui,
        })
    }

    pub(crate) fn signing_bytes(
        view: ViewNumber,
        replica: ReplicaId,
        primary: ReplicaId,
        request: &Request,
        primary_ui: &UsigIdentifier,
    ) -> Vec<u8> {
        borsh::to_vec(&(view, replica, primary, request, primary_ui)).unwrap()
    }

    /// The bytes the backup's trusted counter identifier signs over.
    pub(crate) fn ui_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(
            self.view,
            self.replica,
            self.primary,
            &self.request,
            &self.primary_ui,
        )
    }

    /// Reconstruct the [`Prepare`] this commit endorses.
    pub(crate) fn prepare(&self) -> Prepare {
        Prepare {
            view: self.view,
            replica: self.primary,
            request: self.request.clone(),
            ui: self.primary_ui.clone(),
        }
    }
}

/// A replica-signed response to a client.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Reply {
    pub replica: ReplicaId,
    pub client: ClientId,
    pub seq: SequenceNumber,
    pub result: ExecutionResult,
    pub signature: SignatureBytes,
}

impl Reply {
    /// Create a `Reply` by signing over the values with the replica's `keypair`.
    pub fn new(
        replica: ReplicaId,
        client: ClientId,
        seq: SequenceNumber,
        result: ExecutionResult,
        keypair: &Keypair,
    ) -> Reply {
        let signature = keypair.sign(&Self::signing_bytes(replica, client, seq, &result));
        Reply {
            replica,
            client,
            seq,
            result,
            signature,
        }
    }

    pub(crate) fn signing_bytes(
        replica: ReplicaId,
        client: ClientId,
        seq: SequenceNumber,
        result: &ExecutionResult,
    ) -> Vec<u8> {
        borsh::to_vec(&(replica, client, seq, result)).unwrap()
    }

    /// Verify that the reply was signed by `verifying_key`.
    pub fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        verify_signature(
            verifying_key,
            &Self::signing_bytes(self.replica, self.client, self.seq, &self.result),
            &self.signature,
        )
    }
}

/// The tagged union of every message kind that travels on the wire.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Message {
    Request(Request),
    Prepare(Prepare),
    Commit(Commit),
    Reply(Reply),
}

impl Message {
    /// A short name of the message kind, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "Request",
            Message::Prepare(_) => "Prepare",
            Message::Commit(_) => "Commit",
            Message::Reply(_) => "Reply",
        }
    }

    /// Encode the message as a length-prefixed frame.
    pub fn to_frame(&self) -> Vec<u8> {
        let body = borsh::to_vec(self).unwrap();
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    /// Decode a message from a length-prefixed frame.
    pub fn from_frame(frame: &[u8]) -> Result<Message, FrameError> {
        if frame.len() < 4 {
            return Err(FrameError::TooShort);
        }
        let declared = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        let body = &frame[4..];
        if body.len() != declared {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        borsh::from_slice(body).map_err(|_| FrameError::Malformed)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Prepare> for Message {
    fn from(prepare: Prepare) -> Self {
        Message::Prepare(prepare)
    }
}

impl From<Commit> for Message {
    fn from(commit: Commit) -> Self {
        Message::Commit(commit)
    }
}

impl From<Reply> for Message {
    fn from(reply: Reply) -> Self {
        Message::Reply(reply)
    }
}

/// Ways a received frame can fail to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is shorter than the length prefix itself.
    TooShort,
    /// The length prefix disagrees with the number of bytes received.
    LengthMismatch { declared: usize, actual: usize },
    /// The frame body is not a valid serialization of any message kind.
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::SigningKey;
    use rand::rngs::OsRng;

    fn test_keypair() -> Keypair {
        Keypair::new(SigningKey::generate(&mut OsRng))
    }

    fn test_request(keypair: &Keypair) -> Request {
        Request::new(
            ClientId::new(7),
            SequenceNumber::new(1),
            Operation::new(b"x".to_vec()),
            keypair,
        )
    }

    #[test]
    fn request_signature_verifies_and_rejects_tampering() {
        let keypair = test_keypair();
        let request = test_request(&keypair);
        assert!(request.is_correct(&keypair.public()));

        let mut tampered = request.clone();
        tampered.operation = Operation::new(b"y".to_vec());
        assert!(!tampered.is_correct(&keypair.public()));
        assert!(!request.is_correct(&test_keypair().public()));
    }

    #[test]
    fn frames_round_trip_each_message_kind() {
        let keypair = test_keypair();
        let request = test_request(&keypair);
        let reply = Reply::new(
            ReplicaId::new(0),
            ClientId::new(7),
            SequenceNumber::new(1),
            ExecutionResult::new(b"X".to_vec()),
            &keypair,
        );

        for message in [Message::Request(request), Message::Reply(reply)] {
            let frame = message.to_frame();
            assert_eq!(Message::from_frame(&frame), Ok(message));
        }
    }

    #[test]
    fn truncated_and_oversized_frames_are_rejected() {
        let keypair = test_keypair();
        let frame = Message::Request(test_request(&keypair)).to_frame();

        assert_eq!(Message::from_frame(&frame[..2]), Err(FrameError::TooShort));
        assert!(matches!(
            Message::from_frame(&frame[..frame.len() - 1]),
            Err(FrameError::LengthMismatch { .. })
        ));

        let mut padded = frame.clone();
        padded.push(0);
        assert!(matches!(
            Message::from_frame(&padded),
            Err(FrameError::LengthMismatch { .. })
        ));

        let mut garbled = frame;
        let last = garbled.len() - 1;
        garbled[4] = 9; // unknown tag
        garbled[last] ^= 0xff;
        assert_eq!(Message::from_frame(&garbled), Err(FrameError::Malformed));
    }
}
