/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Stateless validation of inbound messages.
//!
//! Each validator authenticates one message kind and checks it for internal consistency. None of
//! them reads replica state or has side effects, so they are safe to invoke concurrently; checks
//! that do depend on replica state (current view, counter continuity, duplicate detection) live
//! in the processors.

use std::fmt::{self, Display, Formatter};

use crate::identity::{ClientDirectory, PeerSet};
use crate::messages::{Commit, Prepare, Request};
use crate::usig::{Usig, UsigError};

/// Why a message failed validation. Either way the message is dropped; the two kinds exist so
/// callers can word their log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A signature or trusted counter identifier did not verify, or the signer is unknown.
    Auth(&'static str),
    /// The message is internally inconsistent.
    Format(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Auth(reason) => write!(f, "authentication failed: {}", reason),
            ValidationError::Format(reason) => write!(f, "malformed message: {}", reason),
        }
    }
}

fn auth_error(error: UsigError) -> ValidationError {
    match error {
        UsigError::UnknownReplica(_) => ValidationError::Auth("unknown replica"),
        UsigError::InvalidSignature => ValidationError::Auth("invalid counter signature"),
        UsigError::CounterReused(_) => ValidationError::Auth("reused counter value"),
    }
}

/// Authenticate a client request: the client must be known and its signature must verify over
/// the request body.
pub(crate) fn validate_request(
    request: &Request,
    clients: &ClientDirectory,
) -> Result<(), ValidationError> {
    let key = clients
        .key(request.client)
        .ok_or(ValidationError::Auth("unknown client"))?;
    if !request.is_correct(key) {
        return Err(ValidationError::Auth("invalid client signature"));
    }
    Ok(())
}

/// Authenticate a prepare: the sender must be a known replica, its trusted counter identifier
/// must verify over the prepare body, and the embedded request must itself be valid.
///
/// Whether the sender is the primary of the current view, and whether the counter is the next
/// expected one, are stateful questions answered by the prepare processor.
pub(crate) fn validate_prepare(
    prepare: &Prepare,
    peers: &PeerSet,
    clients: &ClientDirectory,
    usig: &impl Usig,
) -> Result<(), ValidationError> {
    if !peers.contains(prepare.replica) {
        return Err(ValidationError::Auth("unknown replica"));
    }
    usig.verify_ui(prepare.replica, &prepare.ui_bytes(), &prepare.ui)
        .map_err(auth_error)?;
    validate_request(&prepare.request, clients)
}

/// Authenticate a commit: the sender must be a known replica distinct from the primary it
/// endorses, both trusted counter identifiers must verify, and the embedded request must itself
/// be valid.
pub(crate) fn validate_commit(
    commit: &Commit,
    peers: &PeerSet,
    clients: &ClientDirectory,
    usig: &impl Usig,
) -> Result<(), ValidationError> {
    if !peers.contains(commit.replica) {
        return Err(ValidationError::Auth("unknown replica"));
    }
    if commit.replica == commit.primary {
        return Err(ValidationError::Format("commit endorsing its own sender"));
    }
    usig.verify_ui(commit.replica, &commit.ui_bytes(), &commit.ui)
        .map_err(auth_error)?;
    usig.verify_ui(
        commit.primary,
        &commit.prepare().ui_bytes(),
        &commit.primary_ui,
    )
    .map_err(auth_error)?;
    validate_request(&commit.request, clients)
}
