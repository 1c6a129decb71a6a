/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::config::Configuration::log_events).
//!
//! The library logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [Propose](crate::events::ProposeEvent) is printed:
//!
//! ```text
//! Propose, 1701329264, 0, 1, 7, 1, eA
//! ```
//!
//! In the snippet, the values after the timestamp are the view, the assigned counter value, the
//! client, the request sequence number, and the first seven characters of the Base64 encoding of
//! the operation.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const RECEIVE_REQUEST: &str = "ReceiveRequest";
pub const RECEIVE_PREPARE: &str = "ReceivePrepare";
pub const RECEIVE_COMMIT: &str = "ReceiveCommit";

pub const PROPOSE: &str = "Propose";
pub const COMMIT: &str = "Commit";

pub const RETIRE_REQUEST: &str = "RetireRequest";
pub const SEND_REPLY: &str = "SendReply";
pub const REQUEST_TIMEOUT: &str = "RequestTimeout";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ReceiveRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_request_event: &ReceiveRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_REQUEST,
                secs_since_unix_epoch(receive_request_event.timestamp),
                receive_request_event.request.client,
                receive_request_event.request.seq,
                first_seven_base64_chars(receive_request_event.request.operation.bytes()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_prepare_event: &ReceivePrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_PREPARE,
                secs_since_unix_epoch(receive_prepare_event.timestamp),
                receive_prepare_event.origin,
                receive_prepare_event.prepare.view,
                receive_prepare_event.prepare.ui.counter,
                receive_prepare_event.prepare.request.client,
                receive_prepare_event.prepare.request.seq,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveCommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_commit_event: &ReceiveCommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_COMMIT,
                secs_since_unix_epoch(receive_commit_event.timestamp),
                receive_commit_event.origin,
                receive_commit_event.commit.view,
                receive_commit_event.commit.primary_ui.counter,
                receive_commit_event.commit.ui.counter,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.prepare.view,
                propose_event.prepare.ui.counter,
                propose_event.prepare.request.client,
                propose_event.prepare.request.seq,
                first_seven_base64_chars(propose_event.prepare.request.operation.bytes()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                COMMIT,
                secs_since_unix_epoch(commit_event.timestamp),
                commit_event.commit.view,
                commit_event.commit.primary,
                commit_event.commit.primary_ui.counter,
                commit_event.commit.ui.counter,
            )
        };
        Box::new(logger)
    }
}

impl Logger for RetireRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |retire_request_event: &RetireRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RETIRE_REQUEST,
                secs_since_unix_epoch(retire_request_event.timestamp),
                retire_request_event.view,
                retire_request_event.counter,
                retire_request_event.client,
                retire_request_event.seq,
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendReplyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_reply_event: &SendReplyEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_REPLY,
                secs_since_unix_epoch(send_reply_event.timestamp),
                send_reply_event.reply.client,
                send_reply_event.reply.seq,
                first_seven_base64_chars(send_reply_event.reply.result.bytes()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |request_timeout_event: &RequestTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REQUEST_TIMEOUT,
                secs_since_unix_epoch(request_timeout_event.timestamp),
                request_timeout_event.client,
                request_timeout_event.view,
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
