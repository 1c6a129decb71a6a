/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the MinBFT consensus protocol core.
//!
//! MinBFT replicates a deterministic application across `n = 2f + 1` replicas while tolerating
//! `f` arbitrary (Byzantine) failures, one fewer replica per tolerated fault than classical
//! BFT protocols need. The saving comes from a small trusted component in every replica, a
//! Unique Sequential Identifier Generator ([USIG](crate::usig)): a monotonic counter whose
//! signed values make it impossible for even a faulty replica to assign the same position in
//! the order to two different requests.
//!
//! This crate implements the replication pipeline of the protocol: authenticated message
//! ingress, the per-client request lifecycle, generation and propagation of the Prepare and
//! Commit messages that order requests under USIG counters, commit certificates, execution
//! handoff to the host application, and the request timers that signal lost liveness. View
//! change is not implemented yet: request timeouts surface as
//! [events](crate::events::RequestTimeoutEvent) for a future module to consume, and the current
//! view is treated as a parameter everywhere so that module can slot in.
//!
//! The crate is a library; the host supplies the collaborators as trait implementations and
//! directories: the replicated application ([`RequestConsumer`](crate::app::RequestConsumer)),
//! the trusted component ([`Usig`](crate::usig::Usig)), peer-to-peer transport
//! ([`Network`](crate::networking::Network)), and the participant key directories
//! ([`identity`](crate::identity)). [`Replica::start`](crate::replica::Replica::start) wires
//! them into a running replica.

pub mod app;

pub mod config;

pub mod events;

pub mod identity;

pub mod messages;

pub mod networking;

pub mod replica;

pub mod types;

pub mod usig;

pub mod validation;

mod client_state;

mod event_bus;

mod executor;

mod logging;

mod protocol;

mod request_timer;

// Re-exports
pub use app::RequestConsumer;
pub use event_bus::HandlerPtr;
pub use replica::Replica;
