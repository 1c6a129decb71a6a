/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for the host-supplied replicated application.

use std::sync::mpsc::Receiver;

use crate::types::basic::{ExecutionResult, Operation};

/// The deterministic state machine being replicated.
///
/// Besides implementing the function specified in the trait, implementors of `RequestConsumer`
/// are additionally expected to be *deterministic*: delivering the same sequence of operations to
/// two instances must produce the same sequence of results, whatever the wall-clock timing.
///
/// The library guarantees at most one outstanding [`deliver`](RequestConsumer::deliver) call at
/// any time, so implementations do not need internal synchronization.
pub trait RequestConsumer: Send + 'static {
    /// Apply `operation` to the application state. The result is read from the returned channel
    /// once it is available; the channel must eventually yield exactly one value.
    fn deliver(&mut self, operation: Operation) -> Receiver<ExecutionResult>;
}
