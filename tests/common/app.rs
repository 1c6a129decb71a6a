//! A deterministic test application: uppercases the operation bytes.

use std::sync::{
    mpsc::{self, Receiver},
    Arc, Mutex,
};

use minbft_rs::{
    types::basic::{ExecutionResult, Operation},
    RequestConsumer,
};

/// The operations one replica's application instance has executed, in execution order. Tests
/// compare these across replicas to check that all correct replicas executed the same sequence.
pub(crate) type DeliveredLog = Arc<Mutex<Vec<Vec<u8>>>>;

pub(crate) struct UppercaseApp {
    delivered: DeliveredLog,
}

impl UppercaseApp {
    pub(crate) fn new() -> (UppercaseApp, DeliveredLog) {
        let delivered: DeliveredLog = Arc::new(Mutex::new(Vec::new()));
        (
            UppercaseApp {
                delivered: delivered.clone(),
            },
            delivered,
        )
    }
}

impl RequestConsumer for UppercaseApp {
    fn deliver(&mut self, operation: Operation) -> Receiver<ExecutionResult> {
        let result: Vec<u8> = operation
            .bytes()
            .iter()
            .map(u8::to_ascii_uppercase)
            .collect();
        self.delivered.lock().unwrap().push(operation.into_bytes());

        let (sender, receiver) = mpsc::sync_channel(1);
        sender.send(ExecutionResult::new(result)).unwrap();
        receiver
    }
}
