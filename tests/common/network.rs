//! A "mock" (totally local) network for passing around replica messages.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use minbft_rs::{
    messages::Message,
    networking::Network,
    types::basic::ReplicaId,
};

/// Every broadcast made by any stub of a mock network, in the order they happened. Tests use
/// this to assert that a scenario produced exactly the prepares and commits it should have.
pub(crate) type BroadcastLog = Arc<Mutex<Vec<(ReplicaId, Message)>>>;

/// A network stub that passes messages to and from replicas using channels.
///
/// The set of peers reachable from a given `NetworkStub` is fixed on construction by
/// [`mock_network`]; broadcasts reach every peer except the broadcasting replica itself.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_id: ReplicaId,
    all_peers: HashMap<ReplicaId, Sender<(ReplicaId, Message)>>,
    inbox: Arc<Mutex<Receiver<(ReplicaId, Message)>>>,
    broadcast_log: BroadcastLog,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) {
        self.broadcast_log
            .lock()
            .unwrap()
            .push((self.my_id, message.clone()));
        for (peer, sender) in &self.all_peers {
            if *peer != self.my_id {
                let _ = sender.send((self.my_id, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(ReplicaId, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Create a vector of `NetworkStub`s connecting `count` replicas numbered `0..count`, together
/// with the shared broadcast log.
///
/// `NetworkStub`s feature in the returned vector in replica id order, i.e., the i-th network
/// stub is the network stub for replica i.
pub(crate) fn mock_network(count: u32) -> (Vec<NetworkStub>, BroadcastLog) {
    let broadcast_log: BroadcastLog = Arc::new(Mutex::new(Vec::new()));
    let mut all_peers = HashMap::new();
    let id_and_inboxes: Vec<(ReplicaId, Receiver<(ReplicaId, Message)>)> = (0..count)
        .map(|id| {
            let id = ReplicaId::new(id);
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(id, sender);

            (id, receiver)
        })
        .collect();

    let stubs = id_and_inboxes
        .into_iter()
        .map(|(my_id, inbox)| NetworkStub {
            my_id,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            broadcast_log: broadcast_log.clone(),
        })
        .collect();
    (stubs, broadcast_log)
}

/// The counter values of the prepares `replica` has broadcast, in broadcast order.
pub(crate) fn prepares_broadcast_by(log: &BroadcastLog, replica: ReplicaId) -> Vec<u64> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|(origin, message)| match message {
            Message::Prepare(prepare) if *origin == replica => Some(prepare.ui.counter.int()),
            _ => None,
        })
        .collect()
}

/// The endorsed primary counter values of the commits `replica` has broadcast, in broadcast
/// order.
pub(crate) fn commits_broadcast_by(log: &BroadcastLog, replica: ReplicaId) -> Vec<u64> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|(origin, message)| match message {
            Message::Commit(commit) if *origin == replica => {
                Some(commit.primary_ui.counter.int())
            }
            _ => None,
        })
        .collect()
}
