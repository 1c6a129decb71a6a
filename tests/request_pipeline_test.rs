//! End-to-end tests of the request pipeline over a local 3-replica cluster: a request travels
//! through prepare, commit, and execution on every replica, retransmits are answered from the
//! reply cache, and concurrent clients see one consistent order.

mod common;

use std::thread;
use std::time::Duration;

use log::LevelFilter;

use common::cluster::{Cluster, ClusterSpec};
use common::logging::setup_logger;
use common::network::{commits_broadcast_by, prepares_broadcast_by};
use minbft_rs::types::basic::{ExecutionResult, ReplicaId, SequenceNumber};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn single_request_executes_on_every_replica() {
    setup_logger(LevelFilter::Warn);
    let cluster = Cluster::start(ClusterSpec::all(3, 1));

    let request = cluster.request(0, 1, b"x");
    let replies: Vec<_> = cluster
        .submit_to_all(&request)
        .into_iter()
        .map(|channel| channel.recv_timeout(REPLY_TIMEOUT).unwrap())
        .collect();

    assert_eq!(replies.len(), 3);
    for (id, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.replica, ReplicaId::new(id as u32));
        assert_eq!(reply.client, request.client);
        assert_eq!(reply.seq, SequenceNumber::new(1));
        assert_eq!(reply.result, ExecutionResult::new(b"X".to_vec()));
    }

    // The primary proposed exactly once; each backup endorsed exactly once.
    let log = &cluster.broadcast_log;
    assert_eq!(prepares_broadcast_by(log, ReplicaId::new(0)), vec![1]);
    assert_eq!(prepares_broadcast_by(log, ReplicaId::new(1)), Vec::<u64>::new());
    assert_eq!(commits_broadcast_by(log, ReplicaId::new(1)), vec![1]);
    assert_eq!(commits_broadcast_by(log, ReplicaId::new(2)), vec![1]);

    // Every replica executed the same single operation.
    for (_, delivered) in &cluster.delivered {
        assert_eq!(*delivered.lock().unwrap(), vec![b"x".to_vec()]);
    }
}

#[test]
#[should_panic(expected = "even number of replicas")]
fn an_even_replica_count_is_refused() {
    setup_logger(LevelFilter::Warn);
    // Quorum intersection needs n = 2f + 1 exactly; n = 4 must be rejected at startup.
    Cluster::start(ClusterSpec::all(4, 1));
}

#[test]
fn retransmitted_request_is_answered_from_the_reply_cache() {
    setup_logger(LevelFilter::Warn);
    let cluster = Cluster::start(ClusterSpec::all(3, 1));

    let request = cluster.request(0, 1, b"x");
    let first_replies: Vec<_> = cluster
        .submit_to_all(&request)
        .into_iter()
        .map(|channel| channel.recv_timeout(REPLY_TIMEOUT).unwrap())
        .collect();

    let broadcasts_before = cluster.broadcast_log.lock().unwrap().len();

    // The client re-sends the identical request: no new protocol traffic, same replies.
    let second_replies: Vec<_> = cluster
        .submit_to_all(&request)
        .into_iter()
        .map(|channel| channel.recv_timeout(REPLY_TIMEOUT).unwrap())
        .collect();

    assert_eq!(first_replies, second_replies);
    assert_eq!(cluster.broadcast_log.lock().unwrap().len(), broadcasts_before);
    for (_, delivered) in &cluster.delivered {
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }
}

#[test]
fn concurrent_clients_execute_in_the_same_order_everywhere() {
    setup_logger(LevelFilter::Warn);
    let cluster = Cluster::start(ClusterSpec::all(3, 2));

    let request_a = cluster.request(0, 1, b"a");
    let request_b = cluster.request(1, 1, b"b");

    let (replies_a, replies_b) = thread::scope(|scope| {
        let submit_a = scope.spawn(|| cluster.submit_to_all(&request_a));
        let submit_b = scope.spawn(|| cluster.submit_to_all(&request_b));
        (submit_a.join().unwrap(), submit_b.join().unwrap())
    });

    for (channels, result) in [(replies_a, b"A".to_vec()), (replies_b, b"B".to_vec())] {
        for channel in channels {
            let reply = channel.recv_timeout(REPLY_TIMEOUT).unwrap();
            assert_eq!(reply.result, ExecutionResult::new(result.clone()));
        }
    }

    // Both operations retired on every replica, and in the same order everywhere: the order
    // the primary's counter values imposed.
    let reference = cluster.delivered[0].1.lock().unwrap().clone();
    assert_eq!(reference.len(), 2);
    assert!(reference.contains(&b"a".to_vec()) && reference.contains(&b"b".to_vec()));
    for (_, delivered) in &cluster.delivered[1..] {
        assert_eq!(*delivered.lock().unwrap(), reference);
    }
}
