//! Tests of the request timer: a silent primary makes every backup raise the timeout exactly
//! once per client, and a request that retires in time raises nothing.

mod common;

use std::thread;
use std::time::Duration;

use log::LevelFilter;

use common::cluster::{Cluster, ClusterSpec};
use common::logging::setup_logger;
use minbft_rs::types::basic::{ClientId, ReplicaId, ViewNumber};

#[test]
fn backups_raise_the_timeout_when_the_primary_stays_silent() {
    setup_logger(LevelFilter::Warn);
    let cluster = Cluster::start(ClusterSpec {
        replica_count: 3,
        client_count: 1,
        request_timeout: Duration::from_millis(200),
        // Replica 0, the primary of view 0, is never started.
        start: vec![1, 2],
    });

    let request = cluster.request(0, 1, b"x");
    let channels = cluster.submit_to_all(&request);

    // Wait long enough for the timers to expire, and then some, to catch spurious refiring.
    thread::sleep(Duration::from_millis(800));

    let mut timeouts = cluster.timeouts.lock().unwrap().clone();
    timeouts.sort();
    assert_eq!(
        timeouts,
        vec![
            (ReplicaId::new(1), ClientId::new(0), ViewNumber::init()),
            (ReplicaId::new(2), ClientId::new(0), ViewNumber::init()),
        ]
    );

    // No reply ever arrives, of course.
    for channel in &channels {
        assert!(channel.try_recv().is_err());
    }
}

#[test]
fn a_request_that_retires_in_time_raises_no_timeout() {
    setup_logger(LevelFilter::Warn);
    let cluster = Cluster::start(ClusterSpec {
        replica_count: 3,
        client_count: 1,
        request_timeout: Duration::from_millis(500),
        start: vec![0, 1, 2],
    });

    let request = cluster.request(0, 1, b"x");
    for channel in cluster.submit_to_all(&request) {
        channel.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    thread::sleep(Duration::from_millis(900));
    assert!(cluster.timeouts.lock().unwrap().is_empty());
}
