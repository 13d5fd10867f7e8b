//! End-to-end runs of the coordinator against the in-process broker.
//!
//! Time is paused in these tests, so idle windows elapse instantly once
//! every task is waiting on a timer.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use stomp_bench::{
    broker::{BrokerClient, Connector, InMemoryBroker, ServerAddress, Subscription},
    BenchError, Benchmark, BenchmarkConfig, BenchmarkRunner, Role,
};

fn config(destination: &str) -> BenchmarkConfig {
    BenchmarkConfig::new("127.0.0.1:61613".parse().unwrap(), destination)
}

fn bench_error(err: &anyhow::Error) -> &BenchError {
    err.downcast_ref::<BenchError>()
        .unwrap_or_else(|| panic!("not a BenchError: {err:#}"))
}

fn message_counts(benchmark: &Benchmark, role: Role) -> Vec<u64> {
    let mut counts: Vec<u64> = benchmark
        .group(role)
        .samples()
        .iter()
        .map(|s| s.messages())
        .collect();
    counts.sort_unstable();
    counts
}

#[tokio::test(start_paused = true)]
async fn publish_and_subscribe_on_a_queue() {
    let broker = InMemoryBroker::new();
    let mut config = config("/queue/bench");
    config.publishers = 2;
    config.subscribers = 2;
    config.msg_count = 1000;
    config.message_size = 64;

    let benchmark = BenchmarkRunner::new(config, Arc::new(broker.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(message_counts(&benchmark, Role::Publish), vec![500, 500]);
    assert_eq!(message_counts(&benchmark, Role::Subscribe), vec![500, 500]);
    assert_eq!(benchmark.publish().total_bytes(), 64_000);
    assert_eq!(benchmark.subscribe().total_messages(), 1000);

    // Every worker closed its connection.
    assert_eq!(broker.connections(), 0);

    let report = benchmark.report();
    assert!(report.starts_with("== STOMP Benchmark ==\n Testing against: 127.0.0.1:61613\n"));
    assert!(report.contains(" Publish:\n  [1] "));
    assert!(report.contains(" Subscribe:\n  [1] "));
    assert!(report.contains("  Totals:\n"));
}

#[tokio::test(start_paused = true)]
async fn topic_delivers_everything_to_each_subscriber() {
    let mut config = config("/topic/bench");
    config.subscribers = 3;
    config.msg_count = 90;

    let benchmark = BenchmarkRunner::new(config, Arc::new(InMemoryBroker::new()))
        .run()
        .await
        .unwrap();

    assert_eq!(message_counts(&benchmark, Role::Subscribe), vec![90, 90, 90]);
}

#[tokio::test(start_paused = true)]
async fn publish_only_run_splits_the_remainder() {
    let mut config = config("/queue/bench");
    config.publishers = 3;
    config.msg_count = 10;

    let benchmark = BenchmarkRunner::new(config, Arc::new(InMemoryBroker::new()))
        .run()
        .await
        .unwrap();

    assert_eq!(message_counts(&benchmark, Role::Publish), vec![3, 3, 4]);
    assert!(benchmark.subscribe().is_empty());
    assert!(!benchmark.report().contains("Subscribe:"));
}

#[tokio::test(start_paused = true)]
async fn single_publisher_sends_the_whole_budget() {
    let broker = InMemoryBroker::new();
    let mut config = config("/queue/bench");
    config.publishers = 1;
    config.subscribers = 0;
    config.msg_count = 100_000;
    config.message_size = 16;

    let benchmark = BenchmarkRunner::new(config, Arc::new(broker.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(benchmark.publish().len(), 1);
    let sample = benchmark.publish().samples()[0];
    assert_eq!(sample.messages(), 100_000);
    assert_eq!(sample.bytes(), 1_600_000);
    assert!(benchmark.subscribe().is_empty());
    assert_eq!(broker.connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn subscribers_without_publishers_never_finish() {
    let mut config = config("/queue/bench");
    config.publishers = 0;
    config.subscribers = 1;

    let runner = BenchmarkRunner::new(config, Arc::new(InMemoryBroker::new()));
    let outcome = tokio::time::timeout(Duration::from_secs(3600), runner.run()).await;
    assert!(outcome.is_err());
}

#[tokio::test(start_paused = true)]
async fn run_timeout_reports_stalled_workers() {
    let mut config = config("/queue/bench");
    config.publishers = 0;
    config.subscribers = 2;
    config.run_timeout = Some(Duration::from_secs(5));

    let err = BenchmarkRunner::new(config, Arc::new(InMemoryBroker::new()))
        .run()
        .await
        .unwrap_err();

    match bench_error(&err) {
        BenchError::Stalled { pending, deadline } => {
            assert_eq!(*pending, 2);
            assert_eq!(*deadline, Duration::from_secs(5));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Loopback connector that refuses one client id and can make publishers
/// fail after a number of sends.
struct FaultyConnector {
    broker: InMemoryBroker,
    refuse: Option<&'static str>,
    fail_after: Option<u64>,
}

#[async_trait]
impl Connector for FaultyConnector {
    async fn connect(
        &self,
        address: &ServerAddress,
        client_id: &str,
    ) -> stomp_bench::Result<Box<dyn BrokerClient>> {
        if self.refuse == Some(client_id) {
            return Err(BenchError::Connection {
                client_id: client_id.to_string(),
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        let inner = self.broker.connect(address, client_id).await?;
        Ok(Box::new(FaultyClient {
            inner,
            remaining: self.fail_after,
        }))
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}

struct FaultyClient {
    inner: Box<dyn BrokerClient>,
    remaining: Option<u64>,
}

#[async_trait]
impl BrokerClient for FaultyClient {
    fn client_id(&self) -> &str {
        self.inner.client_id()
    }

    async fn send(&mut self, destination: &str, payload: &Bytes) -> stomp_bench::Result<()> {
        match self.remaining {
            Some(0) => Err(BenchError::Delivery {
                destination: destination.to_string(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "broker went away"),
            }),
            Some(ref mut remaining) => {
                *remaining -= 1;
                self.inner.send(destination, payload).await
            }
            None => self.inner.send(destination, payload).await,
        }
    }

    async fn subscribe(&mut self, destination: &str) -> stomp_bench::Result<Subscription> {
        self.inner.subscribe(destination).await
    }

    async fn close(&mut self) -> stomp_bench::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test(start_paused = true)]
async fn refused_connection_aborts_before_any_message() {
    let broker = InMemoryBroker::new();
    let mut config = config("/queue/bench");
    config.publishers = 2;
    config.subscribers = 1;

    let connector = FaultyConnector {
        broker: broker.clone(),
        refuse: Some("bench-pub#1"),
        fail_after: None,
    };
    let err = BenchmarkRunner::new(config, Arc::new(connector))
        .run()
        .await
        .unwrap_err();

    match bench_error(&err) {
        BenchError::Connection { client_id, .. } => assert_eq!(client_id, "bench-pub#1"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(format!("{err:#}").contains("failed to connect publishers"));
    assert_eq!(broker.subscriber_count("/queue/bench"), 0);
}

#[tokio::test(start_paused = true)]
async fn delivery_failure_aborts_the_run() {
    let mut config = config("/queue/bench");
    config.publishers = 1;
    config.subscribers = 1;
    config.msg_count = 100;

    let connector = FaultyConnector {
        broker: InMemoryBroker::new(),
        refuse: None,
        fail_after: Some(10),
    };
    let err = BenchmarkRunner::new(config, Arc::new(connector))
        .run()
        .await
        .unwrap_err();

    match bench_error(&err) {
        BenchError::Delivery { destination, .. } => assert_eq!(destination, "/queue/bench"),
        other => panic!("unexpected error: {other}"),
    }
}
