//! # Benchmark Workers
//!
//! A worker owns one broker connection for the whole run and reports exactly
//! one [`Sample`] through the shared [`SampleSink`].
//!
//! ## Publishers
//!
//! A [`PublishWorker`] sends its quota of identical payloads as fast as the
//! client accepts them, yielding to the scheduler after each send so that
//! subscribers sharing the runtime keep draining their sockets.
//!
//! ## Subscribers
//!
//! A [`SubscribeWorker`] has no way of knowing when the last message has
//! arrived. It counts messages until the stream has been quiet for a full
//! idle window, checked on a fixed poll cadence:
//!
//! ```text
//!  Idle ──message──▶ Active ──message──▶ Active
//!                      │
//!                      └──poll, now ≥ last + idle_window──▶ Done
//! ```
//!
//! `Idle` never times out: a subscriber that receives nothing waits until
//! the run is cancelled. It logs at debug level on every poll while idle,
//! and warns once after [`IDLE_WARNING_WINDOWS`] idle windows. The sample
//! spans first to last message, so the trailing idle window is not charged
//! to the subscriber.

use crate::broker::{BrokerClient, Subscription};
use crate::error::{BenchError, Result};
use crate::metrics::{Role, Sample};
use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Channel end workers report their sample on.
pub type SampleSink = mpsc::UnboundedSender<(Role, Sample)>;

/// Idle windows a subscriber waits for its first message before warning.
pub const IDLE_WARNING_WINDOWS: u32 = 5;

/// Characters a payload is drawn from: digits, ASCII letters, punctuation
/// and whitespace.
pub const PRINTABLE: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ \t\n\r\x0b\x0c";

/// Build a random payload of `size` printable characters.
pub fn generate_payload(size: usize) -> Bytes {
    let mut rng = rand::thread_rng();
    let payload: Vec<u8> = (0..size)
        .map(|_| PRINTABLE[rng.gen_range(0..PRINTABLE.len())])
        .collect();
    Bytes::from(payload)
}

/// Observable phase of an [`IdleDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Idle,
    Active,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Active {
        start: Instant,
        last_message: Instant,
        counter: u64,
    },
    Done,
}

/// Idle-timeout state machine for a subscriber
///
/// The clock is passed in on every call, so the transitions can be driven
/// from tests without timers.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    idle_window: Duration,
    message_size: u64,
    phase: Phase,
}

impl IdleDetector {
    pub fn new(idle_window: Duration, message_size: u64) -> Self {
        Self {
            idle_window,
            message_size,
            phase: Phase::Idle,
        }
    }

    pub fn state(&self) -> IdleState {
        match self.phase {
            Phase::Idle => IdleState::Idle,
            Phase::Active { .. } => IdleState::Active,
            Phase::Done => IdleState::Done,
        }
    }

    /// Messages counted so far.
    pub fn counter(&self) -> u64 {
        match self.phase {
            Phase::Active { counter, .. } => counter,
            _ => 0,
        }
    }

    /// Instant after which a poll completes the sample, once active.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Active { last_message, .. } => Some(last_message + self.idle_window),
            _ => None,
        }
    }

    /// Record a message arriving at `now`. Ignored once done.
    pub fn on_message(&mut self, now: Instant) {
        self.phase = match self.phase {
            Phase::Idle => Phase::Active {
                start: now,
                last_message: now,
                counter: 1,
            },
            Phase::Active { start, counter, .. } => Phase::Active {
                start,
                last_message: now,
                counter: counter + 1,
            },
            Phase::Done => Phase::Done,
        };
    }

    /// Check the idle window at `now`.
    ///
    /// Returns the finished sample on the single `Active -> Done` transition
    /// and `None` on every other call.
    pub fn poll(&mut self, now: Instant) -> Option<Sample> {
        match self.phase {
            Phase::Active {
                start,
                last_message,
                counter,
            } if now >= last_message + self.idle_window => {
                self.phase = Phase::Done;
                Some(Sample::new(counter, self.message_size, start, last_message))
            }
            _ => None,
        }
    }
}

/// Sends a fixed quota of messages to one destination
pub struct PublishWorker {
    client: Box<dyn BrokerClient>,
    destination: String,
    payload: Bytes,
    quota: u64,
    sink: SampleSink,
}

impl PublishWorker {
    pub fn new(
        client: Box<dyn BrokerClient>,
        destination: impl Into<String>,
        payload: Bytes,
        quota: u64,
        sink: SampleSink,
    ) -> Self {
        Self {
            client,
            destination: destination.into(),
            payload,
            quota,
            sink,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let client_id = self.client.client_id().to_string();
        debug!(client_id = %client_id, quota = self.quota, "Publisher starting");

        let start = Instant::now();
        for _ in 0..self.quota {
            self.client.send(&self.destination, &self.payload).await?;
            tokio::task::yield_now().await;
        }
        self.client.flush().await?;
        let end = Instant::now();

        let sample = Sample::new(self.quota, self.payload.len() as u64, start, end);
        info!(client_id = %client_id, "Published {} messages: {}", self.quota, sample);
        let _ = self.sink.send((Role::Publish, sample));

        self.client.close().await
    }
}

/// Per-subscriber settings
#[derive(Debug, Clone, Copy)]
pub struct SubscriberSettings {
    pub message_size: u64,
    pub idle_window: Duration,
    pub poll_interval: Duration,
    /// Nominal share of the total, only used to flag a short or long count.
    pub expected: u64,
}

/// Counts messages on one subscription until the idle window expires
pub struct SubscribeWorker {
    client: Box<dyn BrokerClient>,
    subscription: Subscription,
    detector: IdleDetector,
    settings: SubscriberSettings,
    sink: SampleSink,
}

impl SubscribeWorker {
    /// Subscribe `client` to `destination`.
    ///
    /// The subscription is live when this returns, so messages published
    /// afterwards are counted.
    pub async fn subscribe(
        mut client: Box<dyn BrokerClient>,
        destination: &str,
        settings: SubscriberSettings,
        sink: SampleSink,
    ) -> Result<Self> {
        let subscription = client.subscribe(destination).await?;
        debug!(
            client_id = client.client_id(),
            destination,
            expected = settings.expected,
            "Subscriber ready"
        );
        Ok(Self {
            client,
            subscription,
            detector: IdleDetector::new(settings.idle_window, settings.message_size),
            settings,
            sink,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let client_id = self.client.client_id().to_string();
        let period = self.settings.poll_interval;
        let started = Instant::now();
        let mut ticker = interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let warn_after = self.settings.idle_window * IDLE_WARNING_WINDOWS;

        let mut open = true;
        let mut warned = false;
        let sample = loop {
            tokio::select! {
                frame = self.subscription.recv(), if open => match frame {
                    Some(_) => self.detector.on_message(Instant::now()),
                    None if self.detector.state() == IdleState::Idle => {
                        let _ = self.client.close().await;
                        return Err(BenchError::SubscriptionClosed { client_id });
                    }
                    None => {
                        debug!(client_id = %client_id, "Subscription closed, waiting out the idle window");
                        open = false;
                    }
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if let Some(sample) = self.detector.poll(now) {
                        break sample;
                    }
                    if self.detector.state() == IdleState::Idle {
                        let waited = now - started;
                        debug!(client_id = %client_id, waited = ?waited, "Subscriber still idle");
                        if !warned && waited >= warn_after {
                            warn!(
                                client_id = %client_id,
                                waited = ?waited,
                                "Subscriber has received no messages yet"
                            );
                            warned = true;
                        }
                    }
                }
            }
        };
        drop(ticker);

        if sample.messages() != self.settings.expected {
            warn!(
                client_id = %client_id,
                "Received {} messages, expected {}",
                sample.messages(),
                self.settings.expected
            );
        }
        info!(client_id = %client_id, "Received {} messages: {}", sample.messages(), sample);
        let _ = self.sink.send((Role::Subscribe, sample));

        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connector, InMemoryBroker, ServerAddress};
    use std::io;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_millis(600);

    fn address() -> ServerAddress {
        "127.0.0.1:61613".parse().unwrap()
    }

    fn settings(expected: u64) -> SubscriberSettings {
        SubscriberSettings {
            message_size: 8,
            idle_window: WINDOW,
            poll_interval: Duration::from_millis(200),
            expected,
        }
    }

    #[test]
    fn test_payload_is_printable_and_sized() {
        let payload = generate_payload(128);
        assert_eq!(payload.len(), 128);
        assert!(payload.iter().all(|b| PRINTABLE.contains(b)));
        assert_eq!(PRINTABLE.len(), 100);
        assert!(generate_payload(0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_transitions() {
        let t0 = Instant::now();
        let mut detector = IdleDetector::new(WINDOW, 8);
        assert_eq!(detector.state(), IdleState::Idle);
        assert!(detector.poll(t0 + Duration::from_secs(3600)).is_none());
        assert_eq!(detector.state(), IdleState::Idle);

        detector.on_message(t0);
        assert_eq!(detector.state(), IdleState::Active);
        assert_eq!(detector.deadline(), Some(t0 + WINDOW));

        let t1 = t0 + Duration::from_millis(300);
        detector.on_message(t1);
        assert_eq!(detector.counter(), 2);
        assert_eq!(detector.deadline(), Some(t1 + WINDOW));

        assert!(detector.poll(t0 + WINDOW).is_none());
        assert!(detector.poll(t1 + WINDOW - Duration::from_millis(1)).is_none());

        let sample = detector.poll(t1 + WINDOW).unwrap();
        assert_eq!(detector.state(), IdleState::Done);
        assert_eq!(sample.messages(), 2);
        assert_eq!(sample.start(), t0);
        assert_eq!(sample.end(), t1);
        assert_eq!(sample.bytes(), 16);

        // Done is terminal.
        detector.on_message(t1 + WINDOW);
        assert!(detector.poll(t1 + WINDOW * 10).is_none());
        assert_eq!(detector.state(), IdleState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_message_yields_instantaneous_sample() {
        let t0 = Instant::now();
        let mut detector = IdleDetector::new(WINDOW, 8);
        detector.on_message(t0);

        let sample = detector.poll(t0 + WINDOW).unwrap();
        assert_eq!(sample.messages(), 1);
        assert!(sample.is_degenerate());
        assert!(sample.rate().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_completes_after_idle_window() {
        let broker = InMemoryBroker::new();
        let (sink, mut samples) = mpsc::unbounded_channel();

        let client = broker.connect(&address(), "bench-sub#0").await.unwrap();
        let worker = SubscribeWorker::subscribe(client, "/queue/bench", settings(5), sink)
            .await
            .unwrap();
        let mut publisher = broker.connect(&address(), "bench-pub#0").await.unwrap();

        let t0 = Instant::now();
        let subscriber = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let payload = Bytes::from_static(b"12345678");
        for i in 0..5 {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            publisher.send("/queue/bench", &payload).await.unwrap();
        }
        let last = t0 + Duration::from_millis(450);

        subscriber.await.unwrap().unwrap();
        let finished = Instant::now();
        assert!(finished >= last + WINDOW);
        assert!(finished <= last + WINDOW + Duration::from_millis(200));

        let (role, sample) = samples.recv().await.unwrap();
        assert_eq!(role, Role::Subscribe);
        assert_eq!(sample.messages(), 5);
        assert_eq!(sample.start(), t0 + Duration::from_millis(50));
        assert_eq!(sample.end(), last);
        assert_eq!(sample.duration(), Duration::from_millis(400));
        assert_eq!(broker.connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_subscriber_never_completes() {
        let broker = InMemoryBroker::new();
        let (sink, mut samples) = mpsc::unbounded_channel();
        let client = broker.connect(&address(), "bench-sub#0").await.unwrap();
        let worker = SubscribeWorker::subscribe(client, "/queue/quiet", settings(10), sink)
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(3600), worker.run()).await;
        assert!(outcome.is_err());
        assert!(samples.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed_before_first_message_fails() {
        let broker = InMemoryBroker::new();
        let (sink, _samples) = mpsc::unbounded_channel();
        let client = broker.connect(&address(), "bench-sub#3").await.unwrap();
        let worker = SubscribeWorker::subscribe(client, "/queue/bench", settings(1), sink)
            .await
            .unwrap();

        // The loopback broker drops routes by client id, so closing a second
        // session under the same id ends the stream.
        let mut other = broker.connect(&address(), "bench-sub#3").await.unwrap();
        other.close().await.unwrap();

        match worker.run().await {
            Err(BenchError::SubscriptionClosed { client_id }) => assert_eq!(client_id, "bench-sub#3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed_while_active_reports_received() {
        let broker = InMemoryBroker::new();
        let (sink, mut samples) = mpsc::unbounded_channel();
        let client = broker.connect(&address(), "bench-sub#4").await.unwrap();
        let worker = SubscribeWorker::subscribe(client, "/queue/bench", settings(3), sink)
            .await
            .unwrap();
        let mut publisher = broker.connect(&address(), "bench-pub#0").await.unwrap();

        let t0 = Instant::now();
        let subscriber = tokio::spawn(worker.run());

        let payload = Bytes::from_static(b"12345678");
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher.send("/queue/bench", &payload).await.unwrap();
        }
        let last = t0 + Duration::from_millis(150);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut other = broker.connect(&address(), "bench-sub#4").await.unwrap();
        other.close().await.unwrap();

        subscriber.await.unwrap().unwrap();
        assert!(Instant::now() >= last + WINDOW);

        let (role, sample) = samples.recv().await.unwrap();
        assert_eq!(role, Role::Subscribe);
        assert_eq!(sample.messages(), 3);
        assert_eq!(sample.start(), t0 + Duration::from_millis(50));
        assert_eq!(sample.end(), last);
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_subscriber_logs_each_poll_and_warns_once() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let broker = InMemoryBroker::new();
        let (sink, _samples) = mpsc::unbounded_channel();
        let client = broker.connect(&address(), "bench-sub#1").await.unwrap();
        let worker = SubscribeWorker::subscribe(client, "/queue/bench", settings(1), sink)
            .await
            .unwrap();

        // 20 polls at 200ms; the warning threshold is 5 windows of 600ms.
        let outcome = tokio::time::timeout(Duration::from_millis(4_100), worker.run()).await;
        assert!(outcome.is_err());

        let output = logs.contents();
        let idle_lines: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("Subscriber still idle"))
            .collect();
        assert_eq!(idle_lines.len(), 20);
        assert!(idle_lines.iter().all(|line| line.contains("bench-sub#1")));
        assert!(idle_lines[0].contains("waited=200ms"));

        let warnings: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("Subscriber has received no messages yet"))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("WARN"));
        assert!(warnings[0].contains("waited=3s"));
    }

    #[tokio::test]
    async fn test_publisher_sends_quota_and_reports() {
        let broker = InMemoryBroker::new();
        let (sink, mut samples) = mpsc::unbounded_channel();

        let mut listener = broker.connect(&address(), "bench-sub#0").await.unwrap();
        let mut subscription = listener.subscribe("/queue/bench").await.unwrap();

        let client = broker.connect(&address(), "bench-pub#0").await.unwrap();
        let worker = PublishWorker::new(client, "/queue/bench", generate_payload(32), 10, sink);
        worker.run().await.unwrap();

        let (role, sample) = samples.recv().await.unwrap();
        assert_eq!(role, Role::Publish);
        assert_eq!(sample.messages(), 10);
        assert_eq!(sample.message_size(), 32);
        assert_eq!(sample.bytes(), 320);

        for _ in 0..10 {
            assert_eq!(subscription.recv().await.unwrap().body.len(), 32);
        }
        // Publisher closed its connection.
        assert_eq!(broker.connections(), 1);
    }

    #[tokio::test]
    async fn test_publisher_delivery_failure_propagates() {
        let broker = InMemoryBroker::new();
        let (sink, mut samples) = mpsc::unbounded_channel();

        let mut client = broker.connect(&address(), "bench-pub#0").await.unwrap();
        client.close().await.unwrap();

        let worker = PublishWorker::new(client, "/queue/bench", generate_payload(8), 3, sink);
        let err = worker.run().await.unwrap_err();
        assert!(matches!(err, BenchError::Delivery { ref destination, .. } if destination == "/queue/bench"));
        assert!(samples.try_recv().is_err());
    }
}
