//! # Benchmark Engine Module
//!
//! Orchestrates a single publish/subscribe run against one destination.
//!
//! ## Run Lifecycle
//!
//! 1. **Connect**: open every subscriber connection, then every publisher
//!    connection. Any failure aborts the run before a message is sent.
//! 2. **Subscribe**: every subscriber registers on the destination. The
//!    broker has confirmed each subscription before publishing starts.
//! 3. **Run**: publishers and subscribers execute as tasks in one
//!    [`JoinSet`]. The first worker error aborts the others.
//! 4. **Collect**: the samples reported by the workers are folded into a
//!    [`Benchmark`] in completion order.
//!
//! ## Message Budget
//!
//! Publishers split the total with [`partition`], so their quotas always add
//! up to the requested count. Subscribers are told `total / subscribers`;
//! the remainder is not assigned to anyone. What a subscriber actually
//! receives depends on the broker (queue or topic semantics), and the count
//! is only compared against that share to flag surprises in the log.

use crate::{
    broker::{BrokerClient, Connector, ServerAddress, StompConfig, TransportKind},
    cli::{Args, RuntimeFlavor},
    error::BenchError,
    metrics::Benchmark,
    partition::partition,
    profiling::PhaseTimer,
    worker::{generate_payload, PublishWorker, SubscribeWorker, SubscriberSettings},
};
use anyhow::{anyhow, bail, Context, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for benchmark execution
///
/// Built from the command line with [`BenchmarkConfig::from_args`] or
/// programmatically with [`BenchmarkConfig::new`] and field updates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Broker endpoint
    pub server: ServerAddress,

    /// Destination every worker publishes to or subscribes on
    pub destination: String,

    /// Number of publishing workers
    pub publishers: usize,

    /// Number of subscribing workers
    pub subscribers: usize,

    /// Total messages sent across all publishers
    pub msg_count: u64,

    /// Payload size in bytes
    pub message_size: usize,

    /// Client transport
    pub transport: TransportKind,

    /// Scheduler the run executes on. Recorded for the results; the caller
    /// builds the runtime.
    pub runtime: RuntimeFlavor,

    /// Quiet period after which a subscriber reports
    pub idle_window: Duration,

    /// How often subscribers check the idle window
    pub poll_interval: Duration,

    /// Optional bound on the whole run once workers are started
    pub run_timeout: Option<Duration>,

    /// Bound on each connection handshake
    pub connect_timeout: Duration,

    /// Socket buffer size for TCP transports
    pub buffer_size: Option<usize>,
}

impl BenchmarkConfig {
    /// Configuration with every tunable at its default.
    pub fn new(server: ServerAddress, destination: impl Into<String>) -> Self {
        Self {
            server,
            destination: destination.into(),
            publishers: crate::defaults::PUBLISHERS,
            subscribers: crate::defaults::SUBSCRIBERS,
            msg_count: crate::defaults::MSG_COUNT,
            message_size: crate::defaults::MESSAGE_SIZE,
            transport: TransportKind::Stomp,
            runtime: RuntimeFlavor::CurrentThread,
            idle_window: crate::defaults::IDLE_WINDOW,
            poll_interval: crate::defaults::POLL_INTERVAL,
            run_timeout: None,
            connect_timeout: crate::defaults::CONNECT_TIMEOUT,
            buffer_size: None,
        }
    }

    /// Create benchmark configuration from CLI arguments
    ///
    /// Returns `Ok(None)` when the server or the destination is missing,
    /// in which case there is nothing to run.
    ///
    /// ## Validation
    /// - The server must parse as `host:port`
    /// - The destination must not be empty
    /// - The poll interval must be non-zero
    pub fn from_args(args: &Args) -> Result<Option<Self>> {
        let (Some(server), Some(queue)) = (args.server.as_deref(), args.queue.as_deref()) else {
            return Ok(None);
        };

        let server: ServerAddress = server.parse()?;
        let config = Self {
            publishers: args.publishers,
            subscribers: args.subscribers,
            msg_count: args.msg_count,
            message_size: args.message_size,
            transport: args.transport,
            runtime: args.runtime,
            idle_window: args.idle_window,
            poll_interval: args.poll_interval,
            run_timeout: args.run_timeout,
            connect_timeout: args.connect_timeout,
            buffer_size: args.buffer_size,
            ..Self::new(server, queue)
        };
        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> Result<()> {
        if self.destination.is_empty() {
            bail!("destination must not be empty");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        if self.publishers == 0 && self.subscribers > 0 {
            warn!("No publishers configured; subscribers will wait until the run is cancelled");
        }
        Ok(())
    }

    /// Messages each subscriber is nominally expected to receive.
    pub fn subscriber_share(&self) -> u64 {
        match self.subscribers {
            0 => 0,
            n => self.msg_count / n as u64,
        }
    }

    pub fn stomp_config(&self) -> StompConfig {
        StompConfig {
            connect_timeout: self.connect_timeout,
            buffer_size: self.buffer_size,
            ..StompConfig::default()
        }
    }

    fn subscriber_settings(&self) -> SubscriberSettings {
        SubscriberSettings {
            message_size: self.message_size as u64,
            idle_window: self.idle_window,
            poll_interval: self.poll_interval,
            expected: self.subscriber_share(),
        }
    }
}

impl fmt::Display for BenchmarkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting STOMP Benchmark against: {}", self.server)?;
        writeln!(f, "  Destination:        {}", self.destination)?;
        writeln!(f, "  Transport:          {}", self.transport)?;
        writeln!(f, "  Runtime:            {}", self.runtime)?;
        writeln!(f, "  Publishers:         {}", self.publishers)?;
        writeln!(f, "  Subscribers:        {}", self.subscribers)?;
        writeln!(f, "  Message Count:      {}", self.msg_count)?;
        writeln!(f, "  Message Size:       {} bytes", self.message_size)?;
        writeln!(f, "  Idle Window:        {:?}", self.idle_window)?;
        writeln!(f, "  Poll Interval:      {:?}", self.poll_interval)?;
        match self.run_timeout {
            Some(deadline) => writeln!(f, "  Run Timeout:        {:?}", deadline)?,
            None => writeln!(f, "  Run Timeout:        none")?,
        }
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Benchmark runner that coordinates connections, workers and collection
///
/// ```rust,no_run
/// # use stomp_bench::benchmark::{BenchmarkConfig, BenchmarkRunner};
/// # use stomp_bench::broker::InMemoryBroker;
/// # use std::sync::Arc;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let mut config = BenchmarkConfig::new("127.0.0.1:61613".parse()?, "/queue/bench");
/// config.subscribers = 1;
/// let runner = BenchmarkRunner::new(config, Arc::new(InMemoryBroker::new()));
/// let benchmark = runner.run().await?;
/// println!("{}", benchmark.report());
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    connector: Arc<dyn Connector>,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run the benchmark and return the collected samples.
    pub async fn run(&self) -> Result<Benchmark> {
        self.run_profiled(&mut PhaseTimer::disabled()).await
    }

    /// Run the benchmark, recording the duration of each phase in `timer`.
    ///
    /// ## Errors
    /// - Connection and subscription failures abort before any worker starts
    /// - The first worker error aborts the remaining workers
    /// - [`BenchError::Stalled`] when the run timeout elapses
    pub async fn run_profiled(&self, timer: &mut PhaseTimer) -> Result<Benchmark> {
        let config = &self.config;
        info!("\n{}", config);

        let subscriber_clients = self
            .connect_all("bench-sub", config.subscribers)
            .await
            .context("failed to connect subscribers")?;
        let publisher_clients = self
            .connect_all("bench-pub", config.publishers)
            .await
            .context("failed to connect publishers")?;
        info!(
            "Connected {} subscriber(s) and {} publisher(s) via {}",
            subscriber_clients.len(),
            publisher_clients.len(),
            self.connector.name()
        );
        timer.phase("connect");

        let (sink, mut samples) = mpsc::unbounded_channel();

        if config.subscribers > 0 {
            info!(
                "Each subscriber expects {} of {} messages",
                config.subscriber_share(),
                config.msg_count
            );
        }
        let settings = config.subscriber_settings();
        let subscribers = try_join_all(subscriber_clients.into_iter().map(|client| {
            SubscribeWorker::subscribe(client, &config.destination, settings, sink.clone())
        }))
        .await
        .context("failed to subscribe")?;
        timer.phase("subscribe");

        let mut workers = JoinSet::new();
        for worker in subscribers {
            workers.spawn(worker.run());
        }

        let quotas = partition(config.msg_count, config.publishers);
        for (client, quota) in publisher_clients.into_iter().zip(quotas) {
            debug!(client_id = client.client_id(), quota, "Starting publisher");
            let payload = generate_payload(config.message_size);
            let worker =
                PublishWorker::new(client, config.destination.as_str(), payload, quota, sink.clone());
            workers.spawn(worker.run());
        }
        drop(sink);

        match config.run_timeout {
            None => join_workers(&mut workers).await?,
            Some(deadline) => {
                match tokio::time::timeout(deadline, join_workers(&mut workers)).await {
                    Ok(joined) => joined?,
                    Err(_) => {
                        let pending = workers.len();
                        workers.abort_all();
                        return Err(BenchError::Stalled { pending, deadline }.into());
                    }
                }
            }
        }
        timer.phase("run");

        let mut benchmark = Benchmark::new(config.server.to_string());
        while let Ok((role, sample)) = samples.try_recv() {
            benchmark.add_sample(role, sample);
        }
        timer.phase("collect");

        Ok(benchmark)
    }

    async fn connect_all(
        &self,
        prefix: &str,
        count: usize,
    ) -> std::result::Result<Vec<Box<dyn BrokerClient>>, BenchError> {
        let connector = self.connector.as_ref();
        let address = &self.config.server;
        try_join_all((0..count).map(|i| {
            let client_id = format!("{}#{}", prefix, i);
            async move { connector.connect(address, &client_id).await }
        }))
        .await
    }
}

/// Join every worker, aborting the rest on the first failure.
async fn join_workers(workers: &mut JoinSet<std::result::Result<(), BenchError>>) -> Result<()> {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                workers.abort_all();
                return Err(e.into());
            }
            Err(e) if e.is_panic() => {
                workers.abort_all();
                std::panic::resume_unwind(e.into_panic());
            }
            Err(e) => {
                workers.abort_all();
                return Err(anyhow!("worker task failed: {}", e));
            }
        }
    }
    Ok(())
}
