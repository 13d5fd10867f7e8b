//! # STOMP Benchmark Library
//!
//! Measures how fast a message broker accepts messages from publishers and
//! delivers them to subscribers on a single destination.
//!
//! ## How a Run Works
//!
//! N publishers split a fixed message budget and send identical payloads as
//! fast as their connection accepts them. M subscribers count what arrives
//! on the same destination and decide they are finished once the stream has
//! been quiet for an idle window. Every worker reports one [`Sample`]; the
//! samples of each role are aggregated into a [`SampleGroup`] that yields the
//! overall rate plus min/avg/max/stddev across workers.
//!
//! ## Architecture Overview
//!
//! - `broker`: client contract, the STOMP 1.2 client and codec, and an
//!   in-process loopback broker
//! - `worker`: publish and subscribe workers, including the idle-timeout
//!   state machine
//! - `benchmark`: configuration and the coordinator
//! - `metrics`: samples, groups and the text report
//! - `results`: JSON and CSV export
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use stomp_bench::{BenchmarkConfig, BenchmarkRunner, TransportFactory, TransportKind};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = BenchmarkConfig::new("127.0.0.1:61613".parse()?, "/queue/bench");
//!     config.publishers = 2;
//!     config.subscribers = 2;
//!
//!     let connector = TransportFactory::create(TransportKind::Stomp, config.stomp_config());
//!     let benchmark = BenchmarkRunner::new(config, connector).run().await?;
//!     print!("{}", benchmark.report());
//!     Ok(())
//! }
//! ```

/// Run coordination
///
/// Contains `BenchmarkConfig` and `BenchmarkRunner`, which connects every
/// worker, runs them to completion and collects their samples.
pub mod benchmark;

/// Messaging clients
///
/// The `Connector` and `BrokerClient` traits, the STOMP transport and the
/// loopback broker used for tests and harness-overhead measurements.
pub mod broker;

/// Command-line interface and configuration
///
/// Argument parsing with clap, including human-readable durations
/// (e.g. "600ms", "10s") and the runtime flavor selection.
pub mod cli;

pub mod error;

/// Log output: colored stderr lines and an optional log file
pub mod logging;

/// Throughput samples, per-role aggregation and the text report
pub mod metrics;

pub mod partition;

/// Wall-clock timings of the run phases
pub mod profiling;

/// Result export in JSON and CSV
pub mod results;

pub mod utils;

/// Publish and subscribe workers
pub mod worker;

pub use benchmark::{BenchmarkConfig, BenchmarkRunner};
pub use broker::{BrokerClient, Connector, ServerAddress, TransportFactory, TransportKind};
pub use cli::{Args, RuntimeFlavor};
pub use error::{BenchError, Result};
pub use metrics::{Benchmark, Role, Sample, SampleGroup};
pub use results::{BenchmarkResults, ResultsManager};

/// The current version of the STOMP benchmark
///
/// Populated from Cargo.toml and recorded in exported results.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default message size in bytes
    pub const MESSAGE_SIZE: usize = 128;

    /// Default total number of messages, split across publishers
    pub const MSG_COUNT: u64 = 100_000;

    /// Default number of publishers
    pub const PUBLISHERS: usize = 1;

    /// Default number of subscribers
    ///
    /// Publishing alone measures how fast the broker accepts messages.
    pub const SUBSCRIBERS: usize = 0;

    /// Silence after which a subscriber considers its stream finished
    ///
    /// A subscriber reports between `IDLE_WINDOW` and
    /// `IDLE_WINDOW + POLL_INTERVAL` after its last message. The reported
    /// sample itself ends at the last message.
    pub const IDLE_WINDOW: Duration = Duration::from_millis(600);

    /// How often a subscriber checks the idle window
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Bound on TCP connect plus the CONNECT/CONNECTED exchange
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Bound on the broker confirming a subscription
    pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(5);
}
