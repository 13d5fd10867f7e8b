use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::broker::TransportKind;

/// STOMP Benchmark - measures publish and subscribe throughput of a broker
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Broker address as host:port
    #[clap(value_name = "SERVER", help_heading = "Core Options")]
    pub server: Option<String>,

    /// Destination to publish to and subscribe on
    #[clap(value_name = "QUEUE", help_heading = "Core Options")]
    pub queue: Option<String>,

    /// Number of publishers
    #[clap(short = 'p', long, visible_alias = "np", default_value_t = crate::defaults::PUBLISHERS, help_heading = "Core Options")]
    pub publishers: usize,

    /// Number of subscribers
    #[clap(short = 's', long, visible_alias = "ns", default_value_t = crate::defaults::SUBSCRIBERS, help_heading = "Core Options")]
    pub subscribers: usize,

    /// Total number of messages to publish, split between publishers
    #[clap(short = 'n', long, default_value_t = crate::defaults::MSG_COUNT, help_heading = "Core Options")]
    pub msg_count: u64,

    /// Message size in bytes
    #[clap(short = 'm', long, visible_alias = "ms", default_value_t = crate::defaults::MESSAGE_SIZE, help_heading = "Core Options")]
    pub message_size: usize,

    /// Scheduler to run the workers on
    #[clap(long, value_enum, default_value_t = RuntimeFlavor::CurrentThread)]
    pub runtime: RuntimeFlavor,

    /// Client transport
    #[clap(long, value_enum, default_value_t = TransportKind::Stomp)]
    pub transport: TransportKind,

    /// How long a subscriber must see no messages before it reports
    #[clap(long, value_parser = parse_duration, default_value = "600ms", help_heading = "Timing")]
    pub idle_window: Duration,

    /// How often subscribers check the idle window
    #[clap(long, value_parser = parse_duration, default_value = "200ms", help_heading = "Timing")]
    pub poll_interval: Duration,

    /// Abort the run if workers are still running after this long
    #[clap(long, value_parser = parse_duration, help_heading = "Timing")]
    pub run_timeout: Option<Duration>,

    /// Bound on connecting and on the broker handshake
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Timing")]
    pub connect_timeout: Duration,

    /// Socket send/receive buffer size in bytes (OS default when unset)
    #[clap(long)]
    pub buffer_size: Option<usize>,

    /// Write every sample to a CSV file
    #[clap(long, value_name = "PATH", help_heading = "Output")]
    pub csv: Option<PathBuf>,

    /// Write the full results as JSON
    #[clap(short = 'o', long, value_name = "PATH", help_heading = "Output")]
    pub output_file: Option<PathBuf>,

    /// Print phase timings after the report
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub profile: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, conflicts_with = "verbose", help_heading = "Logging")]
    pub quiet: bool,

    /// Also write logs to this file
    #[clap(long, value_name = "PATH", help_heading = "Logging")]
    pub log_file: Option<PathBuf>,
}

/// Tokio scheduler flavors
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum RuntimeFlavor {
    /// Single-threaded cooperative scheduler
    #[clap(name = "current-thread")]
    CurrentThread,

    /// Work-stealing scheduler with one worker per core
    #[clap(name = "multi-thread")]
    MultiThread,
}

impl std::fmt::Display for RuntimeFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeFlavor::CurrentThread => write!(f, "current-thread"),
            RuntimeFlavor::MultiThread => write!(f, "multi-thread"),
        }
    }
}

impl RuntimeFlavor {
    /// Build a tokio runtime of this flavor with all drivers enabled.
    pub fn build(self) -> std::io::Result<tokio::runtime::Runtime> {
        let mut builder = match self {
            RuntimeFlavor::CurrentThread => tokio::runtime::Builder::new_current_thread(),
            RuntimeFlavor::MultiThread => tokio::runtime::Builder::new_multi_thread(),
        };
        builder.enable_all().build()
    }
}

/// Parse duration from string (e.g., "600ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let nanos_per_unit = match unit {
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(Duration::from_nanos((num * nanos_per_unit).round() as u64))
}
