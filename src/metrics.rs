//! Throughput samples and their aggregation.
//!
//! A [`Sample`] is one worker's finished measurement. A [`SampleGroup`]
//! collects the samples of one [`Role`] and derives both an aggregate rate
//! (summed counts over the widest time interval) and cross-sample statistics
//! over the individual rates. A [`Benchmark`] owns one group per role and
//! renders the final report.
//!
//! ## Degenerate samples
//!
//! A sample whose start and end coincide has no meaningful rate. Such a
//! sample reports `None` from [`Sample::rate`] / [`Sample::throughput`],
//! displays as `instantaneous`, and is left out of the min/max/mean/stddev
//! statistics. Its messages and bytes still count toward the group totals.

use crate::utils::{calculate_stats, human_bytes, RateStatistics};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Which side of the broker a sample was measured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publish,
    Subscribe,
}

impl Role {
    /// Lowercase name used in exported results.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Publish => "publish",
            Role::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publish => write!(f, "Publish"),
            Role::Subscribe => write!(f, "Subscribe"),
        }
    }
}

/// One worker's measurement: how many messages of which size moved between
/// two instants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    messages: u64,
    message_size: u64,
    bytes: u64,
    start: Instant,
    end: Instant,
}

impl Sample {
    /// Create a sample. An `end` earlier than `start` is clamped to `start`.
    pub fn new(messages: u64, message_size: u64, start: Instant, end: Instant) -> Self {
        Self {
            messages,
            message_size,
            bytes: messages.saturating_mul(message_size),
            start,
            end: end.max(start),
        }
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn message_size(&self) -> u64 {
        self.message_size
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end.duration_since(self.start)
    }

    /// True when the sample spans no time at all.
    pub fn is_degenerate(&self) -> bool {
        self.duration().is_zero()
    }

    /// Messages per second, or `None` for a degenerate sample.
    pub fn rate(&self) -> Option<f64> {
        self.per_second(self.messages)
    }

    /// Bytes per second, or `None` for a degenerate sample.
    pub fn throughput(&self) -> Option<f64> {
        self.per_second(self.bytes)
    }

    fn per_second(&self, amount: u64) -> Option<f64> {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            Some(amount as f64 / secs)
        } else {
            None
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.rate(), self.throughput()) {
            (Some(rate), Some(throughput)) => write!(
                f,
                "{:.2} msgs/sec ~ {}/sec",
                rate,
                human_bytes(throughput, false)
            ),
            _ => write!(f, "instantaneous"),
        }
    }
}

/// Aggregator for the samples of one role
///
/// [`add`](Self::add) keeps running totals so it never rescans earlier
/// samples; the rate statistics scan the stored samples, which number one
/// per worker.
#[derive(Debug, Clone, Default)]
pub struct SampleGroup {
    samples: Vec<Sample>,
    total_messages: u64,
    total_bytes: u64,
    bounds: Option<(Instant, Instant)>,
}

impl SampleGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, widening the group interval if needed.
    pub fn add(&mut self, sample: Sample) {
        self.total_messages = self.total_messages.saturating_add(sample.messages);
        self.total_bytes = self.total_bytes.saturating_add(sample.bytes);
        self.bounds = Some(match self.bounds {
            None => (sample.start, sample.end),
            Some((start, end)) => (start.min(sample.start), end.max(sample.end)),
        });
        self.samples.push(sample);
    }

    /// Samples in arrival order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Earliest sample start, once a sample has been added.
    pub fn start(&self) -> Option<Instant> {
        self.bounds.map(|(start, _)| start)
    }

    /// Latest sample end, once a sample has been added.
    pub fn end(&self) -> Option<Instant> {
        self.bounds.map(|(_, end)| end)
    }

    /// The whole group viewed as a single sample: summed messages and bytes
    /// over `[min start, max end]`.
    pub fn aggregate(&self) -> Option<Sample> {
        let (start, end) = self.bounds?;
        let message_size = self.samples.first().map_or(0, Sample::message_size);
        Some(Sample {
            messages: self.total_messages,
            message_size,
            bytes: self.total_bytes,
            start,
            end,
        })
    }

    /// Aggregate messages per second across the group.
    pub fn rate(&self) -> Option<f64> {
        self.aggregate()?.rate()
    }

    /// Aggregate bytes per second across the group.
    pub fn throughput(&self) -> Option<f64> {
        self.aggregate()?.throughput()
    }

    /// Rates of the non-degenerate samples, in arrival order.
    fn rates(&self) -> Vec<f64> {
        self.samples.iter().filter_map(Sample::rate).collect()
    }

    /// Min/max/mean/stddev over the individual sample rates.
    ///
    /// `None` when the group is empty or every sample is degenerate.
    pub fn statistics(&self) -> Option<RateStatistics> {
        calculate_stats(&self.rates())
    }

    pub fn min_rate(&self) -> Option<f64> {
        self.statistics().map(|s| s.min)
    }

    pub fn max_rate(&self) -> Option<f64> {
        self.statistics().map(|s| s.max)
    }

    pub fn mean_rate(&self) -> Option<f64> {
        self.statistics().map(|s| s.mean)
    }

    pub fn stddev_rate(&self) -> Option<f64> {
        self.statistics().map(|s| s.std_dev)
    }

    fn write_section(&self, role: Role, out: &mut String) -> fmt::Result {
        use std::fmt::Write;

        writeln!(out)?;
        writeln!(out, " {}:", role)?;
        for (i, sample) in self.samples.iter().enumerate() {
            writeln!(out, "  [{}] {} ({} msgs)", i + 1, sample, sample.messages)?;
        }

        writeln!(out, "  Totals:")?;
        if let Some(aggregate) = self.aggregate() {
            writeln!(out, "   {} ({} msgs)", aggregate, self.total_messages)?;
        }
        match self.statistics() {
            Some(stats) => writeln!(out, "   {}", stats),
            None => writeln!(out, "   statistics unavailable (all samples instantaneous)"),
        }
    }
}

/// Results of one benchmark run: a sample group per role
#[derive(Debug, Clone)]
pub struct Benchmark {
    server: String,
    publish: SampleGroup,
    subscribe: SampleGroup,
}

impl Benchmark {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            publish: SampleGroup::new(),
            subscribe: SampleGroup::new(),
        }
    }

    /// Route a sample to the group of its role.
    pub fn add_sample(&mut self, role: Role, sample: Sample) {
        self.group_mut(role).add(sample);
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn group(&self, role: Role) -> &SampleGroup {
        match role {
            Role::Publish => &self.publish,
            Role::Subscribe => &self.subscribe,
        }
    }

    fn group_mut(&mut self, role: Role) -> &mut SampleGroup {
        match role {
            Role::Publish => &mut self.publish,
            Role::Subscribe => &mut self.subscribe,
        }
    }

    pub fn publish(&self) -> &SampleGroup {
        &self.publish
    }

    pub fn subscribe(&self) -> &SampleGroup {
        &self.subscribe
    }

    /// Human-readable report. Roles without samples are omitted.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("== STOMP Benchmark ==\n");
        out.push_str(&format!(" Testing against: {}\n", self.server));

        for role in [Role::Publish, Role::Subscribe] {
            let group = self.group(role);
            if !group.is_empty() {
                // Writing into a String cannot fail.
                let _ = group.write_section(role, &mut out);
            }
        }
        out
    }
}
