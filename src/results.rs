//! Machine-readable export of a finished run: a JSON document with the
//! configuration, per-role summaries and every sample, and a flat CSV with
//! one row per sample.

use crate::{
    benchmark::BenchmarkConfig,
    metrics::{Benchmark, Role, Sample, SampleGroup},
    profiling::PhaseTiming,
    utils::RateStatistics,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::{debug, info};

/// Column order of the CSV export.
pub const CSV_HEADER: &str =
    "run_id,role,index,messages,message_size,bytes,start_offset_ms,duration_ms,rate,throughput";

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub benchmark_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkMetadata {
    pub run_id: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
}

/// Aggregate view of one role
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub samples: usize,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub duration_ms: f64,
    /// Aggregate messages per second; absent when the span is zero.
    pub rate: Option<f64>,
    /// Aggregate bytes per second; absent when the span is zero.
    pub throughput: Option<f64>,
    /// Statistics over per-sample rates, excluding instantaneous samples.
    pub statistics: Option<RateStatistics>,
}

impl GroupSummary {
    fn from_group(group: &SampleGroup) -> Option<Self> {
        let aggregate = group.aggregate()?;
        Some(Self {
            samples: group.len(),
            total_messages: group.total_messages(),
            total_bytes: group.total_bytes(),
            duration_ms: millis(&aggregate),
            rate: group.rate(),
            throughput: group.throughput(),
            statistics: group.statistics(),
        })
    }
}

/// One sample as exported
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub role: Role,
    /// 1-based position within its role, matching the report.
    pub index: usize,
    pub messages: u64,
    pub message_size: u64,
    pub bytes: u64,
    /// Start relative to the earliest sample of the run.
    pub start_offset_ms: f64,
    pub duration_ms: f64,
    pub rate: Option<f64>,
    pub throughput: Option<f64>,
}

fn millis(sample: &Sample) -> f64 {
    sample.duration().as_nanos() as f64 / 1e6
}

/// Complete results of a run
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResults {
    pub metadata: BenchmarkMetadata,
    pub test_config: BenchmarkConfig,
    pub server: String,
    pub publish: Option<GroupSummary>,
    pub subscribe: Option<GroupSummary>,
    pub samples: Vec<SampleRecord>,
    pub phases: Vec<PhaseTiming>,
}

impl BenchmarkResults {
    pub fn new(
        run_id: impl Into<String>,
        config: &BenchmarkConfig,
        benchmark: &Benchmark,
        phases: &[PhaseTiming],
    ) -> Self {
        let origin = [benchmark.publish().start(), benchmark.subscribe().start()]
            .into_iter()
            .flatten()
            .min();

        let mut samples = Vec::new();
        for role in [Role::Publish, Role::Subscribe] {
            for (i, sample) in benchmark.group(role).samples().iter().enumerate() {
                samples.push(SampleRecord::new(role, i + 1, sample, origin));
            }
        }

        Self {
            metadata: BenchmarkMetadata {
                run_id: run_id.into(),
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                system_info: SystemInfo::default(),
            },
            test_config: config.clone(),
            server: benchmark.server().to_string(),
            publish: GroupSummary::from_group(benchmark.publish()),
            subscribe: GroupSummary::from_group(benchmark.subscribe()),
            samples,
            phases: phases.to_vec(),
        }
    }
}

impl SampleRecord {
    fn new(role: Role, index: usize, sample: &Sample, origin: Option<Instant>) -> Self {
        let start_offset_ms = origin
            .map(|origin| sample.start().duration_since(origin).as_nanos() as f64 / 1e6)
            .unwrap_or(0.0);
        Self {
            role,
            index,
            messages: sample.messages(),
            message_size: sample.message_size(),
            bytes: sample.bytes(),
            start_offset_ms,
            duration_ms: millis(sample),
            rate: sample.rate(),
            throughput: sample.throughput(),
        }
    }

    fn write_csv_row(&self, run_id: &str, out: &mut impl Write) -> std::io::Result<()> {
        let optional = |value: Option<f64>| value.map(|v| format!("{:.3}", v)).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{},{:.3},{:.3},{},{}",
            run_id,
            self.role.as_str(),
            self.index,
            self.messages,
            self.message_size,
            self.bytes,
            self.start_offset_ms,
            self.duration_ms,
            optional(self.rate),
            optional(self.throughput)
        )
    }
}

/// Writes results to the configured JSON and CSV destinations
pub struct ResultsManager {
    run_id: String,
    json_file: Option<PathBuf>,
    csv_file: Option<PathBuf>,
}

impl ResultsManager {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            json_file: None,
            csv_file: None,
        }
    }

    pub fn with_json_output(mut self, path: impl AsRef<Path>) -> Self {
        self.json_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_csv_output(mut self, path: impl AsRef<Path>) -> Self {
        self.csv_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Whether any output is configured.
    pub fn is_enabled(&self) -> bool {
        self.json_file.is_some() || self.csv_file.is_some()
    }

    pub fn collect(
        &self,
        config: &BenchmarkConfig,
        benchmark: &Benchmark,
        phases: &[PhaseTiming],
    ) -> BenchmarkResults {
        BenchmarkResults::new(self.run_id.as_str(), config, benchmark, phases)
    }

    /// Write `results` to every configured destination.
    pub fn write(&self, results: &BenchmarkResults) -> Result<()> {
        if let Some(path) = &self.json_file {
            self.write_json(path, results)
                .with_context(|| format!("failed to write JSON results to {}", path.display()))?;
            info!("Results written to: {:?}", path);
        }
        if let Some(path) = &self.csv_file {
            self.write_csv(path, results)
                .with_context(|| format!("failed to write CSV samples to {}", path.display()))?;
            info!("Samples written to: {:?}", path);
        }
        Ok(())
    }

    fn write_json(&self, path: &Path, results: &BenchmarkResults) -> Result<()> {
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn write_csv(&self, path: &Path, results: &BenchmarkResults) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{}", CSV_HEADER)?;
        for record in &results.samples {
            record.write_csv_row(&self.run_id, &mut out)?;
        }
        out.flush()?;
        debug!("Wrote {} CSV rows", results.samples.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn benchmark() -> Benchmark {
        let base = Instant::now();
        let mut benchmark = Benchmark::new("127.0.0.1:61613");
        benchmark.add_sample(
            Role::Publish,
            Sample::new(1000, 100, base, base + Duration::from_secs(2)),
        );
        benchmark.add_sample(
            Role::Subscribe,
            Sample::new(1000, 100, base + Duration::from_millis(10), base + Duration::from_secs(4)),
        );
        benchmark.add_sample(
            Role::Subscribe,
            Sample::new(1, 100, base + Duration::from_millis(20), base + Duration::from_millis(20)),
        );
        benchmark
    }

    fn config() -> BenchmarkConfig {
        BenchmarkConfig::new("127.0.0.1:61613".parse().unwrap(), "/queue/bench")
    }

    #[test]
    fn test_results_collect_summaries_and_records() {
        let manager = ResultsManager::new("run-1");
        let results = manager.collect(&config(), &benchmark(), &[]);

        assert_eq!(results.metadata.run_id, "run-1");
        assert_eq!(results.server, "127.0.0.1:61613");

        let publish = results.publish.as_ref().unwrap();
        assert_eq!(publish.samples, 1);
        assert_eq!(publish.rate, Some(500.0));

        let subscribe = results.subscribe.as_ref().unwrap();
        assert_eq!(subscribe.samples, 2);
        assert_eq!(subscribe.total_messages, 1001);
        // The instantaneous sample is excluded from the statistics.
        assert_eq!(subscribe.statistics.unwrap().count, 1);

        assert_eq!(results.samples.len(), 3);
        assert_eq!(results.samples[1].role, Role::Subscribe);
        assert_eq!(results.samples[1].index, 1);
        assert_eq!(results.samples[1].start_offset_ms, 10.0);
        assert_eq!(results.samples[2].rate, None);
    }

    #[test]
    fn test_empty_benchmark_has_no_summaries() {
        let results = ResultsManager::new("run-2").collect(&config(), &Benchmark::new("x:1"), &[]);
        assert!(results.publish.is_none());
        assert!(results.subscribe.is_none());
        assert!(results.samples.is_empty());
    }

    #[test]
    fn test_write_json() {
        let file = NamedTempFile::new().unwrap();
        let manager = ResultsManager::new("run-3").with_json_output(file.path());
        assert!(manager.is_enabled());

        let results = manager.collect(&config(), &benchmark(), &[]);
        manager.write(&results).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(json["metadata"]["run_id"], "run-3");
        assert_eq!(json["test_config"]["destination"], "/queue/bench");
        assert_eq!(json["publish"]["total_messages"], 1000);
        assert_eq!(json["samples"][0]["role"], "publish");
        assert!(json["samples"][2]["rate"].is_null());
        assert!(json["metadata"]["system_info"]["cpu_cores"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_write_csv() {
        let file = NamedTempFile::new().unwrap();
        let manager = ResultsManager::new("run-4").with_csv_output(file.path());
        let results = manager.collect(&config(), &benchmark(), &[]);
        manager.write(&results).unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "run-4,publish,1,1000,100,100000,0.000,2000.000,500.000,50000.000"
        );
        assert!(lines[3].starts_with("run-4,subscribe,2,1,100,100,20.000,0.000,"));
        assert!(lines[3].ends_with(",,"));
    }

    #[test]
    fn test_disabled_manager_writes_nothing() {
        let manager = ResultsManager::new("run-5");
        assert!(!manager.is_enabled());
        let results = manager.collect(&config(), &benchmark(), &[]);
        manager.write(&results).unwrap();
    }
}
