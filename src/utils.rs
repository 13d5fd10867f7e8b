//! # Utility Functions
//!
//! Formatting and statistics helpers shared by the metrics model, the
//! report and the result exporters.
//!
//! ## Usage Examples
//!
//! ```rust
//! use stomp_bench::utils::*;
//!
//! assert_eq!(human_bytes(1024.0, false), "1.00 KB");
//! assert_eq!(human_bytes(1000.0, true), "1.00 kiB");
//!
//! let stats = calculate_stats(&[10.0, 20.0, 30.0]).unwrap();
//! assert_eq!(stats.mean, 20.0);
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit prefixes for binary (base-1024) formatting.
const BINARY_PREFIXES: [&str; 6] = ["K", "M", "G", "T", "P", "E"];

/// Unit prefixes for decimal (base-1000) formatting.
const DECIMAL_PREFIXES: [&str; 6] = ["k", "M", "G", "T", "P", "E"];

/// Generate a unique identifier for a benchmark run
///
/// The identifier is attached to exported results so that CSV and JSON
/// files produced by the same run can be correlated.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a byte count in a human-readable way
///
/// Binary mode scales by 1024 and uses the suffixes `KB`, `MB`, ... `EB`.
/// Decimal mode (`si = true`) scales by 1000 and uses `kiB`, `MiB`, ... `EiB`.
/// The largest unit whose scaled value is at least one is chosen; anything
/// below one base unit renders as raw bytes.
///
/// ## Precision
///
/// Every unit, including raw bytes, is printed with two decimal places so
/// that rates and totals line up in the report.
///
/// ## Examples
///
/// ```rust
/// # use stomp_bench::utils::human_bytes;
/// assert_eq!(human_bytes(1023.0, false), "1023.00 B");
/// assert_eq!(human_bytes(1536.0, false), "1.50 KB");
/// assert_eq!(human_bytes(2_500_000.0, true), "2.50 MiB");
/// ```
pub fn human_bytes(bytes: f64, si: bool) -> String {
    let (base, prefixes, suffix) = if si {
        (1000.0, &DECIMAL_PREFIXES, "iB")
    } else {
        (1024.0, &BINARY_PREFIXES, "B")
    };

    if bytes.is_nan() || bytes < base {
        return format!("{:.2} B", bytes);
    }

    // Exact powers of the base must land on the next unit, so no log().
    let mut scaled = bytes;
    let mut exponent = 0;
    while scaled >= base && exponent < prefixes.len() {
        scaled /= base;
        exponent += 1;
    }

    format!("{:.2} {}{}", scaled, prefixes[exponent - 1], suffix)
}

/// Summary statistics over a set of per-sample rates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation (divides by N).
    pub std_dev: f64,
    /// Number of values the statistics were computed from.
    pub count: usize,
}

impl std::fmt::Display for RateStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min {:.2} | avg {:.2} | max {:.2} | stddev {:.2} msgs",
            self.min, self.mean, self.max, self.std_dev
        )
    }
}

/// Calculate statistics from a slice of values
///
/// Computes min, max, arithmetic mean and the population standard
/// deviation:
///
/// σ = √(Σ(x - μ)² / N)
///
/// Returns `None` for an empty slice rather than inventing zeros.
///
/// ## Examples
///
/// ```rust
/// # use stomp_bench::utils::calculate_stats;
/// let stats = calculate_stats(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
/// assert_eq!(stats.mean, 3.0);
/// assert_eq!(stats.min, 1.0);
/// assert_eq!(stats.max, 5.0);
/// // std_dev ≈ 1.414
/// ```
pub fn calculate_stats(values: &[f64]) -> Option<RateStatistics> {
    if values.is_empty() {
        return None;
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;

    Some(RateStatistics {
        min,
        max,
        mean,
        std_dev: variance.sqrt(),
        count: values.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Boundaries of the binary and decimal unit selection
    #[test]
    fn test_human_bytes_boundaries() {
        assert_eq!(human_bytes(1023.0, false), "1023.00 B");
        assert_eq!(human_bytes(1024.0, false), "1.00 KB");
        assert_eq!(human_bytes(999.0, true), "999.00 B");
        assert_eq!(human_bytes(1000.0, true), "1.00 kiB");
        assert_eq!(human_bytes(0.0, false), "0.00 B");
    }

    #[test]
    fn test_human_bytes_larger_units() {
        assert_eq!(human_bytes(1_572_864.0, false), "1.50 MB");
        assert_eq!(human_bytes(1_073_741_824.0, false), "1.00 GB");
        assert_eq!(human_bytes(1_000_000.0, true), "1.00 MiB");
        assert_eq!(human_bytes(1e18, true), "1.00 EiB");
        // Beyond the last prefix the value keeps growing in the top unit.
        assert_eq!(human_bytes(2e21, true), "2000.00 EiB");
    }

    #[test]
    fn test_calculate_stats_known_rates() {
        let stats = calculate_stats(&[10.0, 20.0, 30.0]).unwrap();

        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
        assert!((stats.std_dev - 8.16496580927726).abs() < 1e-9);
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn test_calculate_stats_single_and_empty() {
        let stats = calculate_stats(&[42.0]).unwrap();
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.min, stats.max);

        assert!(calculate_stats(&[]).is_none());
    }

    #[test]
    fn test_rate_statistics_display() {
        let stats = calculate_stats(&[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(
            stats.to_string(),
            "min 10.00 | avg 20.00 | max 30.00 | stddev 8.16 msgs"
        );
    }

    #[test]
    fn test_generate_run_id_is_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
