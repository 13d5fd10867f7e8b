//! Wall-clock phase timings for `--profile`.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

fn millis(value: Duration) -> f64 {
    value.as_nanos() as f64 / 1e6
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(millis(*value))
}

/// One completed phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub name: &'static str,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Splits a run into consecutive phases
///
/// Every call to [`PhaseTimer::phase`] closes the phase that began at the
/// previous call (or at construction). A disabled timer records nothing.
#[derive(Debug)]
pub struct PhaseTimer {
    enabled: bool,
    mark: Instant,
    phases: Vec<PhaseTiming>,
}

impl PhaseTimer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            mark: Instant::now(),
            phases: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Close the current phase under `name` and start the next one.
    pub fn phase(&mut self, name: &'static str) {
        let now = Instant::now();
        if self.enabled {
            self.phases.push(PhaseTiming {
                name,
                elapsed: now.duration_since(self.mark),
            });
        }
        self.mark = now;
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|p| p.elapsed).sum()
    }
}

impl fmt::Display for PhaseTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total();
        writeln!(f, "== Profile ==")?;
        for phase in &self.phases {
            let share = if total.is_zero() {
                0.0
            } else {
                phase.elapsed.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            writeln!(
                f,
                " {:<10} {:>12.3} ms  ({:>5.1}%)",
                phase.name,
                millis(phase.elapsed),
                share
            )?;
        }
        write!(f, " {:<10} {:>12.3} ms", "total", millis(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_phases_are_consecutive() {
        let mut timer = PhaseTimer::new(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        timer.phase("connect");
        tokio::time::sleep(Duration::from_millis(70)).await;
        timer.phase("run");

        let phases = timer.phases();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].name, "connect");
        assert_eq!(phases[0].elapsed, Duration::from_millis(30));
        assert_eq!(phases[1].elapsed, Duration::from_millis(70));
        assert_eq!(timer.total(), Duration::from_millis(100));

        let report = timer.to_string();
        assert!(report.starts_with("== Profile =="));
        assert!(report.contains("connect"));
        assert!(report.contains("( 30.0%)"));
        assert!(report.contains("100.000 ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timer_records_nothing() {
        let mut timer = PhaseTimer::disabled();
        tokio::time::sleep(Duration::from_millis(5)).await;
        timer.phase("connect");
        assert!(!timer.is_enabled());
        assert!(timer.phases().is_empty());
        assert_eq!(timer.total(), Duration::ZERO);
    }

    #[test]
    fn test_phase_serializes_in_millis() {
        let phase = PhaseTiming {
            name: "run",
            elapsed: Duration::from_micros(1500),
        };
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(json["name"], "run");
        assert_eq!(json["elapsed_ms"], 1.5);
    }
}
