use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

/// Execution count and cumulative run time of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub executions: u64,
    pub total: Duration,
}

/// Point-in-time copy of the profiling counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileSnapshot {
    pub enabled: bool,
    /// Polls that advanced the cursor.
    pub ticks: u64,
    /// Wall-clock time spent in those polls.
    pub total: Duration,
    pub jobs: BTreeMap<String, JobStats>,
}

/// Tick and per-job timing counters.
///
/// Shared through `Arc` so the built-in `profiler` job can log it.
#[derive(Debug)]
pub struct Profiler {
    state: Mutex<ProfileSnapshot>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: Mutex::new(ProfileSnapshot {
                enabled,
                ..ProfileSnapshot::default()
            }),
        }
    }

    /// Set the enabled flag when `Some`, then return the current flag.
    pub fn enable(&self, enabled: Option<bool>) -> bool {
        let mut state = self.lock();
        if let Some(enabled) = enabled {
            state.enabled = enabled;
        }
        state.enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn record_job(&self, job_id: &str, elapsed: Duration) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        let stats = state.jobs.entry(job_id.to_string()).or_default();
        stats.executions += 1;
        stats.total += elapsed;
    }

    pub fn record_tick(&self, elapsed: Duration) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        state.ticks += 1;
        state.total += elapsed;
    }

    pub fn stats(&self) -> ProfileSnapshot {
        self.lock().clone()
    }

    /// Zero all counters; the enabled flag is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.ticks = 0;
        state.total = Duration::ZERO;
        state.jobs.clear();
    }

    pub fn log_stats(&self) {
        let snapshot = self.stats();
        info!(
            ticks = snapshot.ticks,
            total_ms = snapshot.total.as_secs_f64() * 1000.0,
            "profiling totals"
        );
        for (job_id, stats) in &snapshot.jobs {
            info!(
                %job_id,
                executions = stats.executions,
                total_ms = stats.total.as_secs_f64() * 1000.0,
                "profiling job"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProfileSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(true)
    }
}
