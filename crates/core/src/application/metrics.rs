// Runtime metrics recorder
//
// Counters are process-local and live as long as the manager.

use super::constants::THROUGHPUT_WINDOW;
use crate::domain::QueueMetrics;
use crate::sync::lock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct MetricsState {
    total_jobs: u64,
    completed_jobs: u64,
    failed_jobs: u64,
    pending_jobs: u64,
    processing_jobs: u64,
    average_processing_time: f64,
    queue_size: BTreeMap<String, u64>,
    error_rate: f64,
    /// Completion timestamps (ms) inside the throughput window
    completions: VecDeque<i64>,
}

impl MetricsState {
    fn recompute_error_rate(&mut self) {
        let finished = self.completed_jobs + self.failed_jobs;
        self.error_rate = if finished > 0 {
            self.failed_jobs as f64 / finished as f64
        } else {
            0.0
        };
    }

    fn prune(&mut self, now_ms: i64, window_ms: i64) {
        while let Some(&oldest) = self.completions.front() {
            if now_ms - oldest < window_ms {
                break;
            }
            self.completions.pop_front();
        }
    }
}

/// Counters behind a single mutex. A poisoned lock is recovered so the
/// last-known values stay readable.
#[derive(Debug)]
pub struct MetricsRecorder {
    state: Mutex<MetricsState>,
    window: Duration,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::with_window(THROUGHPUT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            state: Mutex::new(MetricsState::default()),
            window,
        }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX).max(1)
    }

    /// A job was accepted by the engine
    pub fn record_submitted(&self, queue: &str) {
        let mut state = lock(&self.state);
        state.total_jobs += 1;
        state.pending_jobs += 1;
        *state.queue_size.entry(queue.to_string()).or_insert(0) += 1;
    }

    /// A handler is about to run
    pub fn record_started(&self) {
        let mut state = lock(&self.state);
        state.pending_jobs = state.pending_jobs.saturating_sub(1);
        state.processing_jobs += 1;
    }

    /// A handler finished successfully after `elapsed_ms`
    pub fn record_completed(&self, queue: &str, elapsed_ms: f64, now_ms: i64) {
        let window_ms = self.window_ms();
        let mut state = lock(&self.state);
        state.processing_jobs = state.processing_jobs.saturating_sub(1);
        state.completed_jobs += 1;

        let n = state.completed_jobs as f64;
        state.average_processing_time = (state.average_processing_time * (n - 1.0) + elapsed_ms) / n;

        let size = state.queue_size.entry(queue.to_string()).or_insert(0);
        *size = size.saturating_sub(1);

        state.recompute_error_rate();
        state.completions.push_back(now_ms);
        state.prune(now_ms, window_ms);
    }

    /// A handler returned an error or panicked
    pub fn record_failed(&self) {
        let mut state = lock(&self.state);
        state.processing_jobs = state.processing_jobs.saturating_sub(1);
        state.failed_jobs += 1;
        state.recompute_error_rate();
    }

    pub fn error_rate(&self) -> f64 {
        lock(&self.state).error_rate
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self, now_ms: i64) -> QueueMetrics {
        let window_ms = self.window_ms();
        let mut state = lock(&self.state);
        state.prune(now_ms, window_ms);

        let window_secs = window_ms as f64 / 1000.0;
        QueueMetrics {
            total_jobs: state.total_jobs,
            completed_jobs: state.completed_jobs,
            failed_jobs: state.failed_jobs,
            pending_jobs: state.pending_jobs,
            processing_jobs: state.processing_jobs,
            average_processing_time: state.average_processing_time,
            queue_size: state.queue_size.clone(),
            error_rate: state.error_rate,
            throughput: state.completions.len() as f64 / window_secs,
        }
    }
}
