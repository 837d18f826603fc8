use conductor_core::{DeliveryStats, ExecutionResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time view of orchestrator activity.
///
/// Durations are in seconds. Averages cover the retained sample window,
/// which is bounded like the history.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub avg_queue_wait_time: f64,
    pub max_queue_wait_time: f64,
    pub avg_execution_time: f64,
    pub max_execution_time: f64,
    pub total_executions: u64,
    pub concurrent_executions: usize,
    pub peak_concurrent_executions: usize,
    pub failed_executions: u64,
    pub timeout_executions: u64,
    pub fallback_executions: u64,
    pub cancelled_executions: u64,
    pub notifier_failures: u64,
    pub history_len: usize,
    pub max_concurrent_agents: usize,
    pub delivery: DeliveryStats,
}

/// Live gauges the tracker does not own.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub concurrent: usize,
    pub peak_concurrent: usize,
    pub capacity: usize,
    pub delivery: DeliveryStats,
}

#[derive(Default)]
struct Counters {
    total: u64,
    failed: u64,
    timeouts: u64,
    fallbacks: u64,
    cancelled: u64,
}

struct TrackerInner {
    history: VecDeque<ExecutionResult>,
    queue_waits: VecDeque<Duration>,
    execution_times: VecDeque<Duration>,
    counters: Counters,
}

/// Bounded execution history plus running counters.
pub struct ExecutionTracker {
    max_history: usize,
    inner: Mutex<TrackerInner>,
    notifier_failures: Arc<AtomicU64>,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

fn avg_max(samples: &VecDeque<Duration>) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let total: f64 = samples.iter().map(Duration::as_secs_f64).sum();
    let max = samples
        .iter()
        .map(Duration::as_secs_f64)
        .fold(0.0_f64, f64::max);
    (total / samples.len() as f64, max)
}

impl ExecutionTracker {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            inner: Mutex::new(TrackerInner {
                history: VecDeque::with_capacity(max_history.min(1024)),
                queue_waits: VecDeque::new(),
                execution_times: VecDeque::new(),
                counters: Counters::default(),
            }),
            notifier_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter shared with every run reporter.
    pub fn notifier_failures(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.notifier_failures)
    }

    /// Record a finished run.
    ///
    /// `failed_attempts` counts every attempt that raised, so a run that
    /// succeeded on its second try still adds one failure.
    pub fn record(
        &self,
        result: &ExecutionResult,
        queue_wait: Duration,
        execution_time: Duration,
        failed_attempts: u32,
    ) {
        let mut inner = self.inner.lock();
        let cap = self.max_history;

        let failures = if result.success {
            u64::from(failed_attempts)
        } else {
            u64::from(failed_attempts.max(1))
        };
        inner.counters.total += 1;
        inner.counters.failed += failures;
        if result.is_timeout() {
            inner.counters.timeouts += 1;
        }
        if result.used_fallback() {
            inner.counters.fallbacks += 1;
        }
        if result.is_cancelled() {
            inner.counters.cancelled += 1;
        }

        push_bounded(&mut inner.queue_waits, queue_wait, cap);
        push_bounded(&mut inner.execution_times, execution_time, cap);
        push_bounded(&mut inner.history, result.clone(), cap);
    }

    /// Retained results, oldest first.
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn snapshot(&self, gauges: Gauges) -> StatsSnapshot {
        let inner = self.inner.lock();
        let (avg_wait, max_wait) = avg_max(&inner.queue_waits);
        let (avg_exec, max_exec) = avg_max(&inner.execution_times);
        StatsSnapshot {
            avg_queue_wait_time: avg_wait,
            max_queue_wait_time: max_wait,
            avg_execution_time: avg_exec,
            max_execution_time: max_exec,
            total_executions: inner.counters.total,
            concurrent_executions: gauges.concurrent,
            peak_concurrent_executions: gauges.peak_concurrent,
            failed_executions: inner.counters.failed,
            timeout_executions: inner.counters.timeouts,
            fallback_executions: inner.counters.fallbacks,
            cancelled_executions: inner.counters.cancelled,
            notifier_failures: self.notifier_failures.load(Ordering::Relaxed),
            history_len: inner.history.len(),
            max_concurrent_agents: gauges.capacity,
            delivery: gauges.delivery,
        }
    }
}
