//! Timer-driven progress updates for long-running agent executions.

use crate::reporter::RunReporter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Progress estimates never claim completion before the run actually ends.
const MAX_ESTIMATED_PERCENT: f32 = 95.0;

/// Emits intermediate progress for an operation while a guard is held.
#[async_trait]
pub trait PeriodicUpdateManager: Send + Sync {
    /// Start tracking. Updates stop when the returned guard is dropped.
    fn track_operation(
        &self,
        reporter: &RunReporter,
        name: &str,
        kind: &str,
        expected_duration_ms: u64,
        description: &str,
    ) -> OperationGuard;

    /// Operations currently tracked.
    fn active_operations(&self) -> usize;

    /// Stop every tracked operation.
    async fn shutdown(&self);
}

/// Scoped handle for a tracked operation.
pub struct OperationGuard {
    token: Option<CancellationToken>,
    active: Option<Arc<AtomicUsize>>,
}

impl OperationGuard {
    /// A guard that tracks nothing.
    pub fn noop() -> Self {
        Self {
            token: None,
            active: None,
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(active) = self.active.take() {
            active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Sends an `agent_thinking` update every `interval` while an operation runs.
pub struct IntervalUpdateManager {
    interval: Duration,
    root: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl IntervalUpdateManager {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            root: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

fn estimate_percent(elapsed: Duration, expected_ms: u64) -> Option<f32> {
    if expected_ms == 0 {
        return None;
    }
    let pct = elapsed.as_millis() as f32 / expected_ms as f32 * 100.0;
    Some(pct.min(MAX_ESTIMATED_PERCENT))
}

#[async_trait]
impl PeriodicUpdateManager for IntervalUpdateManager {
    fn track_operation(
        &self,
        reporter: &RunReporter,
        name: &str,
        kind: &str,
        expected_duration_ms: u64,
        description: &str,
    ) -> OperationGuard {
        if self.root.is_cancelled() {
            return OperationGuard::noop();
        }

        let token = self.root.child_token();
        self.active.fetch_add(1, Ordering::SeqCst);

        let reporter = reporter.clone();
        let cancelled = token.clone();
        let interval = self.interval;
        let label = format!("{description} ({kind}: {name})");
        tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = tokio::time::interval_at(start + interval, interval);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let elapsed = start.elapsed();
                        reporter
                            .progress(
                                format!("{label} still running after {}s", elapsed.as_secs()),
                                None,
                                estimate_percent(elapsed, expected_duration_ms),
                            )
                            .await;
                    }
                }
            }
            debug!(operation = %label, "Periodic updates stopped");
        });

        OperationGuard {
            token: Some(token),
            active: Some(Arc::clone(&self.active)),
        }
    }

    fn active_operations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.root.cancel();
    }
}
