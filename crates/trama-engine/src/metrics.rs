//! Observability metrics for the evaluation engine.
//!
//! This module provides Prometheus-compatible metrics for monitoring
//! the scheduler loops and graph workers. Metrics are designed to support:
//!
//! - **Alerting**: SLO-based alerts on tick failures and queue depth
//! - **Dashboards**: Real-time visibility into scheduler health
//! - **Debugging**: Correlating metrics with traces for root cause analysis
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `trama_scheduler_ticks_total` | Counter | `scheduler`, `outcome` | Scheduler tick outcomes |
//! | `trama_scheduler_tick_duration_seconds` | Histogram | `scheduler` | Tick processing time |
//! | `trama_jobs_enqueued_total` | Counter | `scheduler`, `result` | Job enqueue attempts |
//! | `trama_queue_depth` | Gauge | `queue` | Jobs waiting in a work queue |
//! | `trama_nodes_evaluated_total` | Counter | `outcome` | Node evaluation outcomes |
//! | `trama_nodes_dirty` | Gauge | - | Nodes awaiting evaluation |
//! | `trama_events_imported_total` | Counter | `source` | Imported events appended |
//! | `trama_field_operations_total` | Counter | `type` | Field operations recorded |
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade. To export to Prometheus:
//!
//! ```rust,ignore
//! use metrics_exporter_prometheus::PrometheusBuilder;
//!
//! PrometheusBuilder::new()
//!     .with_http_listener(([0, 0, 0, 0], 9090))
//!     .install()
//!     .expect("failed to install Prometheus recorder");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Scheduler tick outcomes.
    pub const SCHEDULER_TICKS_TOTAL: &str = "trama_scheduler_ticks_total";
    /// Histogram: Scheduler tick processing time in seconds.
    pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "trama_scheduler_tick_duration_seconds";
    /// Counter: Job enqueue attempts by result.
    pub const JOBS_ENQUEUED_TOTAL: &str = "trama_jobs_enqueued_total";
    /// Gauge: Jobs waiting in a work queue.
    pub const QUEUE_DEPTH: &str = "trama_queue_depth";
    /// Counter: Node evaluation outcomes.
    pub const NODES_EVALUATED_TOTAL: &str = "trama_nodes_evaluated_total";
    /// Gauge: Nodes awaiting evaluation.
    pub const NODES_DIRTY: &str = "trama_nodes_dirty";
    /// Counter: Imported events appended to the ledger.
    pub const EVENTS_IMPORTED_TOTAL: &str = "trama_events_imported_total";
    /// Counter: Field operations recorded.
    pub const FIELD_OPERATIONS_TOTAL: &str = "trama_field_operations_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Scheduler name (events-processor, field-ops-analyzer, evaluator).
    pub const SCHEDULER: &str = "scheduler";
    /// Tick outcome (completed, lock_held, skipped_busy, failed).
    pub const OUTCOME: &str = "outcome";
    /// Enqueue result (enqueued, deduplicated).
    pub const RESULT: &str = "result";
    /// Queue name.
    pub const QUEUE: &str = "queue";
    /// Event source system.
    pub const SOURCE: &str = "source";
    /// Field operation type (create, update, delete).
    pub const OPERATION_TYPE: &str = "type";
}

/// High-level interface for recording engine metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    _private: (),
}

impl EngineMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a scheduler tick outcome.
    pub fn record_tick(&self, scheduler: &str, outcome: &str) {
        counter!(
            names::SCHEDULER_TICKS_TOTAL,
            labels::SCHEDULER => scheduler.to_string(),
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records scheduler tick duration.
    pub fn observe_tick_duration(&self, scheduler: &str, duration: Duration) {
        histogram!(
            names::SCHEDULER_TICK_DURATION_SECONDS,
            labels::SCHEDULER => scheduler.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a job enqueue attempt.
    pub fn record_enqueue(&self, scheduler: &str, result: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            labels::SCHEDULER => scheduler.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Sets the work-queue depth gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        gauge!(
            names::QUEUE_DEPTH,
            labels::QUEUE => queue.to_string(),
        )
        .set(depth as f64);
    }

    /// Records a node evaluation outcome.
    pub fn record_evaluation(&self, outcome: &str) {
        counter!(
            names::NODES_EVALUATED_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Sets the dirty-node gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_dirty_nodes(&self, count: usize) {
        gauge!(names::NODES_DIRTY).set(count as f64);
    }

    /// Records an imported event append.
    pub fn record_event_imported(&self, source: &str) {
        counter!(
            names::EVENTS_IMPORTED_TOTAL,
            labels::SOURCE => source.to_string(),
        )
        .increment(1);
    }

    /// Records a field operation append.
    pub fn record_field_operation(&self, op_type: &str) {
        counter!(
            names::FIELD_OPERATIONS_TOTAL,
            labels::OPERATION_TYPE => op_type.to_string(),
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use trama_engine::metrics::{EngineMetrics, TimingGuard};
///
/// let metrics = EngineMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_tick_duration("evaluator", duration);
///     });
///
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
