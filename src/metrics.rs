//! Process-wide Prometheus metrics.
//!
//! No labels on the bus/pool gauges by design (avoid high-cardinality early); per-worker
//! counters are labeled by worker name, which is low-cardinality and operator-chosen.

use crate::error::AppResult;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "metrics")]
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

#[derive(Debug)]
pub struct PipelineMetrics {
    /// Bus published/dropped totals observed on the last `set_bus_stats` call, so the
    /// monotonic Prometheus counters can be advanced by the delta instead of re-set.
    last_bus_published: AtomicU64,
    last_bus_dropped: AtomicU64,

    #[cfg(feature = "metrics")]
    registry: Registry,

    #[cfg(feature = "metrics")]
    pub bus_published_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub bus_dropped_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub bus_queue_depth: IntGauge,

    #[cfg(feature = "metrics")]
    pub rows_applied_total: IntCounterVec,
    #[cfg(feature = "metrics")]
    pub rows_filtered_total: IntCounterVec,
    #[cfg(feature = "metrics")]
    pub rows_errored_total: IntCounterVec,

    #[cfg(feature = "metrics")]
    pub batch_flush_seconds: Histogram,
    #[cfg(feature = "metrics")]
    pub batch_rows: Histogram,

    #[cfg(feature = "metrics")]
    pub reconnects_total: IntCounterVec,

    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl PipelineMetrics {
    pub fn new() -> AppResult<Self> {
        #[cfg(feature = "metrics")]
        {
            let registry = Registry::new();

            let bus_published_total = IntCounter::with_opts(Opts::new(
                "quillcdc_bus_published_total",
                "Messages published onto the bus",
            ))?;
            let bus_dropped_total = IntCounter::with_opts(Opts::new(
                "quillcdc_bus_dropped_total",
                "Messages dropped because a subscriber queue was full",
            ))?;
            let bus_queue_depth = IntGauge::with_opts(Opts::new(
                "quillcdc_bus_queue_depth",
                "Approximate current total queue depth across subscribers",
            ))?;

            let rows_applied_total = IntCounterVec::new(
                Opts::new("quillcdc_rows_applied_total", "Rows applied to a target table"),
                &["target", "table"],
            )?;
            let rows_filtered_total = IntCounterVec::new(
                Opts::new("quillcdc_rows_filtered_total", "Rows dropped by a mapping filter"),
                &["target", "table"],
            )?;
            let rows_errored_total = IntCounterVec::new(
                Opts::new("quillcdc_rows_errored_total", "Rows dropped due to schema/transform errors"),
                &["target", "table"],
            )?;

            let batch_flush_seconds = Histogram::with_opts(HistogramOpts::new(
                "quillcdc_batch_flush_seconds",
                "Time spent executing a batch upsert",
            ))?;
            let batch_rows = Histogram::with_opts(HistogramOpts::new(
                "quillcdc_batch_rows",
                "Rows per batch flush",
            ))?;

            let reconnects_total = IntCounterVec::new(
                Opts::new("quillcdc_reconnects_total", "Connection pool reconnect attempts"),
                &["connection"],
            )?;

            registry.register(Box::new(bus_published_total.clone()))?;
            registry.register(Box::new(bus_dropped_total.clone()))?;
            registry.register(Box::new(bus_queue_depth.clone()))?;
            registry.register(Box::new(rows_applied_total.clone()))?;
            registry.register(Box::new(rows_filtered_total.clone()))?;
            registry.register(Box::new(rows_errored_total.clone()))?;
            registry.register(Box::new(batch_flush_seconds.clone()))?;
            registry.register(Box::new(batch_rows.clone()))?;
            registry.register(Box::new(reconnects_total.clone()))?;

            Ok(Self {
                last_bus_published: AtomicU64::new(0),
                last_bus_dropped: AtomicU64::new(0),
                registry,
                bus_published_total,
                bus_dropped_total,
                bus_queue_depth,
                rows_applied_total,
                rows_filtered_total,
                rows_errored_total,
                batch_flush_seconds,
                batch_rows,
                reconnects_total,
            })
        }

        #[cfg(not(feature = "metrics"))]
        {
            Ok(Self {
                last_bus_published: AtomicU64::new(0),
                last_bus_dropped: AtomicU64::new(0),
                _noop: (),
            })
        }
    }

    #[cfg(feature = "metrics")]
    pub fn encode_text(&self) -> AppResult<String> {
        use prometheus::{Encoder, TextEncoder};
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&mf, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn encode_text(&self) -> AppResult<String> {
        Ok(String::new())
    }

    #[inline]
    pub fn inc_applied(&self, _target: &str, _table: &str) {
        #[cfg(feature = "metrics")]
        self.rows_applied_total.with_label_values(&[_target, _table]).inc();
    }

    #[inline]
    pub fn inc_filtered(&self, _target: &str, _table: &str) {
        #[cfg(feature = "metrics")]
        self.rows_filtered_total.with_label_values(&[_target, _table]).inc();
    }

    #[inline]
    pub fn inc_errored(&self, _target: &str, _table: &str) {
        #[cfg(feature = "metrics")]
        self.rows_errored_total.with_label_values(&[_target, _table]).inc();
    }

    #[inline]
    pub fn observe_flush(&self, _seconds: f64, _rows: usize) {
        #[cfg(feature = "metrics")]
        {
            self.batch_flush_seconds.observe(_seconds);
            self.batch_rows.observe(_rows as f64);
        }
    }

    #[inline]
    pub fn inc_reconnect(&self, _connection: &str) {
        #[cfg(feature = "metrics")]
        self.reconnects_total.with_label_values(&[_connection]).inc();
    }

    /// Advances the published/dropped counters by however much the bus's running totals
    /// grew since the last call, and sets the queue-depth gauge outright.
    #[inline]
    pub fn set_bus_stats(&self, published: u64, dropped: u64, depth: i64) {
        let prev_published = self.last_bus_published.swap(published, Ordering::Relaxed);
        let prev_dropped = self.last_bus_dropped.swap(dropped, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            self.bus_published_total.inc_by(published.saturating_sub(prev_published));
            self.bus_dropped_total.inc_by(dropped.saturating_sub(prev_dropped));
            self.bus_queue_depth.set(depth);
        }
        #[cfg(not(feature = "metrics"))]
        {
            let _ = depth;
        }
    }
}
