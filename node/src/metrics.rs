//! Prometheus metrics for the Keel node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`] covering sweeps, the job
//! queue, ledger acquisition, missing-node recovery and disk space.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::NodeError;

pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Completed sweep cycles.
    pub sweep_cycles: IntCounter,
    /// Jobs run by the background job queue.
    pub jobs_executed: IntCounter,
    /// Ledger acquisitions requested from peers.
    pub acquisitions_requested: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Missing-node reports received by the recovery coordinator.
    pub missing_node_notifications: IntGauge,
    /// Recovery chase jobs dispatched.
    pub recovery_chases: IntGauge,
    /// Free bytes on the data directory at the last disk check.
    pub free_disk_bytes: IntGauge,
    /// Sequence of the last closed ledger.
    pub closed_ledger_seq: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time spent in one sweep cycle, in milliseconds.
    pub sweep_duration_ms: Histogram,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();

        // Counters
        let sweep_cycles = register_int_counter_with_registry!(
            Opts::new("keel_sweep_cycles_total", "Completed cache sweep cycles"),
            registry
        )?;

        let jobs_executed = register_int_counter_with_registry!(
            Opts::new("keel_jobs_executed_total", "Jobs run by the job queue"),
            registry
        )?;

        let acquisitions_requested = register_int_counter_with_registry!(
            Opts::new(
                "keel_acquisitions_requested_total",
                "Ledger acquisitions requested from peers"
            ),
            registry
        )?;

        // Gauges
        let missing_node_notifications = register_int_gauge_with_registry!(
            Opts::new(
                "keel_missing_node_notifications",
                "Missing tree nodes reported to the recovery coordinator"
            ),
            registry
        )?;

        let recovery_chases = register_int_gauge_with_registry!(
            Opts::new("keel_recovery_chases", "Missing-ledger chase jobs dispatched"),
            registry
        )?;

        let free_disk_bytes = register_int_gauge_with_registry!(
            Opts::new(
                "keel_free_disk_bytes",
                "Free bytes on the data directory at the last check"
            ),
            registry
        )?;

        let closed_ledger_seq = register_int_gauge_with_registry!(
            Opts::new("keel_closed_ledger_seq", "Sequence of the last closed ledger"),
            registry
        )?;

        // Histograms – exponential buckets covering 0.1 ms → ~1.6 s.
        let sweep_duration_ms = register_histogram_with_registry!(
            HistogramOpts::new("keel_sweep_duration_ms", "Sweep cycle time in milliseconds")
                .buckets(prometheus::exponential_buckets(0.1, 2.0, 15)?),
            registry
        )?;

        Ok(Self {
            registry,
            sweep_cycles,
            jobs_executed,
            acquisitions_requested,
            missing_node_notifications,
            recovery_chases,
            free_disk_bytes,
            closed_ledger_seq,
            sweep_duration_ms,
        })
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| NodeError::Config(e.to_string()))
    }
}
