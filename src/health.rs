use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

/// Prometheus metrics for collector health.
///
/// All metrics use the "quicoor" namespace. The registry is owned here and
/// exposed through [`HealthMetrics::registry`]; serving it over HTTP is the
/// host process's concern. Nothing in this struct is touched on the
/// per-event hot path, only at tracer setup, close and export time.
pub struct HealthMetrics {
    registry: Registry,

    /// Tracers handed out, by role.
    pub tracers_created: CounterVec,
    /// Connections currently traced (created minus closed).
    pub open_connections: Gauge,
    /// Trace files published under their final name.
    pub qlog_finalized: Counter,
    /// Finalize failures; the temp file is kept on disk for each.
    pub qlog_finalize_errors: Counter,
    /// Trace writer setup failures (directory, temp file, codec).
    pub qlog_setup_errors: Counter,
    /// Summary records accepted by the remote store.
    pub records_exported: Counter,
    /// Remote export failures by error type.
    pub export_errors: CounterVec,
    /// Duration of a single remote upsert.
    pub export_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tracers_created = CounterVec::new(
            Opts::new("tracers_created_total", "Total connection tracers handed out by role.")
                .namespace("quicoor"),
            &["role"],
        )?;
        let open_connections = Gauge::with_opts(
            Opts::new("open_connections", "Number of connections currently traced.")
                .namespace("quicoor"),
        )?;
        let qlog_finalized = Counter::with_opts(
            Opts::new(
                "qlog_finalized_total",
                "Total trace files published under their final name.",
            )
            .namespace("quicoor"),
        )?;
        let qlog_finalize_errors = Counter::with_opts(
            Opts::new(
                "qlog_finalize_errors_total",
                "Total trace file finalize failures.",
            )
            .namespace("quicoor"),
        )?;
        let qlog_setup_errors = Counter::with_opts(
            Opts::new(
                "qlog_setup_errors_total",
                "Total trace writer setup failures.",
            )
            .namespace("quicoor"),
        )?;
        let records_exported = Counter::with_opts(
            Opts::new(
                "records_exported_total",
                "Total summary records accepted by the remote store.",
            )
            .namespace("quicoor"),
        )?;
        let export_errors = CounterVec::new(
            Opts::new(
                "export_errors_total",
                "Total remote export failures by error type.",
            )
            .namespace("quicoor"),
            &["error_type"],
        )?;
        let export_duration = Histogram::with_opts(
            HistogramOpts::new(
                "export_duration_seconds",
                "Duration of a single remote upsert.",
            )
            .namespace("quicoor")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(tracers_created.clone()))?;
        registry.register(Box::new(open_connections.clone()))?;
        registry.register(Box::new(qlog_finalized.clone()))?;
        registry.register(Box::new(qlog_finalize_errors.clone()))?;
        registry.register(Box::new(qlog_setup_errors.clone()))?;
        registry.register(Box::new(records_exported.clone()))?;
        registry.register(Box::new(export_errors.clone()))?;
        registry.register(Box::new(export_duration.clone()))?;

        Ok(Self {
            registry,
            tracers_created,
            open_connections,
            qlog_finalized,
            qlog_finalize_errors,
            qlog_setup_errors,
            records_exported,
            export_errors,
            export_duration,
        })
    }

    /// The registry holding every collector metric.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
