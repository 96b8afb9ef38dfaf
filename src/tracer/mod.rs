pub mod stats;
pub mod types;

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::health::HealthMetrics;
use crate::qlog::QlogWriter;
use crate::sink::exporter::Exporter;
use crate::sink::{ConnectionRecord, RemoteSink, UploadHandle};
use crate::version;

use self::stats::ConnectionStats;
use self::types::{
    CloseReason, CongestionState, ConnectionId, EncryptionLevel, Perspective, RttSample, TimerType,
};

/// Callback surface a connection under trace invokes as it processes events.
///
/// All methods default to no-ops so implementations override only what they
/// record. Calls arrive from the connection's own event loop, one at a time.
pub trait ConnectionTracer: Send {
    /// The connection picked its paths and initial version.
    fn started_connection(&mut self, _local: SocketAddr, _remote: SocketAddr, _version: u32) {}

    /// Version negotiation settled on `chosen`.
    fn negotiated_version(
        &mut self,
        _chosen: u32,
        _client_versions: &[u32],
        _server_versions: &[u32],
    ) {
    }

    /// The connection ended. Called at most once.
    fn closed_connection(&mut self, _reason: &CloseReason) {}

    /// Transport parameters were sent to the peer.
    fn sent_transport_parameters(&mut self) {}

    /// Transport parameters arrived from the peer.
    fn received_transport_parameters(&mut self) {}

    /// A packet left the connection.
    fn sent_packet(&mut self, _size: usize) {}

    /// A packet was processed by the connection.
    fn received_packet(&mut self, _size: usize) {}

    /// A version-negotiation packet arrived carrying the peer's offers.
    fn received_version_negotiation(&mut self, _offered: &[u32]) {}

    /// A retry packet arrived.
    fn received_retry(&mut self) {}

    /// A packet was held back for later decryption.
    fn buffered_packet(&mut self) {}

    /// A packet was discarded undecryptable or malformed.
    fn dropped_packet(&mut self, _size: usize) {}

    /// Loss recovery declared a packet lost.
    fn lost_packet(&mut self) {}

    /// A previously sent packet was acknowledged.
    fn acknowledged_packet(&mut self) {}

    /// The RTT estimators and congestion window changed.
    fn updated_metrics(
        &mut self,
        _rtt: &RttSample,
        _cwnd: u64,
        _bytes_in_flight: u64,
        _packets_in_flight: usize,
    ) {
    }

    /// The congestion controller changed phase.
    fn updated_congestion_state(&mut self, _state: CongestionState) {}

    /// The PTO backoff counter changed.
    fn updated_pto_count(&mut self, _count: u32) {}

    /// A packet-protection key was installed for `level`.
    fn updated_key(&mut self, _level: EncryptionLevel, _role: Perspective) {}

    /// The 1-RTT keys rotated to a new phase.
    fn rotated_key(&mut self, _generation: u64, _remote: bool) {}

    /// Keys for an encryption level were discarded.
    fn dropped_encryption_level(&mut self, _level: EncryptionLevel) {}

    /// Keys for a superseded phase were discarded.
    fn dropped_key(&mut self, _generation: u64) {}

    /// A loss-recovery timer was armed.
    fn set_loss_timer(&mut self, _timer: TimerType) {}

    /// A loss-recovery timer fired.
    fn loss_timer_expired(&mut self) {}

    /// A loss-recovery timer was disarmed.
    fn loss_timer_canceled(&mut self) {}

    /// An encoded trace record is ready for the trace file.
    fn trace_record(&mut self, _data: &[u8]) {}

    /// Free-form debug event from the engine.
    fn debug(&mut self, _name: &str, _msg: &str) {}
}

/// Tracer that aggregates events into a [`ConnectionStats`] summary, streams
/// encoded trace records to a compressed trace file, and hands the finished
/// record to the remote sink on close.
pub struct StatsTracer {
    stats: ConnectionStats,
    qlog: Option<QlogWriter>,
    uploads: Option<UploadHandle>,
    health: Arc<HealthMetrics>,
    closed: bool,
}

impl StatsTracer {
    /// Read access to the summary aggregated so far.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

impl ConnectionTracer for StatsTracer {
    fn started_connection(&mut self, local: SocketAddr, remote: SocketAddr, version: u32) {
        self.stats.record_start(local, remote, version);
    }

    fn negotiated_version(&mut self, chosen: u32, _client: &[u32], _server: &[u32]) {
        self.stats.version = chosen;
    }

    fn closed_connection(&mut self, reason: &CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.stats.record_close(*reason);

        // Finalize the trace file first so the exported row can carry its path.
        let qlog_path = match self.qlog.take() {
            Some(writer) => match writer.finalize() {
                Ok(path) => {
                    self.health.qlog_finalized.inc();
                    Some(path)
                }
                Err(e) => {
                    self.health.qlog_finalize_errors.inc();
                    tracing::error!(
                        error = %e,
                        odcid = %self.stats.odcid,
                        "failed to finalize trace file",
                    );
                    None
                }
            },
            None => None,
        };

        self.health.open_connections.dec();

        if let Some(uploads) = &self.uploads {
            uploads.send(ConnectionRecord {
                stats: self.stats.clone(),
                qlog_path,
            });
        }
    }

    fn sent_packet(&mut self, _size: usize) {
        self.stats.record_packet_sent();
    }

    fn received_packet(&mut self, _size: usize) {
        self.stats.record_packet_received();
    }

    fn received_version_negotiation(&mut self, offered: &[u32]) {
        self.stats.record_version_negotiation(offered);
    }

    fn received_retry(&mut self) {
        self.stats.record_retry();
    }

    fn buffered_packet(&mut self) {
        self.stats.record_packet_buffered();
    }

    fn dropped_packet(&mut self, _size: usize) {
        self.stats.record_packet_dropped();
    }

    fn lost_packet(&mut self) {
        self.stats.record_packet_lost();
    }

    fn updated_metrics(
        &mut self,
        rtt: &RttSample,
        _cwnd: u64,
        _bytes_in_flight: u64,
        _packets_in_flight: usize,
    ) {
        self.stats.record_rtt(*rtt);
    }

    fn updated_pto_count(&mut self, count: u32) {
        self.stats.record_pto(count);
    }

    fn updated_key(&mut self, level: EncryptionLevel, role: Perspective) {
        self.stats.record_key_installed(level, role);
    }

    fn trace_record(&mut self, data: &[u8]) {
        if let Some(writer) = &mut self.qlog {
            if let Err(e) = writer.write_all(data) {
                warn!(
                    error = %e,
                    odcid = %self.stats.odcid,
                    "trace write failed, disabling trace for this connection",
                );
                // Keep aggregating; only the trace file is lost. Its temp file
                // stays on disk and is never renamed.
                self.qlog = None;
            }
        }
    }
}

impl Drop for StatsTracer {
    fn drop(&mut self) {
        if !self.closed {
            self.health.open_connections.dec();
            debug!(odcid = %self.stats.odcid, "tracer dropped without close event");
        }
    }
}

/// TracerFactory hands out one tracer per connection and owns the shared
/// machinery behind them: the trace directory, the remote sink worker and the
/// health metrics.
pub struct TracerFactory {
    node: Arc<str>,
    trace_dir: Option<PathBuf>,
    uploads: Option<UploadHandle>,
    sink: Option<RemoteSink>,
    health: Arc<HealthMetrics>,
}

impl TracerFactory {
    /// Validates the configuration and starts the shared machinery.
    pub async fn start(cfg: Config) -> Result<Self> {
        cfg.validate()?;

        let health = Arc::new(HealthMetrics::new()?);
        let node: Arc<str> = Arc::from(cfg.node.as_str());
        let engine_version: Arc<str> = Arc::from(cfg.engine_version.as_str());

        info!(
            release = version::RELEASE,
            commit = version::git_commit(),
            node = %cfg.node,
            "starting connection tracing",
        );

        let (sink, uploads) = match &cfg.remote {
            Some(remote) => {
                let exporter = Exporter::from_config(remote, engine_version)?;
                let sink =
                    RemoteSink::start(exporter, remote.upsert_timeout, Arc::clone(&health)).await?;
                let handle = sink.handle();
                (Some(sink), Some(handle))
            }
            None => {
                info!("remote export disabled");
                (None, None)
            }
        };

        if cfg.qlog.dir.is_none() {
            info!("trace directory not set, per-connection traces disabled");
        }

        Ok(Self {
            node,
            trace_dir: cfg.qlog.dir,
            uploads,
            sink,
            health,
        })
    }

    /// Creates the tracer for one new connection.
    ///
    /// Trace file setup failures are counted and logged; the connection is
    /// still traced, just without a local trace file.
    pub fn tracer_for_connection(
        &self,
        perspective: Perspective,
        odcid: &ConnectionId,
    ) -> StatsTracer {
        let qlog = match &self.trace_dir {
            Some(dir) => match QlogWriter::create(dir, perspective, odcid) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    self.health.qlog_setup_errors.inc();
                    tracing::error!(
                        error = %e,
                        odcid = %odcid,
                        "failed to create trace file, tracing connection without one",
                    );
                    None
                }
            },
            None => None,
        };

        self.health
            .tracers_created
            .with_label_values(&[perspective.as_str()])
            .inc();
        self.health.open_connections.inc();

        StatsTracer {
            stats: ConnectionStats::new(Arc::clone(&self.node), perspective, *odcid),
            qlog,
            uploads: self.uploads.clone(),
            health: Arc::clone(&self.health),
            closed: false,
        }
    }

    /// Health metrics shared by every tracer this factory created.
    pub fn health(&self) -> &HealthMetrics {
        &self.health
    }

    /// Drains the remote sink and stops the shared machinery. Tracers already
    /// handed out keep working; their records are dropped once the sink is
    /// gone.
    pub async fn stop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.stop().await;
        }
    }
}
