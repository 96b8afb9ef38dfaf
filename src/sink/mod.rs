pub mod clickhouse;
pub mod exporter;
pub mod http;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::HealthMetrics;
use crate::tracer::stats::ConnectionStats;

use self::exporter::Exporter;

/// A finished connection's summary plus the path of its finalized trace file.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub stats: ConnectionStats,
    pub qlog_path: Option<PathBuf>,
}

/// Cloneable sender handle used by tracers to enqueue finished connections.
#[derive(Clone)]
pub struct UploadHandle {
    tx: mpsc::UnboundedSender<ConnectionRecord>,
}

impl UploadHandle {
    /// Enqueues a record for export. Never blocks the caller.
    pub fn send(&self, record: ConnectionRecord) {
        if self.tx.send(record).is_err() {
            debug!("remote sink stopped, dropping connection record");
        }
    }
}

/// Background worker that uploads connection records one at a time.
///
/// Records are exported best-effort: a failed or timed-out upsert is counted
/// and logged but never propagated back to the connection that produced it.
pub struct RemoteSink {
    cancel: CancellationToken,
    run_task: Option<tokio::task::JoinHandle<()>>,
    tx: mpsc::UnboundedSender<ConnectionRecord>,
}

impl RemoteSink {
    /// Spawns the upload worker around the given exporter.
    pub async fn start(
        mut exporter: Exporter,
        upsert_timeout: Duration,
        health: Arc<HealthMetrics>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<ConnectionRecord>();

        exporter.start(cancel.clone()).await?;
        info!(exporter = exporter.name(), "exporter started");

        let ctx = cancel.clone();
        let run_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        // Drain whatever is already queued before exiting.
                        while let Ok(record) = rx.try_recv() {
                            upsert_one(&exporter, &record, upsert_timeout, &health).await;
                        }

                        if let Err(e) = exporter.stop().await {
                            tracing::error!(error = %e, "exporter stop failed");
                        }
                        return;
                    }

                    record = rx.recv() => {
                        match record {
                            Some(record) => {
                                upsert_one(&exporter, &record, upsert_timeout, &health).await;
                            }
                            None => {
                                if let Err(e) = exporter.stop().await {
                                    tracing::error!(error = %e, "exporter stop failed");
                                }
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            run_task: Some(run_task),
            tx,
        })
    }

    /// Returns a handle for enqueuing records.
    pub fn handle(&self) -> UploadHandle {
        UploadHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stops the worker after it drains queued records.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(run_task) = self.run_task.take() {
            if let Err(e) = run_task.await {
                warn!(error = %e, "remote sink task join failed");
            }
        }
    }
}

async fn upsert_one(
    exporter: &Exporter,
    record: &ConnectionRecord,
    upsert_timeout: Duration,
    health: &HealthMetrics,
) {
    let started = Instant::now();

    match tokio::time::timeout(upsert_timeout, exporter.upsert(record)).await {
        Ok(Ok(())) => {
            health.records_exported.inc();
        }
        Ok(Err(e)) => {
            health.export_errors.with_label_values(&["upsert"]).inc();
            tracing::error!(
                exporter = exporter.name(),
                odcid = %record.stats.odcid,
                error = %e,
                "connection upsert failed",
            );
        }
        Err(_) => {
            health.export_errors.with_label_values(&["timeout"]).inc();
            warn!(
                exporter = exporter.name(),
                odcid = %record.stats.odcid,
                timeout = ?upsert_timeout,
                "connection upsert timed out",
            );
        }
    }

    health
        .export_duration
        .observe(started.elapsed().as_secs_f64());
}
