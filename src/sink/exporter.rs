use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::config::RemoteConfig;

use super::clickhouse::ClickHouseExporter;
use super::http::HttpExporter;
use super::ConnectionRecord;

/// Exporter dispatches connection records to ClickHouse or HTTP backends.
///
/// Uses enum dispatch rather than trait objects for zero-cost async dispatch
/// (avoids `Pin<Box<dyn Future>>` overhead on every upsert call).
pub enum Exporter {
    ClickHouse(ClickHouseExporter),
    Http(HttpExporter),
}

impl Exporter {
    /// Builds the exporter backend selected by the remote configuration.
    pub fn from_config(cfg: &RemoteConfig, engine_version: Arc<str>) -> Result<Self> {
        match cfg.exporter.as_str() {
            "clickhouse" => Ok(Self::ClickHouse(ClickHouseExporter::new(
                &cfg.clickhouse,
                engine_version,
            ))),
            "http" => Ok(Self::Http(HttpExporter::new(
                cfg.http.clone(),
                engine_version,
            )?)),
            other => bail!("unknown exporter: {other}"),
        }
    }

    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::ClickHouse(e) => e.name(),
            Self::Http(e) => e.name(),
        }
    }

    /// Initialize the exporter.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        match self {
            Self::ClickHouse(e) => e.start(ctx).await,
            Self::Http(e) => e.start(ctx).await,
        }
    }

    /// Export a single connection record.
    pub async fn upsert(&self, record: &ConnectionRecord) -> Result<()> {
        match self {
            Self::ClickHouse(e) => e.upsert(record).await,
            Self::Http(e) => e.upsert(record).await,
        }
    }

    /// Shut down the exporter.
    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::ClickHouse(e) => e.stop().await,
            Self::Http(e) => e.stop().await,
        }
    }
}
