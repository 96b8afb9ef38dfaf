use std::io::Write;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::sink::ConnectionRecord;
use crate::tracer::types::{format_version, CloseReason, RttSample};

/// RTT sample as a nested JSON object, all values in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct RttJson {
    pub min_rtt_ms: f64,
    pub smoothed_rtt_ms: f64,
    pub rtt_var_ms: f64,
}

impl From<RttSample> for RttJson {
    fn from(rtt: RttSample) -> Self {
        Self {
            min_rtt_ms: rtt.min_ms(),
            smoothed_rtt_ms: rtt.smoothed_ms(),
            rtt_var_ms: rtt.variance_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorJson {
    pub remote: bool,
    pub error_code: u64,
}

/// Close reason as a nested JSON object. At most one field is present.
#[derive(Debug, Clone, Serialize)]
pub struct CloseReasonJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<&'static str>,
    #[serde(skip_serializing_if = "is_false")]
    pub stateless_reset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<ErrorJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_error: Option<ErrorJson>,
}

/// JSON schema for HTTP export of connection summaries.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionJson {
    pub node: Arc<str>,
    pub engine_version: Arc<str>,
    pub is_client: bool,
    pub start_time: String,
    pub end_time: String,
    pub odcid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_rcvd: Option<bool>,
    pub version_negotiation_versions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_complete_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_rtt: Option<RttJson>,
    pub quic_version: String,
    pub local_addr: String,
    pub remote_addr: String,
    pub packets_sent: u64,
    pub packets_rcvd: u64,
    pub packets_buffered: u64,
    pub packets_dropped: u64,
    pub packets_lost: u64,
    pub last_rtt: RttJson,
    pub pto_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReasonJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qlog: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn close_reason_to_json(reason: CloseReason) -> Option<CloseReasonJson> {
    let json = match reason {
        CloseReason::Timeout(kind) => CloseReasonJson {
            timeout: Some(kind.as_str()),
            stateless_reset: false,
            transport_error: None,
            application_error: None,
        },
        CloseReason::StatelessReset => CloseReasonJson {
            timeout: None,
            stateless_reset: true,
            transport_error: None,
            application_error: None,
        },
        CloseReason::TransportError { code, remote } => CloseReasonJson {
            timeout: None,
            stateless_reset: false,
            transport_error: Some(ErrorJson {
                remote,
                error_code: code,
            }),
            application_error: None,
        },
        CloseReason::ApplicationError { code, remote } => CloseReasonJson {
            timeout: None,
            stateless_reset: false,
            transport_error: None,
            application_error: Some(ErrorJson {
                remote,
                error_code: code,
            }),
        },
        CloseReason::Unknown => return None,
    };
    Some(json)
}

/// HTTP NDJSON exporter for connection summary records.
///
/// Serializes each record as one newline-delimited JSON line, optionally
/// compresses, and sends via HTTP POST to the configured address.
pub struct HttpExporter {
    cfg: HttpConfig,
    client: reqwest::Client,
    engine_version: Arc<str>,
}

impl HttpExporter {
    /// Creates a new HTTP exporter with the given configuration.
    pub fn new(cfg: HttpConfig, engine_version: Arc<str>) -> Result<Self> {
        let mut client_builder = reqwest::Client::builder();

        if !cfg.keep_alive {
            client_builder = client_builder.pool_max_idle_per_host(0);
        }

        let client = client_builder.build().context("building HTTP client")?;

        Ok(Self {
            cfg,
            client,
            engine_version,
        })
    }

    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        "http"
    }

    /// Initialize the exporter. The client is already built; no-op here.
    pub async fn start(&mut self, _ctx: CancellationToken) -> Result<()> {
        tracing::info!(
            address = %self.cfg.address,
            compression = %self.cfg.compression,
            "HTTP exporter started",
        );
        Ok(())
    }

    /// Send one connection record as NDJSON.
    pub async fn upsert(&self, record: &ConnectionRecord) -> Result<()> {
        let json = self.record_to_json(record);

        let mut buf = Vec::with_capacity(512);
        serde_json::to_writer(&mut buf, &json).context("serializing connection record")?;
        buf.push(b'\n');

        let raw_len = buf.len();
        let compressed = compress(&buf, &self.cfg.compression).context("compressing NDJSON data")?;

        let mut request = self
            .client
            .post(&self.cfg.address)
            .header("Content-Type", "application/x-ndjson")
            .body(compressed);

        if let Some(encoding) = content_encoding(&self.cfg.compression) {
            request = request.header("Content-Encoding", encoding);
        }

        for (k, v) in &self.cfg.headers {
            request = request.header(k.as_str(), v.as_str());
        }

        let resp = request.send().await.context("sending connection record")?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            bail!("connection upsert unexpected status: {status}");
        }

        tracing::debug!(
            odcid = %record.stats.odcid,
            bytes = raw_len,
            "exported connection via HTTP",
        );

        Ok(())
    }

    /// Shut down the exporter. No-op; in-flight requests were awaited by the caller.
    pub async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn record_to_json(&self, record: &ConnectionRecord) -> ConnectionJson {
        let stats = &record.stats;

        ConnectionJson {
            node: Arc::clone(&stats.node),
            engine_version: Arc::clone(&self.engine_version),
            is_client: stats.perspective.is_client(),
            start_time: format_datetime(stats.started_at.unwrap_or(SystemTime::UNIX_EPOCH)),
            end_time: format_datetime(stats.ended_at.unwrap_or(SystemTime::UNIX_EPOCH)),
            odcid: stats.odcid.to_string(),
            retry_rcvd: if stats.perspective.is_client() {
                Some(stats.retry_received)
            } else {
                None
            },
            version_negotiation_versions: stats
                .offered_versions
                .iter()
                .map(|v| format_version(*v))
                .collect(),
            handshake_complete_time: stats.handshake_completed_at.map(format_datetime),
            handshake_rtt: stats.handshake_rtt.map(RttJson::from),
            quic_version: format_version(stats.version),
            local_addr: stats.local_addr.map(|a| a.to_string()).unwrap_or_default(),
            remote_addr: stats.remote_addr.map(|a| a.to_string()).unwrap_or_default(),
            packets_sent: stats.packets_sent,
            packets_rcvd: stats.packets_rcvd,
            packets_buffered: stats.packets_buffered,
            packets_dropped: stats.packets_dropped,
            packets_lost: stats.packets_lost,
            last_rtt: RttJson::from(stats.last_rtt),
            pto_count: stats.pto_count,
            close_reason: stats.close_reason.and_then(close_reason_to_json),
            qlog: record
                .qlog_path
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

// --- Compression ---

/// Compresses data using the specified algorithm.
fn compress(data: &[u8], algorithm: &str) -> Result<Vec<u8>> {
    match algorithm {
        "none" | "" => Ok(data.to_vec()),
        "gzip" => compress_gzip(data),
        "zstd" => compress_zstd(data),
        "zlib" => compress_zlib(data),
        "snappy" => compress_snappy(data),
        other => bail!("unsupported compression: {other}"),
    }
}

/// Returns the Content-Encoding header value for the algorithm.
fn content_encoding(algorithm: &str) -> Option<&'static str> {
    match algorithm {
        "gzip" => Some("gzip"),
        "zstd" => Some("zstd"),
        "zlib" => Some("deflate"),
        "snappy" => Some("snappy"),
        _ => None,
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("gzip write")?;
    encoder.finish().context("gzip finish")
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 0).context("zstd encode")
}

fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("zlib write")?;
    encoder.finish().context("zlib finish")
}

fn compress_snappy(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = snap::raw::Encoder::new();
    encoder.compress_vec(data).context("snappy encode")
}

// --- Datetime formatting ---

/// Formats a SystemTime as "2006-01-02 15:04:05.000" style UTC.
fn format_datetime(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
