use std::fmt::Write;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clickhouse_rs::Pool;
use tokio_util::sync::CancellationToken;

use crate::config::ClickHouseConfig;
use crate::sink::ConnectionRecord;
use crate::tracer::types::{format_version, CloseReason};

/// ClickHouse exporter for connection summary records.
///
/// Inserts one row per closed connection into the configured table. Nested
/// parts of the summary (RTT samples, close reason) are flattened into
/// nullable columns.
pub struct ClickHouseExporter {
    pool: Pool,
    table: String,
    engine_version: Arc<str>,
}

const COLUMNS: &str = "node, engine_version, is_client, start_time, end_time, odcid, retry_rcvd, \
     version_negotiation_versions, handshake_complete_time, \
     handshake_min_rtt_ms, handshake_smoothed_rtt_ms, handshake_rtt_var_ms, \
     quic_version, local_addr, remote_addr, \
     packets_sent, packets_rcvd, packets_buffered, packets_dropped, packets_lost, \
     min_rtt_ms, smoothed_rtt_ms, rtt_var_ms, pto_count, \
     close_timeout, close_stateless_reset, \
     close_transport_error_remote, close_transport_error_code, \
     close_application_error_remote, close_application_error_code, qlog";

impl ClickHouseExporter {
    /// Creates a new ClickHouse exporter from connection configuration.
    pub fn new(cfg: &ClickHouseConfig, engine_version: Arc<str>) -> Self {
        Self {
            pool: Pool::new(cfg.dsn()),
            table: format!("{}.{}", cfg.database, cfg.table),
            engine_version,
        }
    }

    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        "clickhouse"
    }

    /// Initialize the exporter. Connections are pooled lazily; no-op here.
    pub async fn start(&mut self, _ctx: CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Insert one connection row.
    pub async fn upsert(&self, record: &ConnectionRecord) -> Result<()> {
        let sql = self.build_insert(record);

        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting handle for connection insert")?;

        handle
            .execute(sql.as_str())
            .await
            .context("sending connection row")?;

        Ok(())
    }

    /// Shut down the exporter. No-op; the pool drops with the exporter.
    pub async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn build_insert(&self, record: &ConnectionRecord) -> String {
        let stats = &record.stats;

        let node = escape_sql(&stats.node);
        let engine_version = escape_sql(&self.engine_version);
        let is_client = format_bool(stats.perspective.is_client());
        let start_time = format_datetime(stats.started_at.unwrap_or(SystemTime::UNIX_EPOCH));
        let end_time = format_datetime(stats.ended_at.unwrap_or(SystemTime::UNIX_EPOCH));
        let odcid = stats.odcid.to_string();

        // Only meaningful on the client side; servers export NULL.
        let retry_rcvd = if stats.perspective.is_client() {
            Some(stats.retry_received)
        } else {
            None
        };

        let offered = format_version_array(&stats.offered_versions);
        let handshake_time = format_nullable_datetime(stats.handshake_completed_at);

        let (hs_min, hs_smoothed, hs_var) = match stats.handshake_rtt {
            Some(rtt) => (
                format!("{}", rtt.min_ms()),
                format!("{}", rtt.smoothed_ms()),
                format!("{}", rtt.variance_ms()),
            ),
            None => ("NULL".to_string(), "NULL".to_string(), "NULL".to_string()),
        };

        let quic_version = format_version(stats.version);
        let local_addr = stats
            .local_addr
            .map(|a| a.to_string())
            .unwrap_or_default();
        let remote_addr = stats
            .remote_addr
            .map(|a| a.to_string())
            .unwrap_or_default();

        let (close_timeout, close_reset, close_transport, close_application) =
            flatten_close_reason(stats.close_reason);

        let (transport_remote, transport_code) = match close_transport {
            Some((remote, code)) => (Some(remote), Some(code)),
            None => (None, None),
        };
        let (application_remote, application_code) = match close_application {
            Some((remote, code)) => (Some(remote), Some(code)),
            None => (None, None),
        };

        let qlog = match &record.qlog_path {
            Some(path) => format!("'{}'", escape_sql(&path.display().to_string())),
            None => "NULL".to_string(),
        };

        let mut sql = String::with_capacity(256 + self.table.len() + COLUMNS.len() + 512);
        let _ = write!(sql, "INSERT INTO {} ({COLUMNS}) VALUES ", self.table);
        let _ = write!(
            sql,
            "('{node}', '{engine_version}', {is_client}, {start_time}, {end_time}, '{odcid}', {}, \
             {offered}, {handshake_time}, {hs_min}, {hs_smoothed}, {hs_var}, \
             '{quic_version}', '{local_addr}', '{remote_addr}', \
             {}, {}, {}, {}, {}, \
             {}, {}, {}, {}, \
             {}, {}, {}, {}, {}, {}, {qlog})",
            format_nullable_bool(retry_rcvd),
            stats.packets_sent,
            stats.packets_rcvd,
            stats.packets_buffered,
            stats.packets_dropped,
            stats.packets_lost,
            stats.last_rtt.min_ms(),
            stats.last_rtt.smoothed_ms(),
            stats.last_rtt.variance_ms(),
            stats.pto_count,
            format_nullable_str(close_timeout),
            format_nullable_bool(close_reset),
            format_nullable_bool(transport_remote),
            format_nullable_u64(transport_code),
            format_nullable_bool(application_remote),
            format_nullable_u64(application_code),
        );

        sql
    }
}

/// Splits a close reason into its mutually exclusive column groups:
/// timeout kind, stateless reset, transport error, application error.
fn flatten_close_reason(
    reason: Option<CloseReason>,
) -> (
    Option<&'static str>,
    Option<bool>,
    Option<(bool, u64)>,
    Option<(bool, u64)>,
) {
    match reason {
        Some(CloseReason::Timeout(kind)) => (Some(kind.as_str()), None, None, None),
        Some(CloseReason::StatelessReset) => (None, Some(true), None, None),
        Some(CloseReason::TransportError { code, remote }) => {
            (None, None, Some((remote, code)), None)
        }
        Some(CloseReason::ApplicationError { code, remote }) => {
            (None, None, None, Some((remote, code)))
        }
        Some(CloseReason::Unknown) | None => (None, None, None, None),
    }
}

// --- SQL formatting helpers ---

/// Formats a SystemTime as a ClickHouse DateTime64(3) literal.
fn format_datetime(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f"))
}

fn format_nullable_datetime(t: Option<SystemTime>) -> String {
    match t {
        Some(t) => format_datetime(t),
        None => "NULL".to_string(),
    }
}

/// Escapes a string value for SQL insertion (single-quote escaping).
fn escape_sql(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn format_bool(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn format_nullable_bool(b: Option<bool>) -> &'static str {
    match b {
        Some(b) => format_bool(b),
        None => "NULL",
    }
}

fn format_nullable_u64(v: Option<u64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

fn format_nullable_str(s: Option<&str>) -> String {
    match s {
        Some(s) => format!("'{}'", escape_sql(s)),
        None => "NULL".to_string(),
    }
}

/// Formats offered wire versions as a ClickHouse Array(String) literal.
fn format_version_array(versions: &[u32]) -> String {
    if versions.is_empty() {
        return "[]".to_string();
    }

    let mut out = String::with_capacity(versions.len() * 8 + 2);
    out.push('[');
    for (idx, version) in versions.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "'{}'", format_version(*version));
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tracer::stats::ConnectionStats;
    use crate::tracer::types::{ConnectionId, Perspective, RttSample, TimeoutKind};

    fn exporter() -> ClickHouseExporter {
        let cfg = ClickHouseConfig {
            endpoint: "localhost:9000".to_string(),
            ..Default::default()
        };
        ClickHouseExporter::new(&cfg, Arc::from("(devel)"))
    }

    fn record(perspective: Perspective) -> ConnectionRecord {
        let mut stats = ConnectionStats::new(
            Arc::from("node-a"),
            perspective,
            ConnectionId::new(&[0xab, 0xcd]),
        );
        stats.started_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(100));
        stats.ended_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(160));
        stats.version = 1;
        ConnectionRecord {
            stats,
            qlog_path: None,
        }
    }

    #[test]
    fn test_format_datetime() {
        let t = SystemTime::UNIX_EPOCH;
        assert_eq!(format_datetime(t), "'1970-01-01 00:00:00.000'");
    }

    #[test]
    fn test_escape_sql() {
        assert_eq!(escape_sql("hello"), "hello");
        assert_eq!(escape_sql("it's"), "it\\'s");
        assert_eq!(escape_sql("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_format_version_array() {
        assert_eq!(
            format_version_array(&[1, 0x6b3343cf, 0xff00001d]),
            "['v1', 'v2', '0xff00001d']"
        );
        assert_eq!(format_version_array(&[]), "[]");
    }

    #[test]
    fn test_nullable_helpers() {
        assert_eq!(format_nullable_bool(Some(true)), "1");
        assert_eq!(format_nullable_bool(Some(false)), "0");
        assert_eq!(format_nullable_bool(None), "NULL");
        assert_eq!(format_nullable_u64(Some(12)), "12");
        assert_eq!(format_nullable_u64(None), "NULL");
        assert_eq!(format_nullable_str(Some("idle")), "'idle'");
        assert_eq!(format_nullable_str(None), "NULL");
        assert_eq!(format_nullable_datetime(None), "NULL");
    }

    #[test]
    fn test_flatten_close_reason_exclusive() {
        let (timeout, reset, transport, application) =
            flatten_close_reason(Some(CloseReason::StatelessReset));
        assert!(timeout.is_none());
        assert_eq!(reset, Some(true));
        assert!(transport.is_none());
        assert!(application.is_none());

        let (timeout, reset, transport, application) = flatten_close_reason(Some(
            CloseReason::ApplicationError {
                code: 9,
                remote: true,
            },
        ));
        assert!(timeout.is_none());
        assert!(reset.is_none());
        assert!(transport.is_none());
        assert_eq!(application, Some((true, 9)));
    }

    #[test]
    fn test_build_insert_server_row() {
        let mut rec = record(Perspective::Server);
        rec.stats.packets_sent = 12;
        rec.stats.close_reason = Some(CloseReason::Timeout(TimeoutKind::Idle));

        let sql = exporter().build_insert(&rec);
        assert!(sql.starts_with("INSERT INTO connections.quic ("));
        assert!(sql.contains("'node-a'"));
        assert!(sql.contains("'abcd'"));
        assert!(sql.contains("'v1'"));
        assert!(sql.contains("'idle'"));
        // Server rows export no retry flag.
        assert!(sql.contains("'abcd', NULL,"));
    }

    #[test]
    fn test_build_insert_client_row_with_rtt() {
        let mut rec = record(Perspective::Client);
        rec.stats.retry_received = true;
        rec.stats.handshake_rtt = Some(RttSample {
            min: Duration::from_millis(10),
            smoothed: Duration::from_millis(12),
            variance: Duration::from_millis(3),
        });
        rec.stats.handshake_completed_at =
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(101));
        rec.qlog_path = Some("/var/log/quic/log_x_client_abcd.trace.zst".into());

        let sql = exporter().build_insert(&rec);
        assert!(sql.contains("'abcd', 1,"));
        assert!(sql.contains("10, 12, 3"));
        assert!(sql.contains("'1970-01-01 00:01:41.000'"));
        assert!(sql.contains("'/var/log/quic/log_x_client_abcd.trace.zst'"));
    }
}
