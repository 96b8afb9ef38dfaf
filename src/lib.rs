//! Per-connection telemetry for a QUIC transport engine.
//!
//! The engine asks the [`tracer::TracerFactory`] for one tracer per
//! connection and feeds it event callbacks. Each tracer aggregates those
//! callbacks into a [`tracer::stats::ConnectionStats`] summary, streams
//! encoded trace records into a compressed local trace file, and on close
//! hands the finished record to a background sink for upload to ClickHouse
//! or an HTTP collector.

pub mod config;
pub mod health;
pub mod qlog;
pub mod sink;
pub mod tracer;
pub mod version;

pub use config::Config;
pub use health::HealthMetrics;
pub use qlog::QlogWriter;
pub use sink::{ConnectionRecord, RemoteSink, UploadHandle};
pub use tracer::stats::ConnectionStats;
pub use tracer::types::{
    CloseReason, ConnectionId, EncryptionLevel, Perspective, RttSample, TimeoutKind,
};
pub use tracer::{ConnectionTracer, StatsTracer, TracerFactory};
