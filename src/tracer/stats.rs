use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use crate::tracer::types::{
    CloseReason, ConnectionId, EncryptionLevel, Perspective, RttSample,
};

/// ConnectionStats is the per-connection summary record. One instance exists
/// per connection, owned exclusively by that connection's tracer; every
/// mutator below runs on the engine's event path and must stay free of
/// locks, I/O and allocation.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Node identity this record is exported under.
    pub node: Arc<str>,
    /// Original destination connection id chosen by the client.
    pub odcid: ConnectionId,
    /// Which side of the connection this record describes.
    pub perspective: Perspective,

    /// When the engine reported the connection as started.
    pub started_at: Option<SystemTime>,
    /// When the close event arrived. Never earlier than `started_at`.
    pub ended_at: Option<SystemTime>,
    /// When the 1-RTT client key was first installed.
    pub handshake_completed_at: Option<SystemTime>,

    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    /// Negotiated wire version.
    pub version: u32,
    /// Versions offered in a version-negotiation packet, empty if none seen.
    pub offered_versions: Vec<u32>,

    pub packets_sent: u64,
    pub packets_rcvd: u64,
    pub packets_buffered: u64,
    pub packets_dropped: u64,
    pub packets_lost: u64,

    /// Number of transitions from a zero to a nonzero PTO backoff.
    pub pto_count: u32,
    /// Whether the last reported PTO backoff was nonzero.
    pto_elevated: bool,

    /// Most recent RTT estimator triple.
    pub last_rtt: RttSample,
    /// RTT triple captured when the handshake completed.
    pub handshake_rtt: Option<RttSample>,

    /// Whether a retry packet was received. Meaningful for clients only.
    pub retry_received: bool,
    /// Close classification. Set exactly once, by the close event.
    pub close_reason: Option<CloseReason>,
}

impl ConnectionStats {
    pub fn new(node: Arc<str>, perspective: Perspective, odcid: ConnectionId) -> Self {
        Self {
            node,
            odcid,
            perspective,
            started_at: None,
            ended_at: None,
            handshake_completed_at: None,
            local_addr: None,
            remote_addr: None,
            version: 0,
            offered_versions: Vec::new(),
            packets_sent: 0,
            packets_rcvd: 0,
            packets_buffered: 0,
            packets_dropped: 0,
            packets_lost: 0,
            pto_count: 0,
            pto_elevated: false,
            last_rtt: RttSample::default(),
            handshake_rtt: None,
            retry_received: false,
            close_reason: None,
        }
    }

    pub fn record_start(&mut self, local: SocketAddr, remote: SocketAddr, version: u32) {
        self.started_at = Some(SystemTime::now());
        self.local_addr = Some(local);
        self.remote_addr = Some(remote);
        self.version = version;
    }

    pub fn record_packet_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_packet_received(&mut self) {
        self.packets_rcvd += 1;
    }

    /// A version-negotiation packet counts as a received packet and records
    /// the offered versions.
    pub fn record_version_negotiation(&mut self, offered: &[u32]) {
        self.packets_rcvd += 1;
        self.offered_versions.clear();
        self.offered_versions.extend_from_slice(offered);
    }

    /// A retry packet counts as a received packet and flags the retry.
    pub fn record_retry(&mut self) {
        self.packets_rcvd += 1;
        self.retry_received = true;
    }

    pub fn record_packet_buffered(&mut self) {
        self.packets_buffered += 1;
    }

    pub fn record_packet_dropped(&mut self) {
        self.packets_dropped += 1;
    }

    pub fn record_packet_lost(&mut self) {
        self.packets_lost += 1;
    }

    pub fn record_rtt(&mut self, sample: RttSample) {
        self.last_rtt = sample;
    }

    /// Counts transitions into a nonzero PTO backoff. Repeated nonzero
    /// reports without an intervening zero count once.
    pub fn record_pto(&mut self, backoff: u32) {
        if backoff == 0 {
            self.pto_elevated = false;
            return;
        }
        if !self.pto_elevated {
            self.pto_elevated = true;
            self.pto_count += 1;
        }
    }

    /// The first 1-RTT client key install marks handshake completion and
    /// snapshots the RTT estimators. Later installs leave both untouched.
    pub fn record_key_installed(&mut self, level: EncryptionLevel, role: Perspective) {
        if role.is_client()
            && level == EncryptionLevel::OneRtt
            && self.handshake_completed_at.is_none()
        {
            self.handshake_completed_at = Some(SystemTime::now());
            self.handshake_rtt = Some(self.last_rtt);
        }
    }

    /// Stamps the end time and close classification. The end time never
    /// precedes the start time even if the wall clock stepped backwards.
    pub fn record_close(&mut self, reason: CloseReason) {
        if self.ended_at.is_some() {
            return;
        }
        let now = SystemTime::now();
        let ended = match self.started_at {
            Some(started) if now < started => started,
            _ => now,
        };
        self.ended_at = Some(ended);
        self.close_reason = Some(reason);
    }
}
