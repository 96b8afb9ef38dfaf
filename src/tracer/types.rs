use std::fmt;
use std::time::Duration;

/// Maximum connection id length in bytes, per the wire protocol.
pub const MAX_CID_LEN: usize = 20;

/// Perspective identifies which side of the connection a tracer observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    Client,
    Server,
}

impl Perspective {
    /// Returns the canonical label used in trace filenames and exported rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }

    pub const fn is_client(self) -> bool {
        matches!(self, Self::Client)
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EncryptionLevel identifies the packet-protection level a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionLevel {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
}

impl EncryptionLevel {
    /// Returns the canonical label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Handshake => "handshake",
            Self::ZeroRtt => "0rtt",
            Self::OneRtt => "1rtt",
        }
    }
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TimerType identifies which loss-recovery timer an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    Ack,
    Pto,
}

/// CongestionState identifies the congestion controller's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    SlowStart,
    CongestionAvoidance,
    Recovery,
    ApplicationLimited,
}

impl CongestionState {
    /// Returns the canonical label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SlowStart => "slow_start",
            Self::CongestionAvoidance => "congestion_avoidance",
            Self::Recovery => "recovery",
            Self::ApplicationLimited => "application_limited",
        }
    }
}

impl fmt::Display for CongestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ConnectionId is an opaque connection identifier of up to [`MAX_CID_LEN`]
/// bytes, as chosen by a peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    len: u8,
    bytes: [u8; MAX_CID_LEN],
}

impl ConnectionId {
    /// Construct from a byte slice. Lengths above [`MAX_CID_LEN`] are a
    /// caller contract violation.
    pub fn new(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_CID_LEN);
        let mut cid = Self {
            len: bytes.len() as u8,
            bytes: [0; MAX_CID_LEN],
        };
        cid.bytes[..bytes.len()].copy_from_slice(bytes);
        cid
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_bytes().fmt(f)
    }
}

/// RttSample is one {min, smoothed, variance} round-trip-time observation
/// from the congestion controller's estimators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RttSample {
    /// Minimum observed RTT.
    pub min: Duration,
    /// Smoothed RTT estimator.
    pub smoothed: Duration,
    /// RTT variance estimator.
    pub variance: Duration,
}

impl RttSample {
    /// Minimum RTT in fractional milliseconds.
    pub fn min_ms(&self) -> f64 {
        to_millis(self.min)
    }

    /// Smoothed RTT in fractional milliseconds.
    pub fn smoothed_ms(&self) -> f64 {
        to_millis(self.smoothed)
    }

    /// RTT variance in fractional milliseconds.
    pub fn variance_ms(&self) -> f64 {
        to_millis(self.variance)
    }
}

fn to_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// TimeoutKind classifies which timer expired when a connection timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Handshake,
    Idle,
    Unknown,
}

impl TimeoutKind {
    /// Returns the label exported in analytics rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Idle => "idle",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CloseReason classifies how a connection ended. Exactly one variant applies
/// per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A handshake or idle timer expired.
    Timeout(TimeoutKind),
    /// The peer signalled a stateless reset.
    StatelessReset,
    /// An application-level close. `remote` is true when the peer initiated.
    ApplicationError { code: u64, remote: bool },
    /// A transport-level close. `remote` is true when the peer initiated.
    TransportError { code: u64, remote: bool },
    /// The engine reported a close without a usable classification.
    Unknown,
}

/// Formats a wire version for export: known versions by name, anything else
/// in hex.
pub fn format_version(version: u32) -> String {
    match version {
        0x0000_0001 => "v1".to_string(),
        0x6b33_43cf => "v2".to_string(),
        other => format!("{other:#x}"),
    }
}
