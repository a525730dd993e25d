//! Core types for the topology tracker.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opaque peer identifier (hex of the peer's public-key-derived id).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an already-encoded identifier.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Hex-encode raw identifier bytes as reported in a heartbeat.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        NodeId(hex::encode(bytes))
    }

    /// Parse and validate a hex identifier.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(TrackerError::EmptyNodeId);
        }
        hex::decode(s)?;
        Ok(NodeId(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// A directed link, keyed by the ordered pair (from, to).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId {
    pub from: NodeId,
    pub to: NodeId,
}

impl LinkId {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether `node` is either endpoint.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.from == node || &self.to == node
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Debug for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({} -> {})", self.from.short(), self.to.short())
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(1_000))
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration_micros(d)))
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_micros(d)))
    }
}

fn duration_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Position in the store's commit history.
///
/// Every committed transaction gets the next revision; event batches and
/// snapshots are stamped with one so replay can be stitched to the live feed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(pub u64);

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

/// Source of "now" for ingestion and sweeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(start.0)),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.micros.store(at.0, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) -> Timestamp {
        let by = duration_micros(by);
        Timestamp(self.micros.fetch_add(by, Ordering::SeqCst).saturating_add(by))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.micros.load(Ordering::SeqCst))
    }
}

/// A parsed heartbeat: a node describing itself and its current neighbors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub own_id: NodeId,
    /// Peers this node dialed (links own -> neighbor).
    pub outbound: Vec<NodeId>,
    /// Peers that dialed this node (links neighbor -> own).
    pub inbound: Vec<NodeId>,
    pub arrived_at: Timestamp,
}

impl HeartbeatRecord {
    pub fn new(own_id: impl Into<NodeId>, arrived_at: Timestamp) -> Self {
        Self {
            own_id: own_id.into(),
            outbound: Vec::new(),
            inbound: Vec::new(),
            arrived_at,
        }
    }

    /// Build from raw identifier bytes, hex-encoding each id.
    pub fn from_raw<B: AsRef<[u8]>>(
        own_id: &[u8],
        outbound: &[B],
        inbound: &[B],
        arrived_at: Timestamp,
    ) -> Self {
        Self {
            own_id: NodeId::from_bytes(own_id),
            outbound: outbound.iter().map(|b| NodeId::from_bytes(b.as_ref())).collect(),
            inbound: inbound.iter().map(|b| NodeId::from_bytes(b.as_ref())).collect(),
            arrived_at,
        }
    }

    pub fn with_outbound<I, N>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.outbound = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inbound<I, N>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.inbound = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Reject records carrying empty identifiers.
    ///
    /// Meant for the decoder in front of the tracker; ingestion itself assumes
    /// well-formed records.
    pub fn validate(&self) -> Result<()> {
        let any_empty = self.own_id.is_empty()
            || self.outbound.iter().any(NodeId::is_empty)
            || self.inbound.iter().any(NodeId::is_empty);
        if any_empty {
            return Err(TrackerError::EmptyNodeId);
        }
        Ok(())
    }
}
