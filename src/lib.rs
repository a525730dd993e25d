//! # Meshwatch
//!
//! Live liveness and topology tracking for a peer-to-peer network, fed by
//! periodic heartbeat reports.
//!
//! ## Core Concepts
//!
//! - **Heartbeats**: A node naming itself plus its outbound and inbound neighbors
//! - **Store**: Last-seen times for nodes and directed links, behind one lock
//! - **Transitions**: Edge-triggered events, emitted once per state change
//! - **Sweeper**: Evicts anything not refreshed within the TTL
//! - **Replay**: Late subscribers get current state, then the live feed
//!
//! ## Example
//!
//! ```ignore
//! use meshwatch::{HeartbeatRecord, Timestamp, Tracker, TrackerConfig};
//!
//! let tracker = Tracker::new(TrackerConfig::default())?;
//! tracker.start_sweeper()?;
//!
//! let feed = tracker.subscribe_default()?;
//!
//! tracker.ingest(
//!     &HeartbeatRecord::new("a1", Timestamp::now())
//!         .with_outbound(["b2"])
//!         .with_inbound(["c3"]),
//! );
//!
//! let snapshot = tracker.snapshot();
//! ```

pub mod error;
pub mod ingest;
pub mod replay;
pub mod store;
pub mod subscriptions;
pub mod sweeper;
pub mod tracker;
pub mod types;

// Re-exports
pub use error::{Result, TrackerError};
pub use ingest::HeartbeatIngester;
pub use replay::{replay_events, SnapshotReplay};
pub use store::{Eviction, LivenessStore, StoreTxn, TopologySnapshot};
pub use subscriptions::{
    DropReason, EventBatch, EventKind, EventSink, FeedEvent, NullSink, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId, SubscriptionManager, TopologyEvent,
};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
pub use tracker::{Tracker, TrackerConfig, TrackerStats};
pub use types::*;
