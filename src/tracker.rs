//! Main Tracker struct tying all components together.

use crate::error::{Result, TrackerError};
use crate::ingest::HeartbeatIngester;
use crate::replay::SnapshotReplay;
use crate::store::{LivenessStore, TopologySnapshot};
use crate::subscriptions::{
    EventBatch, EventSink, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
use crate::sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
use crate::types::{Clock, HeartbeatRecord, Revision, SystemClock, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tracker configuration.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// How often peers send heartbeats.
    pub heartbeat_interval: Duration,

    /// TTL = heartbeat_interval * ttl_multiplier.
    pub ttl_multiplier: u32,

    /// Sweep period (None = heartbeat_interval).
    pub sweep_interval: Option<Duration>,

    /// Default buffer for subscriptions created via `subscribe_default`.
    pub subscriber_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            ttl_multiplier: 2,
            sweep_interval: None,
            subscriber_buffer: 1000,
        }
    }
}

impl TrackerConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_ttl_multiplier(mut self, multiplier: u32) -> Self {
        self.ttl_multiplier = multiplier;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn with_subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    /// How long an unrefreshed record survives.
    pub fn ttl(&self) -> Duration {
        self.heartbeat_interval.saturating_mul(self.ttl_multiplier)
    }

    pub fn sweep_period(&self) -> Duration {
        self.sweep_interval.unwrap_or(self.heartbeat_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "heartbeat_interval must be non-zero".into(),
            ));
        }
        if self.ttl_multiplier == 0 {
            return Err(TrackerError::InvalidConfig(
                "ttl_multiplier must be at least 1".into(),
            ));
        }
        if self.sweep_period().is_zero() {
            return Err(TrackerError::InvalidConfig(
                "sweep_interval must be non-zero".into(),
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(TrackerError::InvalidConfig(
                "subscriber_buffer must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub nodes: usize,
    pub links: usize,
    pub subscribers: usize,
    pub revision: Revision,
}

/// The liveness and topology tracker.
///
/// Provides a unified interface for:
/// - Ingesting heartbeats
/// - Sweeping stale nodes and links
/// - Subscribing to transitions with catch-up replay
/// - Taking snapshots
pub struct Tracker {
    config: TrackerConfig,
    store: Arc<LivenessStore>,
    subscriptions: Arc<SubscriptionManager>,
    clock: Arc<dyn Clock>,
    ingester: HeartbeatIngester,
    sweeper: Arc<ExpirySweeper>,
    replay: SnapshotReplay,
    sweeper_handle: Mutex<Option<SweeperHandle>>,
}

/// Fans each batch out to subscribers, then to an extra sink.
struct Tee {
    subscriptions: Arc<SubscriptionManager>,
    extra: Arc<dyn EventSink>,
}

impl EventSink for Tee {
    fn publish(&self, batch: &EventBatch) -> Result<()> {
        self.subscriptions.broadcast(batch);
        self.extra.publish(batch)
    }
}

impl Tracker {
    /// Create a tracker on the system clock.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a tracker with an injected clock.
    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let subscriptions = Arc::new(SubscriptionManager::new());
        let sink: Arc<dyn EventSink> = subscriptions.clone();
        Self::build(config, clock, subscriptions, sink)
    }

    /// Create a tracker that also publishes every batch to `sink`, after the
    /// in-process subscribers.
    pub fn with_sink(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let subscriptions = Arc::new(SubscriptionManager::new());
        let tee: Arc<dyn EventSink> = Arc::new(Tee {
            subscriptions: subscriptions.clone(),
            extra: sink,
        });
        Self::build(config, clock, subscriptions, tee)
    }

    fn build(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        subscriptions: Arc<SubscriptionManager>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LivenessStore::new());
        let ingester = HeartbeatIngester::new(store.clone(), sink.clone());
        let sweeper = Arc::new(ExpirySweeper::new(
            store.clone(),
            sink,
            clock.clone(),
            config.ttl(),
            config.sweep_period(),
        ));
        let replay = SnapshotReplay::new(store.clone(), subscriptions.clone());

        Ok(Self {
            config,
            store,
            subscriptions,
            clock,
            ingester,
            sweeper,
            replay,
            sweeper_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Direct access to the underlying store.
    pub fn store(&self) -> &Arc<LivenessStore> {
        &self.store
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // --- Ingestion ---

    /// Apply a heartbeat and publish its transitions.
    pub fn ingest(&self, record: &HeartbeatRecord) -> EventBatch {
        self.ingester.ingest(record)
    }

    /// Apply a heartbeat stamped with the tracker's clock.
    pub fn ingest_now(&self, mut record: HeartbeatRecord) -> EventBatch {
        record.arrived_at = self.clock.now();
        self.ingester.ingest(&record)
    }

    // --- Sweeping ---

    /// Run one sweep tick at the clock's current time.
    pub fn sweep(&self) -> SweepReport {
        self.sweeper.sweep()
    }

    /// Run one sweep tick at an explicit time.
    pub fn sweep_at(&self, now: Timestamp) -> SweepReport {
        self.sweeper.sweep_at(now)
    }

    /// Start the background sweeper. No-op if already running.
    pub fn start_sweeper(&self) -> Result<()> {
        let mut handle = self.sweeper_handle.lock();
        if handle.as_ref().is_some_and(SweeperHandle::is_running) {
            return Ok(());
        }
        *handle = Some(Arc::clone(&self.sweeper).spawn()?);
        info!(
            period = ?self.config.sweep_period(),
            ttl = ?self.config.ttl(),
            "background sweeper running"
        );
        Ok(())
    }

    /// Stop the background sweeper and wait for it.
    pub fn stop_sweeper(&self) -> Result<()> {
        let handle = self.sweeper_handle.lock().take();
        match handle {
            Some(handle) => handle.shutdown(),
            None => Ok(()),
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper_handle
            .lock()
            .as_ref()
            .is_some_and(SweeperHandle::is_running)
    }

    // --- Observation ---

    /// Current nodes and links.
    pub fn snapshot(&self) -> TopologySnapshot {
        self.store.snapshot()
    }

    /// Subscribe with catch-up replay (unless disabled in `config`).
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle> {
        self.replay.subscribe(config)
    }

    /// Subscribe with defaults and the configured buffer size.
    pub fn subscribe_default(&self) -> Result<SubscriptionHandle> {
        self.subscribe(SubscriptionConfig {
            buffer_size: self.config.subscriber_buffer,
            ..Default::default()
        })
    }

    /// Re-send current state to a subscriber that suspects it missed events.
    pub fn resync(&self, id: SubscriptionId) -> Result<usize> {
        self.replay.resync(id)
    }

    /// Replay current state into an arbitrary sink.
    pub fn replay_into(&self, sink: &dyn EventSink) -> Result<TopologySnapshot> {
        self.replay.replay_into(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    pub fn stats(&self) -> TrackerStats {
        let snapshot = self.store.snapshot();
        TrackerStats {
            nodes: snapshot.node_count(),
            links: snapshot.link_count(),
            subscribers: self.subscriptions.subscription_count(),
            revision: snapshot.revision,
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        // Join the sweeper thread before the store goes away.
        let _ = self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::{FeedEvent, TopologyEvent};
    use crate::types::{ManualClock, NodeId};
    use crossbeam_channel::bounded;

    fn test_tracker() -> (Tracker, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_secs(0));
        let tracker = Tracker::with_clock(
            TrackerConfig::default().with_heartbeat_interval(Duration::from_secs(5)),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (tracker, clock)
    }

    #[test]
    fn test_config_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(10));
        assert_eq!(config.sweep_period(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_interval = TrackerConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert!(matches!(
            Tracker::new(zero_interval),
            Err(TrackerError::InvalidConfig(_))
        ));

        let zero_multiplier = TrackerConfig::default().with_ttl_multiplier(0);
        assert!(zero_multiplier.validate().is_err());

        let zero_sweep = TrackerConfig::default().with_sweep_interval(Duration::ZERO);
        assert!(zero_sweep.validate().is_err());

        let zero_buffer = TrackerConfig::default().with_subscriber_buffer(0);
        assert!(zero_buffer.validate().is_err());
    }

    #[test]
    fn test_ingest_now_uses_clock() {
        let (tracker, clock) = test_tracker();
        clock.set(Timestamp::from_secs(42));

        tracker.ingest_now(HeartbeatRecord::new("a", Timestamp(0)));
        assert_eq!(
            tracker.store().last_seen(&NodeId::new("a")),
            Some(Timestamp::from_secs(42))
        );
    }

    #[test]
    fn test_subscriber_sees_ingest_and_sweep() {
        let (tracker, clock) = test_tracker();
        let handle = tracker.subscribe_default().unwrap();
        let initial = handle.drain();
        assert!(matches!(initial.as_slice(), [FeedEvent::CaughtUp { .. }]));

        tracker.ingest_now(HeartbeatRecord::new("a", Timestamp(0)));
        clock.advance(Duration::from_secs(11));
        tracker.sweep();

        let events: Vec<_> = handle
            .drain()
            .iter()
            .filter_map(|e| e.topology().cloned())
            .collect();
        let a = NodeId::new("a");
        assert_eq!(
            events,
            vec![
                TopologyEvent::AddNode { id: a.clone() },
                TopologyEvent::NodeOnline { id: a.clone() },
                TopologyEvent::NodeOffline { id: a.clone() },
                TopologyEvent::RemoveNode { id: a },
            ]
        );
    }

    #[test]
    fn test_with_sink_tees_batches() {
        let (tx, rx) = bounded::<EventBatch>(8);
        let tracker = Tracker::with_sink(
            TrackerConfig::default(),
            Arc::new(ManualClock::default()),
            Arc::new(tx),
        )
        .unwrap();
        let handle = tracker.subscribe_default().unwrap();

        tracker.ingest(&HeartbeatRecord::new("a", Timestamp(0)));
        assert_eq!(rx.try_recv().unwrap().len(), 2);
        assert_eq!(handle.drain().len(), 3);
    }

    #[test]
    fn test_stats() {
        let (tracker, _) = test_tracker();
        tracker.ingest(&HeartbeatRecord::new("a", Timestamp(0)).with_outbound(["b"]));
        let _handle = tracker.subscribe_default().unwrap();

        let stats = tracker.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.links, 1);
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.revision, Revision(1));
    }

    #[test]
    fn test_start_stop_sweeper() {
        let (tracker, _) = test_tracker();
        tracker.start_sweeper().unwrap();
        assert!(tracker.sweeper_running());
        tracker.start_sweeper().unwrap();

        tracker.stop_sweeper().unwrap();
        assert!(!tracker.sweeper_running());
        tracker.stop_sweeper().unwrap();
    }
}
