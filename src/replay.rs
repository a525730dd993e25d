//! Snapshot replay for observers that attach mid-stream.

use crate::error::Result;
use crate::store::{LivenessStore, TopologySnapshot};
use crate::subscriptions::{
    EventBatch, EventSink, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager, TopologyEvent,
};
use std::sync::Arc;
use tracing::debug;

/// Current state collapsed to its minimal event form: `AddNode` + `NodeOnline`
/// per node, then `ConnectNodes` per link.
pub fn replay_events(snapshot: &TopologySnapshot) -> Vec<TopologyEvent> {
    let mut events = Vec::with_capacity(2 * snapshot.nodes.len() + snapshot.links.len());
    for id in &snapshot.nodes {
        events.push(TopologyEvent::AddNode { id: id.clone() });
        events.push(TopologyEvent::NodeOnline { id: id.clone() });
    }
    events.extend(snapshot.links.iter().map(TopologyEvent::connect));
    events
}

/// Brings new subscribers up to date and hands them over to the live feed.
///
/// The subscriber is registered before the snapshot is taken, and live batches
/// are stamped with store revisions, so every transition reaches it exactly
/// once: either folded into the replay or delivered live afterwards.
pub struct SnapshotReplay {
    store: Arc<LivenessStore>,
    subscriptions: Arc<SubscriptionManager>,
}

impl SnapshotReplay {
    pub fn new(store: Arc<LivenessStore>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            store,
            subscriptions,
        }
    }

    /// Register a subscriber, replay current state to it if configured, and
    /// switch it to live delivery.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle> {
        let replay = config.replay;
        let handle = self.subscriptions.register(config);

        if replay {
            self.replay_to(handle.id)?;
        } else {
            let revision = self.store.revision();
            self.subscriptions.complete_replay(handle.id, revision, &[])?;
        }

        Ok(handle)
    }

    /// Replay a fresh snapshot to a registered subscriber. Returns the number
    /// of events delivered, including held live events.
    pub fn replay_to(&self, id: SubscriptionId) -> Result<usize> {
        let snapshot = self.store.snapshot();
        let events = replay_events(&snapshot);
        debug!(
            subscription = id.0,
            nodes = snapshot.node_count(),
            links = snapshot.link_count(),
            revision = ?snapshot.revision,
            "replaying snapshot"
        );
        self.subscriptions
            .complete_replay(id, snapshot.revision, &events)
    }

    /// Tell a live subscriber to reset, then replay current state to it.
    pub fn resync(&self, id: SubscriptionId) -> Result<usize> {
        self.subscriptions.begin_resync(id, self.store.revision())?;
        self.replay_to(id)
    }

    /// Publish a replay burst into an arbitrary sink as one batch.
    ///
    /// No stitching to the live feed happens here; the caller gets the
    /// snapshot back to line it up with its own stream.
    pub fn replay_into(&self, sink: &dyn EventSink) -> Result<TopologySnapshot> {
        let snapshot = self.store.snapshot();
        let batch = EventBatch::new(snapshot.revision, replay_events(&snapshot));
        sink.publish(&batch)?;
        Ok(snapshot)
    }
}
