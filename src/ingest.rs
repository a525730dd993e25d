//! Heartbeat ingestion: turn one heartbeat into store updates and transitions.

use crate::store::{LivenessStore, StoreTxn};
use crate::subscriptions::{EventBatch, EventSink, TopologyEvent};
use crate::types::{HeartbeatRecord, LinkId, NodeId, Timestamp};
use std::sync::Arc;
use tracing::{debug, trace};

/// Applies heartbeats to a [`LivenessStore`] and publishes the resulting
/// transitions.
///
/// Events are edge-triggered: a node yields `AddNode` + `NodeOnline` only when
/// it was absent, a link yields `ConnectNodes` only when it was absent.
/// Refreshing heartbeats emit nothing.
pub struct HeartbeatIngester {
    store: Arc<LivenessStore>,
    sink: Arc<dyn EventSink>,
}

impl HeartbeatIngester {
    pub fn new(store: Arc<LivenessStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Apply one heartbeat and publish what changed.
    ///
    /// Returns the batch. The whole heartbeat is one store transaction; the
    /// sink runs after the store lock is released, possibly on another
    /// committing thread.
    pub fn ingest(&self, record: &HeartbeatRecord) -> EventBatch {
        debug!(
            node = %record.own_id,
            outbound = record.outbound.len(),
            inbound = record.inbound.len(),
            "heartbeat"
        );

        let mut txn = self.store.begin();
        let events = apply(&mut txn, record);
        let batch = txn.commit_and_publish(events, &self.sink);

        for event in &batch.events {
            trace!(?event, revision = ?batch.revision, "transition");
        }

        batch
    }
}

/// Apply a heartbeat inside an open transaction, returning the transitions in
/// the order they happened.
fn apply(txn: &mut StoreTxn<'_>, record: &HeartbeatRecord) -> Vec<TopologyEvent> {
    let own = &record.own_id;
    let at = record.arrived_at;
    let mut events = Vec::new();

    touch_node(txn, own, at, &mut events);

    for neighbor in &record.outbound {
        link(txn, own, neighbor, neighbor, at, &mut events);
    }

    for neighbor in &record.inbound {
        link(txn, neighbor, own, neighbor, at, &mut events);
    }

    events
}

fn touch_node(txn: &mut StoreTxn<'_>, id: &NodeId, at: Timestamp, events: &mut Vec<TopologyEvent>) {
    if txn.touch_node(id, at) {
        events.push(TopologyEvent::AddNode { id: id.clone() });
        events.push(TopologyEvent::NodeOnline { id: id.clone() });
    }
}

/// Touch `neighbor`, then the directed link `from -> to`.
fn link(
    txn: &mut StoreTxn<'_>,
    from: &NodeId,
    to: &NodeId,
    neighbor: &NodeId,
    at: Timestamp,
    events: &mut Vec<TopologyEvent>,
) {
    let link = LinkId::new(from.clone(), to.clone());
    if link.is_self_loop() {
        debug!(node = %from, "ignoring self-reference in heartbeat");
        return;
    }

    touch_node(txn, neighbor, at, events);
    if txn.touch_link(from, to, at) {
        events.push(TopologyEvent::connect(&link));
    }
}
