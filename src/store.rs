//! Liveness store: last-seen timestamps for nodes and directed links.
//!
//! Both maps live behind one `RwLock`, so a node touch and the link touches of
//! the same heartbeat, or a sweep with its cascading link removals, are never
//! observed half-applied. Mutations go through a [`StoreTxn`]; committing it
//! assigns the next [`Revision`] and queues the transaction's events in an
//! outbox while the write lock is still held. Queue order is therefore
//! revision order. The outbox is drained to sinks after the write lock is
//! released, by one committer at a time, so a slow sink never holds up
//! writers or readers.

use crate::subscriptions::{EventBatch, EventSink, TopologyEvent};
use crate::types::{LinkId, NodeId, Revision, Timestamp};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default)]
struct StoreState {
    nodes: HashMap<NodeId, Timestamp>,
    links: HashMap<LinkId, Timestamp>,
    revision: Revision,
}

/// Committed batches waiting for their sinks.
#[derive(Default)]
struct Outbox {
    queue: Mutex<VecDeque<(Arc<dyn EventSink>, EventBatch)>>,
    /// Held by the committer currently draining `queue`.
    draining: Mutex<()>,
}

impl Outbox {
    /// Publish queued batches in order, unless another thread already is.
    ///
    /// The active drainer keeps going until the queue is empty, including
    /// batches queued by committers that found it busy.
    fn drain(&self) {
        loop {
            let Some(turn) = self.draining.try_lock() else {
                return;
            };

            loop {
                let next = self.queue.lock().pop_front();
                let Some((sink, batch)) = next else {
                    break;
                };
                if let Err(e) = sink.publish(&batch) {
                    warn!(error = %e, revision = ?batch.revision, "failed to publish batch");
                }
            }

            drop(turn);
            // A batch queued between the last pop and the release would
            // otherwise wait for the next commit.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }
}

/// Thread-safe node and link liveness state.
#[derive(Default)]
pub struct LivenessStore {
    state: RwLock<StoreState>,
    outbox: Outbox,
}

/// Immutable point-in-time copy of the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub nodes: BTreeSet<NodeId>,
    pub links: BTreeSet<LinkId>,
    /// Last revision reflected in this copy.
    pub revision: Revision,
}

impl TopologySnapshot {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn contains_link(&self, from: &NodeId, to: &NodeId) -> bool {
        self.links.contains(&LinkId::new(from.clone(), to.clone()))
    }
}

/// What a sweep removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Eviction {
    pub nodes: BTreeSet<NodeId>,
    /// Stale links plus links cascaded from evicted endpoints.
    pub links: BTreeSet<LinkId>,
}

impl Eviction {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// An open write section on the store.
///
/// Holds the write lock until committed.
#[must_use = "a transaction must be committed to get a revision"]
pub struct StoreTxn<'a> {
    store: &'a LivenessStore,
    state: RwLockWriteGuard<'a, StoreState>,
}

impl<'a> StoreTxn<'a> {
    /// Insert or refresh a node. Returns true if the node was absent.
    ///
    /// `last_seen` never moves backwards on an out-of-order arrival.
    pub fn touch_node(&mut self, id: &NodeId, at: Timestamp) -> bool {
        touch(&mut self.state.nodes, id, at)
    }

    /// Insert or refresh a directed link. Returns true if the link was absent.
    ///
    /// Both endpoints must have been touched first in the same transaction.
    pub fn touch_link(&mut self, from: &NodeId, to: &NodeId, at: Timestamp) -> bool {
        for endpoint in [from, to] {
            if !self.state.nodes.contains_key(endpoint) {
                warn!(node = %endpoint, "link endpoint touched before its node, inserting");
                self.state.nodes.insert(endpoint.clone(), at);
            }
        }

        let key = LinkId::new(from.clone(), to.clone());
        touch(&mut self.state.links, &key, at)
    }

    /// Remove every record last seen before `cutoff`.
    ///
    /// Links whose endpoint is evicted go in the same pass even if their own
    /// timestamp is fresh, so no link ever references a missing node.
    pub fn evict_stale_before(&mut self, cutoff: Timestamp) -> Eviction {
        let mut eviction = Eviction::default();
        let state = &mut *self.state;

        state.links.retain(|link, seen| {
            if *seen < cutoff {
                eviction.links.insert(link.clone());
                false
            } else {
                true
            }
        });

        state.nodes.retain(|node, seen| {
            if *seen < cutoff {
                eviction.nodes.insert(node.clone());
                false
            } else {
                true
            }
        });

        if !eviction.nodes.is_empty() {
            state.links.retain(|link, _| {
                let dangling =
                    eviction.nodes.contains(&link.from) || eviction.nodes.contains(&link.to);
                if dangling {
                    eviction.links.insert(link.clone());
                }
                !dangling
            });
        }

        eviction
    }

    /// Finish the transaction without publishing anything.
    pub fn commit(self) -> Revision {
        let StoreTxn { mut state, .. } = self;
        state.revision = state.revision.next();
        state.revision
    }

    /// Finish the transaction and publish its events to `sink`.
    ///
    /// The batch is queued before the write lock is released and published
    /// after, in revision order with every other committed batch. If another
    /// committer is busy draining the outbox, this returns without waiting
    /// and that committer publishes the batch.
    pub fn commit_and_publish(
        self,
        events: Vec<TopologyEvent>,
        sink: &Arc<dyn EventSink>,
    ) -> EventBatch {
        let StoreTxn { store, mut state } = self;
        state.revision = state.revision.next();
        let batch = EventBatch::new(state.revision, events);
        if !batch.is_empty() {
            store
                .outbox
                .queue
                .lock()
                .push_back((Arc::clone(sink), batch.clone()));
        }
        drop(state);

        store.outbox.drain();
        batch
    }
}

fn touch<K>(map: &mut HashMap<K, Timestamp>, key: &K, at: Timestamp) -> bool
where
    K: Clone + Eq + std::hash::Hash,
{
    if let Some(seen) = map.get_mut(key) {
        if at > *seen {
            *seen = at;
        }
        false
    } else {
        map.insert(key.clone(), at);
        true
    }
}

impl LivenessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a write section.
    pub fn begin(&self) -> StoreTxn<'_> {
        StoreTxn {
            store: self,
            state: self.state.write(),
        }
    }

    /// Insert or refresh a node in its own transaction.
    pub fn touch_node(&self, id: &NodeId, at: Timestamp) -> bool {
        let mut txn = self.begin();
        let is_new = txn.touch_node(id, at);
        txn.commit();
        is_new
    }

    /// Insert or refresh a link (and its endpoints) in its own transaction.
    pub fn touch_link(&self, from: &NodeId, to: &NodeId, at: Timestamp) -> bool {
        let mut txn = self.begin();
        txn.touch_node(from, at);
        txn.touch_node(to, at);
        let is_new = txn.touch_link(from, to, at);
        txn.commit();
        is_new
    }

    /// Evict stale records in its own transaction.
    pub fn evict_stale_before(&self, cutoff: Timestamp) -> Eviction {
        let mut txn = self.begin();
        let eviction = txn.evict_stale_before(cutoff);
        txn.commit();
        eviction
    }

    /// Consistent copy of current nodes and links.
    pub fn snapshot(&self) -> TopologySnapshot {
        let state = self.state.read();
        TopologySnapshot {
            nodes: state.nodes.keys().cloned().collect(),
            links: state.links.keys().cloned().collect(),
            revision: state.revision,
        }
    }

    pub fn last_seen(&self, id: &NodeId) -> Option<Timestamp> {
        self.state.read().nodes.get(id).copied()
    }

    pub fn link_last_seen(&self, link: &LinkId) -> Option<Timestamp> {
        self.state.read().links.get(link).copied()
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.state.read().nodes.contains_key(id)
    }

    pub fn contains_link(&self, link: &LinkId) -> bool {
        self.state.read().links.contains_key(link)
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.state.read().links.len()
    }

    /// Revision of the latest commit.
    pub fn revision(&self) -> Revision {
        self.state.read().revision
    }
}
