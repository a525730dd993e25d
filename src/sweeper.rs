//! Time-based expiry of stale nodes and links.

use crate::error::{Result, TrackerError};
use crate::store::{Eviction, LivenessStore};
use crate::subscriptions::{EventSink, TopologyEvent};
use crate::types::{Clock, LinkId, NodeId, Revision, Timestamp};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one sweep tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records last seen before this were evicted.
    pub cutoff: Timestamp,
    pub nodes: BTreeSet<NodeId>,
    pub links: BTreeSet<LinkId>,
    pub revision: Revision,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// Evicts records older than the TTL and publishes the matching
/// `DisconnectNodes`, `NodeOffline` and `RemoveNode` transitions.
pub struct ExpirySweeper {
    store: Arc<LivenessStore>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<LivenessStore>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        period: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            ttl,
            period,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One tick at the injected clock's "now".
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(self.clock.now())
    }

    /// One tick at an explicit time.
    ///
    /// Link disconnects come before node removals in the published batch, so
    /// an observer never holds a link whose endpoint is already gone.
    pub fn sweep_at(&self, now: Timestamp) -> SweepReport {
        let cutoff = now.saturating_sub(self.ttl);

        let mut txn = self.store.begin();
        let eviction = txn.evict_stale_before(cutoff);
        let batch = txn.commit_and_publish(eviction_events(&eviction), &self.sink);

        if !eviction.is_empty() {
            info!(
                removed_nodes = eviction.nodes.len(),
                removed_links = eviction.links.len(),
                cutoff = ?cutoff,
                "evicted stale topology"
            );
        }

        SweepReport {
            cutoff,
            nodes: eviction.nodes,
            links: eviction.links,
            revision: batch.revision,
        }
    }

    /// Run on a background thread every `period` until the handle is shut
    /// down or dropped.
    pub fn spawn(self: Arc<Self>) -> Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(self.period);
        let period = self.period;

        let thread = thread::Builder::new()
            .name("meshwatch-sweeper".into())
            .spawn(move || {
                info!(?period, ttl = ?self.ttl, "sweeper started");
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let outcome = catch_unwind(AssertUnwindSafe(|| self.sweep()));
                            match outcome {
                                Ok(report) => debug!(
                                    evicted = report.nodes.len() + report.links.len(),
                                    "sweep tick"
                                ),
                                Err(_) => warn!("sweep tick panicked, continuing"),
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                info!("sweeper stopped");
            })?;

        Ok(SweeperHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Disconnects first, then offline and removal per node.
fn eviction_events(eviction: &Eviction) -> Vec<TopologyEvent> {
    let mut events = Vec::with_capacity(eviction.links.len() + 2 * eviction.nodes.len());
    events.extend(eviction.links.iter().map(TopologyEvent::disconnect));
    for id in &eviction.nodes {
        events.push(TopologyEvent::NodeOffline { id: id.clone() });
        events.push(TopologyEvent::RemoveNode { id: id.clone() });
    }
    events
}

/// Owns the running sweeper thread.
pub struct SweeperHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for the thread to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| TrackerError::SweeperPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
