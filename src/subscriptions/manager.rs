//! Subscription manager for fanning topology events out to observers.

use crate::error::{Result, TrackerError};
use crate::types::Revision;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::sink::EventSink;
use super::types::{
    DropReason, EventBatch, FeedEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    TopologyEvent,
};

enum Phase {
    /// Waiting for a replay; live batches are held here.
    Replaying {
        pending: Vec<EventBatch>,
        pending_events: usize,
    },
    /// Streaming batches newer than `since`. The first `burst_end` sends
    /// were the catch-up burst and do not count against the buffer.
    Live { since: Revision, burst_end: u64 },
}

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<FeedEvent>,
    /// Events pushed into `sender` so far.
    sent: AtomicU64,
    phase: Mutex<Phase>,
}

enum SendFailure {
    Full,
    Disconnected,
}

impl SendFailure {
    fn reason(&self) -> DropReason {
        match self {
            SendFailure::Full => DropReason::BufferOverflow,
            SendFailure::Disconnected => DropReason::Disconnected,
        }
    }
}

impl Subscription {
    fn try_send(&self, event: FeedEvent) -> std::result::Result<(), SendFailure> {
        self.sender
            .send(event)
            .map_err(|_| SendFailure::Disconnected)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Live events still waiting in the channel, not counting whatever is
    /// left of the catch-up burst.
    fn live_backlog(&self, burst_end: u64) -> usize {
        let sent = self.sent.load(Ordering::Relaxed);
        let queued = self.sender.len() as u64;
        let received = sent.saturating_sub(queued);
        let burst_left = burst_end.saturating_sub(received);
        queued.saturating_sub(burst_left) as usize
    }

    /// Send the filtered events of a batch.
    fn send_batch(&self, batch: &EventBatch) -> std::result::Result<usize, SendFailure> {
        let mut sent = 0;
        for event in batch
            .events
            .iter()
            .filter(|e| self.config.filter.matches(e))
        {
            self.try_send(FeedEvent::Topology {
                revision: batch.revision,
                event: event.clone(),
            })?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Route a live batch according to the phase.
    fn offer(&self, batch: &EventBatch) -> std::result::Result<(), SendFailure> {
        let mut phase = self.phase.lock();
        match &mut *phase {
            Phase::Replaying {
                pending,
                pending_events,
            } => {
                *pending_events += batch.len();
                if *pending_events > self.config.buffer_size {
                    return Err(SendFailure::Full);
                }
                pending.push(batch.clone());
                Ok(())
            }
            Phase::Live { since, burst_end } => {
                if batch.revision <= *since {
                    return Ok(());
                }
                let matching = batch
                    .events
                    .iter()
                    .filter(|e| self.config.filter.matches(e))
                    .count();
                if matching == 0 {
                    return Ok(());
                }
                if self.live_backlog(*burst_end) + matching > self.config.buffer_size {
                    return Err(SendFailure::Full);
                }
                self.send_batch(batch)?;
                Ok(())
            }
        }
    }
}

/// Manages subscriptions and broadcasts events.
///
/// Each subscriber owns a channel. The catch-up burst is delivered whole,
/// however large; after that a subscriber whose unread live events would
/// exceed `buffer_size`, or whose receiver is gone, is dropped. Nobody else
/// is affected.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription that is not yet live.
    ///
    /// Broadcasts are held until [`complete_replay`](Self::complete_replay)
    /// delivers the catch-up burst, so take the replay snapshot *after* this.
    pub fn register(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();

        let subscription = Subscription {
            config,
            sender,
            sent: AtomicU64::new(0),
            phase: Mutex::new(Phase::Replaying {
                pending: Vec::new(),
                pending_events: 0,
            }),
        };

        self.subscriptions.write().insert(id, subscription);
        debug!(subscription = id.0, "subscription registered");

        SubscriptionHandle { id, receiver }
    }

    /// Deliver a catch-up burst reflecting state at `revision`, then go live.
    ///
    /// Held batches at or below `revision` are already part of the burst and
    /// are skipped; newer ones follow it, then `CaughtUp`. Runs under the
    /// write lock so no broadcast or other replay interleaves.
    pub fn complete_replay(
        &self,
        id: SubscriptionId,
        revision: Revision,
        events: &[TopologyEvent],
    ) -> Result<usize> {
        let mut subs = self.subscriptions.write();
        let sub = subs
            .get(&id)
            .ok_or(TrackerError::SubscriptionNotFound(id))?;

        match Self::deliver_replay(sub, revision, events) {
            Ok(sent) => {
                debug!(subscription = id.0, sent, ?revision, "subscription caught up");
                Ok(sent)
            }
            Err(failure) => {
                if let Some(sub) = subs.remove(&id) {
                    Self::notify_dropped(&sub, failure.reason());
                }
                warn!(subscription = id.0, "subscriber dropped during replay");
                Err(TrackerError::SubscriptionDropped(id))
            }
        }
    }

    fn deliver_replay(
        sub: &Subscription,
        revision: Revision,
        events: &[TopologyEvent],
    ) -> std::result::Result<usize, SendFailure> {
        let mut phase = sub.phase.lock();
        let replayed = EventBatch::new(revision, events.to_vec());
        let mut sent = sub.send_batch(&replayed)?;

        if let Phase::Replaying { pending, .. } = &mut *phase {
            for batch in pending.drain(..).filter(|b| b.revision > revision) {
                sent += sub.send_batch(&batch)?;
            }
        }

        sub.try_send(FeedEvent::CaughtUp { revision })?;
        *phase = Phase::Live {
            since: revision,
            burst_end: sub.sent.load(Ordering::Relaxed),
        };
        Ok(sent)
    }

    /// Put a live subscription back into replay mode and tell it to reset.
    pub fn begin_resync(&self, id: SubscriptionId, revision: Revision) -> Result<()> {
        let mut subs = self.subscriptions.write();
        let sub = subs
            .get(&id)
            .ok_or(TrackerError::SubscriptionNotFound(id))?;

        let mut phase = sub.phase.lock();
        if let Err(failure) = sub.try_send(FeedEvent::Resync { revision }) {
            drop(phase);
            if let Some(sub) = subs.remove(&id) {
                Self::notify_dropped(&sub, failure.reason());
            }
            return Err(TrackerError::SubscriptionDropped(id));
        }
        *phase = Phase::Replaying {
            pending: Vec::new(),
            pending_events: 0,
        };
        Ok(())
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            Self::notify_dropped(&sub, DropReason::Unsubscribed);
            debug!(subscription = id.0, "unsubscribed");
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(&id)
    }

    /// Fan a batch out to every subscriber. Drops subscribers that fail to receive.
    pub fn broadcast(&self, batch: &EventBatch) {
        if batch.is_empty() {
            return;
        }

        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if let Err(failure) = sub.offer(batch) {
                    to_remove.push((*id, failure.reason()));
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, ?reason, "dropping slow subscriber");
                    Self::notify_dropped(&sub, reason);
                }
            }
        }
    }

    /// Best effort; the receiver may be gone.
    fn notify_dropped(sub: &Subscription, reason: DropReason) {
        let _ = sub.sender.send(FeedEvent::Dropped { reason });
    }
}

impl EventSink for SubscriptionManager {
    fn publish(&self, batch: &EventBatch) -> Result<()> {
        self.broadcast(batch);
        Ok(())
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
