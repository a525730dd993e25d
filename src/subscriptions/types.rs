//! Event and subscription types.

use crate::types::{LinkId, NodeId, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A topology transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyEvent {
    /// First time the node is known.
    AddNode { id: NodeId },
    NodeOnline { id: NodeId },
    NodeOffline { id: NodeId },
    /// Node forgotten after going stale.
    RemoveNode { id: NodeId },
    /// A directed link appeared.
    ConnectNodes { from: NodeId, to: NodeId },
    /// A directed link went stale or lost an endpoint.
    DisconnectNodes { from: NodeId, to: NodeId },
}

/// Discriminant of [`TopologyEvent`], for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AddNode,
    NodeOnline,
    NodeOffline,
    RemoveNode,
    ConnectNodes,
    DisconnectNodes,
}

impl TopologyEvent {
    pub fn connect(link: &LinkId) -> Self {
        TopologyEvent::ConnectNodes {
            from: link.from.clone(),
            to: link.to.clone(),
        }
    }

    pub fn disconnect(link: &LinkId) -> Self {
        TopologyEvent::DisconnectNodes {
            from: link.from.clone(),
            to: link.to.clone(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TopologyEvent::AddNode { .. } => EventKind::AddNode,
            TopologyEvent::NodeOnline { .. } => EventKind::NodeOnline,
            TopologyEvent::NodeOffline { .. } => EventKind::NodeOffline,
            TopologyEvent::RemoveNode { .. } => EventKind::RemoveNode,
            TopologyEvent::ConnectNodes { .. } => EventKind::ConnectNodes,
            TopologyEvent::DisconnectNodes { .. } => EventKind::DisconnectNodes,
        }
    }

    /// The node a node-level event is about.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            TopologyEvent::AddNode { id }
            | TopologyEvent::NodeOnline { id }
            | TopologyEvent::NodeOffline { id }
            | TopologyEvent::RemoveNode { id } => Some(id),
            _ => None,
        }
    }

    /// The link a link-level event is about.
    pub fn link(&self) -> Option<LinkId> {
        match self {
            TopologyEvent::ConnectNodes { from, to }
            | TopologyEvent::DisconnectNodes { from, to } => {
                Some(LinkId::new(from.clone(), to.clone()))
            }
            _ => None,
        }
    }

    fn mentions(&self, node: &NodeId) -> bool {
        match self {
            TopologyEvent::ConnectNodes { from, to }
            | TopologyEvent::DisconnectNodes { from, to } => from == node || to == node,
            _ => self.node() == Some(node),
        }
    }
}

/// Events produced by one committed store transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    pub revision: Revision,
    pub events: Vec<TopologyEvent>,
}

impl EventBatch {
    pub fn new(revision: Revision, events: Vec<TopologyEvent>) -> Self {
        Self { revision, events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max unread live events before dropping subscriber. Also caps what
    /// is held back while a replay is in progress; the replay itself is
    /// not counted.
    /// Default: 1000
    pub buffer_size: usize,

    /// Replay current state before going live.
    /// Default: true
    pub replay: bool,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            replay: true,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions. Applies to replay and live events alike.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Event kinds to deliver (None = all kinds).
    pub kinds: Option<BTreeSet<EventKind>>,

    /// Only events mentioning one of these nodes (None = every node).
    pub nodes: Option<BTreeSet<NodeId>>,
}

impl SubscriptionFilter {
    /// Everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Node lifecycle events only.
    pub fn nodes_only() -> Self {
        Self {
            kinds: Some(
                [
                    EventKind::AddNode,
                    EventKind::NodeOnline,
                    EventKind::NodeOffline,
                    EventKind::RemoveNode,
                ]
                .into_iter()
                .collect(),
            ),
            nodes: None,
        }
    }

    /// Link events only.
    pub fn links_only() -> Self {
        Self {
            kinds: Some(
                [EventKind::ConnectNodes, EventKind::DisconnectNodes]
                    .into_iter()
                    .collect(),
            ),
            nodes: None,
        }
    }

    /// Events touching any of the given nodes.
    pub fn around<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        Self {
            kinds: None,
            nodes: Some(nodes.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, event: &TopologyEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ref nodes) = self.nodes {
            return nodes.iter().any(|n| event.mentions(n));
        }

        true
    }
}

/// What a subscriber receives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A transition, replayed or live.
    Topology {
        revision: Revision,
        event: TopologyEvent,
    },

    /// Discard local state; a fresh replay follows.
    Resync { revision: Revision },

    /// Replay finished, now streaming live.
    CaughtUp { revision: Revision },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl FeedEvent {
    pub fn topology(&self) -> Option<&TopologyEvent> {
        match self {
            FeedEvent::Topology { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle to receive a subscription's events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<FeedEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<FeedEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<FeedEvent> {
        self.receiver.try_iter().collect()
    }
}
