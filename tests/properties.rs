use meshwatch::{
    replay_events, FeedEvent, HeartbeatRecord, LinkId, ManualClock, NodeId, SubscriptionConfig,
    Timestamp, TopologyEvent, TopologySnapshot, Tracker, TrackerConfig,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(10);

fn peer(n: u8) -> NodeId {
    NodeId::new(format!("p{n}"))
}

#[derive(Clone, Debug)]
enum Step {
    Heartbeat {
        own: u8,
        outbound: Vec<u8>,
        inbound: Vec<u8>,
        advance_secs: u64,
    },
    Sweep {
        advance_secs: u64,
    },
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (
            0..6u8,
            prop::collection::vec(0..6u8, 0..4),
            prop::collection::vec(0..6u8, 0..4),
            0..6u64,
        )
            .prop_map(|(own, outbound, inbound, advance_secs)| Step::Heartbeat {
                own,
                outbound,
                inbound,
                advance_secs,
            }),
        1 => (0..15u64).prop_map(|advance_secs| Step::Sweep { advance_secs }),
    ]
}

/// Last-seen bookkeeping the store is expected to agree with.
#[derive(Default)]
struct Model {
    nodes: BTreeMap<NodeId, Timestamp>,
    links: BTreeMap<LinkId, Timestamp>,
}

impl Model {
    fn heartbeat(&mut self, own: u8, outbound: &[u8], inbound: &[u8], at: Timestamp) {
        self.nodes.insert(peer(own), at);
        let out = outbound.iter().map(|&n| (own, n));
        let inb = inbound.iter().map(|&n| (n, own));
        for (from, to) in out.chain(inb).filter(|(a, b)| a != b) {
            self.nodes.insert(peer(from), at);
            self.nodes.insert(peer(to), at);
            self.links.insert(LinkId::new(peer(from), peer(to)), at);
        }
    }

    fn sweep(&mut self, now: Timestamp) {
        let cutoff = now.saturating_sub(TTL);
        self.nodes.retain(|_, seen| *seen >= cutoff);
        let nodes = &self.nodes;
        self.links.retain(|link, seen| {
            *seen >= cutoff && nodes.contains_key(&link.from) && nodes.contains_key(&link.to)
        });
    }
}

fn tracker() -> (Tracker, ManualClock) {
    let clock = ManualClock::new(Timestamp::from_secs(1_000));
    let tracker = Tracker::with_clock(
        TrackerConfig::default()
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_ttl_multiplier(2),
        Arc::new(clock.clone()),
    )
    .unwrap();
    (tracker, clock)
}

/// Fold a transition stream into node and link sets.
fn fold<'a>(events: impl IntoIterator<Item = &'a TopologyEvent>) -> TopologySets {
    let mut sets = TopologySets::default();
    for event in events {
        match event {
            TopologyEvent::AddNode { id } => {
                sets.nodes.insert(id.clone());
            }
            TopologyEvent::RemoveNode { id } => {
                sets.nodes.remove(id);
            }
            TopologyEvent::ConnectNodes { .. } => {
                sets.links.extend(event.link());
            }
            TopologyEvent::DisconnectNodes { .. } => {
                if let Some(link) = event.link() {
                    sets.links.remove(&link);
                }
            }
            TopologyEvent::NodeOnline { .. } | TopologyEvent::NodeOffline { .. } => {}
        }
    }
    sets
}

#[derive(Debug, Default, PartialEq, Eq)]
struct TopologySets {
    nodes: BTreeSet<NodeId>,
    links: BTreeSet<LinkId>,
}

impl From<&TopologySnapshot> for TopologySets {
    fn from(snap: &TopologySnapshot) -> Self {
        Self {
            nodes: snap.nodes.clone(),
            links: snap.links.clone(),
        }
    }
}

proptest! {
    /// Store contents track exactly what was named within the TTL.
    #[test]
    fn store_matches_last_seen_model(steps in prop::collection::vec(arb_step(), 1..60)) {
        let (tracker, clock) = tracker();
        let mut model = Model::default();

        for step in &steps {
            match step {
                Step::Heartbeat { own, outbound, inbound, advance_secs } => {
                    let at = clock.advance(Duration::from_secs(*advance_secs));
                    model.heartbeat(*own, outbound, inbound, at);
                    tracker.ingest_now(
                        HeartbeatRecord::new(peer(*own), Timestamp(0))
                            .with_outbound(outbound.iter().map(|&n| peer(n)))
                            .with_inbound(inbound.iter().map(|&n| peer(n))),
                    );
                }
                Step::Sweep { advance_secs } => {
                    let now = clock.advance(Duration::from_secs(*advance_secs));
                    model.sweep(now);
                    tracker.sweep();
                }
            }

            let snap = tracker.snapshot();
            prop_assert_eq!(&snap.nodes, &model.nodes.keys().cloned().collect::<BTreeSet<_>>());
            prop_assert_eq!(&snap.links, &model.links.keys().cloned().collect::<BTreeSet<_>>());
            for (id, seen) in &model.nodes {
                prop_assert_eq!(tracker.store().last_seen(id), Some(*seen));
            }
            for (link, seen) in &model.links {
                prop_assert_eq!(tracker.store().link_last_seen(link), Some(*seen));
            }
        }
    }

    /// No link outlives either of its endpoints.
    #[test]
    fn links_never_dangle(steps in prop::collection::vec(arb_step(), 1..60)) {
        let (tracker, clock) = tracker();

        for step in &steps {
            match step {
                Step::Heartbeat { own, outbound, inbound, advance_secs } => {
                    clock.advance(Duration::from_secs(*advance_secs));
                    tracker.ingest_now(
                        HeartbeatRecord::new(peer(*own), Timestamp(0))
                            .with_outbound(outbound.iter().map(|&n| peer(n)))
                            .with_inbound(inbound.iter().map(|&n| peer(n))),
                    );
                }
                Step::Sweep { advance_secs } => {
                    clock.advance(Duration::from_secs(*advance_secs));
                    let report = tracker.sweep();
                    for link in &report.links {
                        prop_assert!(!tracker.store().contains_link(link));
                    }
                }
            }

            let snap = tracker.snapshot();
            for link in &snap.links {
                prop_assert!(snap.contains_node(&link.from));
                prop_assert!(snap.contains_node(&link.to));
            }
        }
    }

    /// The live feed, folded from the start, always equals the store.
    #[test]
    fn feed_folds_to_snapshot(steps in prop::collection::vec(arb_step(), 1..60)) {
        let (tracker, clock) = tracker();
        let handle = tracker
            .subscribe(SubscriptionConfig { buffer_size: 10_000, ..Default::default() })
            .unwrap();

        for step in &steps {
            match step {
                Step::Heartbeat { own, outbound, inbound, advance_secs } => {
                    clock.advance(Duration::from_secs(*advance_secs));
                    tracker.ingest_now(
                        HeartbeatRecord::new(peer(*own), Timestamp(0))
                            .with_outbound(outbound.iter().map(|&n| peer(n)))
                            .with_inbound(inbound.iter().map(|&n| peer(n))),
                    );
                }
                Step::Sweep { advance_secs } => {
                    clock.advance(Duration::from_secs(*advance_secs));
                    tracker.sweep();
                }
            }
        }

        let feed = handle.drain();
        let folded = fold(feed.iter().filter_map(FeedEvent::topology));
        prop_assert_eq!(folded, TopologySets::from(&tracker.snapshot()));
    }

    /// Replaying a snapshot rebuilds it: one AddNode/NodeOnline pair per node
    /// and one ConnectNodes per link.
    #[test]
    fn replay_rebuilds_snapshot(steps in prop::collection::vec(arb_step(), 1..40)) {
        let (tracker, clock) = tracker();
        for step in &steps {
            if let Step::Heartbeat { own, outbound, inbound, advance_secs } = step {
                clock.advance(Duration::from_secs(*advance_secs));
                tracker.ingest_now(
                    HeartbeatRecord::new(peer(*own), Timestamp(0))
                        .with_outbound(outbound.iter().map(|&n| peer(n)))
                        .with_inbound(inbound.iter().map(|&n| peer(n))),
                );
            }
        }

        let snap = tracker.snapshot();
        let events = replay_events(&snap);
        prop_assert_eq!(events.len(), 2 * snap.node_count() + snap.link_count());
        prop_assert_eq!(fold(&events), TopologySets::from(&snap));
    }

    /// A heartbeat repeated within the TTL changes nothing observable.
    #[test]
    fn repeated_heartbeat_is_silent(
        own in 0..6u8,
        outbound in prop::collection::vec(0..6u8, 0..4),
        inbound in prop::collection::vec(0..6u8, 0..4),
        gap_secs in 0..10u64,
    ) {
        let (tracker, clock) = tracker();
        let record = HeartbeatRecord::new(peer(own), Timestamp(0))
            .with_outbound(outbound.iter().map(|&n| peer(n)))
            .with_inbound(inbound.iter().map(|&n| peer(n)));

        let first = tracker.ingest_now(record.clone());
        prop_assert!(!first.is_empty());
        let before = tracker.snapshot();

        clock.advance(Duration::from_secs(gap_secs));
        tracker.sweep();
        let second = tracker.ingest_now(record);

        prop_assert!(second.is_empty());
        prop_assert_eq!(TopologySets::from(&tracker.snapshot()), TopologySets::from(&before));
    }

    /// Reporting a -> b never implies b -> a.
    #[test]
    fn links_keep_direction(a in 0..6u8, b in 0..6u8) {
        prop_assume!(a != b);
        let (tracker, _) = tracker();
        tracker.ingest_now(HeartbeatRecord::new(peer(a), Timestamp(0)).with_outbound([peer(b)]));

        prop_assert!(tracker.store().contains_link(&LinkId::new(peer(a), peer(b))));
        prop_assert!(!tracker.store().contains_link(&LinkId::new(peer(b), peer(a))));
    }
}
