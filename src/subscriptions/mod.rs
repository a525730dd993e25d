//! Event fan-out for topology observers.
//!
//! This module provides:
//! - The [`EventSink`] seam the ingester and sweeper publish through
//! - Topology transition events, batched per store commit
//! - In-process subscriptions with bounded buffers and slow-subscriber dropping
//! - Catch-up replay that is stitched to the live feed by revision
//!
//! # Example
//!
//! ```ignore
//! let handle = tracker.subscribe(SubscriptionConfig::default())?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(FeedEvent::Topology { event, .. }) => println!("{:?}", event),
//!         Ok(FeedEvent::CaughtUp { .. }) => println!("Now live!"),
//!         Ok(FeedEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod sink;
mod types;

pub use manager::SubscriptionManager;
pub use sink::{EventSink, NullSink};
pub use types::{
    DropReason, EventBatch, EventKind, FeedEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, TopologyEvent,
};
