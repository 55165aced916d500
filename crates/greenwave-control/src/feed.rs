//! Canonical-state distribution.
//!
//! Every subscriber gets its own bounded ring of [`TickRecord`]s. A slow
//! consumer loses the oldest records first and never stalls the tick loop;
//! each eviction is reported to the caller so it can be logged and counted
//! against the subscriber.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::arbiter::TickRecord;
use crate::ids::SubscriberId;

pub const DEFAULT_SUBSCRIBER_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Maximum records buffered per subscriber before drop-oldest kicks in.
    pub subscriber_queue_depth: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: DEFAULT_SUBSCRIBER_QUEUE_DEPTH,
        }
    }
}

/// A record evicted from a slow subscriber's ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedDrop {
    pub subscriber_id: SubscriberId,
    pub dropped_tick_ms: u64,
}

#[derive(Debug, Default)]
struct SubscriberQueue {
    ring: VecDeque<TickRecord>,
    dropped_total: u64,
}

// ---------------------------------------------------------------------------
// FeedHub
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FeedHub {
    depth: usize,
    subscribers: BTreeMap<SubscriberId, SubscriberQueue>,
}

impl FeedHub {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            depth: config.subscriber_queue_depth,
            subscribers: BTreeMap::new(),
        }
    }

    /// Returns `true` for a new subscription. Subscribing again is a no-op
    /// that keeps the existing ring.
    pub fn subscribe(&mut self, subscriber_id: &SubscriberId) -> bool {
        if self.subscribers.contains_key(subscriber_id) {
            return false;
        }
        self.subscribers
            .insert(subscriber_id.clone(), SubscriberQueue::default());
        true
    }

    pub fn unsubscribe(&mut self, subscriber_id: &SubscriberId) -> bool {
        self.subscribers.remove(subscriber_id).is_some()
    }

    pub fn is_subscribed(&self, subscriber_id: &SubscriberId) -> bool {
        self.subscribers.contains_key(subscriber_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Copies `record` into every ring, evicting the oldest entries where a
    /// ring is full.
    pub fn publish(&mut self, record: &TickRecord) -> Vec<FeedDrop> {
        let mut drops = Vec::new();
        for (subscriber_id, queue) in &mut self.subscribers {
            queue.ring.push_back(record.clone());
            while queue.ring.len() > self.depth {
                if let Some(evicted) = queue.ring.pop_front() {
                    queue.dropped_total = queue.dropped_total.saturating_add(1);
                    drops.push(FeedDrop {
                        subscriber_id: subscriber_id.clone(),
                        dropped_tick_ms: evicted.tick_ms,
                    });
                }
            }
        }
        drops
    }

    /// Takes everything queued for one subscriber, oldest first. `None`
    /// means the subscriber is unknown.
    pub fn drain(&mut self, subscriber_id: &SubscriberId) -> Option<Vec<TickRecord>> {
        self.subscribers
            .get_mut(subscriber_id)
            .map(|queue| queue.ring.drain(..).collect())
    }

    pub fn queued(&self, subscriber_id: &SubscriberId) -> usize {
        self.subscribers
            .get(subscriber_id)
            .map_or(0, |queue| queue.ring.len())
    }

    pub fn dropped_total(&self, subscriber_id: &SubscriberId) -> u64 {
        self.subscribers
            .get(subscriber_id)
            .map_or(0, |queue| queue.dropped_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::NetworkSnapshot;

    fn record(tick_ms: u64) -> TickRecord {
        TickRecord::new(
            tick_ms,
            NetworkSnapshot::new(tick_ms),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    fn hub_with_depth(depth: usize) -> FeedHub {
        FeedHub::new(FeedConfig {
            subscriber_queue_depth: depth,
        })
    }

    fn viewer() -> SubscriberId {
        SubscriberId::from("wallboard")
    }

    #[test]
    fn published_records_arrive_in_order() {
        let mut hub = hub_with_depth(8);
        assert!(hub.subscribe(&viewer()));
        for tick in [1_000, 2_000, 3_000] {
            assert!(hub.publish(&record(tick)).is_empty());
        }
        let drained = hub.drain(&viewer()).unwrap();
        assert_eq!(
            drained.iter().map(|r| r.tick_ms).collect::<Vec<_>>(),
            vec![1_000, 2_000, 3_000]
        );
        assert_eq!(hub.drain(&viewer()).unwrap(), Vec::new());
    }

    #[test]
    fn unknown_subscriber_drains_nothing() {
        let mut hub = hub_with_depth(8);
        assert!(hub.drain(&viewer()).is_none());
        assert!(!hub.unsubscribe(&viewer()));
    }

    #[test]
    fn overflow_drops_the_oldest_record() {
        let mut hub = hub_with_depth(2);
        hub.subscribe(&viewer());
        hub.publish(&record(1_000));
        hub.publish(&record(2_000));
        let drops = hub.publish(&record(3_000));
        assert_eq!(
            drops,
            vec![FeedDrop {
                subscriber_id: viewer(),
                dropped_tick_ms: 1_000,
            }]
        );
        assert_eq!(hub.dropped_total(&viewer()), 1);

        let drained = hub.drain(&viewer()).unwrap();
        assert_eq!(
            drained.iter().map(|r| r.tick_ms).collect::<Vec<_>>(),
            vec![2_000, 3_000]
        );
    }

    #[test]
    fn rings_are_independent_per_subscriber() {
        let fast = SubscriberId::from("fast");
        let slow = SubscriberId::from("slow");
        let mut hub = hub_with_depth(1);
        hub.subscribe(&fast);
        hub.subscribe(&slow);

        hub.publish(&record(1_000));
        hub.drain(&fast).unwrap();
        let drops = hub.publish(&record(2_000));

        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].subscriber_id, slow);
        assert_eq!(hub.queued(&fast), 1);
        assert_eq!(hub.dropped_total(&fast), 0);
        assert_eq!(hub.dropped_total(&slow), 1);
    }

    #[test]
    fn resubscribing_keeps_the_ring_until_unsubscribed() {
        let mut hub = hub_with_depth(4);
        hub.subscribe(&viewer());
        hub.publish(&record(1_000));
        assert!(!hub.subscribe(&viewer()), "second subscribe is a no-op");
        assert_eq!(hub.queued(&viewer()), 1);

        assert!(hub.unsubscribe(&viewer()));
        assert!(!hub.is_subscribed(&viewer()));
        hub.subscribe(&viewer());
        assert_eq!(hub.queued(&viewer()), 0);
        assert_eq!(hub.dropped_total(&viewer()), 0);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
