//! Bounded in-process buffer between event intake and projection.

use std::collections::VecDeque;
use std::sync::Mutex;

use metrics::{counter, gauge};
use tracing::{debug, warn};

use crate::cache::mutex_lock;
use crate::domain::events::ForumEvent;

const SOURCE: &str = "application::queue";
const METRIC_QUEUE_LEN: &str = "corkboard_event_queue_len";
const METRIC_EVENT_DROPPED: &str = "corkboard_event_dropped_total";

/// FIFO of events awaiting projection.
///
/// When full, new events are dropped and counted; upstream redelivery is
/// expected to bring them back.
pub struct EventQueue {
    queue: Mutex<VecDeque<ForumEvent>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue `event`; returns `false` when it was dropped.
    pub fn publish(&self, event: ForumEvent) -> bool {
        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.capacity {
            warn!(
                event_id = %event.event_id,
                kind = event.kind.name(),
                capacity = self.capacity,
                "Event queue full; dropping event"
            );
            counter!(METRIC_EVENT_DROPPED).increment(1);
            return false;
        }

        debug!(
            event_id = %event.event_id,
            kind = event.kind.name(),
            event_ts = event.event_ts,
            "Event enqueued"
        );
        queue.push_back(event);
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        true
    }

    /// Remove up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<ForumEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events: Vec<ForumEvent> = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
