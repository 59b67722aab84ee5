//! Per-instance event bus with delayed delivery.
//!
//! Events sit in a min-heap keyed by (visible-at, sequence). Immediate events
//! therefore come out in arrival order and delayed ones in deadline order.
//! There is exactly one consumer per bus; publishers never block.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::Instant;

use super::event::DelayedEvent;

struct Pending<E> {
    visible_at: Instant,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Pending<E> {
    fn eq(&self, other: &Self) -> bool {
        self.visible_at == other.visible_at && self.seq == other.seq
    }
}

impl<E> Eq for Pending<E> {}

impl<E> PartialOrd for Pending<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the BinaryHeap pops the earliest entry first.
impl<E> Ord for Pending<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct BusState<E> {
    queue: BinaryHeap<Pending<E>>,
    next_seq: u64,
    closed: bool,
}

/// Ordered, delay-aware, single-consumer queue.
pub struct EventBus<E> {
    state: Mutex<BusState<E>>,
    notify: Notify,
}

impl<E: DelayedEvent> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `event`. Returns `false` (and drops the event) once the bus is
    /// closed.
    pub fn publish(&self, event: E) -> bool {
        let now = Instant::now();
        let visible_at = now.checked_add(event.delay()).unwrap_or(now);
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq = seq.wrapping_add(1);
            state.queue.push(Pending {
                visible_at,
                seq,
                event,
            });
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next visible event. Returns `None` once the bus is
    /// closed.
    pub async fn consume_next(&self) -> Option<E> {
        loop {
            let notified = self.notify.notified();
            let deadline = {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                match state.queue.peek() {
                    Some(head) if head.visible_at <= Instant::now() => {
                        return state.queue.pop().map(|p| p.event);
                    }
                    Some(head) => Some(head.visible_at),
                    None => None,
                }
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Pop the next event if one is visible right now.
    pub fn try_consume(&self) -> Option<E> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        match state.queue.peek() {
            Some(head) if head.visible_at <= Instant::now() => state.queue.pop().map(|p| p.event),
            _ => None,
        }
    }

    /// Close the bus and drop everything still pending, delayed events
    /// included.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.queue.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Pending events, visible or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: DelayedEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("pending", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    struct Tick {
        name: &'static str,
        delay: Duration,
    }

    impl DelayedEvent for Tick {
        fn delay(&self) -> Duration {
            self.delay
        }
    }

    fn now(name: &'static str) -> Tick {
        Tick {
            name,
            delay: Duration::ZERO,
        }
    }

    fn later(name: &'static str, millis: u64) -> Tick {
        Tick {
            name,
            delay: Duration::from_millis(millis),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_events_keep_arrival_order() {
        let bus = EventBus::new();
        bus.publish(now("a"));
        bus.publish(now("b"));
        bus.publish(now("c"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Some(e) = bus.consume_next().await {
                seen.push(e.name);
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_event_waits_for_deadline() {
        let bus = EventBus::new();
        bus.publish(later("timeout", 5_000));
        bus.publish(now("dispatch"));

        assert_eq!(bus.consume_next().await.map(|e| e.name), Some("dispatch"));
        assert!(bus.try_consume().is_none());

        let before = Instant::now();
        assert_eq!(bus.consume_next().await.map(|e| e.name), Some("timeout"));
        assert!(before.elapsed() >= Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_events_come_out_in_deadline_order() {
        let bus = EventBus::new();
        bus.publish(later("slow", 300));
        bus.publish(later("fast", 100));
        bus.publish(later("mid", 200));

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Some(e) = bus.consume_next().await {
                seen.push(e.name);
            }
        }
        assert_eq!(seen, vec!["fast", "mid", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_wakes_waiting_consumer() {
        let bus = Arc::new(EventBus::new());
        bus.publish(later("far", 60_000));

        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.consume_next().await.map(|e| e.name) })
        };
        tokio::task::yield_now().await;
        bus.publish(now("near"));

        let got = consumer.await.ok().flatten();
        assert_eq!(got, Some("near"));
    }

    #[tokio::test]
    async fn test_close_drops_pending_and_rejects_publish() {
        let bus = EventBus::new();
        bus.publish(later("timeout", 60_000));
        bus.close();

        assert!(bus.is_closed());
        assert!(bus.is_empty());
        assert!(!bus.publish(now("late")));
        assert!(bus.consume_next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_releases_blocked_consumer() {
        let bus = Arc::new(EventBus::<Tick>::new());
        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.consume_next().await })
        };
        tokio::task::yield_now().await;
        bus.close();

        let got = consumer.await.ok().flatten();
        assert!(got.is_none());
    }
}
