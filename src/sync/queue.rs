/// Shared work queue with in-flight tracking
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::types::{InstrumentId, WorkItem};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    in_flight: usize,
    halted: bool,
}

/// Every item handed out by [`WorkQueue::next`] must come back through
/// exactly one of [`WorkQueue::retry`] or [`WorkQueue::complete`].
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl WorkQueue {
    pub fn new(ids: impl IntoIterator<Item = InstrumentId>) -> Self {
        WorkQueue {
            state: Mutex::new(QueueState {
                pending: ids.into_iter().map(WorkItem::new).collect(),
                ..QueueState::default()
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next item to work on. Waits while the deque is empty but other items
    /// are still in flight, since those may come back as retries. Returns
    /// `None` once halted, or when nothing is pending or in flight.
    pub async fn next(&self) -> Option<WorkItem> {
        loop {
            let notified = {
                let mut state = self.lock();
                if state.halted {
                    return None;
                }
                if let Some(item) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(item);
                }
                if state.in_flight == 0 {
                    return None;
                }
                // registered before the lock drops, so no wakeup is missed
                self.changed.notified()
            };
            notified.await;
        }
    }

    /// Hand an in-flight item back for another attempt
    pub fn retry(&self, item: WorkItem) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.pending.push_back(item);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Mark an in-flight item as terminally classified
    pub fn complete(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Stop handing out items; in-flight work still reports back
    pub fn halt(&self) {
        self.lock().halted = true;
        self.changed.notify_waiters();
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    /// Take whatever was never handed out (or was waiting for a retry)
    pub fn drain_remaining(&self) -> Vec<WorkItem> {
        self.lock().pending.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn ids(codes: &[&str]) -> Vec<InstrumentId> {
        codes.iter().map(|c| InstrumentId::from(*c)).collect()
    }

    #[tokio::test]
    async fn test_empty_queue_finishes_immediately() {
        let queue = WorkQueue::new(Vec::new());
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_fifo_and_in_flight_accounting() {
        let queue = WorkQueue::new(ids(&["a", "b"]));

        let a = queue.next().await.unwrap();
        let b = queue.next().await.unwrap();
        assert_eq!(a.id.as_str(), "a");
        assert_eq!(b.id.as_str(), "b");
        assert_eq!(queue.in_flight(), 2);

        queue.complete();
        queue.complete();
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_waiter_receives_retried_item() {
        let queue = Arc::new(WorkQueue::new(ids(&["a"])));
        let mut item = queue.next().await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waits while an item is in flight");

        item.attempts = 1;
        queue.retry(item);
        let retried = waiter.await.unwrap().unwrap();
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test]
    async fn test_waiter_released_when_last_item_completes() {
        let queue = Arc::new(WorkQueue::new(ids(&["a"])));
        let _item = queue.next().await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.complete();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_halt_stops_admission_and_keeps_remaining() {
        let queue = WorkQueue::new(ids(&["a", "b", "c"]));
        let _a = queue.next().await.unwrap();

        queue.halt();
        assert!(queue.is_halted());
        assert_eq!(queue.next().await, None);

        let remaining = queue.drain_remaining();
        assert_eq!(remaining.len(), 2);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.in_flight(), 1);
    }
}
