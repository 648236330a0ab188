//! FIFO command queue gated by a readiness predicate

use std::collections::VecDeque;

use tracing::trace;

/// Readiness predicate consulted before each item is released
pub type ReadyFn = Box<dyn Fn() -> bool + Send + Sync>;

/// FIFO of pending items, released one at a time
///
/// With a ready predicate installed, [`next`](Self::next) holds items back
/// until it returns true. A drain is "in progress" from the first released
/// item until `next` comes back empty; [`push`](Self::push) reports whether
/// the caller has to start one.
pub struct CommandQueue<T> {
    items: VecDeque<T>,
    ready: Option<ReadyFn>,
    draining: bool,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    /// Create an ungated queue
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            ready: None,
            draining: false,
        }
    }

    /// Create a queue gated by `ready`
    pub fn with_ready(ready: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            ready: Some(Box::new(ready)),
            ..Self::new()
        }
    }

    /// Append an item; returns true when no drain is in progress
    pub fn push(&mut self, item: T) -> bool {
        self.items.push_back(item);
        trace!(depth = self.items.len(), "queued");
        !self.draining
    }

    /// Append an item without asking for a drain
    pub fn requeue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Release the next item if the predicate allows it
    pub fn next(&mut self) -> Option<T> {
        let ready = self.ready.as_ref().map_or(true, |ready| ready());
        let item = if ready { self.items.pop_front() } else { None };
        self.draining = item.is_some();
        item
    }

    /// Remove every pending item regardless of readiness
    pub fn drain_all(&mut self) -> Vec<T> {
        self.draining = false;
        self.items.drain(..).collect()
    }

    /// Whether any pending item satisfies `pred`
    pub fn contains(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.items.iter().any(pred)
    }

    /// Pending item count
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a drain is in progress
    pub fn is_draining(&self) -> bool {
        self.draining
    }
}

impl<T> std::fmt::Debug for CommandQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("depth", &self.items.len())
            .field("gated", &self.ready.is_some())
            .field("draining", &self.draining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let mut queue = CommandQueue::new();
        assert!(queue.push("a"));
        assert!(queue.push("b"));
        queue.requeue("c");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next(), Some("a"));
        assert_eq!(queue.next(), Some("b"));
        assert_eq!(queue.next(), Some("c"));
        assert_eq!(queue.next(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ready_predicate_gates_release() {
        let busy = Arc::new(AtomicBool::new(true));
        let flag = busy.clone();
        let mut queue = CommandQueue::with_ready(move || !flag.load(Ordering::SeqCst));
        queue.push(1);
        queue.push(2);

        assert_eq!(queue.next(), None);
        assert_eq!(queue.len(), 2);

        busy.store(false, Ordering::SeqCst);
        assert_eq!(queue.next(), Some(1));
        busy.store(true, Ordering::SeqCst);
        assert_eq!(queue.next(), None);
        busy.store(false, Ordering::SeqCst);
        assert_eq!(queue.next(), Some(2));
    }

    #[test]
    fn test_push_reports_drain_in_progress() {
        let mut queue = CommandQueue::new();
        assert!(queue.push(1));
        assert_eq!(queue.next(), Some(1));
        assert!(queue.is_draining());
        // Pushed while the first item runs: the running drain picks it up
        assert!(!queue.push(2));
        assert_eq!(queue.next(), Some(2));
        assert_eq!(queue.next(), None);
        assert!(!queue.is_draining());
        assert!(queue.push(3));
    }

    #[test]
    fn test_contains_and_drain_all() {
        let mut queue = CommandQueue::new();
        queue.push("poll");
        queue.push("send");
        assert!(queue.contains(|item| *item == "poll"));
        assert!(!queue.contains(|item| *item == "dial"));
        assert_eq!(queue.drain_all(), vec!["poll", "send"]);
        assert!(queue.is_empty());
    }
}
