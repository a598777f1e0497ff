use std::collections::VecDeque;

/// FIFO of inbound messages whose processing precondition (a remote
/// description on the current peer connection) does not hold yet.
///
/// Items are moved in and moved out, so each one is enqueued at most once and
/// handed back exactly once, either by `pop` or by `clear` when a round ends.
#[derive(Debug)]
pub struct NegotiationQueue<T> {
    pending: VecDeque<T>,
}

impl<T> NegotiationQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.pending.push_back(item);
    }

    /// Oldest deferred item.
    pub fn pop(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    /// Discards everything buffered for the round that just ended and returns
    /// how many items were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for NegotiationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_arrival_order() {
        let mut queue = NegotiationQueue::new();
        queue.push("c1");
        queue.push("c2");
        queue.push("c3");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some("c1"));
        assert_eq!(queue.pop(), Some("c2"));
        queue.push("c4");
        assert_eq!(queue.pop(), Some("c3"));
        assert_eq!(queue.pop(), Some("c4"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn clear_reports_dropped_items() {
        let mut queue = NegotiationQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }
}
