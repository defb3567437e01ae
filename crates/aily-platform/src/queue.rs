use std::collections::VecDeque;

use aily_core::types::ThreadRef;

/// A post waiting in an adapter's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub thread: ThreadRef,
    pub text: String,
    pub raw: bool,
    /// Task-complete and question posts are critical: they survive overflow
    /// shedding.
    pub critical: bool,
}

/// Bounded outbound queue. On overflow the oldest non-critical item is shed
/// first; if everything queued is critical, the oldest critical item goes,
/// preserving the most recent events.
pub struct OutboundQueue {
    items: VecDeque<OutboundItem>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Enqueue an item, returning the shed victim if the queue overflowed.
    pub fn push(&mut self, item: OutboundItem) -> Option<OutboundItem> {
        let shed = if self.items.len() >= self.capacity {
            let victim_idx = self
                .items
                .iter()
                .position(|i| !i.critical)
                .unwrap_or(0);
            self.items.remove(victim_idx)
        } else {
            None
        };
        self.items.push_back(item);
        shed
    }

    pub fn pop(&mut self) -> Option<OutboundItem> {
        self.items.pop_front()
    }

    /// Put a failed item back at the front so ordering is preserved across
    /// a retry.
    pub fn push_front(&mut self, item: OutboundItem) {
        self.items.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str, critical: bool) -> OutboundItem {
        OutboundItem {
            thread: ThreadRef("t".into()),
            text: text.into(),
            raw: false,
            critical,
        }
    }

    #[test]
    fn overflow_sheds_oldest_non_critical() {
        let mut q = OutboundQueue::new(3);
        assert!(q.push(item("critical-1", true)).is_none());
        assert!(q.push(item("chatter-1", false)).is_none());
        assert!(q.push(item("chatter-2", false)).is_none());

        let shed = q.push(item("critical-2", true)).unwrap();
        assert_eq!(shed.text, "chatter-1");
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().unwrap().text, "critical-1");
    }

    #[test]
    fn all_critical_sheds_oldest() {
        let mut q = OutboundQueue::new(2);
        q.push(item("c1", true));
        q.push(item("c2", true));
        let shed = q.push(item("c3", true)).unwrap();
        assert_eq!(shed.text, "c1");
        assert_eq!(q.pop().unwrap().text, "c2");
        assert_eq!(q.pop().unwrap().text, "c3");
    }

    #[test]
    fn push_front_preserves_retry_ordering() {
        let mut q = OutboundQueue::new(4);
        q.push(item("a", false));
        q.push(item("b", false));
        let failed = q.pop().unwrap();
        q.push_front(failed);
        assert_eq!(q.pop().unwrap().text, "a");
    }
}
