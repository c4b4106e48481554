//! Bounded seen-set with FIFO eviction

use std::collections::{HashSet, VecDeque};

/// Remembers the last `limit` distinct IDs
#[derive(Debug, Clone)]
pub struct SeenCache {
    limit: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenCache {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            order: VecDeque::with_capacity(limit.min(1 << 16) + 1),
            members: HashSet::new(),
        }
    }

    /// Returns `true` if `id` was already remembered, otherwise remembers it
    /// and evicts the oldest entry once the cache is over capacity
    pub fn seen(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return true;
        }

        self.members.insert(id.to_string());
        self.order.push_back(id.to_string());

        if self.order.len() > self.limit {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remembers_ids() {
        let mut cache = SeenCache::new(3);
        assert!(!cache.seen("a"));
        assert!(cache.seen("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut cache = SeenCache::new(2);
        cache.seen("a");
        cache.seen("b");
        cache.seen("c");

        assert_eq!(cache.len(), 2);
        assert!(cache.seen("c"));
        assert!(cache.seen("b"));
        // "a" was evicted, so it is new again
        assert!(!cache.seen("a"));
    }

    #[test]
    fn test_zero_capacity_remembers_nothing() {
        let mut cache = SeenCache::new(0);
        assert!(!cache.seen("a"));
        assert!(!cache.seen("a"));
        assert!(cache.is_empty());
    }
}
