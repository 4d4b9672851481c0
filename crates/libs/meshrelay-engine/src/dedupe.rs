//! Bounded, TTL'd duplicate-suppression cache.
//!
//! Insertion-ordered so overflow evicts the oldest entry first.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const MAX_CACHE_SIZE: usize = 1000;

pub struct DuplicateCache {
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
    ttl: Duration,
    max_entries: usize,
}

impl DuplicateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            max_entries: MAX_CACHE_SIZE,
        }
    }

    /// Present and within TTL.
    pub fn is_duplicate(&self, hash: &str) -> bool {
        match self.entries.get(hash) {
            Some(seen) => seen.elapsed() <= self.ttl,
            None => false,
        }
    }

    /// Present at all, expired or not. The packet record's duplicate flag
    /// uses this looser check.
    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn mark_seen(&mut self, hash: String) {
        if self.entries.insert(hash.clone(), Instant::now()).is_none() {
            self.order.push_back(hash);
        }
        while self.entries.len() > self.max_entries {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Evict expired entries, then trim overflow oldest-first.
    pub fn cleanup(&mut self) {
        self.entries.retain(|_, seen| seen.elapsed() <= self.ttl);
        self.order.retain(|hash| self.entries.contains_key(hash));
        while self.entries.len() > self.max_entries {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn expire(&mut self, hash: &str, by: Duration) {
        if let Some(seen) = self.entries.get_mut(hash) {
            *seen -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_detects() {
        let mut cache = DuplicateCache::new(Duration::from_secs(60));
        assert!(!cache.is_duplicate("aa"));
        cache.mark_seen("aa".to_string());
        assert!(cache.is_duplicate("aa"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_stop_matching() {
        let mut cache = DuplicateCache::new(Duration::from_secs(60));
        cache.mark_seen("aa".to_string());
        cache.expire("aa", Duration::from_secs(61));
        assert!(!cache.is_duplicate("aa"));
        assert!(cache.contains("aa"));
        cache.cleanup();
        assert!(!cache.contains("aa"));
        assert!(cache.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut cache = DuplicateCache::new(Duration::from_secs(600));
        for i in 0..(MAX_CACHE_SIZE + 5) {
            cache.mark_seen(format!("hash-{i}"));
        }
        assert_eq!(cache.len(), MAX_CACHE_SIZE);
        assert!(!cache.contains("hash-0"));
        assert!(!cache.contains("hash-4"));
        assert!(cache.contains("hash-5"));
        assert!(cache.contains(&format!("hash-{}", MAX_CACHE_SIZE + 4)));
    }

    #[test]
    fn re_marking_refreshes_without_duplicating() {
        let mut cache = DuplicateCache::new(Duration::from_secs(60));
        cache.mark_seen("aa".to_string());
        cache.mark_seen("aa".to_string());
        assert_eq!(cache.len(), 1);
    }
}
