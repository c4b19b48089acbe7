//! LRU Cache Module
//!
//! Bounded in-process cache with O(1) get/put and deterministic eviction.
//!
//! The recency list is a doubly linked list threaded through an arena of
//! slots addressed by stable indices, so there is no manual pointer
//! management and no separate allocation per node. The list exclusively owns
//! the entries; the key index holds slot numbers for lookup only.

use std::collections::HashMap;

use crate::error::{Result, StoreError};

/// Sentinel slot index marking "no node".
const NIL: u32 = u32::MAX;

// == Node ==
/// One cache entry, linked into the recency list by slot index.
#[derive(Debug)]
struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    prev: u32,
    next: u32,
}

// == LRU Cache ==
/// Bounded byte-keyed cache with least-recently-used eviction.
///
/// Ordering rule: every successful `get` or `put` moves its entry to the
/// front of the recency list; when a new entry would exceed `capacity`, the
/// rear (least recently used) entry is evicted first. The size invariant
/// `0 <= len <= capacity` holds after every operation, including on a
/// zero-capacity cache, where `put` is rejected outright.
///
/// Not internally synchronized: concurrent callers must serialize access
/// externally.
#[derive(Debug)]
pub struct LruCache {
    /// Slot arena; vacant slots are recycled through `free`
    slots: Vec<Node>,
    /// Indices of vacant slots
    free: Vec<u32>,
    /// Key -> slot lookup; never owns entries
    index: HashMap<Vec<u8>, u32>,
    /// Most recently used slot, NIL when empty
    front: u32,
    /// Least recently used slot, NIL when empty
    rear: u32,
    /// Maximum number of live entries
    capacity: usize,
}

impl LruCache {
    // == Constructor ==
    /// Creates an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            front: NIL,
            rear: NIL,
            capacity,
        }
    }

    // == Get ==
    /// Looks up `key`, promotes the entry to most-recently-used and returns
    /// its value.
    ///
    /// Fails with [`StoreError::NotFound`] when the key is absent; a miss
    /// does not disturb the recency order.
    pub fn get(&mut self, key: &[u8]) -> Result<&[u8]> {
        let idx = *self.index.get(key).ok_or(StoreError::NotFound)?;
        self.promote(idx);
        Ok(self.slots[idx as usize].value.as_slice())
    }

    // == Put ==
    /// Upserts `key` -> `value` at the most-recently-used position.
    ///
    /// An existing entry has its value fully replaced and is promoted. A new
    /// entry evicts the rear entry first when the cache is full. On a
    /// zero-capacity cache every insert fails with
    /// [`StoreError::AllocationFailure`]; the size invariant is never
    /// violated, transiently or otherwise.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(&idx) = self.index.get(key) {
            self.slots[idx as usize].value = value.to_vec();
            self.promote(idx);
            return Ok(());
        }

        if self.capacity == 0 {
            return Err(StoreError::AllocationFailure(
                "cache capacity is zero".to_string(),
            ));
        }

        if self.index.len() == self.capacity {
            self.evict_rear();
        }

        let idx = self.alloc(key.to_vec(), value.to_vec());
        self.push_front(idx);
        self.index.insert(key.to_vec(), idx);
        Ok(())
    }

    // == Contains ==
    /// Checks for a key without touching the recency order.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    // == Peek LRU ==
    /// Returns the current eviction candidate without removing or promoting it.
    pub fn peek_lru(&self) -> Option<(&[u8], &[u8])> {
        if self.rear == NIL {
            return None;
        }
        let node = &self.slots[self.rear as usize];
        Some((node.key.as_slice(), node.value.as_slice()))
    }

    // == Length ==
    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the maximum number of entries the cache can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // == Internal: list surgery ==
    /// Detaches `idx` from the recency list, fixing neighbours and ends.
    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let node = &self.slots[idx as usize];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.front = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next == NIL {
            self.rear = prev;
        } else {
            self.slots[next as usize].prev = prev;
        }
    }

    /// Attaches a detached `idx` at the front of the recency list.
    fn push_front(&mut self, idx: u32) {
        let old_front = self.front;
        {
            let node = &mut self.slots[idx as usize];
            node.prev = NIL;
            node.next = old_front;
        }
        if old_front == NIL {
            self.rear = idx;
        } else {
            self.slots[old_front as usize].prev = idx;
        }
        self.front = idx;
    }

    /// Moves `idx` to the front; pure relinking, no data movement.
    fn promote(&mut self, idx: u32) {
        if self.front == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    /// Removes exactly the rear node from both the list and the index, and
    /// returns its slot to the free pool.
    fn evict_rear(&mut self) {
        let idx = self.rear;
        if idx == NIL {
            return;
        }
        self.unlink(idx);
        let node = &mut self.slots[idx as usize];
        let key = std::mem::take(&mut node.key);
        node.value = Vec::new();
        self.index.remove(&key);
        self.free.push(idx);
    }

    /// Reuses a vacant slot or grows the arena.
    fn alloc(&mut self, key: Vec<u8>, value: Vec<u8>) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                let node = &mut self.slots[idx as usize];
                node.key = key;
                node.value = value;
                node.prev = NIL;
                node.next = NIL;
                idx
            }
            None => {
                self.slots.push(Node {
                    key,
                    value,
                    prev: NIL,
                    next: NIL,
                });
                (self.slots.len() - 1) as u32
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_new() {
        let cache = LruCache::new(4);
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.capacity(), 4);
        assert!(cache.peek_lru().is_none());
    }

    #[test]
    fn test_lru_put_and_get() {
        let mut cache = LruCache::new(4);

        cache.put(b"key1", b"value1").unwrap();
        assert_eq!(cache.get(b"key1").unwrap(), b"value1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_get_missing() {
        let mut cache = LruCache::new(4);
        assert!(matches!(cache.get(b"absent"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_lru_put_overwrites() {
        let mut cache = LruCache::new(4);

        cache.put(b"key1", b"value1").unwrap();
        cache.put(b"key1", b"value2").unwrap();

        assert_eq!(cache.get(b"key1").unwrap(), b"value2");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_evicts_rear() {
        let mut cache = LruCache::new(3);

        cache.put(b"key1", b"value1").unwrap();
        cache.put(b"key2", b"value2").unwrap();
        cache.put(b"key3", b"value3").unwrap();

        // Full; key4 must evict key1 (oldest)
        cache.put(b"key4", b"value4").unwrap();

        assert_eq!(cache.len(), 3);
        assert!(matches!(cache.get(b"key1"), Err(StoreError::NotFound)));
        assert!(cache.get(b"key2").is_ok());
        assert!(cache.get(b"key3").is_ok());
        assert!(cache.get(b"key4").is_ok());
    }

    #[test]
    fn test_lru_get_protects_from_eviction() {
        let mut cache = LruCache::new(2);

        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();

        // Accessing `a` makes `b` the eviction candidate
        cache.get(b"a").unwrap();
        cache.put(b"c", b"3").unwrap();

        assert!(matches!(cache.get(b"b"), Err(StoreError::NotFound)));
        assert_eq!(cache.get(b"a").unwrap(), b"1");
        assert_eq!(cache.get(b"c").unwrap(), b"3");
    }

    #[test]
    fn test_lru_put_existing_promotes() {
        let mut cache = LruCache::new(2);

        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();

        // Rewriting `a` promotes it, so `b` gets evicted next
        cache.put(b"a", b"1b").unwrap();
        cache.put(b"c", b"3").unwrap();

        assert!(matches!(cache.get(b"b"), Err(StoreError::NotFound)));
        assert_eq!(cache.get(b"a").unwrap(), b"1b");
    }

    #[test]
    fn test_lru_capacity_one() {
        let mut cache = LruCache::new(1);

        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();

        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get(b"a"), Err(StoreError::NotFound)));
        assert_eq!(cache.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn test_lru_capacity_zero_rejects_put() {
        let mut cache = LruCache::new(0);

        let result = cache.put(b"a", b"1");
        assert!(matches!(result, Err(StoreError::AllocationFailure(_))));
        assert_eq!(cache.len(), 0);
        assert!(matches!(cache.get(b"a"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_lru_peek_lru() {
        let mut cache = LruCache::new(3);

        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();
        cache.put(b"c", b"3").unwrap();

        assert_eq!(cache.peek_lru().unwrap().0, b"a");

        // Peek must not promote
        cache.put(b"d", b"4").unwrap();
        assert!(!cache.contains(b"a"));
    }

    #[test]
    fn test_lru_contains_does_not_promote() {
        let mut cache = LruCache::new(2);

        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();

        assert!(cache.contains(b"a"));
        cache.put(b"c", b"3").unwrap();

        // `a` was still the rear entry despite contains()
        assert!(!cache.contains(b"a"));
        assert!(cache.contains(b"b"));
    }

    #[test]
    fn test_lru_slot_reuse_after_eviction() {
        let mut cache = LruCache::new(2);

        for round in 0u32..100 {
            let key = round.to_be_bytes();
            cache.put(&key, b"v").unwrap();
            assert!(cache.len() <= 2);
        }
        // Arena must not grow past capacity (+ nothing vacant left over)
        assert_eq!(cache.slots.len(), 2);
    }

    #[test]
    fn test_lru_empty_key_and_value() {
        let mut cache = LruCache::new(2);

        cache.put(b"", b"").unwrap();
        assert_eq!(cache.get(b"").unwrap(), b"");
    }
}
