//! Cache Module
//!
//! Provides a bounded in-process byte cache with LRU eviction.

mod lru;


// Re-export public types
pub use lru::LruCache;
