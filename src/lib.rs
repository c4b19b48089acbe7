//! shmkv - byte-oriented key-value stores
//!
//! Two interchangeable backends behind one logical get/set/erase contract:
//!
//! - [`SharedStore`]: a named hash map in a shared-memory region that any
//!   number of independent processes can attach to by name, serialized by a
//!   single process-shared mutex. The region outlives its processes and is
//!   reclaimed only by an explicit [`remove_region`].
//! - [`LruCache`]: a bounded in-process cache with O(1) get/put and
//!   deterministic least-recently-used eviction.
//!
//! Keys and values are opaque byte strings in both. The backends share no
//! data; callers pick one based on whether they need cross-process sharing
//! or bounded memory with eviction.

pub mod cache;
pub mod config;
pub mod error;
pub mod shared;

pub use cache::LruCache;
pub use config::Config;
pub use error::{Result, StoreError};
pub use shared::{remove_region, remove_region_with, SharedStore};
