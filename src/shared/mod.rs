//! Shared Store Module
//!
//! Provides a named, process-shared hash map over a shared-memory region.
//!
//! A region is a single file in the configured region directory (`/dev/shm`
//! by default, so tmpfs-backed on Linux). Inside it live exactly one hash
//! map and one process-shared mutex; every public operation is a blocking
//! critical section under that mutex. The region outlives any attached
//! process and is reclaimed only by an explicit [`remove_region`].

mod layout;
mod mutex;
mod region;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use store::{remove_region, remove_region_with, SharedStore};
