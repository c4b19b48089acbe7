//! Region Layout
//!
//! On-region binary layout for the shared hash map. The region is a fixed
//! block of bytes shared between processes, so nothing in it may be a
//! pointer: every cross-reference is a byte offset from the region base, and
//! offset `0` (the header itself, never a block) doubles as the null link.
//!
//! ```text
//! [ RegionHeader | bucket table: [u64; bucket_count] | heap ............ ]
//! 0               ^ BUCKET_TABLE_OFFSET               ^ heap_start       ^ capacity
//! ```
//!
//! Heap blocks hold one entry each: a [`BlockHeader`] followed by the key
//! bytes then the value bytes, padded to 8-byte alignment. Erased blocks are
//! threaded onto a first-fit free list reusing the same header (`next`
//! becomes the free-list link; the length fields go stale).

use xxhash_rust::xxh64::xxh64;

use super::mutex::SharedMutex;

/// Identifies a region file as ours; "SHMKV001" as big-endian bytes.
pub const REGION_MAGIC: u64 = 0x5348_4D4B_5630_3031;

/// Bumped on any incompatible layout change.
pub const REGION_VERSION: u32 = 1;

/// Fixed seed so every process computes the same bucket for a key.
const HASH_SEED: u64 = 0x7b30_9a5d_11e4_c0de;

// == Region Header ==
/// Lives at offset 0 of every region. All mutable fields are protected by
/// `lock`; `magic`, `version`, `bucket_count`, `capacity` and `heap_start`
/// are written once before the region is published and immutable afterwards.
#[repr(C)]
pub struct RegionHeader {
    pub magic: u64,
    pub version: u32,
    /// Number of hash buckets; fixed at creation
    pub bucket_count: u32,
    /// Total region size in bytes (equals the file size)
    pub capacity: u64,
    /// First heap offset, right after the bucket table
    pub heap_start: u64,
    /// Bump pointer: first never-allocated heap offset
    pub heap_brk: u64,
    /// Head of the free-block list, 0 = empty
    pub free_head: u64,
    /// Live entries in the map
    pub entry_count: u64,
    /// Unallocated heap bytes (bump remainder + free-listed blocks)
    pub free_bytes: u64,
    /// The region's single process-shared mutex
    pub lock: SharedMutex,
}

/// Offset of the bucket table; the header size is a multiple of 8 by
/// construction (all fields are 4/8-byte primitives plus the mutex).
pub const BUCKET_TABLE_OFFSET: u64 = std::mem::size_of::<RegionHeader>() as u64;

// == Block Header ==
/// Prefix of every heap block, live or free.
#[repr(C)]
pub struct BlockHeader {
    /// Live: next entry in the same bucket chain. Free: next free block.
    /// 0 = end of chain.
    pub next: u64,
    /// Total block size in bytes, header included; always a multiple of 8
    pub size: u64,
    pub key_len: u32,
    pub val_len: u32,
}

pub const BLOCK_HEADER_SIZE: u64 = std::mem::size_of::<BlockHeader>() as u64;

/// Smallest block worth splitting off: anything smaller stays attached to
/// the allocation it came from.
pub const MIN_BLOCK_SIZE: u64 = BLOCK_HEADER_SIZE;

/// A freshly created region must leave at least this much heap.
pub const MIN_HEAP_BYTES: u64 = 256;

// == Geometry ==
/// Rounds up to 8-byte alignment.
pub const fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Bucket count for a region of `capacity` bytes: one bucket per 128 bytes,
/// clamped to a power of two in `[16, 65536]`.
pub fn bucket_count_for(capacity: u64) -> u32 {
    let target = (capacity / 128).max(1).next_power_of_two();
    target.clamp(16, 65_536) as u32
}

/// First heap offset for a region with `bucket_count` buckets.
pub fn heap_start_for(bucket_count: u32) -> u64 {
    align8(BUCKET_TABLE_OFFSET + u64::from(bucket_count) * 8)
}

/// Block size needed for an entry, header and padding included.
pub fn entry_block_size(key_len: usize, val_len: usize) -> u64 {
    align8(BLOCK_HEADER_SIZE + key_len as u64 + val_len as u64)
}

/// Bucket index for a key; must agree across every attached process, hence
/// a fixed-seed hash rather than the per-process-seeded std hasher.
pub fn bucket_of(key: &[u8], bucket_count: u32) -> u32 {
    (xxh64(key, HASH_SEED) % u64::from(bucket_count)) as u32
}
