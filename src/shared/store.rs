//! Shared Store Module
//!
//! The process-shared hash map: lock-protected CRUD and positional
//! iteration over a named shared-memory region.
//!
//! Every public operation acquires the region's single mutex for the whole
//! call and releases it on every exit path via the guard's drop. There is no
//! reader/writer concurrency: reads and writes exclude each other, exactly
//! like writes exclude writes.

use std::ptr;

use crate::config::Config;
use crate::error::{Result, StoreError};

use super::layout::{
    self, BlockHeader, RegionHeader, BLOCK_HEADER_SIZE, BUCKET_TABLE_OFFSET, MIN_BLOCK_SIZE,
};
use super::mutex::SharedMutex;
use super::region::Region;

// == Shared Store ==
/// Handle to a named, process-shared byte-keyed map.
///
/// The handle's lifetime is independent of the data: dropping it only
/// detaches this process, while the region and its entries persist for other
/// (and future) attachments until [`remove_region`] deletes them. Callers
/// that need a guaranteed-empty store must remove the region explicitly
/// before opening it; opening never wipes existing data.
///
/// A process terminating abnormally inside one of these operations leaves
/// the region mutex held; later callers then block indefinitely. The store
/// does not attempt lock recovery — removing and recreating the region is
/// the way out.
pub struct SharedStore {
    region: Region,
}

impl SharedStore {
    // == Open Or Create ==
    /// Attaches to the named region, creating it with a fixed capacity of
    /// `capacity` bytes if it does not exist. An existing region keeps its
    /// original capacity and contents.
    ///
    /// Uses the environment configuration ([`Config::from_env`]) to locate
    /// the region directory.
    pub fn open_or_create(name: &str, capacity: u64) -> Result<Self> {
        Self::open_or_create_with(&Config::from_env(), name, capacity)
    }

    /// Like [`SharedStore::open_or_create`] with an explicit configuration.
    pub fn open_or_create_with(config: &Config, name: &str, capacity: u64) -> Result<Self> {
        let region = Region::open_or_create(config, name, capacity)?;
        Ok(Self { region })
    }

    /// The store's region name.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    // == Set ==
    /// Upserts `key` -> `value`.
    ///
    /// An update is remove-then-insert: the prior value is fully replaced,
    /// never merged. Fails with [`StoreError::AllocationFailure`] when the
    /// region lacks space for the new entry — and because removal comes
    /// first, a failed update leaves the key absent rather than holding its
    /// old value.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if u32::try_from(key.len()).is_err() || u32::try_from(value.len()).is_err() {
            return Err(StoreError::AllocationFailure(
                "key or value larger than 4 GiB".to_string(),
            ));
        }
        // SAFETY: the region is mapped and validated; the guard holds the
        // region mutex for the rest of the call.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let base = self.region.base_mut();
        let view = RegionView::new(base, self.region.len() as u64, self.region.name());

        if let Some(found) = view.find(key)? {
            view.remove_found(found);
        }
        view.insert(key, value)
    }

    // == Get ==
    /// Returns a copy of the value stored under `key`, or
    /// [`StoreError::NotFound`].
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        // SAFETY: as in `set`; this view is only ever read through.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let view = RegionView::new(
            self.region.base() as *mut u8,
            self.region.len() as u64,
            self.region.name(),
        );
        match view.find(key)? {
            Some(found) => Ok(view.entry_value(found.off).to_vec()),
            None => Err(StoreError::NotFound),
        }
    }

    // == Erase ==
    /// Removes the entry for `key` if present. Idempotent: erasing an
    /// absent key is a successful no-op, never an error.
    pub fn erase(&mut self, key: &[u8]) -> Result<()> {
        // SAFETY: as in `set`.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let base = self.region.base_mut();
        let view = RegionView::new(base, self.region.len() as u64, self.region.name());
        if let Some(found) = view.find(key)? {
            view.remove_found(found);
        }
        Ok(())
    }

    // == Iterate ==
    /// Returns the value at zero-based `position` in the map's internal
    /// iteration order.
    ///
    /// The order is a property of the hash table — not insertion order —
    /// and is only stable while the store is not mutated. Fails with
    /// [`StoreError::EndOfSequence`] once `position` is past the last entry.
    pub fn iterate(&self, position: usize) -> Result<Vec<u8>> {
        // SAFETY: as in `get`.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let view = RegionView::new(
            self.region.base() as *mut u8,
            self.region.len() as u64,
            self.region.name(),
        );
        view.value_at_position(position)
    }

    // == Clear ==
    /// Removes all entries and rebuilds the heap wholesale.
    pub fn clear(&mut self) -> Result<()> {
        // SAFETY: as in `set`.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let base = self.region.base_mut();
        let view = RegionView::new(base, self.region.len() as u64, self.region.name());
        view.clear();
        Ok(())
    }

    // == Length ==
    /// Number of live entries in the map.
    pub fn len(&self) -> Result<usize> {
        // SAFETY: as in `get`.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let view = RegionView::new(
            self.region.base() as *mut u8,
            self.region.len() as u64,
            self.region.name(),
        );
        Ok(view.entry_count() as usize)
    }

    /// True when the map holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // == Size / Free ==
    /// Total region size in bytes (administrative; fixed at creation).
    pub fn size(&self) -> u64 {
        self.region.len() as u64
    }

    /// Unused region bytes: the untouched heap tail plus free-listed blocks.
    pub fn free(&self) -> Result<u64> {
        // SAFETY: as in `get`.
        let _guard = unsafe { SharedMutex::lock(self.region.mutex()) }?;
        let view = RegionView::new(
            self.region.base() as *mut u8,
            self.region.len() as u64,
            self.region.name(),
        );
        Ok(view.free_bytes())
    }
}

// == Remove Region ==
/// Deletes the named region. Idempotent: returns whether a region existed.
///
/// A deliberate, separate administrative action — opening a store never
/// implies it. Processes still attached keep their mapping until they drop
/// their handles.
pub fn remove_region(name: &str) -> Result<bool> {
    remove_region_with(&Config::from_env(), name)
}

/// Like [`remove_region`] with an explicit configuration.
pub fn remove_region_with(config: &Config, name: &str) -> Result<bool> {
    Region::remove(config, name)
}

// == Region View ==
/// Raw, offset-based access to a locked region.
///
/// All cross-references inside the region are byte offsets (0 = null) since
/// each process maps the region at a different address. A view is only
/// constructed after the region mutex is held and never outlives the
/// critical section; offsets read from the region are bounds-checked before
/// being followed, so a corrupt region surfaces as `InvalidRegion` instead
/// of undefined behavior.
struct RegionView<'a> {
    base: *mut u8,
    len: u64,
    name: &'a str,
}

/// A located entry: its bucket, predecessor offset (0 = chain head) and own
/// offset.
struct Found {
    bucket: u32,
    prev: u64,
    off: u64,
}

impl<'a> RegionView<'a> {
    fn new(base: *mut u8, len: u64, name: &'a str) -> Self {
        Self { base, len, name }
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::InvalidRegion {
            name: self.name.to_string(),
            reason,
        }
    }

    // == Header field access ==
    fn hdr(&self) -> *mut RegionHeader {
        self.base as *mut RegionHeader
    }

    fn bucket_count(&self) -> u32 {
        // SAFETY: attach/create validated that the mapping covers the header.
        unsafe { ptr::addr_of!((*self.hdr()).bucket_count).read() }
    }

    fn capacity(&self) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.hdr()).capacity).read() }
    }

    fn heap_start(&self) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.hdr()).heap_start).read() }
    }

    fn heap_brk(&self) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.hdr()).heap_brk).read() }
    }

    fn set_heap_brk(&self, brk: u64) {
        // SAFETY: as above; the caller holds the region mutex.
        unsafe { ptr::addr_of_mut!((*self.hdr()).heap_brk).write(brk) }
    }

    fn free_head(&self) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.hdr()).free_head).read() }
    }

    fn set_free_head(&self, off: u64) {
        // SAFETY: as above.
        unsafe { ptr::addr_of_mut!((*self.hdr()).free_head).write(off) }
    }

    fn entry_count(&self) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.hdr()).entry_count).read() }
    }

    fn set_entry_count(&self, count: u64) {
        // SAFETY: as above.
        unsafe { ptr::addr_of_mut!((*self.hdr()).entry_count).write(count) }
    }

    fn free_bytes(&self) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.hdr()).free_bytes).read() }
    }

    fn set_free_bytes(&self, bytes: u64) {
        // SAFETY: as above.
        unsafe { ptr::addr_of_mut!((*self.hdr()).free_bytes).write(bytes) }
    }

    // == Bucket table access ==
    fn bucket_ptr(&self, bucket: u32) -> *mut u64 {
        debug_assert!(bucket < self.bucket_count());
        // SAFETY: validation pinned the bucket table inside the mapping.
        unsafe {
            self.base
                .add(BUCKET_TABLE_OFFSET as usize + bucket as usize * 8) as *mut u64
        }
    }

    fn bucket_get(&self, bucket: u32) -> u64 {
        // SAFETY: bucket_ptr stays inside the bucket table.
        unsafe { self.bucket_ptr(bucket).read() }
    }

    fn bucket_set(&self, bucket: u32, off: u64) {
        // SAFETY: as above; the caller holds the region mutex.
        unsafe { self.bucket_ptr(bucket).write(off) }
    }

    // == Block access ==
    fn block(&self, off: u64) -> *mut BlockHeader {
        // SAFETY: callers check `off` via check_block/check_entry first.
        unsafe { self.base.add(off as usize) as *mut BlockHeader }
    }

    fn block_next(&self, off: u64) -> u64 {
        // SAFETY: `off` was checked by the caller.
        unsafe { ptr::addr_of!((*self.block(off)).next).read() }
    }

    fn set_block_next(&self, off: u64, next: u64) {
        // SAFETY: as above.
        unsafe { ptr::addr_of_mut!((*self.block(off)).next).write(next) }
    }

    fn block_size(&self, off: u64) -> u64 {
        // SAFETY: as above.
        unsafe { ptr::addr_of!((*self.block(off)).size).read() }
    }

    /// Validates an offset taken from the region before it is followed.
    fn check_block(&self, off: u64) -> Result<()> {
        let in_heap = off % 8 == 0
            && off >= self.heap_start()
            && off.checked_add(BLOCK_HEADER_SIZE).is_some_and(|end| end <= self.len);
        if !in_heap {
            return Err(self.corrupt(format!("block offset {off} outside the heap")));
        }
        let size = self.block_size(off);
        let sane = size >= BLOCK_HEADER_SIZE
            && size % 8 == 0
            && off.checked_add(size).is_some_and(|end| end <= self.len);
        if !sane {
            return Err(self.corrupt(format!("block at {off} has bad size {size}")));
        }
        Ok(())
    }

    /// check_block plus the live-entry requirement that both byte strings
    /// fit the block (free blocks carry stale lengths and fail this).
    fn check_entry(&self, off: u64) -> Result<()> {
        self.check_block(off)?;
        let bh = self.block(off);
        // SAFETY: check_block verified the header is in bounds.
        let (key_len, val_len) = unsafe {
            (
                u64::from(ptr::addr_of!((*bh).key_len).read()),
                u64::from(ptr::addr_of!((*bh).val_len).read()),
            )
        };
        if BLOCK_HEADER_SIZE + key_len + val_len <= self.block_size(off) {
            Ok(())
        } else {
            Err(self.corrupt(format!("entry at {off} overruns its block")))
        }
    }

    fn entry_key(&self, off: u64) -> &[u8] {
        // SAFETY: check_entry verified the lengths fit the block and the
        // block fits the mapping; the slice borrows the view.
        unsafe {
            let key_len = ptr::addr_of!((*self.block(off)).key_len).read() as usize;
            std::slice::from_raw_parts(self.base.add((off + BLOCK_HEADER_SIZE) as usize), key_len)
        }
    }

    fn entry_value(&self, off: u64) -> &[u8] {
        // SAFETY: as in entry_key.
        unsafe {
            let bh = self.block(off);
            let key_len = ptr::addr_of!((*bh).key_len).read() as usize;
            let val_len = ptr::addr_of!((*bh).val_len).read() as usize;
            std::slice::from_raw_parts(
                self.base.add((off + BLOCK_HEADER_SIZE) as usize + key_len),
                val_len,
            )
        }
    }

    // == Lookup ==
    /// Walks the key's bucket chain. Returns the entry's location, with its
    /// predecessor for O(1) unlinking.
    fn find(&self, key: &[u8]) -> Result<Option<Found>> {
        let bucket = layout::bucket_of(key, self.bucket_count());
        let mut prev = 0u64;
        let mut off = self.bucket_get(bucket);
        while off != 0 {
            self.check_entry(off)?;
            if self.entry_key(off) == key {
                return Ok(Some(Found { bucket, prev, off }));
            }
            prev = off;
            off = self.block_next(off);
        }
        Ok(None)
    }

    /// Unlinks a found entry from its chain and recycles its block.
    fn remove_found(&self, found: Found) {
        let next = self.block_next(found.off);
        if found.prev == 0 {
            self.bucket_set(found.bucket, next);
        } else {
            self.set_block_next(found.prev, next);
        }
        self.free_block(found.off);
        self.set_entry_count(self.entry_count() - 1);
    }

    // == Insertion ==
    /// Allocates a block for the entry, copies the bytes in and links it at
    /// the head of its bucket chain.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let size = layout::entry_block_size(key.len(), value.len());
        let off = self.alloc(size)?;
        let bh = self.block(off);
        // SAFETY: alloc returned a checked block of at least `size` bytes.
        unsafe {
            ptr::addr_of_mut!((*bh).key_len).write(key.len() as u32);
            ptr::addr_of_mut!((*bh).val_len).write(value.len() as u32);
            let payload = self.base.add((off + BLOCK_HEADER_SIZE) as usize);
            ptr::copy_nonoverlapping(key.as_ptr(), payload, key.len());
            ptr::copy_nonoverlapping(value.as_ptr(), payload.add(key.len()), value.len());
        }
        let bucket = layout::bucket_of(key, self.bucket_count());
        self.set_block_next(off, self.bucket_get(bucket));
        self.bucket_set(bucket, off);
        self.set_entry_count(self.entry_count() + 1);
        Ok(())
    }

    // == Allocator ==
    /// First-fit over the free list, splitting oversized blocks; falls back
    /// to bumping the heap break. No coalescing: `clear` rebuilds the heap
    /// wholesale instead.
    fn alloc(&self, size: u64) -> Result<u64> {
        debug_assert!(size >= BLOCK_HEADER_SIZE && size % 8 == 0);

        let mut prev = 0u64;
        let mut off = self.free_head();
        while off != 0 {
            self.check_block(off)?;
            let block_size = self.block_size(off);
            let next_free = self.block_next(off);
            if block_size >= size {
                let allocated = if block_size - size >= MIN_BLOCK_SIZE {
                    // Split: the remainder takes this block's free-list slot
                    let rem = off + size;
                    self.set_block_next(rem, next_free);
                    // SAFETY: `rem + (block_size - size) <= off + block_size`,
                    // which check_block bounded by the mapping.
                    unsafe {
                        ptr::addr_of_mut!((*self.block(rem)).size).write(block_size - size);
                        ptr::addr_of_mut!((*self.block(off)).size).write(size);
                    }
                    self.relink_free(prev, rem);
                    size
                } else {
                    self.relink_free(prev, next_free);
                    block_size
                };
                self.set_free_bytes(self.free_bytes() - allocated);
                return Ok(off);
            }
            prev = off;
            off = next_free;
        }

        let brk = self.heap_brk();
        if brk + size <= self.capacity() {
            self.set_heap_brk(brk + size);
            // SAFETY: the fresh block lies in [brk, brk + size), inside the
            // mapping by the check above.
            unsafe {
                ptr::addr_of_mut!((*self.block(brk)).size).write(size);
            }
            self.set_free_bytes(self.free_bytes() - size);
            return Ok(brk);
        }

        Err(StoreError::AllocationFailure(format!(
            "region `{}` has no block of {size} bytes left ({} bytes free, fragmented)",
            self.name,
            self.free_bytes()
        )))
    }

    fn relink_free(&self, prev: u64, next: u64) {
        if prev == 0 {
            self.set_free_head(next);
        } else {
            self.set_block_next(prev, next);
        }
    }

    /// Pushes a block onto the free list.
    fn free_block(&self, off: u64) {
        self.set_block_next(off, self.free_head());
        self.set_free_head(off);
        self.set_free_bytes(self.free_bytes() + self.block_size(off));
    }

    // == Iteration ==
    /// The Nth value in bucket-table order; chains are walked front to back.
    fn value_at_position(&self, position: usize) -> Result<Vec<u8>> {
        let mut remaining = position;
        for bucket in 0..self.bucket_count() {
            let mut off = self.bucket_get(bucket);
            while off != 0 {
                self.check_entry(off)?;
                if remaining == 0 {
                    return Ok(self.entry_value(off).to_vec());
                }
                remaining -= 1;
                off = self.block_next(off);
            }
        }
        Err(StoreError::EndOfSequence(position))
    }

    // == Clear ==
    /// Empties the map and resets the whole heap.
    fn clear(&self) {
        for bucket in 0..self.bucket_count() {
            self.bucket_set(bucket, 0);
        }
        let heap_start = self.heap_start();
        self.set_heap_brk(heap_start);
        self.set_free_head(0);
        self.set_entry_count(0);
        self.set_free_bytes(self.capacity() - heap_start);
    }
}
