//! Region Lifecycle
//!
//! Creation, attachment and removal of named shared-memory regions.
//!
//! A region is one file under the configured region directory, mapped whole
//! into each attaching process. Creation is atomic with respect to
//! concurrent creators and attachers: the creator fully initializes a
//! hidden temp file (header, mutex, bucket table) and only then publishes
//! it under the public name with a `hard_link`, which fails if the name
//! already exists. An attacher therefore never sees a half-built region,
//! and when several processes race to create the same name exactly one
//! wins; the rest attach to the winner's region.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, StoreError};

use super::layout::{
    self, RegionHeader, BUCKET_TABLE_OFFSET, MIN_HEAP_BYTES, REGION_MAGIC, REGION_VERSION,
};
use super::mutex::SharedMutex;

/// Distinguishes temp files made by concurrent creators in one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == Region ==
/// A mapped, named shared-memory region.
///
/// Dropping a `Region` only detaches this process; the region file and its
/// contents persist until [`Region::remove`] deletes them by name.
pub(crate) struct Region {
    name: String,
    mmap: MmapMut,
}

impl Region {
    // == Open Or Create ==
    /// Attaches to the named region, creating it with `capacity` bytes if it
    /// does not exist yet. An existing region keeps its original capacity
    /// and contents; `capacity` is ignored for it.
    pub fn open_or_create(config: &Config, name: &str, capacity: u64) -> Result<Self> {
        let path = config.region_path(name)?;
        loop {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => return Self::attach(name, file),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if let Some(region) = Self::create(name, &path, capacity)? {
                        return Ok(region);
                    }
                    // Lost the publish race; retry as an attacher.
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    // == Remove ==
    /// Deletes the named region. Idempotent: returns whether a region
    /// existed. Processes still attached keep their mapping alive until
    /// they drop it; new attachments under the name start fresh.
    pub fn remove(config: &Config, name: &str) -> Result<bool> {
        let path = config.region_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(name, "removed shared region");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Builds a fresh region in a hidden temp file, then publishes it.
    /// Returns `None` when another creator published the name first.
    fn create(name: &str, path: &Path, capacity: u64) -> Result<Option<Self>> {
        let bucket_count = layout::bucket_count_for(capacity);
        let heap_start = layout::heap_start_for(bucket_count);
        if capacity < heap_start + MIN_HEAP_BYTES {
            return Err(StoreError::AllocationFailure(format!(
                "region capacity {} bytes is too small (minimum {} for this layout)",
                capacity,
                heap_start + MIN_HEAP_BYTES
            )));
        }

        let tmp = tmp_path(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.set_len(capacity)?;

        // SAFETY: the file was just created with read/write access and sized
        // to `capacity`; nothing else can map it before it is published.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        init_region(&mut mmap, capacity, bucket_count, heap_start)?;

        // hard_link refuses to replace an existing name, so exactly one of
        // any set of racing creators publishes its file.
        match fs::hard_link(&tmp, path) {
            Ok(()) => {
                fs::remove_file(&tmp).ok();
                debug!(name, capacity, bucket_count, "created shared region");
                Ok(Some(Self {
                    name: name.to_string(),
                    mmap,
                }))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(&tmp).ok();
                Ok(None)
            }
            Err(err) => {
                fs::remove_file(&tmp).ok();
                Err(err.into())
            }
        }
    }

    /// Maps an existing region file and validates its header.
    fn attach(name: &str, file: fs::File) -> Result<Self> {
        // SAFETY: the file is open read/write; the mapping covers exactly
        // the file, and header validation below rejects foreign files.
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        validate(name, &mmap)?;
        debug!(name, len = mmap.len(), "attached to shared region");
        Ok(Self {
            name: name.to_string(),
            mmap,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Base of the mapping for read-only access.
    pub fn base(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Base of the mapping for mutation; callers must hold the region mutex.
    pub fn base_mut(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// The region's embedded mutex.
    pub fn mutex(&self) -> *const SharedMutex {
        let hdr = self.mmap.as_ptr() as *const RegionHeader;
        // SAFETY: validation guaranteed the mapping holds a full header.
        unsafe { ptr::addr_of!((*hdr).lock) }
    }
}

/// Writes the header and mutex of a fresh region. The bucket table needs no
/// work: a newly created file reads back as zeros, and 0 is the null link.
fn init_region(
    mmap: &mut MmapMut,
    capacity: u64,
    bucket_count: u32,
    heap_start: u64,
) -> io::Result<()> {
    let hdr = mmap.as_mut_ptr() as *mut RegionHeader;
    // SAFETY: `create` checked that `capacity` covers the header and bucket
    // table; the mapping is private to this process until published.
    unsafe {
        ptr::addr_of_mut!((*hdr).magic).write(REGION_MAGIC);
        ptr::addr_of_mut!((*hdr).version).write(REGION_VERSION);
        ptr::addr_of_mut!((*hdr).bucket_count).write(bucket_count);
        ptr::addr_of_mut!((*hdr).capacity).write(capacity);
        ptr::addr_of_mut!((*hdr).heap_start).write(heap_start);
        ptr::addr_of_mut!((*hdr).heap_brk).write(heap_start);
        ptr::addr_of_mut!((*hdr).free_head).write(0);
        ptr::addr_of_mut!((*hdr).entry_count).write(0);
        ptr::addr_of_mut!((*hdr).free_bytes).write(capacity - heap_start);
        SharedMutex::init(ptr::addr_of_mut!((*hdr).lock))?;
    }
    Ok(())
}

/// Rejects truncated, foreign or incompatible region files.
fn validate(name: &str, mmap: &MmapMut) -> Result<()> {
    let bad = |reason: String| StoreError::InvalidRegion {
        name: name.to_string(),
        reason,
    };

    let len = mmap.len() as u64;
    if len < BUCKET_TABLE_OFFSET {
        return Err(bad(format!("file is only {len} bytes, smaller than the header")));
    }

    let hdr = mmap.as_ptr() as *const RegionHeader;
    // SAFETY: the length check above covers the whole header.
    let (magic, version, bucket_count, capacity, heap_start, heap_brk) = unsafe {
        (
            ptr::addr_of!((*hdr).magic).read(),
            ptr::addr_of!((*hdr).version).read(),
            ptr::addr_of!((*hdr).bucket_count).read(),
            ptr::addr_of!((*hdr).capacity).read(),
            ptr::addr_of!((*hdr).heap_start).read(),
            ptr::addr_of!((*hdr).heap_brk).read(),
        )
    };

    if magic != REGION_MAGIC {
        return Err(bad("bad magic number".to_string()));
    }
    if version != REGION_VERSION {
        return Err(bad(format!(
            "layout version {version} is not the supported version {REGION_VERSION}"
        )));
    }
    if capacity != len {
        return Err(bad(format!(
            "header capacity {capacity} does not match file size {len}"
        )));
    }
    if bucket_count == 0 || heap_start != layout::heap_start_for(bucket_count) {
        return Err(bad("inconsistent bucket table geometry".to_string()));
    }
    if heap_brk < heap_start || heap_brk > capacity {
        return Err(bad("heap break outside the heap".to_string()));
    }
    Ok(())
}

/// Sibling temp path for staged region files, unique per process and call.
fn tmp_path(path: &Path) -> Result<std::path::PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidName(path.display().to_string()))?;
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(dir.join(format!(
        ".{file_name}.{}.{n}.tmp",
        std::process::id()
    )))
}
