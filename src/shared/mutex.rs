//! Process-Shared Mutex
//!
//! A pthread mutex embedded directly in a mapped region, initialized with
//! `PTHREAD_PROCESS_SHARED` so independent processes mapping the same region
//! synchronize on it.
//!
//! This is a plain exclusive mutex, deliberately: the sharable lock the
//! store replaces was only ever taken exclusively. It is also not a robust
//! mutex — a process that dies while holding it leaves the region wedged,
//! and recovery is an explicit region removal by an operator.

use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;

/// Converts a pthread return code into an `io::Result`.
fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

// == Shared Mutex ==
/// A `pthread_mutex_t` living inside a shared-memory region.
///
/// All access goes through raw pointers because the mutex belongs to the
/// region, not to any one process; the wrapper only fixes layout and
/// centralizes the unsafe pthread calls.
#[repr(C)]
pub struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

impl SharedMutex {
    /// Initializes the mutex in place as process-shared.
    ///
    /// Called exactly once, by the region creator, before the region is
    /// published under its public name.
    ///
    /// # Safety
    /// `this` must point to writable, 8-aligned memory inside the region,
    /// and no other process may touch the region until publication.
    pub unsafe fn init(this: *mut SharedMutex) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let result = check(libc::pthread_mutexattr_setpshared(
            attr.as_mut_ptr(),
            libc::PTHREAD_PROCESS_SHARED,
        ))
        .and_then(|()| {
            check(libc::pthread_mutex_init(
                (*this).inner.get(),
                attr.as_ptr(),
            ))
        });
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        result
    }

    /// Acquires the mutex, blocking indefinitely, and returns an unlock-on-
    /// drop guard. There is no timeout and no cancellation.
    ///
    /// # Safety
    /// `this` must point to a mutex previously set up by [`SharedMutex::init`]
    /// in a region that stays mapped for the guard's whole lifetime.
    pub unsafe fn lock(this: *const SharedMutex) -> io::Result<SharedMutexGuard> {
        let raw = (*this).inner.get();
        check(libc::pthread_mutex_lock(raw))?;
        Ok(SharedMutexGuard { raw })
    }
}

// == Guard ==
/// Holds the region mutex; unlocks unconditionally on drop, so every exit
/// path of a critical section — including error returns — releases the lock.
pub struct SharedMutexGuard {
    raw: *mut libc::pthread_mutex_t,
}

impl Drop for SharedMutexGuard {
    fn drop(&mut self) {
        // SAFETY: the guard is only ever constructed for a successfully
        // locked mutex, and the region stays mapped while the guard lives.
        unsafe {
            libc::pthread_mutex_unlock(self.raw);
        }
    }
}
