//! Process-shared pthread primitives embedded in the mapped region.
//!
//! The frame ring coordinates a producer and consumers that live in
//! different address spaces, so every primitive here is initialized with
//! `PTHREAD_PROCESS_SHARED`. Primitives initialized without that attribute
//! are a latent bug: they appear to work inside one process and silently
//! fail to coordinate across two.
//!
//! These wrappers are never constructed as Rust values. They are laid out
//! inside [`crate::shm_layout::RegionHeader`], land in the mapping as
//! zeroed bytes, and are initialized exactly once, in place, by the region
//! creator via `init_at`. Every other process merely takes references into
//! the mapping.
//!
//! Lock and unlock return nothing: on a correctly initialized
//! process-shared primitive these calls fail only on API misuse, which is
//! a bug in this crate, not a runtime condition the caller can handle.

use std::cell::UnsafeCell;
use std::io;

#[inline]
fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// Cross-process mutex. Companion to [`SharedCond`].
#[repr(C)]
pub(crate) struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

impl SharedMutex {
    /// Initializes the mutex in place with the process-shared attribute.
    ///
    /// # Safety
    /// `this` must point to writable, zeroed memory inside a shared mapping
    /// sized for a `SharedMutex`, and must be called exactly once before
    /// any other process can observe the mapping.
    pub(crate) unsafe fn init_at(this: *mut SharedMutex) -> io::Result<()> {
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            check(libc::pthread_mutexattr_init(&mut attr))?;
            check(libc::pthread_mutexattr_setpshared(
                &mut attr,
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
            let rc = libc::pthread_mutex_init((*this).inner.get(), &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            check(rc)
        }
    }

    #[inline]
    pub(crate) fn lock(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed");
    }

    #[inline]
    pub(crate) fn unlock(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }
}

/// Cross-process condition variable.
///
/// One condvar serves both "new frame published" and "liveness changed":
/// blocked consumers wake for either event with a single broadcast.
#[repr(C)]
pub(crate) struct SharedCond {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

impl SharedCond {
    /// Initializes the condvar in place with the process-shared attribute.
    ///
    /// # Safety
    /// Same contract as [`SharedMutex::init_at`].
    pub(crate) unsafe fn init_at(this: *mut SharedCond) -> io::Result<()> {
        unsafe {
            let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
            check(libc::pthread_condattr_init(&mut attr))?;
            check(libc::pthread_condattr_setpshared(
                &mut attr,
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
            let rc = libc::pthread_cond_init((*this).inner.get(), &attr);
            libc::pthread_condattr_destroy(&mut attr);
            check(rc)
        }
    }

    /// Atomically releases `mu` and blocks until woken; `mu` is held again
    /// on return. Callers must re-check their predicate: wakes may be
    /// spurious.
    #[inline]
    pub(crate) fn wait(&self, mu: &SharedMutex) {
        let rc = unsafe { libc::pthread_cond_wait(self.inner.get(), mu.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_wait failed");
    }

    #[inline]
    pub(crate) fn broadcast(&self) {
        let rc = unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_broadcast failed");
    }
}

/// Cross-process read/write lock, one per ring slot.
///
/// Many consumers may hold the read half of the same slot concurrently;
/// the producer takes the write half only for the duration of one copy
/// plus two metadata stores.
#[repr(C)]
pub(crate) struct SharedRwLock {
    inner: UnsafeCell<libc::pthread_rwlock_t>,
}

impl SharedRwLock {
    /// Initializes the rwlock in place with the process-shared attribute.
    ///
    /// # Safety
    /// Same contract as [`SharedMutex::init_at`].
    pub(crate) unsafe fn init_at(this: *mut SharedRwLock) -> io::Result<()> {
        unsafe {
            let mut attr: libc::pthread_rwlockattr_t = std::mem::zeroed();
            check(libc::pthread_rwlockattr_init(&mut attr))?;
            check(libc::pthread_rwlockattr_setpshared(
                &mut attr,
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
            let rc = libc::pthread_rwlock_init((*this).inner.get(), &attr);
            libc::pthread_rwlockattr_destroy(&mut attr);
            check(rc)
        }
    }

    #[inline]
    pub(crate) fn write_lock(&self) {
        let rc = unsafe { libc::pthread_rwlock_wrlock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_rwlock_wrlock failed");
    }

    /// Non-blocking shared acquisition. `false` means the producer holds
    /// the write half right now.
    #[inline]
    pub(crate) fn try_read_lock(&self) -> bool {
        unsafe { libc::pthread_rwlock_tryrdlock(self.inner.get()) == 0 }
    }

    /// Releases either half.
    #[inline]
    pub(crate) fn unlock(&self) {
        let rc = unsafe { libc::pthread_rwlock_unlock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_rwlock_unlock failed");
    }
}
