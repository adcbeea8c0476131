//! Region lifecycle: backing-file naming, create/open, poison detection,
//! and destruction.
//!
//! A region lives in a single file on a memory-backed filesystem. The file
//! is created and truncated to its exact final size by the producer, then
//! mapped shared read-write by every participant. The mapping, not the
//! file descriptor, keeps the object alive, so descriptors are dropped
//! right after mapping.
//!
//! A region whose owner process has died while `alive` is still set is
//! *poisoned*: no new frame will ever arrive, but the flag was never
//! flipped. Poisoned regions cannot be reused; any process may destroy
//! them and recreate the name.

use crate::error::RegionError;
use crate::pshared::{SharedCond, SharedMutex, SharedRwLock};
use crate::shm_layout::{RING_DEPTH, RegionHeader, REGION_MAGIC, REGION_VERSION, bytes_for_region};
use opal_mmap::MmapFileMut;
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Directory for region backing files: memory-backed, so the ring costs
/// RAM bandwidth rather than flash wear.
#[cfg(target_os = "linux")]
const REGION_DIR: &str = "/dev/shm";
#[cfg(not(target_os = "linux"))]
const REGION_DIR: &str = "/tmp";

const REGION_FILE_PREFIX: &str = "opal-";

/// Appended to the backing file name while destruction is in flight, so
/// concurrent opens of the original name fail cleanly. Long and odd enough
/// that no sane caller-supplied name produces it.
const ARCHIVE_SUFFIX: &str = ".archived-pending-unlink";

/// How long destroy waits for in-flight consumers to leave the mapping.
const QUIESCE_TIMEOUT: Duration = Duration::from_millis(500);
const QUIESCE_POLL: Duration = Duration::from_millis(1);

/// Composes the backing path for a region name.
///
/// '/' is the one byte a file name cannot contain; anything else is the
/// caller's business.
fn region_path(name: &str) -> Result<PathBuf, RegionError> {
    if name.contains('/') {
        warn!(name, "region name contains a path separator");
        return Err(RegionError::InvalidName(name.to_string()));
    }
    Ok(Path::new(REGION_DIR).join(format!("{REGION_FILE_PREFIX}{name}")))
}

fn archive_path(path: &Path) -> PathBuf {
    let mut archived = path.as_os_str().to_owned();
    archived.push(ARCHIVE_SUFFIX);
    PathBuf::from(archived)
}

/// True if a process with this pid currently exists.
fn process_alive(pid: libc::pid_t) -> bool {
    // Signal 0 probes for existence without delivering anything.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM still proves the pid exists; only ESRCH means it is gone.
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// A process-local mapping of one region.
///
/// Regions are non-unique access points: any number of handles in any
/// number of processes may map the same backing file. Dropping a `Region`
/// releases only the local mapping.
pub(crate) struct Region {
    name: String,
    path: PathBuf,
    /// Owns the mapping lifetime; dropping the region unmaps.
    _mm: MmapFileMut,
    base: *mut u8,
}

impl Region {
    /// Creates the backing file, maps it, and initializes the header and
    /// all process-shared primitives. The calling process becomes the
    /// owner.
    pub(crate) fn create(
        name: &str,
        width: usize,
        height: usize,
        depth: usize,
    ) -> Result<Region, RegionError> {
        let path = region_path(name)?;
        let bytes = bytes_for_region(width, height, depth);
        let mut mm = match MmapFileMut::create_rw(&path, bytes as u64) {
            Ok(mm) => mm,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(name, "region already exists; destroy it before reusing the name");
                return Err(RegionError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(RegionError::Io(e)),
        };
        let base = mm.as_mut_ptr();

        // The file is freshly created and zero-filled, and no other process
        // can have mapped it yet: plain stores are fine, and the atomics
        // (frame_count, readers) are already at their initial zero.
        unsafe {
            let h = base as *mut RegionHeader;
            (*h).magic = REGION_MAGIC;
            (*h).version = REGION_VERSION;
            (*h).width = width as u64;
            (*h).height = height as u64;
            (*h).depth = depth as u64;
            (*h).owner = libc::getpid();

            SharedCond::init_at(&raw mut (*h).publish_cv)?;
            SharedMutex::init_at(&raw mut (*h).publish_mu)?;
            for slot in 0..RING_DEPTH {
                SharedRwLock::init_at(&raw mut (*h).slot_meta[slot].slot_lock)?;
            }

            (*h).alive.store(1, Ordering::Release);
        }

        Ok(Region {
            name: name.to_string(),
            path,
            _mm: mm,
            base,
        })
    }

    /// Maps an existing region. No ownership is conferred.
    pub(crate) fn open(name: &str) -> Result<Region, RegionError> {
        let path = region_path(name)?;
        let mut mm = match MmapFileMut::open_rw(&path) {
            Ok(mm) => mm,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RegionError::NotFound(name.to_string()));
            }
            Err(e) => return Err(RegionError::Io(e)),
        };
        if mm.len() < size_of::<RegionHeader>() {
            return Err(RegionError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "region file shorter than its header",
            )));
        }
        let base = mm.as_mut_ptr();
        let mapped_len = mm.len();
        unsafe { &*(base as *const RegionHeader) }
            .validate(mapped_len)
            .map_err(|msg| RegionError::Io(io::Error::new(io::ErrorKind::InvalidData, msg)))?;

        Ok(Region {
            name: name.to_string(),
            path,
            _mm: mm,
            base,
        })
    }

    #[inline]
    pub(crate) fn header(&self) -> &RegionHeader {
        // SAFETY: base points at a mapping at least as large as the header,
        // validated (open) or initialized (create) before the handle
        // existed.
        unsafe { &*(self.base as *const RegionHeader) }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Bytes of one image in this region.
    #[inline]
    pub(crate) fn image_size(&self) -> usize {
        self.header().image_size()
    }

    /// Pointer to the first byte of the image in `slot`.
    ///
    /// # Safety
    /// `slot` must be below [`RING_DEPTH`]. Access to the pointed-at bytes
    /// must be covered by the slot's rwlock.
    #[inline]
    pub(crate) unsafe fn image_ptr(&self, slot: usize) -> *mut u8 {
        debug_assert!(slot < RING_DEPTH);
        unsafe { self.base.add(size_of::<RegionHeader>() + slot * self.image_size()) }
    }

    #[inline]
    pub(crate) fn is_owner(&self) -> bool {
        self.header().owner == unsafe { libc::getpid() }
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.header().is_alive()
    }

    /// True iff the region still claims to be alive but its owner process
    /// is gone.
    pub(crate) fn is_poisoned(&self) -> bool {
        let h = self.header();
        let poisoned = h.is_alive() && !process_alive(h.owner);
        if poisoned {
            warn!(region = %self.name, owner = h.owner, "region is poisoned");
        }
        poisoned
    }

    /// Tears the region down: flips `alive`, archives the backing file,
    /// wakes every blocked consumer, waits for in-flight consumers to
    /// drain, then unmaps and unlinks.
    ///
    /// Authorized for the owner, or for anyone once the region is
    /// poisoned. In both authorized cases no owner race exists: either the
    /// caller is the owner, or the owner is dead.
    pub(crate) fn destroy(self) -> Result<(), RegionError> {
        let archived = archive_path(&self.path);
        {
            let h = self.header();
            let pid = unsafe { libc::getpid() };
            if h.owner != pid && !self.is_poisoned() {
                warn!(
                    region = %self.name,
                    owner = h.owner,
                    pid,
                    "destroy refused: caller is not the owner and the region is not poisoned"
                );
                return Err(RegionError::NotAuthorized {
                    name: self.name.clone(),
                    pid,
                });
            }

            // From here on destruction is best-effort: a failed rename or
            // unlink is logged, because the alternative is leaking the
            // region forever.
            h.alive.store(0, Ordering::Release);

            h.publish_mu.lock();
            if let Err(e) = std::fs::rename(&self.path, &archived) {
                error!(region = %self.name, error = %e, "could not archive backing file during destroy");
            }
            h.publish_cv.broadcast();
            h.publish_mu.unlock();

            // Quiesce: consumers woken above must leave the mapping before
            // it disappears under them.
            let deadline = Instant::now() + QUIESCE_TIMEOUT;
            loop {
                let readers = h.readers.load(Ordering::Acquire);
                if readers == 0 {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        region = %self.name,
                        readers,
                        "quiesce timeout; unmapping with consumers still in flight"
                    );
                    break;
                }
                std::thread::sleep(QUIESCE_POLL);
            }
        }

        let name = self.name.clone();
        drop(self); // releases the mapping
        if let Err(e) = std::fs::remove_file(&archived) {
            error!(region = %name, error = %e, "could not unlink archived backing file");
        }
        Ok(())
    }
}

/// Diagnostic: is the named region alive?
///
/// Opens a throwaway mapping, queries, and drops it. Meant for tooling;
/// the owner and regular consumers should ask their own handle instead of
/// paying for an open per query.
pub fn is_alive(name: &str) -> Result<bool, RegionError> {
    Ok(Region::open(name)?.is_alive())
}

/// Diagnostic: is the named region poisoned? See [`is_alive`] for the
/// intended audience.
pub fn is_poisoned(name: &str) -> Result<bool, RegionError> {
    Ok(Region::open(name)?.is_poisoned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(matches!(
            region_path("../escape"),
            Err(RegionError::InvalidName(_))
        ));
        assert!(matches!(
            region_path("a/b"),
            Err(RegionError::InvalidName(_))
        ));
        assert!(region_path("camera-front.0").is_ok());
    }

    #[test]
    fn archive_name_extends_the_original() {
        let p = region_path("cam").unwrap();
        let a = archive_path(&p);
        assert!(a.as_os_str().to_string_lossy().ends_with(ARCHIVE_SUFFIX));
        assert!(a.as_os_str().to_string_lossy().starts_with(&*p.as_os_str().to_string_lossy()));
    }

    #[test]
    fn current_process_is_alive_and_bogus_pid_is_not() {
        assert!(process_alive(unsafe { libc::getpid() }));
        // pid_t::MAX is far beyond any real pid space.
        assert!(!process_alive(libc::pid_t::MAX));
    }
}
