//! Shared memory layout for a frame ring region.
//!
//! This module defines the binary layout of the memory-mapped region one
//! producer and any number of consumers agree on: a header carrying
//! geometry, liveness and the synchronization primitives, a parallel array
//! of per-slot metadata, and a flexible tail of raw image bytes.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ magic │ version │ frame_count │ width │ height │ depth │ alive │
//! │ readers │ owner pid │ publish_cv │ publish_mu                  │
//! ├────────────────────────────────────────────────────────────────┤
//! │ SlotMeta[0]   { frame_uid │ acquisition_time │ slot_lock }     │
//! │ SlotMeta[1]                                                    │
//! │ SlotMeta[2]                                                    │
//! ├────────────────────────────────────────────────────────────────┤
//! │ image[0]   width * height * depth bytes                        │
//! │ image[1]                                                       │
//! │ image[2]                                                       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The whole file is exactly `size_of::<RegionHeader>() + RING_DEPTH * w*h*d`
//! bytes. Geometry is immutable after creation; every process mapping the
//! same region observes the same layout.

use crate::pshared::{SharedCond, SharedMutex, SharedRwLock};
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of image slots in a ring. Fixed at compile time so the slot
/// metadata array can live inline in the header.
pub const RING_DEPTH: usize = 3;

/// Magic number identifying a valid frame ring file.
///
/// ASCII encoding of "OPALRING": `0x4F50_414C_5249_4E47`.
pub const REGION_MAGIC: u64 = 0x4F50_414C_5249_4E47;

/// Current region format version. Increment on incompatible layout changes;
/// open rejects files with a mismatched version.
pub const REGION_VERSION: u64 = 1;

/// Per-slot metadata, parallel to the image array.
///
/// `frame_uid` and `acquisition_time` are written by the producer under the
/// write half of `slot_lock` and read by consumers under the read half;
/// the atomics only exist because shared-mapping fields cannot be mutated
/// through `&mut`, so all accesses are `Relaxed`.
#[repr(C)]
pub(crate) struct SlotMeta {
    pub(crate) frame_uid: AtomicU64,
    pub(crate) acquisition_time: AtomicU64,
    pub(crate) slot_lock: SharedRwLock,
}

/// Header at offset 0 of every frame ring region.
///
/// `#[repr(C)]` keeps field order and offsets identical in every process
/// mapping the file.
#[repr(C)]
pub(crate) struct RegionHeader {
    /// Must equal [`REGION_MAGIC`].
    pub(crate) magic: u64,
    /// Must equal [`REGION_VERSION`].
    pub(crate) version: u64,
    /// Monotonically non-decreasing count of published frames. Its value
    /// after a publish is that frame's uid. Written only by the owner.
    pub(crate) frame_count: AtomicU64,
    /// Geometry in pixels / bytes-per-pixel. Immutable after creation.
    pub(crate) width: u64,
    pub(crate) height: u64,
    pub(crate) depth: u64,
    /// 1 from creation until destroy flips it to 0. Never flips back.
    pub(crate) alive: AtomicU32,
    /// Consumers currently inside the consume path. Destroy quiesces on
    /// this before unmapping.
    pub(crate) readers: AtomicU32,
    /// The producer's pid, set at creation. A dead owner with `alive`
    /// still 1 marks the region as poisoned.
    pub(crate) owner: libc::pid_t,
    /// Wakes consumers for both "new frame" and "liveness changed".
    pub(crate) publish_cv: SharedCond,
    /// Companion mutex for `publish_cv`; also serializes destroy against
    /// consumer admission.
    pub(crate) publish_mu: SharedMutex,
    pub(crate) slot_meta: [SlotMeta; RING_DEPTH],
}

impl RegionHeader {
    /// Bytes of one image in this region.
    #[inline]
    pub(crate) fn image_size(&self) -> usize {
        (self.width * self.height * self.depth) as usize
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) == 1
    }

    /// Validates a freshly mapped header against expected values.
    ///
    /// Catches files that are not frame rings at all, rings written by an
    /// incompatible version, and files whose length does not match their
    /// own recorded geometry (truncated or corrupt).
    pub(crate) fn validate(&self, mapped_len: usize) -> Result<(), &'static str> {
        if self.magic != REGION_MAGIC {
            return Err("not a frame ring region (bad magic)");
        }
        if self.version != REGION_VERSION {
            return Err("incompatible region format version");
        }
        if mapped_len
            != bytes_for_region(self.width as usize, self.height as usize, self.depth as usize)
        {
            return Err("region file length does not match its geometry");
        }
        Ok(())
    }
}

/// Total bytes required for a region of the given geometry:
/// `header + RING_DEPTH * width * height * depth`.
pub(crate) fn bytes_for_region(width: usize, height: usize, depth: usize) -> usize {
    size_of::<RegionHeader>() + RING_DEPTH * width * height * depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header(width: u64, height: u64, depth: u64) -> Box<RegionHeader> {
        // Zeroed pthread primitives are fine here: validate never touches
        // them.
        let mut h: Box<RegionHeader> = unsafe { Box::new(std::mem::zeroed()) };
        h.magic = REGION_MAGIC;
        h.version = REGION_VERSION;
        h.width = width;
        h.height = height;
        h.depth = depth;
        h
    }

    #[test]
    fn region_size_is_header_plus_ring() {
        let bytes = bytes_for_region(4, 2, 3);
        assert_eq!(bytes, size_of::<RegionHeader>() + RING_DEPTH * 24);
    }

    #[test]
    fn validate_accepts_well_formed_header() {
        let h = test_header(2, 2, 1);
        assert!(h.validate(bytes_for_region(2, 2, 1)).is_ok());
        assert_eq!(h.image_size(), 4);
    }

    #[test]
    fn validate_rejects_bad_magic_version_and_length() {
        let mut h = test_header(2, 2, 1);
        h.magic = 0;
        assert!(h.validate(bytes_for_region(2, 2, 1)).is_err());

        let mut h = test_header(2, 2, 1);
        h.version = REGION_VERSION + 1;
        assert!(h.validate(bytes_for_region(2, 2, 1)).is_err());

        let h = test_header(2, 2, 1);
        assert!(h.validate(bytes_for_region(2, 2, 1) - 1).is_err());
    }
}
