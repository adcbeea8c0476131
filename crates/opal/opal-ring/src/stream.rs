//! The producer and consumer sides of a frame ring.
//!
//! [`FrameWriter`] is returned by `create` and is the only type that can
//! publish; [`FrameReader`] is returned by `open` and is the only type
//! that can close. The owner-versus-non-owner discipline the region
//! protocol asks for is thereby enforced by construction rather than by
//! convention.
//!
//! # Protocol
//!
//! Publish takes the target slot's write lock for one memcpy plus two
//! metadata stores, then broadcasts under the publish mutex. Consume
//! admits under the publish mutex (so a liveness flip or a publish cannot
//! slip between its test and its wait), then holds only the target slot's
//! read lock for the copy-out. The producer can therefore only ever be
//! stalled by readers of the one slot it wants to fill next, and only for
//! the duration of their copies.

use crate::error::{RegionError, StreamError};
use crate::frame::Frame;
use crate::region::Region;
use crate::ring::{slot_for_uid, target_uid};
use crate::shm_layout::RegionHeader;
use std::sync::atomic::Ordering;
use tracing::warn;

/// The producing side of a frame ring. One per region; the creating
/// process is the region's owner.
///
/// Dropping a writer does *not* destroy the region: a region whose owner
/// vanishes without [`FrameWriter::destroy`] is left poisoned, exactly as
/// if the process had crashed. Call `destroy` on the way out.
pub struct FrameWriter {
    region: Region,
}

// SAFETY: the handle owns its mapping exclusively; the shared header it
// points into is only ever accessed through process-shared primitives and
// atomics.
unsafe impl Send for FrameWriter {}

impl FrameWriter {
    /// Creates the named region with the given geometry and maps it. The
    /// calling process becomes the owner and sole legal publisher.
    pub fn create(
        name: &str,
        width: usize,
        height: usize,
        depth: usize,
    ) -> Result<Self, RegionError> {
        Region::create(name, width, height, depth).map(|region| Self { region })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Bytes of one image in this region.
    pub fn image_size(&self) -> usize {
        self.region.image_size()
    }

    /// Region geometry as `(width, height, depth)`.
    pub fn geometry(&self) -> (usize, usize, usize) {
        let h = self.region.header();
        (h.width as usize, h.height as usize, h.depth as usize)
    }

    pub fn is_alive(&self) -> bool {
        self.region.is_alive()
    }

    /// Uid of the newest published frame; 0 before the first publish.
    pub fn latest_uid(&self) -> u64 {
        self.region.header().frame_count.load(Ordering::Acquire)
    }

    /// Publishes one frame into the next ring slot.
    ///
    /// `data` must be exactly `width * height * depth` bytes and the
    /// geometry must equal the region's; `acquisition_time` is stored
    /// verbatim for consumers. On success the frame's uid is the region's
    /// new frame count.
    pub fn publish(
        &mut self,
        width: usize,
        height: usize,
        depth: usize,
        acquisition_time: u64,
        data: &[u8],
    ) -> Result<(), StreamError> {
        let h = self.region.header();
        if h.width != width as u64
            || h.height != height as u64
            || h.depth != depth as u64
            || data.len() != h.image_size()
        {
            return Err(StreamError::GeometryMismatch);
        }
        if !h.is_alive() {
            return Err(StreamError::NotActive);
        }

        // Single writer: nobody else ever stores frame_count.
        let uid = h.frame_count.load(Ordering::Relaxed) + 1;
        let slot = slot_for_uid(uid);
        let meta = &h.slot_meta[slot];

        meta.slot_lock.write_lock();
        // SAFETY: the write lock gives exclusive access to this slot's
        // image bytes, and data.len() was checked against the slot size.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.region.image_ptr(slot), data.len());
        }
        h.frame_count.store(uid, Ordering::Release);
        meta.acquisition_time.store(acquisition_time, Ordering::Relaxed);
        meta.frame_uid.store(uid, Ordering::Relaxed);
        meta.slot_lock.unlock();

        // Broadcast under the mutex: a consumer that just observed "no new
        // frame" is guaranteed to be parked on the condvar before this
        // broadcast can fire, because the broadcast takes the mutex the
        // consumer releases as it enters the wait.
        h.publish_mu.lock();
        h.publish_cv.broadcast();
        h.publish_mu.unlock();

        Ok(())
    }

    /// Destroys the region: marks it dead, wakes and drains consumers,
    /// and removes the backing file. Consumes the writer.
    pub fn destroy(self) -> Result<(), RegionError> {
        self.region.destroy()
    }
}

/// The consuming side of a frame ring. Any number may exist, in any
/// number of processes; each tracks its own position via the high-water
/// uid in the [`Frame`] it reads into.
pub struct FrameReader {
    region: Region,
}

// SAFETY: as for FrameWriter.
unsafe impl Send for FrameReader {}

impl FrameReader {
    /// Maps the named region. Confers no ownership; the region outlives
    /// every reader.
    pub fn open(name: &str) -> Result<Self, RegionError> {
        Region::open(name).map(|region| Self { region })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Bytes of one image in this region.
    pub fn image_size(&self) -> usize {
        self.region.image_size()
    }

    /// Region geometry as `(width, height, depth)`.
    pub fn geometry(&self) -> (usize, usize, usize) {
        let h = self.region.header();
        (h.width as usize, h.height as usize, h.depth as usize)
    }

    pub fn is_alive(&self) -> bool {
        self.region.is_alive()
    }

    /// True iff the producer died without destroying the region.
    pub fn is_poisoned(&self) -> bool {
        self.region.is_poisoned()
    }

    /// Uid of the newest published frame; 0 before the first publish.
    pub fn latest_uid(&self) -> u64 {
        self.region.header().frame_count.load(Ordering::Acquire)
    }

    /// Reads the earliest frame newer than `frame.frame_uid`, blocking
    /// until one is published or the region dies.
    pub fn read(&mut self, frame: &mut Frame) -> Result<(), StreamError> {
        self.consume(frame, true)
    }

    /// Non-blocking variant of [`read`](Self::read): fails with
    /// [`StreamError::NoNewFrame`] when the consumer is caught up, leaving
    /// the frame's uid untouched.
    pub fn try_read(&mut self, frame: &mut Frame) -> Result<(), StreamError> {
        self.consume(frame, false)
    }

    fn consume(&mut self, frame: &mut Frame, blocking: bool) -> Result<(), StreamError> {
        let h = self.region.header();

        h.publish_mu.lock();
        h.readers.fetch_add(1, Ordering::AcqRel);

        // Size the frame before touching any slot lock so the allocation
        // never extends a lock hold.
        frame.width = h.width as usize;
        frame.height = h.height as usize;
        frame.depth = h.depth as usize;
        frame.data.resize(h.image_size(), 0);

        if !h.is_alive() {
            return abort_consume(h, StreamError::NotActive);
        }

        let last = frame.frame_uid;
        let mut newest = h.frame_count.load(Ordering::Acquire);
        if last == newest && !blocking {
            return abort_consume(h, StreamError::NoNewFrame);
        }
        while last == newest {
            // The wait releases publish_mu, so a publish (or destroy) that
            // races this consumer must first take the mutex and will find
            // us already parked.
            h.publish_cv.wait(&h.publish_mu);
            if !h.is_alive() {
                return abort_consume(h, StreamError::NotActive);
            }
            newest = h.frame_count.load(Ordering::Acquire);
        }

        let uid = target_uid(last, newest);
        let slot = slot_for_uid(uid);
        let meta = &h.slot_meta[slot];
        while !meta.slot_lock.try_read_lock() {
            // Producer is filling exactly this slot; it broadcasts when
            // done. Every wake re-checks liveness.
            h.publish_cv.wait(&h.publish_mu);
            if !h.is_alive() {
                return abort_consume(h, StreamError::NotActive);
            }
        }
        h.publish_mu.unlock();

        // Copy-out under the shared slot lock only. The uid recorded in
        // the slot is what we report: it may exceed `uid` if the producer
        // lapped us between target selection and lock acquisition.
        frame.frame_uid = meta.frame_uid.load(Ordering::Relaxed);
        frame.acquisition_time = meta.acquisition_time.load(Ordering::Relaxed);
        // SAFETY: the read lock guarantees the producer is not writing
        // this slot; frame.data was resized to image_size above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.region.image_ptr(slot),
                frame.data.as_mut_ptr(),
                frame.data.len(),
            );
        }
        meta.slot_lock.unlock();

        h.readers.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Releases this reader's mapping. The region itself is untouched.
    ///
    /// Refused (with the mapping still released on return) when the
    /// calling process owns the region: an owner that wants the region
    /// gone must destroy it, and closing instead almost certainly means a
    /// leaked region.
    pub fn close(self) -> Result<(), RegionError> {
        if self.region.is_owner() {
            let pid = unsafe { libc::getpid() };
            warn!(
                region = %self.region.name(),
                pid,
                "close refused: this process owns the region; call destroy"
            );
            return Err(RegionError::OwnerMustDestroy {
                name: self.region.name().to_string(),
                pid,
            });
        }
        Ok(())
    }

    /// Destroys the region through this reader. Authorized only when the
    /// region is poisoned; the recovery path for a producer that died
    /// ungracefully.
    pub fn destroy(self) -> Result<(), RegionError> {
        self.region.destroy()
    }
}

/// Common failure exit from the consume path: drop the in-flight count
/// and the admission mutex, in that order, then surface the error.
fn abort_consume(h: &RegionHeader, err: StreamError) -> Result<(), StreamError> {
    h.readers.fetch_sub(1, Ordering::AcqRel);
    h.publish_mu.unlock();
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("test-{tag}-{}-{ts}", std::process::id())
    }

    #[test]
    fn publish_to_dead_region_is_refused() {
        let name = unique_name("dead-pub");
        let mut writer = FrameWriter::create(&name, 2, 2, 1).unwrap();

        // Flip the liveness flag directly; the public path to a dead
        // region (destroy) also unmaps, which is the one thing this test
        // must not do while the writer is still holding the mapping.
        writer
            .region
            .header()
            .alive
            .store(0, Ordering::Release);

        assert_eq!(
            writer.publish(2, 2, 1, 7, &[0u8; 4]),
            Err(StreamError::NotActive)
        );

        writer.region.header().alive.store(1, Ordering::Release);
        writer.destroy().unwrap();
    }
}
