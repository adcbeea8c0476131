//! Ring index arithmetic: which slot a publish lands in and which uid a
//! consumer should go after.

use crate::shm_layout::RING_DEPTH;

/// Maps a frame uid to its slot. Uids start at 1, so uid `u` lives in slot
/// `u mod RING_DEPTH`; publishes advance by one slot per frame.
///
/// The producer targets `slot_for_uid(frame_count + 1)`, one past the
/// newest published frame. Writing *ahead* of the readable frame keeps the
/// slot holding "the latest" untouched while the next one is being filled,
/// which shrinks the window in which a reader of the newest frame can
/// collide with the producer.
#[inline]
pub(crate) fn slot_for_uid(uid: u64) -> usize {
    (uid % RING_DEPTH as u64) as usize
}

/// The uid a consumer with high-water `last` should read when the newest
/// published uid is `newest`.
///
/// While the ring is warming up (`newest < RING_DEPTH`) nothing has been
/// overwritten yet and the consumer simply advances to `last + 1`. Once
/// the ring has wrapped, uids at or below `newest - RING_DEPTH` may be
/// overwritten at any moment, so a consumer that has fallen further behind
/// than the ring is deep skips forward to `newest - RING_DEPTH + 1`, the
/// oldest slot still guaranteed intact.
///
/// # Examples
///
/// With `RING_DEPTH = 3`, `newest = 7`:
/// - `last = 6` → target 7 (just the next frame)
/// - `last = 0` → target 5 (skipped ahead; uids 1..=4 are gone)
#[inline]
pub(crate) fn target_uid(last: u64, newest: u64) -> u64 {
    if newest < RING_DEPTH as u64 {
        last + 1
    } else {
        (last + 1).max(newest - RING_DEPTH as u64 + 1)
    }
}
