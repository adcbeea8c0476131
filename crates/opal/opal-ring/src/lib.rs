//! `opal-ring`: a shared-memory ring of image frames for cross-process
//! video-style streaming.
//!
//! One producer publishes fixed-dimension raw frames into a small ring
//! that lives in a memory-mapped file; any number of consumers, in any
//! number of processes, read the most recent frames with bounded latency.
//! Durability is explicitly not a goal: the backing file lives on a
//! memory-backed filesystem and dies with the host.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐      shared memory file       ┌─────────────┐
//! │ FrameWriter │ ───────────────────────────── │ FrameReader │
//! │ (Process A) │   header + 3 slots (mmap)     │ (Process B) │
//! └─────────────┘                               └─────────────┘
//!                                               ┌─────────────┐
//!                                               │ FrameReader │
//!                                               │ (Process C) │
//!                                               └─────────────┘
//! ```
//!
//! The region header carries a cross-process mutex + condvar pair (frame
//! arrival and liveness changes) and one read/write lock per slot (torn
//! reads). Consumers track their own position through the high-water uid
//! stored in the [`Frame`] they read into, so a slow consumer silently
//! skips ahead rather than observing overwritten bytes.
//!
//! If the producer dies without calling destroy, the region is left
//! *poisoned*: [`FrameReader::is_poisoned`] detects this and
//! [`FrameReader::destroy`] reclaims the name.
//!
//! # Example
//!
//! ```ignore
//! use opal_ring::{Frame, FrameReader, FrameWriter};
//!
//! // Producer (typically one process)
//! let mut writer = FrameWriter::create("cam-front", 640, 480, 3)?;
//! writer.publish(640, 480, 3, now_ns, &rgb_bytes)?;
//!
//! // Consumer (same or different process)
//! let mut reader = FrameReader::open("cam-front")?;
//! let mut frame = Frame::new();
//! reader.read(&mut frame)?; // blocks for the first frame
//! println!("frame {} at {}", frame.frame_uid, frame.acquisition_time);
//! ```
//!
//! # Internal Modules
//!
//! - `stream`: publish/consume protocol and the two role handles
//! - `region`: lifecycle (create/open/destroy), naming, poison detection
//! - `ring`: slot selection and target-uid arithmetic
//! - `pshared`: process-shared pthread mutex/condvar/rwlock wrappers
//! - `shm_layout`: binary layout of the mapped region

mod error;
mod frame;
mod pshared;
mod region;
mod ring;
mod shm_layout;
mod stream;

pub use error::{RegionError, STATUS_SUCCESS, StreamError};
pub use frame::Frame;
pub use region::{is_alive, is_poisoned};
pub use shm_layout::RING_DEPTH;
pub use stream::{FrameReader, FrameWriter};
