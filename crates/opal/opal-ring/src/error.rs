//! Error surface of the frame ring.
//!
//! Failures partition into two families:
//!
//! - [`StreamError`]: contract-level outcomes of publish/consume. These
//!   carry stable numeric codes (see [`StreamError::code`]) that external
//!   consumers depend on; `0` is success.
//! - [`RegionError`]: lifecycle and authorization failures from
//!   create/open/close/destroy. These have no stable numeric identity.

use std::io;

/// Status code reported for a successful publish or consume.
pub const STATUS_SUCCESS: i32 = 0;

/// Contract-level failure of a publish or consume operation.
///
/// The discriminants are a stable wire contract: reorder or renumber them
/// and every out-of-tree consumer breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum StreamError {
    /// The frame geometry handed to the operation does not match the
    /// region's geometry.
    #[error("frame geometry does not match the region")]
    GeometryMismatch = 1,

    /// The region has no active producer; its data is stale and no new
    /// frame will ever arrive.
    #[error("region is no longer active")]
    NotActive = 2,

    /// Non-blocking consume found nothing newer than the consumer's
    /// high-water uid.
    #[error("no frame newer than the consumer's high-water mark")]
    NoNewFrame = 3,
}

impl StreamError {
    /// The stable numeric code for this outcome.
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Lifecycle or authorization failure from region management.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// Region names become file names; a path separator would escape the
    /// region directory.
    #[error("region name '{0}' contains a path separator")]
    InvalidName(String),

    /// A region of this name is already backed on disk. Destroy it before
    /// reusing the name.
    #[error("region '{0}' already exists")]
    AlreadyExists(String),

    #[error("region '{0}' does not exist")]
    NotFound(String),

    /// Destroy was refused: the caller does not own the region and the
    /// region is not poisoned.
    #[error("process {pid} may not destroy region '{name}': not the owner and the region is not poisoned")]
    NotAuthorized { name: String, pid: i32 },

    /// Close was refused: the owner must destroy its region, not close it.
    #[error("process {pid} owns region '{name}'; call destroy instead of close")]
    OwnerMustDestroy { name: String, pid: i32 },

    #[error("region io failure")]
    Io(#[from] io::Error),
}
