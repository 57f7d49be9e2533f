//! Lock status snapshots

use serde::{Deserialize, Serialize};

/// Result of a lock operation as seen by one handle.
///
/// - `is_owner` - the calling handle holds the lock (or just atomically
///   released/confirmed it, see each operation)
/// - `is_locked && !is_owner` - contested, held by another owner
/// - `!is_locked` - free
///
/// For [`try_lock`](crate::DistributedLock::try_lock) `is_locked` is always
/// `true`; decide on `is_owner` there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    /// A record exists at the resource key
    pub is_locked: bool,
    /// The calling handle owns (or just released) the record
    pub is_owner: bool,
}

impl LockStatus {
    /// Create a status from both flags
    pub const fn new(is_locked: bool, is_owner: bool) -> Self {
        Self {
            is_locked,
            is_owner,
        }
    }

    /// No record at the key
    pub const fn unlocked() -> Self {
        Self::new(false, false)
    }

    /// Held by another owner
    pub const fn contested() -> Self {
        Self::new(true, false)
    }

    /// Held by the calling handle
    pub const fn owned() -> Self {
        Self::new(true, true)
    }

    /// Locked by someone other than the caller
    pub fn is_contested(&self) -> bool {
        self.is_locked && !self.is_owner
    }

    /// Nobody holds the lock
    pub fn is_free(&self) -> bool {
        !self.is_locked
    }
}
