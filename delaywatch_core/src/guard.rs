//! Guard tokens: claim-once coordination between sibling watchers.
//!
//! When one logical event spawns several watchers (say an object watcher on a
//! falling body plus a region watcher on the cell it was aimed at), they all
//! hold clones of one [`GuardToken`]. Whichever reaches resolution first and
//! wins [`GuardToken::try_claim`] calls the resolver; everyone else stands down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared single-claim flag.
///
/// Cloning shares the underlying flag. The token is dropped with its last
/// holder.
#[derive(Debug, Clone, Default)]
pub struct GuardToken {
    claimed: Arc<AtomicBool>,
}

impl GuardToken {
    /// Creates an unclaimed token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically moves the token from unclaimed to claimed.
    ///
    /// Returns true only for the single caller that performed the transition,
    /// even under concurrent callers.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Non-mutating read.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same token.
    pub fn shares_with(&self, other: &GuardToken) -> bool {
        Arc::ptr_eq(&self.claimed, &other.claimed)
    }
}
