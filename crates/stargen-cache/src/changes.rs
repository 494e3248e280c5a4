//! The consumed change-stream API.
//!
//! The watcher itself lives outside this crate; the cache only asks it for
//! "changed paths since clock C".

use stargen_core::error::Result;

/// Changed paths since a given clock.
#[derive(Debug, Clone, Default)]
pub struct ChangeDiff {
    /// The clock to pass on the next query.
    pub clock_spec: String,
    /// Repo-relative paths changed since the queried clock.
    pub paths: Vec<String>,
    /// True when the watcher has re-initialized and its deltas cannot be
    /// trusted; all cached state must be discarded.
    pub is_fresh_instance: bool,
}

/// A service providing `(clock, paths)` deltas over the repository.
pub trait ChangeStream: Send + Sync {
    fn get_diff(&self, since_clock: &str) -> Result<ChangeDiff>;
}
