//! Tunable thresholds for a reclamation [`Group`](crate::sebr::Group).
//!
//! Mirrors the constructor parameters of `ThreadGroup`/`ConcurrentBridge`
//! in the original `sebr_local.hpp`, and the builder style of
//! `crossbeam::mem::epoch::Options`.

/// Thresholds controlling how eagerly a [`Group`](crate::sebr::Group)
/// bumps its epoch and reclaims retired memory.
#[derive(Clone, Copy, Debug)]
pub struct GroupConfig {
    /// Once a handle's retire buffer holds at least this many bytes since
    /// the last local reclamation attempt, the handle tries to reclaim on
    /// its next `Pin` drop.
    pub bytes_gc_threshold: usize,

    /// Once a handle's retire buffer holds at least this many bytes since
    /// the last epoch bump, the handle advances the group's global epoch.
    pub bytes_epoch_threshold: usize,
}

impl GroupConfig {
    pub fn with_bytes_gc_threshold(mut self, val: usize) -> Self {
        self.bytes_gc_threshold = val;
        self
    }

    pub fn with_bytes_epoch_threshold(mut self, val: usize) -> Self {
        self.bytes_epoch_threshold = val;
        self
    }
}

impl Default for GroupConfig {
    /// 8 KiB GC threshold, 1 KiB epoch threshold: biases toward frequent
    /// epoch bumps but infrequent scans, per the original's defaults.
    fn default() -> GroupConfig {
        GroupConfig {
            bytes_gc_threshold: 8 * 1024,
            bytes_epoch_threshold: 1024,
        }
    }
}
