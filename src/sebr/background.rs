//! Optional background GC thread.
//!
//! Resolves the "Global state" design note (spec.md §9, option (b)): a
//! background reclaimer is an explicit runtime value owned by whoever
//! wants one, not a process-global singleton chain like the original's
//! `ReclaimChain`. Construct one from an `Arc<Group>` you also share with
//! a [`crate::hashmap::ConcurrentHashMap`] or [`crate::queue::MsQueue`];
//! dropping it stops the thread and joins it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::park::Park;
use crate::sebr::group::Group;
use crate::sebr::pin::Pin;

pub struct BackgroundGc {
    stop: Arc<AtomicBool>,
    wake: Arc<Park>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundGc {
    /// Spawn a thread that periodically pins and immediately unpins
    /// `group`, giving its epoch a chance to advance and its handles a
    /// chance to reclaim even when application threads pin briefly or
    /// rarely.
    pub fn spawn(group: Arc<Group>, interval: Duration) -> BackgroundGc {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Park::new());

        let stop_in_thread = stop.clone();
        let wake_in_thread = wake.clone();
        let handle = thread::spawn(move || {
            log::debug!("background gc thread started");
            while !stop_in_thread.load(Ordering::Acquire) {
                drop(Pin::new(&group));
                wake_in_thread.park_timeout(interval);
            }
            log::debug!("background gc thread stopped");
        });

        BackgroundGc {
            stop,
            wake,
            handle: Some(handle),
        }
    }
}

impl Drop for BackgroundGc {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.wake.unpark();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
