//! A reclamation domain: one global epoch counter, one sentinel handle,
//! and the thread-local bookkeeping that binds each thread to its own
//! [`Handle`](crate::sebr::handle::Handle) the first time it pins this
//! group.
//!
//! Ported from `ThreadGroup<T>`/`ConcurrentBridge<T>` in the original
//! `sebr_local.hpp`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::sebr::config::GroupConfig;
use crate::sebr::handle::{Handle, Lifecycle};
use crate::sebr::list;

pub struct Group {
    sentinel: Handle,
    pub(crate) epoch: AtomicI64,
    pub(crate) config: GroupConfig,
}

/// Small per-thread table of (group address, handle) pairs. Linear scan
/// is fine: a thread typically pins only one or two groups. On thread
/// exit, every handle still registered here unlinks itself from its
/// group's active chain; the handle's own memory is *not* freed here; it
/// is left on the group's retired chain for the group's own destructor
/// to reclaim, per the "leaked-then-reclaimed" design note in
/// DESIGN.md.
struct HandleTable(RefCell<Vec<(usize, *mut Handle)>>);

impl Drop for HandleTable {
    fn drop(&mut self) {
        for (_, raw) in self.0.borrow_mut().drain(..) {
            unsafe {
                let handle = &*raw;
                if handle.try_begin_leave() {
                    list::leave(raw, || {
                        handle.reclaim();
                        handle.mark_left();
                    });
                }
            }
        }
    }
}

thread_local! {
    static HANDLES: HandleTable = HandleTable(RefCell::new(Vec::new()));
}

impl Group {
    pub fn new(config: GroupConfig) -> Group {
        log::debug!("sebr group created (gc_threshold={}, epoch_threshold={})",
            config.bytes_gc_threshold, config.bytes_epoch_threshold);
        Group {
            sentinel: Handle::new_sentinel(),
            epoch: AtomicI64::new(0),
            config,
        }
    }

    fn sentinel_ptr(&self) -> *const Handle {
        &self.sentinel as *const Handle
    }

    /// Returns this thread's handle for `self`, creating and joining it
    /// the first time this thread pins this particular group.
    pub(crate) fn handle_for(&self) -> *mut Handle {
        let group_addr = self as *const Group as usize;
        HANDLES.with(|table| {
            let mut handles = table.0.borrow_mut();
            if let Some((_, h)) = handles.iter().find(|(addr, _)| *addr == group_addr) {
                return *h;
            }
            let raw = Box::into_raw(Box::new(Handle::new(
                self as *const Group,
                self.sentinel_ptr(),
            )));
            unsafe { list::join(self.sentinel_ptr(), raw) };
            handles.push((group_addr, raw));
            raw
        })
    }

    /// Minimum live epoch across every handle currently on the active
    /// chain, starting from the group's own published epoch (so a group
    /// with no live pins still yields a sane, monotonically advancing
    /// value).
    pub(crate) fn min_epoch(&self) -> i64 {
        let start = self.epoch.load(Ordering::SeqCst);
        unsafe { list::fold_min_epoch(self.sentinel_ptr(), start) }
    }
}

impl Drop for Group {
    /// Quiesce every handle still attached to this group, then reclaim
    /// everything outstanding, per spec.md §4.3 "Group destructor".
    ///
    /// Any handle whose owning thread is itself exiting concurrently is
    /// raced with `try_begin_leave`; the loser waits on `wait_until_left`
    /// instead of double-unlinking.
    fn drop(&mut self) {
        log::debug!("sebr group shutdown: quiescing handles");
        unsafe {
            let active = list::collect_active(self.sentinel_ptr());
            for raw in active {
                let handle = &*raw;
                if handle.lifecycle() == Lifecycle::Live && handle.try_begin_leave() {
                    list::leave(raw, || handle.mark_left());
                } else if handle.lifecycle() != Lifecycle::Left {
                    handle.wait_until_left();
                }
            }

            let retired = list::collect_retired(self.sentinel_ptr());
            for raw in retired {
                (*raw).reclaim_all();
                drop(Box::from_raw(raw));
            }
        }
        log::debug!("sebr group shutdown: complete");
    }
}

unsafe impl Send for Group {}
unsafe impl Sync for Group {}
