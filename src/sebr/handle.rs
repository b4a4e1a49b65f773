//! Per-thread reclamation state: epoch stamp and retire buffer.
//!
//! Ported from `ThreadHandle` in the original `sebr_local.hpp`. A handle
//! is created lazily the first time a thread pins a given [`Group`], and
//! lives until either the thread exits or the group is torn down,
//! whichever happens first (see `list.rs` for the unlink protocol and
//! `group.rs` for thread-local binding).

use std::cell::{Cell, UnsafeCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicPtr, Ordering};

use crate::park::Park;
use crate::sebr::group::Group;

/// Sentinel epoch value meaning "outside any critical section".
pub(crate) const LEAVE: i64 = -1;

/// One retired object: an opaque free routine plus the epoch at which the
/// object became unreachable from its data structure.
///
/// This is the "tagged union dispatch" design note from spec.md §9: a
/// boxed closure replaces the original's virtual `Base::reclaim`.
pub(crate) struct Retired {
    pub epoch: i64,
    pub bytes: usize,
    pub free: Box<dyn FnOnce() + Send>,
}

/// Handle lifecycle, per spec.md §4.2/§4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Live,
    Leaving,
    Left,
}

pub(crate) struct Handle {
    /// LEAVE (-1) while outside a critical section, else the group epoch
    /// captured at the last `enter`.
    pub(crate) epoch: AtomicI64,

    /// Retire buffer, insertion-ordered and therefore non-decreasing in
    /// epoch. Mutated only by the owning thread; read by any thread, but
    /// only to compute an epoch minimum, never dereferenced.
    retire_buf: UnsafeCell<VecDeque<Retired>>,

    bytes_since_epoch_bump: Cell<usize>,
    bytes_since_gc: Cell<usize>,

    lifecycle: AtomicI32,

    pub(crate) group: *const Group,
    pub(crate) sentinel: *const Handle,

    pub(crate) next: AtomicPtr<Handle>,
    pub(crate) prev: AtomicPtr<Handle>,

    /// Signalled once this handle has finished unlinking itself, so a
    /// group shutting down can wait for it instead of racing it.
    pub(crate) park: Park,
}

unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    /// Constructs a handle that is its own sentinel: used only for the
    /// one sentinel handle owned by each `Group`.
    pub(crate) fn new_sentinel() -> Handle {
        Handle {
            epoch: AtomicI64::new(LEAVE),
            retire_buf: UnsafeCell::new(VecDeque::new()),
            bytes_since_epoch_bump: Cell::new(0),
            bytes_since_gc: Cell::new(0),
            lifecycle: AtomicI32::new(0),
            group: std::ptr::null(),
            sentinel: std::ptr::null(),
            next: AtomicPtr::new(std::ptr::null_mut()),
            prev: AtomicPtr::new(std::ptr::null_mut()),
            park: Park::new(),
        }
    }

    pub(crate) fn new(group: *const Group, sentinel: *const Handle) -> Handle {
        Handle {
            epoch: AtomicI64::new(LEAVE),
            retire_buf: UnsafeCell::new(VecDeque::new()),
            bytes_since_epoch_bump: Cell::new(0),
            bytes_since_gc: Cell::new(0),
            lifecycle: AtomicI32::new(0),
            group,
            sentinel,
            next: AtomicPtr::new(std::ptr::null_mut()),
            prev: AtomicPtr::new(std::ptr::null_mut()),
            park: Park::new(),
        }
    }

    fn group(&self) -> &Group {
        unsafe { &*self.group }
    }

    /// Enter a critical section: stamp the handle's epoch from the
    /// group's global counter.
    pub(crate) fn enter(&self) {
        let global_epoch = self.group().epoch.load(Ordering::SeqCst);
        self.epoch.store(global_epoch, Ordering::SeqCst);
    }

    /// Exit the critical section, then maybe reclaim.
    pub(crate) fn exit(&self) {
        self.epoch.store(LEAVE, Ordering::Release);
        let threshold = self.group().config.bytes_gc_threshold;
        if self.bytes_since_gc.get() >= threshold {
            self.bytes_since_gc.set(0);
            self.reclaim();
        }
    }

    /// Append a reclamation record to this handle's retire buffer, tagged
    /// with the group's current epoch. Maybe advances the global epoch.
    pub(crate) fn retire(&self, bytes: usize, free: Box<dyn FnOnce() + Send>) {
        let group = self.group();
        let epoch = group.epoch.load(Ordering::SeqCst);

        // SAFETY: retire buffers are only ever touched by their owning
        // thread; foreign threads only ever read `epoch`/`lifecycle`.
        unsafe {
            (*self.retire_buf.get()).push_back(Retired { epoch, bytes, free });
        }

        let since_epoch = self.bytes_since_epoch_bump.get() + bytes;
        if since_epoch >= group.config.bytes_epoch_threshold {
            self.bytes_since_epoch_bump.set(0);
            group.epoch.fetch_add(1, Ordering::SeqCst);
        } else {
            self.bytes_since_epoch_bump.set(since_epoch);
        }

        self.bytes_since_gc.set(self.bytes_since_gc.get() + bytes);
    }

    /// Local reclamation: compute the minimum live epoch across the
    /// group's handle chain, then free every retired record strictly
    /// older than it. Retire order is non-decreasing in epoch, so this
    /// is a prefix scan.
    pub(crate) fn reclaim(&self) {
        let group = self.group();
        let min_epoch = group.min_epoch();

        // SAFETY: see `retire` above.
        let buf = unsafe { &mut *self.retire_buf.get() };
        while let Some(front) = buf.front() {
            if front.epoch >= min_epoch {
                break;
            }
            let record = buf.pop_front().unwrap();
            (record.free)();
        }
    }

    /// Unconditional reclamation of every remaining record, used only by
    /// the group destructor after all handles have quiesced.
    pub(crate) fn reclaim_all(&self) {
        let buf = unsafe { &mut *self.retire_buf.get() };
        for record in buf.drain(..) {
            (record.free)();
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle.load(Ordering::Acquire) {
            0 => Lifecycle::Live,
            1 => Lifecycle::Leaving,
            _ => Lifecycle::Left,
        }
    }

    /// Transition live -> leaving. Returns true if this call performed
    /// the transition (false if another thread beat it, or it raced a
    /// concurrent group shutdown that already claimed the handle).
    pub(crate) fn try_begin_leave(&self) -> bool {
        self.lifecycle
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_left(&self) {
        self.lifecycle.store(-1, Ordering::Release);
        self.park.unpark();
    }

    pub(crate) fn wait_until_left(&self) {
        while self.lifecycle() != Lifecycle::Left {
            self.park.park();
        }
    }
}
