//! Lock-free doubly-tagged handle list, attached to a per-group sentinel.
//!
//! Ported from `Next<T>`/`NextWithUnpin<T>` in `sebr_local.hpp`. Each
//! handle lives on the sentinel's `next` chain while active. Leaving sets
//! the low tag bit on the handle's own `next` pointer and then sweeps the
//! chain splicing out every tagged node it finds, restarting if it
//! observes a tagged predecessor. Once logically unlinked, the handle is
//! pushed onto the sentinel's `prev` chain for the group destructor to
//! free later.

use std::sync::atomic::Ordering;

use crate::sebr::handle::Handle;

#[inline]
fn is_tagged(p: *mut Handle) -> bool {
    (p as usize) & 1 != 0
}

#[inline]
fn tag(p: *mut Handle) -> *mut Handle {
    ((p as usize) | 1) as *mut Handle
}

#[inline]
fn untag(p: *mut Handle) -> *mut Handle {
    ((p as usize) & !1usize) as *mut Handle
}

/// Push `handle` onto `sentinel`'s active (`next`) chain.
pub(crate) unsafe fn join(sentinel: *const Handle, handle: *mut Handle) {
    let sentinel = sentinel as *mut Handle;
    loop {
        let senti_next = (*sentinel).next.load(Ordering::Acquire);
        (*handle).next.store(senti_next, Ordering::Relaxed);
        if (*sentinel)
            .next
            .compare_exchange(senti_next, handle, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
}

/// Logically remove `handle` from the active chain, sweep out every
/// tagged node the walk observes, run `on_unlinked` once the sweep
/// confirms no other unlink is racing this one, then push `handle` onto
/// the sentinel's retired (`prev`) chain.
pub(crate) unsafe fn leave(handle: *mut Handle, on_unlinked: impl FnOnce()) {
    let h = &*handle;

    // Step 1: tag our own `next` pointer to mark ourselves removed while
    // keeping the traversal link intact for concurrent walkers.
    loop {
        let next_value = h.next.load(Ordering::Acquire);
        debug_assert!(!is_tagged(next_value));
        if h.next
            .compare_exchange(
                next_value,
                tag(next_value),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            break;
        }
    }

    let sentinel = h.sentinel as *mut Handle;

    'unlink: loop {
        let mut prev = sentinel;
        let mut next = (*prev).next.load(Ordering::Acquire);
        while next != sentinel {
            if is_tagged(next) {
                if is_tagged(prev) {
                    continue 'unlink;
                }
                let mut after_tagged = untag((*untag(next)).next.load(Ordering::Acquire));
                while is_tagged(after_tagged) {
                    after_tagged = untag((*untag(after_tagged)).next.load(Ordering::Acquire));
                }
                if is_tagged(prev) {
                    continue 'unlink;
                }
                let _ = (*prev).next.compare_exchange(
                    next,
                    after_tagged,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue 'unlink;
            }
            prev = next;
            next = untag((*prev).next.load(Ordering::Acquire));
        }
        // next == sentinel: no more tagged nodes to splice out right now.
        break;
    }

    on_unlinked();

    loop {
        let senti_prev = (*sentinel).prev.load(Ordering::Acquire);
        h.prev.store(senti_prev, Ordering::Relaxed);
        if (*sentinel)
            .prev
            .compare_exchange(senti_prev, handle, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
}

/// Fold the group's minimum live epoch over every handle reachable from
/// `sentinel`'s active chain, treating `LEAVE` as positive infinity.
pub(crate) unsafe fn fold_min_epoch(sentinel: *const Handle, mut acc: i64) -> i64 {
    let sentinel = sentinel as *mut Handle;
    let mut cur = (*sentinel).next.load(Ordering::Acquire);
    while cur != sentinel {
        let node = untag(cur);
        let epoch = (*node).epoch.load(Ordering::Acquire);
        if epoch != crate::sebr::handle::LEAVE {
            acc = acc.min(epoch);
        }
        cur = (*node).next.load(Ordering::Acquire);
    }
    acc
}

/// Collect every handle still linked on `sentinel`'s active chain,
/// untagging pointers as the walk proceeds. Used only by group shutdown.
pub(crate) unsafe fn collect_active(sentinel: *const Handle) -> Vec<*mut Handle> {
    let sentinel_mut = sentinel as *mut Handle;
    let mut out = Vec::new();
    let mut cur = (*sentinel_mut).next.load(Ordering::Acquire);
    while cur != sentinel_mut {
        let node = untag(cur);
        out.push(node);
        cur = (*node).next.load(Ordering::Acquire);
    }
    out
}

/// Collect every handle already unlinked onto `sentinel`'s retired
/// (`prev`) chain. Used only by group shutdown, after all active handles
/// have been quiesced.
pub(crate) unsafe fn collect_retired(sentinel: *const Handle) -> Vec<*mut Handle> {
    let sentinel_mut = sentinel as *mut Handle;
    let mut out = Vec::new();
    let mut cur = (*sentinel_mut).prev.load(Ordering::Acquire);
    while cur != sentinel_mut {
        out.push(cur);
        cur = (*cur).prev.load(Ordering::Acquire);
    }
    out
}
