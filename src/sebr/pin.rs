//! Scoped critical-section guard.
//!
//! Ported from the RAII `Pin`/`PackedHandle` pattern in `sebr_local.hpp`:
//! acquiring a [`Pin`] stamps the calling thread's handle with the
//! group's current epoch, and dropping it clears the stamp and maybe
//! runs a local reclamation pass. Internal callers that already hold a
//! `Pin` for the group must thread `&Pin` through rather than
//! constructing a nested one — `Handle` has no reentrant-pin counting,
//! matching the discipline of `TreeBin::lockRoot`-style helpers in the
//! original, which take an existing `Pin&` by reference.

use std::marker::PhantomData;

use crate::sebr::group::Group;
use crate::sebr::handle::Handle;

/// A scoped critical section against a [`Group`]. While a `Pin` is live,
/// no record this thread retires (or any record retired by another
/// thread before this `Pin`'s epoch) can be reclaimed.
pub struct Pin<'g> {
    handle: *mut Handle,
    _group: PhantomData<&'g Group>,
}

impl<'g> Pin<'g> {
    /// Enter a critical section against `group`, creating and joining
    /// this thread's handle the first time it pins this group.
    pub fn new(group: &'g Group) -> Pin<'g> {
        let handle = group.handle_for();
        unsafe { (*handle).enter() };
        Pin {
            handle,
            _group: PhantomData,
        }
    }

    /// Hand a reclamation record to this thread's retire buffer, tagged
    /// with the group's current epoch. `free` runs once the record is
    /// provably unreachable by every live `Pin` on this group.
    pub fn retire(&self, bytes: usize, free: impl FnOnce() + Send + 'static) {
        unsafe { (*self.handle).retire(bytes, Box::new(free)) };
    }
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        unsafe { (*self.handle).exit() };
    }
}
