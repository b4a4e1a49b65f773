//! Scalable epoch-based reclamation.
//!
//! Ported from the participants-list/garbage-bag design in
//! `crossbeam::mem::epoch`, generalized to the intrusive tagged-pointer
//! handle list and local-buffer reclaimer of `sebr_local.hpp`. A
//! [`Group`] is a reclamation domain; a thread pins a group by
//! constructing a [`Pin`], which hands out [`Pin::retire`] for deferred
//! frees and is dropped at the end of the critical section.

mod background;
mod config;
mod group;
mod handle;
mod list;
mod pin;

pub use background::BackgroundGc;
pub use config::GroupConfig;
pub use group::Group;
pub use pin::Pin;
