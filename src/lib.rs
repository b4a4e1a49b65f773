//! Scalable epoch-based memory reclamation, and two reclaimer clients
//! built on top of it: a Java-`ConcurrentHashMap`-style concurrent hash
//! table and a Michael-Scott queue.

pub mod error;
pub mod hashmap;
pub mod park;
pub mod queue;
pub mod sebr;

pub use hashmap::{ConcurrentHashMap, MapConfig, MapRef, WeakIter};
pub use queue::MsQueue;
pub use sebr::{BackgroundGc, Group, GroupConfig, Pin};
