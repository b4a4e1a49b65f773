//! A `java.util.concurrent.ConcurrentHashMap`-style striped/treeified
//! hash table, built on [`crate::sebr`] for safe lock-free reads.

mod iter;
mod map;
mod node;
mod table;
mod tree;

pub use iter::WeakIter;
pub use map::{ConcurrentHashMap, MapConfig, MapRef};
