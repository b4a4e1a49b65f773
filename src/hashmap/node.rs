//! Bin formats and the hash-spreading function.
//!
//! Ported from `Node`/`TreeNode`/`ForwardingObject`/`ConcurrentHashMap`'s
//! static constants in `concurrent_hash_map.hpp`. A bin's `hash` field
//! doubles as both an ordinary (spread) hash code, for list bins, and a
//! sentinel discriminating the other three bin kinds — this mirrors the
//! original's single `int hash` field read before a `dynamic_cast`.
//!
//! `#[repr(C)]` with `hash` as the first field lets [`crate::hashmap::table`]
//! read the discriminant through a type-erased pointer before committing
//! to a concrete node type, the same way the original reads `node->hash`
//! before deciding whether the bin is a list, a tree, or a forwarding
//! pointer.

use std::hash::Hash;
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

use crate::hashmap::table::BucketTable;
use crate::hashmap::tree::TreeBin;

pub(crate) const MOVED: i32 = -1;
pub(crate) const TREEBIN: i32 = -2;
#[allow(dead_code)]
pub(crate) const RESERVED: i32 = -3;
pub(crate) const HASH_BITS: i32 = 0x7fff_ffff;

pub(crate) const DEFAULT_CAPACITY: usize = 16;
pub(crate) const MAXIMUM_CAPACITY: usize = 1 << 30;
pub(crate) const MIN_TRANSFER_STRIDE: isize = 16;
pub(crate) const RESIZE_STAMP_BITS: u32 = 16;
pub(crate) const RESIZE_STAMP_SHIFT: u32 = 32 - RESIZE_STAMP_BITS;
pub(crate) const TREEIFY_THRESHOLD: usize = 8;
pub(crate) const UNTREEIFY_THRESHOLD: usize = 6;
pub(crate) const MIN_TREEIFY_CAPACITY: usize = 64;

/// `spread()` in `concurrent_hash_map.hpp`: XORs the high bits of a raw
/// hash down into the low bits and clears the sign bit, so bin indices
/// (derived from the low bits via `& (n - 1)`) still see entropy from
/// the whole hash even for a poor `Hash` implementation.
pub(crate) fn spread(h: i32) -> i32 {
    (h ^ ((h as u32) >> 16) as i32) & HASH_BITS
}

pub(crate) fn hash_of<K: Hash>(key: &K) -> i32 {
    use std::hash::Hasher;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    spread(hasher.finish() as i32)
}

/// Common header every concrete bin-head type starts with, so a raw
/// pointer of unknown concrete type can be read as this type to recover
/// `hash` and decide what it actually points to.
#[repr(C)]
pub(crate) struct NodeHeader {
    pub(crate) hash: i32,
}

/// A singly-linked list-bin entry. `hash >= 0` always for a live `Node`.
///
/// `value` is held by pointer, not by value: an in-place update replaces
/// the pointer with a CAS/swap and retires the old value through the
/// same `Pin` a removed node is retired through, so a reader that has
/// already loaded the old pointer keeps a valid (if stale) value to
/// dereference instead of racing a direct field write.
#[repr(C)]
pub(crate) struct Node<K, V> {
    pub(crate) hash: i32,
    pub(crate) key: K,
    pub(crate) value: AtomicPtr<V>,
    pub(crate) next: AtomicPtr<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(hash: i32, key: K, value: V, next: *mut Node<K, V>) -> Box<Node<K, V>> {
        Box::new(Node {
            hash,
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next: AtomicPtr::new(next),
        })
    }

    /// Read the current value pointer under the given ordering, cloning
    /// it out. Callers must hold a `Pin` covering the load so the
    /// pointee cannot be reclaimed before the clone completes.
    pub(crate) unsafe fn value_ref<'a>(&self, order: Ordering) -> &'a V {
        &*self.value.load(order)
    }
}

impl<K: PartialEq, V> Node<K, V> {
    /// Linear scan of a list bin, mirroring `Node::find`.
    pub(crate) unsafe fn find<'a>(
        mut node: *const Node<K, V>,
        hash: i32,
        key: &K,
    ) -> Option<&'a Node<K, V>> {
        while !node.is_null() {
            let n = &*node;
            if n.hash == hash && &n.key == key {
                return Some(n);
            }
            node = n.next.load(Ordering::Acquire);
        }
        None
    }
}

/// A red-black tree bin entry, additionally linked as a plain list via
/// `next`/`prev` (so a tree bin can fall back to a linear scan under
/// contention) and via `parent`/`left`/`right`/`red` for the tree
/// proper. Ported from `TreeNode` in `concurrent_hash_map.hpp`.
#[repr(C)]
pub(crate) struct TreeNode<K, V> {
    pub(crate) hash: i32,
    pub(crate) key: K,
    pub(crate) value: AtomicPtr<V>,
    pub(crate) next: AtomicPtr<Node<K, V>>,

    pub(crate) prev: *mut TreeNode<K, V>,
    pub(crate) parent: *mut TreeNode<K, V>,
    pub(crate) left: *mut TreeNode<K, V>,
    pub(crate) right: *mut TreeNode<K, V>,
    pub(crate) red: bool,
}

impl<K, V> TreeNode<K, V> {
    pub(crate) fn new(hash: i32, key: K, value: V) -> Box<TreeNode<K, V>> {
        Box::new(TreeNode {
            hash,
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next: AtomicPtr::new(std::ptr::null_mut()),
            prev: std::ptr::null_mut(),
            parent: std::ptr::null_mut(),
            left: std::ptr::null_mut(),
            right: std::ptr::null_mut(),
            red: false,
        })
    }

    /// Read the current value pointer, cloning it out. Callers must hold
    /// a `Pin` covering the load, as with [`Node::value_ref`].
    pub(crate) unsafe fn value_ref<'a>(&self, order: Ordering) -> &'a V {
        &*self.value.load(order)
    }

    /// Reinterpret this tree node as the plain `Node` header its `next`
    /// chain is built from; valid because `Node` and `TreeNode` share
    /// their first four fields' layout under `#[repr(C)]`.
    pub(crate) fn as_node_ptr(node: *mut TreeNode<K, V>) -> *mut Node<K, V> {
        node as *mut Node<K, V>
    }
}

/// Sentinel bin-head installed at a slot mid-transfer, whose `hash` field
/// reads as `MOVED`. Readers that land on one redirect to `table`, the
/// table being grown into. Owned by the *old* `BucketTable`; transfer
/// workers only ever see it through a raw pointer guarded by the stripe
/// lock of the slot it was installed into (per DESIGN.md OQ on
/// forwarding-sentinel ownership).
#[repr(C)]
pub(crate) struct ForwardingNode<K, V> {
    pub(crate) hash: i32,
    _pad: [u8; 0],
    pub(crate) table: *const BucketTable<K, V>,
}

impl<K, V> ForwardingNode<K, V> {
    pub(crate) fn new(table: *const BucketTable<K, V>) -> Box<ForwardingNode<K, V>> {
        Box::new(ForwardingNode {
            hash: MOVED,
            _pad: [],
            table,
        })
    }
}

/// What a bin-head pointer, once its `hash` discriminant has been read,
/// actually points to.
pub(crate) enum BinView<'a, K, V> {
    Empty,
    List(&'a Node<K, V>),
    Tree(&'a TreeBin<K, V>),
    Forwarding(&'a ForwardingNode<K, V>),
    /// `RESERVED`: declared for parity with the original, never installed
    /// by this port (`casTabAt`'s reservation dance in `putVal` is not
    /// needed without the original's `computeIfAbsent` overloads).
    #[allow(dead_code)]
    Reserved,
}

/// Read a type-erased bin-head pointer's discriminant and recover a
/// typed view, the safe-as-possible analogue of the original's
/// `dynamic_cast<TreeBin*>`/`dynamic_cast<ForwardingObject*>` chain.
///
/// # Safety
/// `ptr` must be null or point to a live `Node<K, V>`, `TreeBin<K, V>`,
/// or `ForwardingNode<K, V>` whose first field is `hash: i32`.
pub(crate) unsafe fn view<'a, K, V>(ptr: *mut Node<K, V>) -> BinView<'a, K, V> {
    if ptr.is_null() {
        return BinView::Empty;
    }
    let hash = (*(ptr as *const NodeHeader)).hash;
    match hash {
        MOVED => BinView::Forwarding(&*(ptr as *const ForwardingNode<K, V>)),
        TREEBIN => BinView::Tree(&*(ptr as *const TreeBin<K, V>)),
        RESERVED => BinView::Reserved,
        _ => BinView::List(&*ptr),
    }
}
