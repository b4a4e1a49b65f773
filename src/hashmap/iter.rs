//! A weakly-consistent snapshot iterator.
//!
//! Ported from `ConcurrentHashMap::ConstIterator`. "Weakly consistent"
//! here means: the iterator reflects the state of the map at the moment
//! each bin it visits is read, never blocks a writer, and never throws
//! if the map is mutated concurrently, but may or may not observe an
//! insertion/removal that raced past the bin already visited or not yet
//! reached. It never returns a value for a key that was never present.

use std::hash::Hash;
use std::sync::atomic::Ordering;

use crate::hashmap::map::ConcurrentHashMap;
use crate::hashmap::node::{view, BinView, Node};
use crate::sebr::Pin;

pub struct WeakIter<'a, K, V> {
    _pin: Pin<'a>,
    table: *const crate::hashmap::table::BucketTable<K, V>,
    index: isize,
    curr: *mut Node<K, V>,
}

impl<'a, K, V> WeakIter<'a, K, V>
where
    K: Hash + Eq + Ord + Clone,
    V: Clone,
{
    pub(crate) fn new(map: &'a ConcurrentHashMap<K, V>) -> WeakIter<'a, K, V> {
        let pin = Pin::new(map.group());
        let table = map.table_ptr_pub();
        if table.is_null() {
            return WeakIter {
                _pin: pin,
                table: std::ptr::null(),
                index: -1,
                curr: std::ptr::null_mut(),
            };
        }
        let t = unsafe { &*table };
        let mut index: isize = 0;
        let mut curr = None;
        while (index as usize) < t.len() {
            let head = t.tab_at(index as usize);
            if !head.is_null() {
                if let Some(c) = unsafe { first_of_bin(head) } {
                    curr = Some(c);
                    break;
                }
            }
            index += 1;
        }
        match curr {
            Some(c) => WeakIter {
                _pin: pin,
                table,
                index,
                curr: c,
            },
            None => WeakIter {
                _pin: pin,
                table: std::ptr::null(),
                index: -1,
                curr: std::ptr::null_mut(),
            },
        }
    }
}

/// If `head` is a tree bin, descend to its first linked `TreeNode`
/// (viewed back through its `Node` header), mirroring the original's
/// `static_cast<TreeNode*>(static_cast<TreeBin*>(curr)->first)`.
///
/// Returns `None` for a resize forwarding sentinel (or the unused
/// `RESERVED` placeholder) rather than handing back a `Node<K, V>` view
/// of a differently laid-out type; the caller skips to the next index
/// instead, which a weakly consistent iterator is already permitted to
/// do for any concurrently moved bin.
unsafe fn first_of_bin<K, V>(head: *mut Node<K, V>) -> Option<*mut Node<K, V>> {
    match view(head) {
        BinView::Empty => None,
        BinView::List(_) => Some(head),
        BinView::Tree(tb) => Some(tb.first.load(Ordering::Acquire) as *mut Node<K, V>),
        BinView::Forwarding(_) | BinView::Reserved => None,
    }
}

impl<'a, K, V> Iterator for WeakIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == -1 || self.curr.is_null() {
            return None;
        }
        // SAFETY: the node this points at cannot be reclaimed before
        // `self._pin` is dropped, which outlives the returned references
        // by construction (`'a` is `self`'s own lifetime parameter).
        let item: (&'a K, &'a V) = unsafe {
            let c = &*self.curr;
            (&c.key, c.value_ref(Ordering::Acquire))
        };

        unsafe {
            let next = (*self.curr).next.load(Ordering::Acquire);
            if !next.is_null() {
                self.curr = next;
                return Some(item);
            }
            let t = &*self.table;
            loop {
                self.index += 1;
                if (self.index as usize) >= t.len() {
                    self.index = -1;
                    self.curr = std::ptr::null_mut();
                    self.table = std::ptr::null();
                    break;
                }
                let c = t.tab_at(self.index as usize);
                if !c.is_null() {
                    if let Some(next_curr) = first_of_bin(c) {
                        self.curr = next_curr;
                        break;
                    }
                }
            }
        }
        Some(item)
    }
}
