//! The concurrent hash map itself: lock-free reads, striped-lock writes,
//! list/tree bins, and a cooperative multi-worker resize.
//!
//! Ported from the public API and private resize engine of
//! `ConcurrentHashMap` in `concurrent_hash_map.hpp` (itself modeled on
//! `java.util.concurrent.ConcurrentHashMap`).

use std::hash::Hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicIsize, AtomicPtr, Ordering};

use crate::hashmap::node::{
    hash_of, view, BinView, ForwardingNode, Node, DEFAULT_CAPACITY, MAXIMUM_CAPACITY,
    MIN_TRANSFER_STRIDE, MIN_TREEIFY_CAPACITY, MOVED, RESIZE_STAMP_BITS, RESIZE_STAMP_SHIFT,
    TREEIFY_THRESHOLD, UNTREEIFY_THRESHOLD,
};
use crate::hashmap::table::BucketTable;
use crate::hashmap::tree::TreeBin;
use crate::sebr::{Group, GroupConfig, Pin};

/// Construction-time tunables. Mirrors `ThreadGroup`/`GroupConfig`'s
/// builder style (spec.md §4.10).
#[derive(Clone, Copy, Debug)]
pub struct MapConfig {
    pub initial_capacity: usize,
    pub group: GroupConfig,
}

impl Default for MapConfig {
    fn default() -> MapConfig {
        MapConfig {
            initial_capacity: DEFAULT_CAPACITY,
            group: GroupConfig::default(),
        }
    }
}

impl MapConfig {
    pub fn with_initial_capacity(mut self, cap: usize) -> Self {
        self.initial_capacity = cap;
        self
    }

    pub fn with_group(mut self, group: GroupConfig) -> Self {
        self.group = group;
        self
    }
}

const MAX_RESIZERS: i32 = (1 << (32 - RESIZE_STAMP_BITS)) - 1;

pub struct ConcurrentHashMap<K, V> {
    group: Group,
    table: AtomicPtr<BucketTable<K, V>>,
    next_table: AtomicPtr<BucketTable<K, V>>,
    base_count: AtomicI64,
    size_ctl: AtomicI32,
    transfer_index: AtomicIsize,
    initial_capacity: usize,
}

unsafe impl<K: Send, V: Send> Send for ConcurrentHashMap<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for ConcurrentHashMap<K, V> {}

/// A scoped reference to a live value, keeping the map's reclaimer
/// pinned for as long as it's held. Analogous to `ConstKeyValueIterator`
/// in the original, minus the "advance to next bucket" half that
/// belongs to [`super::iter::WeakIter`] instead.
pub struct MapRef<'a, V> {
    _pin: Pin<'a>,
    value: *const V,
}

impl<'a, V> Deref for MapRef<'a, V> {
    type Target = V;
    fn deref(&self) -> &V {
        unsafe { &*self.value }
    }
}

impl<K, V> ConcurrentHashMap<K, V>
where
    K: Hash + Eq + Ord + Clone,
    V: Clone,
{
    pub fn new() -> ConcurrentHashMap<K, V> {
        Self::with_config(MapConfig::default())
    }

    pub fn with_config(config: MapConfig) -> ConcurrentHashMap<K, V> {
        ConcurrentHashMap {
            group: Group::new(config.group),
            table: AtomicPtr::new(std::ptr::null_mut()),
            next_table: AtomicPtr::new(std::ptr::null_mut()),
            base_count: AtomicI64::new(0),
            size_ctl: AtomicI32::new(config.initial_capacity as i32),
            transfer_index: AtomicIsize::new(0),
            initial_capacity: config.initial_capacity.max(1),
        }
    }

    pub fn size(&self) -> i64 {
        self.base_count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Look up `key`, cloning its value out under a brief pin.
    pub fn find(&self, key: &K) -> Option<V> {
        self.find_ref(key).map(|r| (*r).clone())
    }

    /// Look up `key`, returning a scoped reference that keeps the
    /// reclaimer pinned instead of cloning immediately.
    pub fn find_ref<'a>(&'a self, key: &K) -> Option<MapRef<'a, V>> {
        let pin = Pin::new(&self.group);
        let hash = hash_of(key);
        let mut table = self.table_ptr();
        loop {
            if table.is_null() {
                return None;
            }
            let t = unsafe { &*table };
            let n = t.len();
            let idx = (n - 1) & (hash as usize);
            let head = t.tab_at(idx);
            if head.is_null() {
                return None;
            }
            unsafe {
                match view(head) {
                    BinView::Empty | BinView::Reserved => return None,
                    BinView::Forwarding(fwd) => {
                        table = fwd.table as *mut BucketTable<K, V>;
                        continue;
                    }
                    BinView::Tree(tb) => {
                        return tb.find(hash, key).map(|n| MapRef {
                            _pin: pin,
                            value: n.value.load(Ordering::Acquire) as *const V,
                        });
                    }
                    BinView::List(_) => {
                        return Node::find(head, hash, key).map(|n| MapRef {
                            _pin: pin,
                            value: n.value.load(Ordering::Acquire) as *const V,
                        });
                    }
                }
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_ref(key).is_some()
    }

    /// Insert `key => value`, returning the value previously stored
    /// there, if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.put(key, value, false)
    }

    /// Insert `key => value` only if absent. Returns `true` if the
    /// insertion happened.
    pub fn insert_absent(&self, key: K, value: V) -> bool {
        self.put(key, value, true).is_none()
    }

    fn put(&self, key: K, value: V, absent: bool) -> Option<V> {
        let hash = hash_of(&key);
        let pin = Pin::new(&self.group);
        let mut table = self.init_table();
        let mut bin_count;
        let mut key = Some(key);
        let mut value = Some(value);

        loop {
            let t = unsafe { &*table };
            let n = t.len();
            let i = (n - 1) & (hash as usize);
            let f = t.tab_at(i);

            if f.is_null() {
                let node = Node::new(hash, key.take().unwrap(), value.take().unwrap(), std::ptr::null_mut());
                let raw = Box::into_raw(node);
                if t.cas_tab_at(i, std::ptr::null_mut(), raw) {
                    self.add_count(1, 0, &pin);
                    return None;
                }
                unsafe {
                    let Node { key: k, value: v_ptr, .. } = *Box::from_raw(raw);
                    key = Some(k);
                    value = Some(*Box::from_raw(v_ptr.load(Ordering::Relaxed)));
                }
                continue;
            }

            let fh = unsafe { (*(f as *const crate::hashmap::node::NodeHeader)).hash };
            if fh == MOVED {
                table = self.help_transfer(table, f, &pin);
                continue;
            }

            if absent && fh == hash {
                if let Some(found) = unsafe { Node::find(f, hash, key.as_ref().unwrap()) } {
                    return Some(unsafe { found.value_ref(Ordering::Acquire).clone() });
                }
            }

            bin_count = 0;
            let _guard = t.lock_stripe(i);
            if t.tab_at(i) != f {
                continue;
            }

            if fh >= 0 {
                bin_count = 1;
                let mut e = f;
                let result = loop {
                    let en = unsafe { &*e };
                    if en.hash == hash && &en.key == key.as_ref().unwrap() {
                        let old = unsafe { en.value_ref(Ordering::Acquire).clone() };
                        if !absent {
                            let v = value.take().unwrap();
                            let new_ptr = Box::into_raw(Box::new(v));
                            let old_ptr = en.value.swap(new_ptr, Ordering::AcqRel);
                            pin.retire(std::mem::size_of::<V>(), move || unsafe {
                                drop(Box::from_raw(old_ptr));
                            });
                        }
                        break Some(old);
                    }
                    let next = en.next.load(Ordering::Acquire);
                    if next.is_null() {
                        let new_node = Node::new(
                            hash,
                            key.take().unwrap(),
                            value.take().unwrap(),
                            std::ptr::null_mut(),
                        );
                        unsafe { (*e).next.store(Box::into_raw(new_node), Ordering::Release) };
                        break None;
                    }
                    bin_count += 1;
                    e = next;
                };
                drop(_guard);
                if bin_count >= TREEIFY_THRESHOLD {
                    self.treeify_bin(table, i, &pin);
                }
                if result.is_none() {
                    self.add_count(1, bin_count as i32, &pin);
                }
                return result;
            } else if let BinView::Tree(tb) = unsafe { view(f) } {
                let x = crate::hashmap::node::TreeNode::new(
                    hash,
                    key.take().unwrap(),
                    value.take().unwrap(),
                );
                let raw = Box::into_raw(x);
                let existing = tb.put_tree_val(raw);
                if existing.is_null() {
                    drop(_guard);
                    self.add_count(1, 2, &pin);
                    return None;
                }
                unsafe {
                    let old = (*existing).value_ref(Ordering::Acquire).clone();
                    let crate::hashmap::node::TreeNode { value: new_value_cell, .. } =
                        *Box::from_raw(raw);
                    let new_ptr = new_value_cell.load(Ordering::Relaxed);
                    if !absent {
                        let old_ptr = (*existing).value.swap(new_ptr, Ordering::AcqRel);
                        pin.retire(std::mem::size_of::<V>(), move || {
                            drop(Box::from_raw(old_ptr));
                        });
                    } else {
                        drop(Box::from_raw(new_ptr));
                    }
                    return Some(old);
                }
            }
        }
    }

    /// Remove `key`, returning its value if present.
    pub fn erase(&self, key: &K) -> Option<V> {
        self.remove(key, None)
    }

    /// Remove `key` only if its current value equals `value`.
    pub fn erase_equal(&self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.remove(key, Some(value)).is_some()
    }

    fn remove(&self, key: &K, expect: Option<&V>) -> Option<V>
    where
        V: PartialEq,
    {
        let hash = hash_of(key);
        let pin = Pin::new(&self.group);
        let mut table = self.table_ptr();

        loop {
            if table.is_null() {
                return None;
            }
            let t = unsafe { &*table };
            let n = t.len();
            let i = (n - 1) & (hash as usize);
            let f = t.tab_at(i);
            if f.is_null() {
                return None;
            }

            let fh = unsafe { (*(f as *const crate::hashmap::node::NodeHeader)).hash };
            if fh == MOVED {
                table = self.help_transfer(table, f, &pin);
                continue;
            }

            let _guard = t.lock_stripe(i);
            if t.tab_at(i) != f {
                continue;
            }

            if fh >= 0 {
                let mut pred: *mut Node<K, V> = std::ptr::null_mut();
                let mut e = f;
                loop {
                    let en = unsafe { &*e };
                    if en.hash == hash && &en.key == key {
                        let value_ptr = en.value.load(Ordering::Acquire);
                        let old = unsafe { (*value_ptr).clone() };
                        if expect.map_or(true, |v| *v == old) {
                            let next = en.next.load(Ordering::Acquire);
                            if pred.is_null() {
                                t.set_tab_at(i, next);
                            } else {
                                unsafe { (*pred).next.store(next, Ordering::Release) };
                            }
                            drop(_guard);
                            pin.retire(std::mem::size_of::<Node<K, V>>(), move || unsafe {
                                drop(Box::from_raw(value_ptr));
                                drop(Box::from_raw(e));
                            });
                            self.add_count(-1, -1, &pin);
                            return Some(old);
                        }
                        return None;
                    }
                    pred = e;
                    let next = en.next.load(Ordering::Acquire);
                    if next.is_null() {
                        return None;
                    }
                    e = next;
                }
            } else if let BinView::Tree(tb) = unsafe { view(f) } {
                let hit = tb.find(hash, key);
                match hit {
                    Some(found) => {
                        let value_ptr = found.value.load(Ordering::Acquire);
                        let old = unsafe { (*value_ptr).clone() };
                        if !expect.map_or(true, |v| *v == old) {
                            return None;
                        }
                        let p = found as *const _ as *mut crate::hashmap::node::TreeNode<K, V>;
                        let shrank = tb.remove_tree_node(p);
                        if shrank {
                            let mut num = 0usize;
                            let list = unsafe { untreeify(tb.first.load(Ordering::Acquire), &mut num) };
                            t.set_tab_at(i, list);
                        }
                        drop(_guard);
                        pin.retire(
                            std::mem::size_of::<crate::hashmap::node::TreeNode<K, V>>(),
                            move || unsafe {
                                drop(Box::from_raw(value_ptr));
                                drop(Box::from_raw(p));
                            },
                        );
                        self.add_count(-1, -1, &pin);
                        return Some(old);
                    }
                    None => return None,
                }
            }
        }
    }

    fn table_ptr(&self) -> *mut BucketTable<K, V> {
        self.table.load(Ordering::Acquire)
    }

    pub(crate) fn table_ptr_pub(&self) -> *mut BucketTable<K, V> {
        self.table_ptr()
    }

    pub(crate) fn group(&self) -> &Group {
        &self.group
    }

    /// A weakly consistent snapshot iterator, per spec.md §6/§9.
    pub fn iter(&self) -> crate::hashmap::iter::WeakIter<'_, K, V> {
        crate::hashmap::iter::WeakIter::new(self)
    }

    /// Lazily allocates the backing array the first time it's needed,
    /// racing other initializers via `sizeCtl`'s -1 ("initializing")
    /// sentinel. Ported from `initTable`.
    fn init_table(&self) -> *mut BucketTable<K, V> {
        loop {
            let mut t = self.table_ptr();
            if !t.is_null() && unsafe { (*t).len() } != 0 {
                return t;
            }
            let sc = self.size_ctl.load(Ordering::Acquire);
            if sc < 0 {
                std::thread::yield_now();
                continue;
            }
            if self
                .size_ctl
                .compare_exchange(sc, -1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                t = self.table_ptr();
                if t.is_null() || unsafe { (*t).len() } == 0 {
                    let cap = if sc > 0 {
                        sc as usize
                    } else {
                        self.initial_capacity
                    };
                    let nt = Box::into_raw(Box::new(BucketTable::new(cap)));
                    self.table.store(nt, Ordering::Release);
                    t = nt;
                    let new_sc = (cap - (cap >> 2)) as i32;
                    self.size_ctl.store(new_sc, Ordering::Release);
                } else {
                    self.size_ctl.store(sc, Ordering::Release);
                }
                return t;
            }
        }
    }

    /// Ported from `addCount`: bumps the element count, then starts or
    /// joins a resize if the new count crosses `sizeCtl`'s threshold.
    fn add_count(&self, delta: i64, check: i32, pin: &Pin<'_>) {
        let mut s = self.base_count.fetch_add(delta, Ordering::SeqCst) + delta;
        if check < 0 {
            return;
        }
        loop {
            let sc = self.size_ctl.load(Ordering::Acquire);
            if s < sc as i64 {
                break;
            }
            let table = self.table_ptr();
            if table.is_null() {
                break;
            }
            let n = unsafe { (*table).len() };
            if n >= MAXIMUM_CAPACITY {
                break;
            }
            let rs = resize_stamp(n) << RESIZE_STAMP_SHIFT;
            if sc < 0 {
                let nt = self.next_table.load(Ordering::Acquire);
                if sc == rs + MAX_RESIZERS
                    || sc == rs + 1
                    || nt.is_null()
                    || self.transfer_index.load(Ordering::Acquire) <= 0
                {
                    break;
                }
                if self
                    .size_ctl
                    .compare_exchange(sc, sc + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.transfer(table, nt, pin);
                }
            } else if self
                .size_ctl
                .compare_exchange(sc, rs + 2, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.start_transfer(table, pin);
            }
            s = self.base_count.load(Ordering::SeqCst);
        }
    }

    /// Ported from `helpTransfer`: if the bin a thread landed on has
    /// already been forwarded, join the in-progress resize instead of
    /// spinning.
    fn help_transfer(
        &self,
        table: *mut BucketTable<K, V>,
        f: *mut Node<K, V>,
        pin: &Pin<'_>,
    ) -> *mut BucketTable<K, V> {
        let fwd = unsafe {
            match view(f) {
                BinView::Forwarding(fwd) => fwd,
                _ => return table,
            }
        };
        let next_tab = fwd.table as *mut BucketTable<K, V>;
        let n = unsafe { (*table).len() };
        let rs = resize_stamp(n) << RESIZE_STAMP_SHIFT;
        loop {
            if self.next_table.load(Ordering::Acquire) != next_tab || self.table_ptr() != table {
                break;
            }
            let sc = self.size_ctl.load(Ordering::Acquire);
            if sc >= 0 {
                break;
            }
            if sc == rs + MAX_RESIZERS || sc == rs + 1 || self.transfer_index.load(Ordering::Acquire) <= 0 {
                break;
            }
            if self
                .size_ctl
                .compare_exchange(sc, sc + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.transfer(table, next_tab, pin);
                break;
            }
        }
        next_tab
    }

    /// First call into a resize: allocates the doubled table and
    /// publishes it to `next_table` before handing off to the striding
    /// transfer loop. Ported from the one-argument `transfer` overload.
    fn start_transfer(&self, table: *mut BucketTable<K, V>, pin: &Pin<'_>) {
        let len = unsafe { (*table).len() };
        log::trace!("hashmap resize start: {} -> {}", len, len << 1);
        let nt = Box::into_raw(Box::new(BucketTable::new(len << 1)));
        self.next_table.store(nt, Ordering::Release);
        self.transfer_index.store(len as isize, Ordering::Release);
        self.transfer(table, nt, pin);
    }

    /// Tries to presize the table to accommodate `size` elements without
    /// waiting for `addCount` to notice. Ported from `tryPresize`.
    fn try_presize(&self, size: usize, pin: &Pin<'_>) {
        let c = if size >= (MAXIMUM_CAPACITY >> 1) {
            MAXIMUM_CAPACITY
        } else {
            table_size_for(size + (size >> 1) + 1)
        };
        loop {
            let sc = self.size_ctl.load(Ordering::Acquire);
            if sc < 0 {
                break;
            }
            let table = self.init_table();
            let n = unsafe { (*table).len() };
            if c <= sc as usize || n >= MAXIMUM_CAPACITY {
                break;
            }
            if table == self.table_ptr() {
                let rs = resize_stamp(n);
                if self
                    .size_ctl
                    .compare_exchange(sc, (rs << RESIZE_STAMP_SHIFT) + 2, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.start_transfer(table, pin);
                }
            }
        }
    }

    /// Claims contiguous strides of the old table via a CAS-decremented
    /// `transferIndex` and moves each slot's bin into the new table,
    /// splitting list bins by their newly significant bit and rebuilding
    /// (or keeping) tree bins as appropriate. Ported from the
    /// two-argument `transfer`.
    fn transfer(&self, table: *mut BucketTable<K, V>, next_tab: *mut BucketTable<K, V>, pin: &Pin<'_>) {
        let t = unsafe { &*table };
        let len = t.len();
        let ncpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let mut stride = if ncpu > 1 {
            ((len >> 3) / ncpu) as isize
        } else {
            len as isize
        };
        if stride < MIN_TRANSFER_STRIDE {
            stride = MIN_TRANSFER_STRIDE;
        }

        let nextn = unsafe { (*next_tab).len() };
        let fwd = Box::into_raw(ForwardingNode::<K, V>::new(next_tab)) as *mut Node<K, V>;
        let mut advance = true;
        let mut finishing = false;
        let mut i: isize = 0;
        let mut bound: isize = 0;

        loop {
            while advance {
                i -= 1;
                if i >= bound || finishing {
                    advance = false;
                } else {
                    let next_index = self.transfer_index.load(Ordering::Acquire);
                    if next_index <= 0 {
                        i = -1;
                        advance = false;
                    } else {
                        let next_bound = if next_index > stride {
                            next_index - stride
                        } else {
                            0
                        };
                        if self
                            .transfer_index
                            .compare_exchange(next_index, next_bound, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            bound = next_bound;
                            i = next_index - 1;
                            advance = false;
                        }
                    }
                }
            }

            if i < 0 || (i as usize) >= len || (i as usize) + len >= nextn {
                if finishing {
                    self.next_table.store(std::ptr::null_mut(), Ordering::Release);
                    self.table.store(next_tab, Ordering::Release);
                    let old_table = table;
                    pin.retire(std::mem::size_of::<BucketTable<K, V>>(), move || unsafe {
                        drop(Box::from_raw(old_table));
                    });
                    self.size_ctl.store(((len << 1) - (len >> 1)) as i32, Ordering::Release);
                    log::trace!("hashmap resize finish: capacity {}", len << 1);
                    return;
                }
                let sc = self.size_ctl.load(Ordering::Acquire);
                if self
                    .size_ctl
                    .compare_exchange(sc, sc - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if sc - 2 != resize_stamp(len) << RESIZE_STAMP_SHIFT {
                        return;
                    }
                    finishing = true;
                    advance = true;
                    i = len as isize;
                }
                continue;
            }

            let idx = i as usize;
            let f = t.tab_at(idx);
            if f.is_null() {
                advance = t.cas_tab_at(idx, std::ptr::null_mut(), fwd);
                continue;
            }
            let fh = unsafe { (*(f as *const crate::hashmap::node::NodeHeader)).hash };
            if fh == MOVED {
                advance = true;
                continue;
            }

            let _guard = t.lock_stripe(idx);
            if t.tab_at(idx) != f {
                continue;
            }

            if fh >= 0 {
                let run_bit_mask = len as i32;
                let mut run_bit = fh & run_bit_mask;
                let mut last_run = f;
                let mut p = unsafe { (*f).next.load(Ordering::Acquire) };
                while !p.is_null() {
                    let b = unsafe { (*p).hash } & run_bit_mask;
                    if b != run_bit {
                        run_bit = b;
                        last_run = p;
                    }
                    p = unsafe { (*p).next.load(Ordering::Acquire) };
                }
                let (mut ln, mut hn) = if run_bit == 0 {
                    (last_run, std::ptr::null_mut())
                } else {
                    (std::ptr::null_mut(), last_run)
                };

                let mut p = f;
                while p != last_run {
                    let pn = unsafe { &*p };
                    let ph = pn.hash;
                    let pv = unsafe { pn.value_ref(Ordering::Acquire).clone() };
                    if ph & run_bit_mask == 0 {
                        ln = Box::into_raw(Node::new(ph, pn.key.clone(), pv, ln));
                    } else {
                        hn = Box::into_raw(Node::new(ph, pn.key.clone(), pv, hn));
                    }
                    p = pn.next.load(Ordering::Acquire);
                }

                unsafe { (*next_tab).set_tab_at(idx, ln) };
                unsafe { (*next_tab).set_tab_at(idx + len, hn) };
                t.set_tab_at(idx, fwd);

                pin.retire(0, move || unsafe {
                    let mut cur = f;
                    while cur != last_run {
                        let next = (*cur).next.load(Ordering::Relaxed);
                        drop(Box::from_raw((*cur).value.load(Ordering::Relaxed)));
                        drop(Box::from_raw(cur));
                        cur = next;
                    }
                });
            } else if let BinView::Tree(tb) = unsafe { view(f) } {
                let run_bit_mask = len as i32;
                let mut lo: *mut crate::hashmap::node::TreeNode<K, V> = std::ptr::null_mut();
                let mut lo_tail: *mut crate::hashmap::node::TreeNode<K, V> = std::ptr::null_mut();
                let mut hi: *mut crate::hashmap::node::TreeNode<K, V> = std::ptr::null_mut();
                let mut hi_tail: *mut crate::hashmap::node::TreeNode<K, V> = std::ptr::null_mut();
                let mut lc = 0usize;
                let mut hc = 0usize;

                let mut e = tb.first.load(Ordering::Acquire);
                while !e.is_null() {
                    let en = unsafe { &*e };
                    let h = en.hash;
                    let ev = unsafe { en.value_ref(Ordering::Acquire).clone() };
                    let p = Box::into_raw(crate::hashmap::node::TreeNode::new(h, en.key.clone(), ev));
                    if h & run_bit_mask == 0 {
                        unsafe {
                            (*p).prev = lo_tail;
                            if lo_tail.is_null() {
                                lo = p;
                            } else {
                                (*lo_tail).next.store(p as *mut Node<K, V>, Ordering::Relaxed);
                            }
                        }
                        lo_tail = p;
                        lc += 1;
                    } else {
                        unsafe {
                            (*p).prev = hi_tail;
                            if hi_tail.is_null() {
                                hi = p;
                            } else {
                                (*hi_tail).next.store(p as *mut Node<K, V>, Ordering::Relaxed);
                            }
                        }
                        hi_tail = p;
                        hc += 1;
                    }
                    e = en.next.load(Ordering::Acquire);
                }

                let mut num = 0usize;
                let ln = if lc <= UNTREEIFY_THRESHOLD {
                    unsafe { untreeify(lo as *mut Node<K, V>, &mut num) }
                } else if hc != 0 {
                    Box::into_raw(TreeBin::new(lo)) as *mut Node<K, V>
                } else {
                    tb as *const TreeBin<K, V> as *mut Node<K, V>
                };
                let hn = if hc <= UNTREEIFY_THRESHOLD {
                    unsafe { untreeify(hi as *mut Node<K, V>, &mut num) }
                } else if lc != 0 {
                    Box::into_raw(TreeBin::new(hi)) as *mut Node<K, V>
                } else {
                    tb as *const TreeBin<K, V> as *mut Node<K, V>
                };

                unsafe { (*next_tab).set_tab_at(idx, ln) };
                unsafe { (*next_tab).set_tab_at(idx + len, hn) };
                t.set_tab_at(idx, fwd);

                // `lo`/`hi` are the freshly cloned `TreeNode` chains built
                // above; they're only actually linked into the new table
                // when a fresh `TreeBin` was built around them. Otherwise
                // (untreeified, or the old bin reused verbatim) they're
                // dead and must be freed here.
                let flag_treebin_lc = lc > UNTREEIFY_THRESHOLD && hc == 0;
                let flag_treebin_hc = hc > UNTREEIFY_THRESHOLD && lc == 0;
                let free_lo_clones = lc <= UNTREEIFY_THRESHOLD || hc == 0;
                let free_hi_clones = hc <= UNTREEIFY_THRESHOLD || lc == 0;
                let free_old_treebin = !flag_treebin_lc && !flag_treebin_hc;
                pin.retire(0, move || unsafe {
                    if free_lo_clones {
                        free_tree_nodes(lo);
                    }
                    if free_hi_clones {
                        free_tree_nodes(hi);
                    }
                    if free_old_treebin {
                        drop(Box::from_raw(tb as *const TreeBin<K, V> as *mut TreeBin<K, V>));
                    }
                });
            }
            advance = true;
        }
    }

    /// Replaces a plain list bin with a red-black tree bin once it grows
    /// past `TREEIFY_THRESHOLD`, unless the table is still small enough
    /// that growing it is more profitable. Ported from `treeifyBin`.
    fn treeify_bin(&self, table: *mut BucketTable<K, V>, index: usize, pin: &Pin<'_>) {
        let t = unsafe { &*table };
        let n = t.len();
        if n < MIN_TREEIFY_CAPACITY {
            self.try_presize(n << 1, pin);
            return;
        }
        let b = t.tab_at(index);
        if b.is_null() {
            return;
        }
        let bh = unsafe { (*(b as *const crate::hashmap::node::NodeHeader)).hash };
        if bh < 0 {
            return;
        }
        let _guard = t.lock_stripe(index);
        if t.tab_at(index) != b {
            return;
        }
        let mut hd: *mut crate::hashmap::node::TreeNode<K, V> = std::ptr::null_mut();
        let mut tl: *mut crate::hashmap::node::TreeNode<K, V> = std::ptr::null_mut();
        let mut e = b;
        while !e.is_null() {
            let en = unsafe { &*e };
            let ev = unsafe { en.value_ref(Ordering::Acquire).clone() };
            let p = Box::into_raw(crate::hashmap::node::TreeNode::new(en.hash, en.key.clone(), ev));
            unsafe {
                (*p).prev = tl;
                if tl.is_null() {
                    hd = p;
                } else {
                    (*tl).next.store(p as *mut Node<K, V>, Ordering::Relaxed);
                }
            }
            tl = p;
            e = en.next.load(Ordering::Acquire);
        }
        let tree = Box::into_raw(TreeBin::new(hd));
        t.set_tab_at(index, tree as *mut Node<K, V>);
        drop(_guard);
        log::trace!("hashmap treeify bin {}", index);
        pin.retire(0, move || unsafe {
            let mut cur = b;
            while !cur.is_null() {
                let next = (*cur).next.load(Ordering::Relaxed);
                drop(Box::from_raw((*cur).value.load(Ordering::Relaxed)));
                drop(Box::from_raw(cur));
                cur = next;
            }
        });
    }
}

impl<K, V> Default for ConcurrentHashMap<K, V>
where
    K: Hash + Eq + Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for ConcurrentHashMap<K, V> {
    fn drop(&mut self) {
        let t = self.table.load(Ordering::Acquire);
        if !t.is_null() {
            unsafe { drop(Box::from_raw(t)) };
        }
    }
}

fn table_size_for(c: usize) -> usize {
    if c <= 1 {
        return 1;
    }
    let n = (usize::MAX >> (c - 1).leading_zeros()) ;
    if n >= MAXIMUM_CAPACITY {
        MAXIMUM_CAPACITY
    } else {
        n + 1
    }
}

fn resize_stamp(n: usize) -> i32 {
    (n as u32).leading_zeros() as i32 | (1 << (RESIZE_STAMP_BITS - 1))
}

unsafe fn untreeify<K, V>(
    mut q: *mut crate::hashmap::node::TreeNode<K, V>,
    num: &mut usize,
) -> *mut Node<K, V>
where
    K: Clone,
    V: Clone,
{
    let mut hd: *mut Node<K, V> = std::ptr::null_mut();
    let mut tl: *mut Node<K, V> = std::ptr::null_mut();
    let mut n = 0;
    while !q.is_null() {
        n += 1;
        let qn = &*q;
        let qv = qn.value_ref(Ordering::Relaxed).clone();
        let p = Box::into_raw(Node::new(qn.hash, qn.key.clone(), qv, std::ptr::null_mut()));
        if tl.is_null() {
            hd = p;
        } else {
            (*tl).next.store(p, Ordering::Relaxed);
        }
        tl = p;
        q = qn.next.load(Ordering::Relaxed) as *mut crate::hashmap::node::TreeNode<K, V>;
    }
    *num = n;
    hd
}

unsafe fn free_tree_nodes<K, V>(mut n: *mut crate::hashmap::node::TreeNode<K, V>) {
    while !n.is_null() {
        let next = (*n).next.load(Ordering::Relaxed) as *mut crate::hashmap::node::TreeNode<K, V>;
        drop(Box::from_raw((*n).value.load(Ordering::Relaxed)));
        drop(Box::from_raw(n));
        n = next;
    }
}
