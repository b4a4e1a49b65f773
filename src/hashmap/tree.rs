//! Red-black tree bin, with a parasitic reader/writer lock letting
//! concurrent readers fall back to a linear scan instead of blocking on
//! a writer mid-restructure.
//!
//! Ported wholesale from `TreeBin`/`TreeNode` in
//! `concurrent_hash_map.hpp` (itself the same CLR red-black tree as
//! `java.util.concurrent.ConcurrentHashMap.TreeBin`): `lockRoot`/
//! `contendedLock`/`unlockRoot` for the writer side, the `WRITER`/
//! `WAITER`/`READER` bit-packed `lockState` for the reader side, and
//! `balanceInsertion`/`balanceDeletion`/`rotateLeft`/`rotateRight`
//! unchanged in structure. Writers to a given bin are already mutually
//! excluded by `BucketTable`'s stripe lock, so `lockState` only ever
//! arbitrates the *current* writer against concurrent lock-free readers
//! chasing `root`, not writer against writer.

use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

use crate::hashmap::node::{Node, TreeNode, TREEBIN};
use crate::park::Park;

const WRITER: i32 = 1;
const WAITER: i32 = 2;
const READER: i32 = 4;

#[repr(C)]
pub(crate) struct TreeBin<K, V> {
    pub(crate) hash: i32,
    pub(crate) first: AtomicPtr<TreeNode<K, V>>,
    root: AtomicPtr<TreeNode<K, V>>,
    lock_state: AtomicI32,
    writer_wait: Park,
}

impl<K: PartialOrd, V> TreeBin<K, V> {
    /// Build a tree bin from an already-linked chain of `TreeNode`s
    /// (`b0`'s `next`/`prev` already set by the caller), threading them
    /// into a red-black tree keyed first by hash, then `K: PartialOrd`,
    /// then pointer identity as a last-resort tie-break — mirrors
    /// `TreeBin(TreeNode<K,V> b)`'s use of `tieBreakOrder`.
    pub(crate) fn new(first: *mut TreeNode<K, V>) -> Box<TreeBin<K, V>> {
        let bin = Box::new(TreeBin {
            hash: TREEBIN,
            first: AtomicPtr::new(first),
            root: AtomicPtr::new(std::ptr::null_mut()),
            lock_state: AtomicI32::new(0),
            writer_wait: Park::new(),
        });

        unsafe {
            let mut root: *mut TreeNode<K, V> = std::ptr::null_mut();
            let mut x = first;
            while !x.is_null() {
                let next = (*x).next.load(Ordering::Relaxed) as *mut TreeNode<K, V>;
                (*x).left = std::ptr::null_mut();
                (*x).right = std::ptr::null_mut();
                if root.is_null() {
                    (*x).parent = std::ptr::null_mut();
                    (*x).red = false;
                    root = x;
                } else {
                    let h = (*x).hash;
                    let mut p = root;
                    loop {
                        let ph = (*p).hash;
                        let dir = if ph > h {
                            -1
                        } else if ph < h {
                            1
                        } else if (*x).key < (*p).key {
                            -1
                        } else if (*p).key < (*x).key {
                            1
                        } else {
                            tie_break_order(p, x)
                        };
                        let xp = p;
                        p = if dir <= 0 { (*p).left } else { (*p).right };
                        if p.is_null() {
                            (*x).parent = xp;
                            if dir <= 0 {
                                (*xp).left = x;
                            } else {
                                (*xp).right = x;
                            }
                            root = balance_insertion(root, x);
                            break;
                        }
                    }
                }
                x = next;
            }
            bin.root.store(root, Ordering::Release);
            debug_assert!(check_invariants(root));
        }

        bin
    }

    fn lock_root(&self) {
        if self
            .lock_state
            .compare_exchange(0, WRITER, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.contended_lock();
        }
    }

    fn contended_lock(&self) {
        let mut waiting = false;
        loop {
            let s = self.lock_state.load(Ordering::Acquire);
            if s & !WAITER == 0 {
                if self
                    .lock_state
                    .compare_exchange(s, WRITER, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
            } else if s & WAITER == 0 {
                if self
                    .lock_state
                    .compare_exchange(s, s | WAITER, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    waiting = true;
                }
            } else if waiting {
                self.writer_wait.park();
            }
        }
    }

    fn unlock_root(&self) {
        self.lock_state.store(0, Ordering::Release);
    }

    /// Read-only tree search. Falls back to a linear scan of `first`'s
    /// plain-list chain while a writer holds or awaits the lock, so a
    /// reader never blocks on a writer.
    pub(crate) fn find<'a>(&self, hash: i32, key: &K) -> Option<&'a TreeNode<K, V>>
    where
        K: PartialEq,
    {
        unsafe {
            let mut e = self.first.load(Ordering::Acquire);
            loop {
                if e.is_null() {
                    return None;
                }
                let s = self.lock_state.load(Ordering::Acquire);
                if s & (WAITER | WRITER) != 0 {
                    if (*e).hash == hash && &(*e).key == key {
                        return Some(&*e);
                    }
                    e = (*e).next.load(Ordering::Acquire) as *mut TreeNode<K, V>;
                    continue;
                }
                if self
                    .lock_state
                    .compare_exchange(s, s + READER, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let root = self.root.load(Ordering::Acquire);
                    let found = find_tree_node(root, hash, key);
                    let prev = self.lock_state.fetch_add(-READER, Ordering::AcqRel);
                    if prev == (READER | WAITER) {
                        self.writer_wait.unpark();
                    }
                    return found;
                }
            }
        }
    }

    /// Insert `x` (a detached, freshly allocated node) into both the
    /// plain list chain and the tree, returning an existing node with
    /// the same key if one is already present (in which case `x` was
    /// not linked in and the caller should free it).
    pub(crate) fn put_tree_val(&self, x: *mut TreeNode<K, V>) -> *mut TreeNode<K, V>
    where
        K: PartialEq,
    {
        unsafe {
            let hash = (*x).hash;
            let mut searched = false;
            self.lock_root();
            let result = 'search: loop {
                let mut p = self.root.load(Ordering::Acquire);
                if p.is_null() {
                    (*x).parent = std::ptr::null_mut();
                    (*x).left = std::ptr::null_mut();
                    (*x).right = std::ptr::null_mut();
                    (*x).red = false;
                    self.root.store(x, Ordering::Release);
                    break 'search std::ptr::null_mut();
                }
                loop {
                    let ph = (*p).hash;
                    let dir;
                    if ph > hash {
                        dir = -1;
                    } else if ph < hash {
                        dir = 1;
                    } else if &(*p).key == &(*x).key {
                        break 'search p;
                    } else if (*x).key < (*p).key {
                        dir = -1;
                    } else if (*p).key < (*x).key {
                        dir = 1;
                    } else {
                        if !searched {
                            searched = true;
                            if let Some(q) = find_tree_node(
                                (*p).left,
                                hash,
                                &(*x).key,
                            )
                            .or_else(|| find_tree_node((*p).right, hash, &(*x).key))
                            {
                                break 'search q as *const _ as *mut TreeNode<K, V>;
                            }
                        }
                        dir = tie_break_order(p, x);
                    }
                    let xp = p;
                    p = if dir <= 0 { (*p).left } else { (*p).right };
                    if p.is_null() {
                        (*x).parent = xp;
                        if dir <= 0 {
                            (*xp).left = x;
                        } else {
                            (*xp).right = x;
                        }
                        let root = balance_insertion(self.root.load(Ordering::Acquire), x);
                        self.root.store(root, Ordering::Release);
                        break 'search std::ptr::null_mut();
                    }
                }
            };
            self.unlock_root();
            debug_assert!(check_invariants(self.root.load(Ordering::Acquire)));
            result
        }
    }

    /// Splice `p` out of both the plain list and the tree. Returns
    /// `true` if the bin shrank enough that the caller should untreeify
    /// it back into a plain list.
    pub(crate) fn remove_tree_node(&self, p: *mut TreeNode<K, V>) -> bool {
        unsafe {
            let next = (*p).next.load(Ordering::Acquire) as *mut TreeNode<K, V>;
            let pred = (*p).prev;
            if pred.is_null() {
                self.first.store(next, Ordering::Release);
            } else {
                (*pred).next.store(next as *mut Node<K, V>, Ordering::Release);
            }
            if !next.is_null() {
                (*next).prev = pred;
            }
            if self.first.load(Ordering::Acquire).is_null() {
                self.root.store(std::ptr::null_mut(), Ordering::Release);
                return true;
            }

            let r = self.root.load(Ordering::Acquire);
            if r.is_null() || (*r).right.is_null() {
                return true;
            }
            let rl = (*r).left;
            if rl.is_null() || (*rl).left.is_null() {
                return true;
            }

            self.lock_root();
            let mut root = self.root.load(Ordering::Acquire);
            let pl = (*p).left;
            let pr = (*p).right;
            let mut replacement;
            if !pl.is_null() && !pr.is_null() {
                let mut s = pr;
                let mut sl;
                while {
                    sl = (*s).left;
                    !sl.is_null()
                } {
                    s = sl;
                }
                let c = (*s).red;
                (*s).red = (*p).red;
                (*p).red = c;
                let sr = (*s).right;
                let pp = (*p).parent;
                if s == pr {
                    (*p).parent = s;
                    (*s).right = p;
                } else {
                    let sp = (*s).parent;
                    (*p).parent = sp;
                    if !sp.is_null() {
                        if s == (*sp).left {
                            (*sp).left = p;
                        } else {
                            (*sp).right = p;
                        }
                    }
                    (*s).right = pr;
                    if !pr.is_null() {
                        (*pr).parent = s;
                    }
                }
                (*p).left = std::ptr::null_mut();
                (*p).right = sr;
                if !sr.is_null() {
                    (*sr).parent = p;
                }
                (*s).left = pl;
                if !pl.is_null() {
                    (*pl).parent = s;
                }
                (*s).parent = pp;
                if pp.is_null() {
                    root = s;
                } else if p == (*pp).left {
                    (*pp).left = s;
                } else {
                    (*pp).right = s;
                }
                replacement = if !sr.is_null() { sr } else { p };
            } else if !pl.is_null() {
                replacement = pl;
            } else if !pr.is_null() {
                replacement = pr;
            } else {
                replacement = p;
            }
            if replacement != p {
                let pp = (*p).parent;
                (*replacement).parent = pp;
                if pp.is_null() {
                    root = replacement;
                } else if p == (*pp).left {
                    (*pp).left = replacement;
                } else {
                    (*pp).right = replacement;
                }
                (*p).left = std::ptr::null_mut();
                (*p).right = std::ptr::null_mut();
                (*p).parent = std::ptr::null_mut();
            }

            root = if (*p).red {
                root
            } else {
                balance_deletion(root, replacement)
            };

            if p == replacement {
                let pp = (*p).parent;
                if !pp.is_null() {
                    if p == (*pp).left {
                        (*pp).left = std::ptr::null_mut();
                    } else if p == (*pp).right {
                        (*pp).right = std::ptr::null_mut();
                    }
                    (*p).parent = std::ptr::null_mut();
                }
            }

            self.root.store(root, Ordering::Release);
            self.unlock_root();
            debug_assert!(check_invariants(self.root.load(Ordering::Acquire)));
            false
        }
    }
}

fn tie_break_order<K, V>(a: *mut TreeNode<K, V>, b: *mut TreeNode<K, V>) -> i32 {
    if (a as usize) <= (b as usize) {
        -1
    } else {
        1
    }
}

unsafe fn find_tree_node<'a, K: PartialOrd + PartialEq, V>(
    mut p: *mut TreeNode<K, V>,
    hash: i32,
    key: &K,
) -> Option<&'a TreeNode<K, V>> {
    while !p.is_null() {
        let ph = (*p).hash;
        let node = &*p;
        if ph > hash {
            p = node.left;
        } else if ph < hash {
            p = node.right;
        } else if &node.key == key {
            return Some(node);
        } else if *key < node.key {
            p = node.left;
        } else if node.key < *key {
            p = node.right;
        } else {
            if let Some(found) = find_tree_node(node.left, hash, key) {
                return Some(found);
            }
            p = node.right;
        }
    }
    None
}

unsafe fn rotate_left<K, V>(
    root: *mut TreeNode<K, V>,
    p: *mut TreeNode<K, V>,
) -> *mut TreeNode<K, V> {
    if p.is_null() {
        return root;
    }
    let r = (*p).right;
    if r.is_null() {
        return root;
    }
    let rl = (*r).left;
    (*p).right = rl;
    if !rl.is_null() {
        (*rl).parent = p;
    }
    let pp = (*p).parent;
    (*r).parent = pp;
    let mut root = root;
    if pp.is_null() {
        root = r;
        (*r).red = false;
    } else if (*pp).left == p {
        (*pp).left = r;
    } else {
        (*pp).right = r;
    }
    (*r).left = p;
    (*p).parent = r;
    root
}

unsafe fn rotate_right<K, V>(
    root: *mut TreeNode<K, V>,
    p: *mut TreeNode<K, V>,
) -> *mut TreeNode<K, V> {
    if p.is_null() {
        return root;
    }
    let l = (*p).left;
    if l.is_null() {
        return root;
    }
    let lr = (*l).right;
    (*p).left = lr;
    if !lr.is_null() {
        (*lr).parent = p;
    }
    let pp = (*p).parent;
    (*l).parent = pp;
    let mut root = root;
    if pp.is_null() {
        root = l;
        (*l).red = false;
    } else if (*pp).right == p {
        (*pp).right = l;
    } else {
        (*pp).left = l;
    }
    (*l).right = p;
    (*p).parent = l;
    root
}

unsafe fn balance_insertion<K, V>(
    root: *mut TreeNode<K, V>,
    mut x: *mut TreeNode<K, V>,
) -> *mut TreeNode<K, V> {
    let mut root = root;
    (*x).red = true;
    loop {
        let xp = (*x).parent;
        if xp.is_null() {
            (*x).red = false;
            return x;
        }
        if !(*xp).red || (*xp).parent.is_null() {
            return root;
        }
        let xpp = (*xp).parent;
        let xppl = (*xpp).left;
        if xp == xppl {
            let xppr = (*xpp).right;
            if !xppr.is_null() && (*xppr).red {
                (*xppr).red = false;
                (*xp).red = false;
                (*xpp).red = true;
                x = xpp;
            } else {
                if x == (*xp).right {
                    x = xp;
                    root = rotate_left(root, x);
                }
                let xp2 = (*x).parent;
                if !xp2.is_null() {
                    (*xp2).red = false;
                    let xpp2 = (*xp2).parent;
                    if !xpp2.is_null() {
                        (*xpp2).red = true;
                        root = rotate_right(root, xpp2);
                    }
                }
            }
        } else {
            if !xppl.is_null() && (*xppl).red {
                (*xppl).red = false;
                (*xp).red = false;
                (*xpp).red = true;
                x = xpp;
            } else {
                if x == (*xp).left {
                    x = xp;
                    root = rotate_right(root, x);
                }
                let xp2 = (*x).parent;
                if !xp2.is_null() {
                    (*xp2).red = false;
                    let xpp2 = (*xp2).parent;
                    if !xpp2.is_null() {
                        (*xpp2).red = true;
                        root = rotate_left(root, xpp2);
                    }
                }
            }
        }
    }
}

unsafe fn balance_deletion<K, V>(
    root: *mut TreeNode<K, V>,
    mut x: *mut TreeNode<K, V>,
) -> *mut TreeNode<K, V> {
    let mut root = root;
    loop {
        if x.is_null() || x == root {
            return root;
        }
        let xp = (*x).parent;
        if xp.is_null() {
            (*x).red = false;
            return x;
        }
        if (*x).red {
            (*x).red = false;
            return root;
        }
        if (*xp).left == x {
            let mut xpr = (*xp).right;
            if !xpr.is_null() && (*xpr).red {
                (*xpr).red = false;
                (*xp).red = true;
                root = rotate_left(root, xp);
                xpr = {
                    let xp2 = (*x).parent;
                    if xp2.is_null() {
                        std::ptr::null_mut()
                    } else {
                        (*xp2).right
                    }
                };
            }
            if xpr.is_null() {
                x = xp;
            } else {
                let sl = (*xpr).left;
                let mut sr = (*xpr).right;
                if (sr.is_null() || !(*sr).red) && (sl.is_null() || !(*sl).red) {
                    (*xpr).red = true;
                    x = xp;
                } else {
                    if sr.is_null() || !(*sr).red {
                        if !sl.is_null() {
                            (*sl).red = false;
                        }
                        (*xpr).red = true;
                        root = rotate_right(root, xpr);
                        xpr = {
                            let xp2 = (*x).parent;
                            if xp2.is_null() {
                                std::ptr::null_mut()
                            } else {
                                (*xp2).right
                            }
                        };
                    }
                    if !xpr.is_null() {
                        let xp2 = (*x).parent;
                        (*xpr).red = if xp2.is_null() { false } else { (*xp2).red };
                        sr = (*xpr).right;
                        if !sr.is_null() {
                            (*sr).red = false;
                        }
                    }
                    let xp2 = (*x).parent;
                    if !xp2.is_null() {
                        (*xp2).red = false;
                        root = rotate_left(root, xp2);
                    }
                    x = root;
                }
            }
        } else {
            // symmetric
            let mut xpl = (*xp).left;
            if !xpl.is_null() && (*xpl).red {
                (*xpl).red = false;
                (*xp).red = true;
                root = rotate_right(root, xp);
                xpl = {
                    let xp2 = (*x).parent;
                    if xp2.is_null() {
                        std::ptr::null_mut()
                    } else {
                        (*xp2).left
                    }
                };
            }
            if xpl.is_null() {
                x = xp;
            } else {
                let mut sl = (*xpl).left;
                let sr = (*xpl).right;
                if (sl.is_null() || !(*sl).red) && (sr.is_null() || !(*sr).red) {
                    (*xpl).red = true;
                    x = xp;
                } else {
                    if sl.is_null() || !(*sl).red {
                        if !sr.is_null() {
                            (*sr).red = false;
                        }
                        (*xpl).red = true;
                        root = rotate_left(root, xpl);
                        xpl = {
                            let xp2 = (*x).parent;
                            if xp2.is_null() {
                                std::ptr::null_mut()
                            } else {
                                (*xp2).left
                            }
                        };
                    }
                    if !xpl.is_null() {
                        let xp2 = (*x).parent;
                        (*xpl).red = if xp2.is_null() { false } else { (*xp2).red };
                        sl = (*xpl).left;
                        if !sl.is_null() {
                            (*sl).red = false;
                        }
                    }
                    let xp2 = (*x).parent;
                    if !xp2.is_null() {
                        (*xp2).red = false;
                        root = rotate_right(root, xp2);
                    }
                    x = root;
                }
            }
        }
    }
}

/// Recursive structural sanity check (parent/child consistency and
/// red-black coloring), ported from `TreeBin::checkInvariants`. Compiled
/// into debug builds via the `debug_assert!` calls above, and exercised
/// directly by unit tests.
pub(crate) unsafe fn check_invariants<K, V>(t: *mut TreeNode<K, V>) -> bool {
    if t.is_null() {
        return true;
    }
    let tn = &*t;
    let tl = tn.left;
    let tr = tn.right;
    let tb = tn.prev;
    let tn_next = tn.next.load(Ordering::Relaxed) as *mut TreeNode<K, V>;

    if !tb.is_null() && (*tb).next.load(Ordering::Relaxed) as *mut TreeNode<K, V> != t {
        return false;
    }
    if !tn_next.is_null() && (*tn_next).prev != t {
        return false;
    }
    if !tb.is_null() && tn.hash < (*tb).hash {
        return false;
    }
    if !tn_next.is_null() && tn.hash > (*tn_next).hash {
        return false;
    }
    if tn.red && !tl.is_null() && (*tl).red {
        return false;
    }
    if tn.red && !tr.is_null() && (*tr).red {
        return false;
    }
    if !tl.is_null() && (*tl).parent != t {
        return false;
    }
    if !tr.is_null() && (*tr).parent != t {
        return false;
    }
    check_invariants(tl) && check_invariants(tr)
}
