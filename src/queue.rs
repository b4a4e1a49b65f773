//! The Michael-Scott lock-free queue specimen: the second reclaimer
//! client, alongside [`crate::hashmap`], exercising [`crate::sebr`] on a
//! much simpler data structure.
//!
//! Ported from `ms_queue<T>` in `ms_queue_sebr.cpp`.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::sebr::{Group, GroupConfig, Pin};

struct Node<T> {
    data: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn dummy() -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            data: None,
            next: AtomicPtr::new(std::ptr::null_mut()),
        }))
    }

    fn new(data: T) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            data: Some(data),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }))
    }
}

pub struct MsQueue<T> {
    group: Group,
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for MsQueue<T> {}
unsafe impl<T: Send> Sync for MsQueue<T> {}

impl<T> MsQueue<T> {
    pub fn new() -> MsQueue<T> {
        Self::with_group_config(GroupConfig::default())
    }

    pub fn with_group_config(config: GroupConfig) -> MsQueue<T> {
        let dummy = Node::dummy();
        MsQueue {
            group: Group::new(config),
            head: AtomicPtr::new(dummy),
            tail: AtomicPtr::new(dummy),
        }
    }

    pub fn push(&self, data: T) {
        let node = Node::new(data);
        let pin = Pin::new(&self.group);
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if tail == self.tail.load(Ordering::Acquire) {
                if next.is_null() {
                    if unsafe {
                        (*tail)
                            .next
                            .compare_exchange(next, node, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    } {
                        break;
                    }
                } else {
                    let _ = self.tail.compare_exchange(
                        tail,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
            }
        }
        let tail = self.tail.load(Ordering::Acquire);
        let _ = self.tail.compare_exchange(tail, node, Ordering::AcqRel, Ordering::Acquire);
        drop(pin);
    }

    pub fn pop(&self) -> Option<T>
    where
        T: Clone,
    {
        let pin = Pin::new(&self.group);
        let head;
        let next;
        loop {
            let h = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let n = unsafe { (*h).next.load(Ordering::Acquire) };
            if h == self.head.load(Ordering::Acquire) {
                if h == tail {
                    if n.is_null() {
                        return None;
                    }
                    let _ = self.tail.compare_exchange(
                        tail,
                        n,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                } else {
                    let value = unsafe { (*n).data.clone() };
                    if self
                        .head
                        .compare_exchange(h, n, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        head = h;
                        next = value;
                        break;
                    }
                }
            }
        }
        pin.retire(std::mem::size_of::<Node<T>>(), move || unsafe {
            drop(Box::from_raw(head));
        });
        next
    }
}

impl<T> Default for MsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MsQueue<T> {
    fn drop(&mut self) {
        let mut node = self.head.load(Ordering::Acquire);
        while !node.is_null() {
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            unsafe { drop(Box::from_raw(node)) };
            node = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_is_fifo() {
        let q: MsQueue<i32> = MsQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn concurrent_push_pop_preserves_every_item() {
        let q = Arc::new(MsQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        q.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut seen = 0;
        while q.pop().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4000);
    }
}
