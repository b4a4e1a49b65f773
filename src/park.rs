//! A single-permit blocking wait, used by tree-bin writers waiting on
//! readers and by the background GC thread idling between sweeps.
//!
//! A pre-delivered `unpark` is remembered rather than lost, so a `park`
//! call that arrives after the matching `unpark` returns immediately.
//! This is the same shape as `sebr::Blocking` in the original C++ source
//! and as the condvar-based parkers `crossbeam`'s own synchronizers use
//! internally for blocking handshakes.

use std::time::Duration;
use parking_lot::{Condvar, Mutex};

/// One-permit park/unpark gate.
pub struct Park {
    flag: Mutex<bool>,
    cvar: Condvar,
}

impl Park {
    pub fn new() -> Park {
        Park {
            flag: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Deliver a permit, waking a parked waiter if one is present.
    ///
    /// If a permit is already pending, this is a no-op: permits don't
    /// accumulate, they're a single flag.
    pub fn unpark(&self) {
        let mut flag = self.flag.lock();
        if !*flag {
            *flag = true;
            self.cvar.notify_one();
        }
    }

    /// Block until a permit is available, consuming it.
    pub fn park(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cvar.wait(&mut flag);
        }
        *flag = false;
    }

    /// Block until a permit is available or `timeout` elapses, whichever
    /// comes first. Consumes the permit only if one arrived.
    pub fn park_timeout(&self, timeout: Duration) {
        let mut flag = self.flag.lock();
        if !*flag {
            let _ = self.cvar.wait_for(&mut flag, timeout);
        }
        *flag = false;
    }
}

impl Default for Park {
    fn default() -> Park {
        Park::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let park = Park::new();
        park.unpark();
        park.park(); // must return immediately
    }

    #[test]
    fn park_wakes_on_unpark() {
        let park = Arc::new(Park::new());
        let other = park.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.unpark();
        });
        park.park();
        handle.join().unwrap();
    }

    #[test]
    fn park_timeout_returns_without_unpark() {
        let park = Park::new();
        park.park_timeout(Duration::from_millis(10));
    }
}
