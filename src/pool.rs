//! Ready-queue pool: the set-of-channels-with-work primitive the spec
//! calls out as having no obvious stdlib analogue (spec §9, Design Notes).
//!
//! `min-rs` has nothing like this — its examples communicate between two
//! single-channel `Context`s over a plain `std::sync::mpsc` pair. This is
//! grounded instead on the original Python `mqueue.MQueuePool`
//! (`mutex + threading.Event + set`), translated directly to
//! `Mutex<HashSet<u8>> + Condvar`, and on the shutdown-sentinel idea from
//! the same file (`pool.put(None)`).

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One pop from a [`ReadyQueuePool`]: either a channel with pending work,
/// or the shutdown sentinel posted by `close_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolItem {
    Chan(u8),
    Shutdown,
}

struct State {
    ready: HashSet<u8>,
    shutdown: bool,
}

/// A set of channel numbers "with new data", with an edge-triggered wakeup.
/// A channel appears in the set at most once; popping one of several ready
/// channels is unspecified (fairness is not guaranteed).
pub(crate) struct ReadyQueuePool {
    state: Mutex<State>,
    cond: Condvar,
}

impl ReadyQueuePool {
    pub(crate) fn new() -> Self {
        ReadyQueuePool {
            state: Mutex::new(State { ready: HashSet::new(), shutdown: false }),
            cond: Condvar::new(),
        }
    }

    /// Adds `chan` to the ready set and wakes any waiter.
    pub(crate) fn put(&self, chan: u8) {
        let mut s = self.state.lock().unwrap();
        s.ready.insert(chan);
        self.cond.notify_all();
    }

    /// Posts the shutdown sentinel; every subsequent `get` returns
    /// `PoolItem::Shutdown` without consuming the ready set.
    pub(crate) fn put_shutdown(&self) {
        let mut s = self.state.lock().unwrap();
        s.shutdown = true;
        self.cond.notify_all();
    }

    /// Pops one ready channel, or the shutdown sentinel if one was posted.
    /// Returns `None` if non-blocking and the set is empty, or if `timeout`
    /// elapses first.
    pub(crate) fn get(&self, block: bool, timeout: Option<Duration>) -> Option<PoolItem> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut s = self.state.lock().unwrap();
        loop {
            if s.shutdown {
                return Some(PoolItem::Shutdown);
            }
            if let Some(&chan) = s.ready.iter().next() {
                s.ready.remove(&chan);
                return Some(PoolItem::Chan(chan));
            }
            if !block {
                return None;
            }
            s = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    let (guard, timed_out) = self.cond.wait_timeout(s, d - now).unwrap();
                    if timed_out.timed_out() {
                        return None;
                    }
                    guard
                }
                None => self.cond.wait(s).unwrap(),
            };
        }
    }
}
