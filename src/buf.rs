//! Bounded FIFO byte buffer with blocking put/get and an optional
//! pending-staging region for tx-side partial-ack recovery (spec §4.1).
//!
//! Grounded on the original Python `Channel.Buf`/`mqueue.MQueue` pair
//! (`threading.Condition`-guarded `collections.deque`): `min-rs` itself has
//! no blocking queue at all (its `Context` runs single-threaded, byte by
//! byte), so this is new code, written in the style of the rest of this
//! crate rather than translated from the Python.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::Condvar;
use std::time::{Duration, Instant};

use crate::pool::ReadyQueuePool;

struct State {
    queue: VecDeque<u8>,
}

/// A bounded byte FIFO bound to a [`ReadyQueuePool`] slot. Puts that add at
/// least one byte post `id` to `pool`; `notify_empty` does the same without
/// touching the queue, used to poke a worker without enqueuing data.
///
/// When `pending` is `Some`, every byte drained by `get` is also appended
/// there and kept until `full_ack`/`partial_ack` clears it — this is the
/// tx-side staging area of spec §4.1, kept as an owned, unaliased `Vec<u8>`
/// per the spec's Design Notes.
pub(crate) struct Buf {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    pending: Option<Mutex<Vec<u8>>>,
    pool: Arc<ReadyQueuePool>,
    id: u8,
}

impl Buf {
    pub(crate) fn new(capacity: usize, has_pending: bool, pool: Arc<ReadyQueuePool>, id: u8) -> Self {
        Buf {
            state: Mutex::new(State { queue: VecDeque::with_capacity(capacity) }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            pending: if has_pending { Some(Mutex::new(Vec::new())) } else { None },
            pool,
            id,
        }
    }

    fn notify_pool(&self) {
        self.pool.put(self.id);
    }

    /// Posts this buffer's channel to its pool without enqueuing any byte.
    pub(crate) fn notify_empty(&self) {
        self.notify_pool();
    }

    pub(crate) fn free_size(&self) -> usize {
        let s = self.state.lock().unwrap();
        self.capacity.saturating_sub(s.queue.len())
    }

    pub(crate) fn data_size(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Appends bytes one at a time until all are accepted or the buffer is
    /// full. Blocks for space in blocking mode; stops at the first refusal
    /// otherwise. Returns the number of bytes actually accepted.
    ///
    /// Posts to the pool as soon as the first byte lands, not just once the
    /// whole batch is in: a consumer parked in `ReadyQueuePool::get` has to
    /// wake and start draining *before* this call blocks on `not_full`, or a
    /// batch bigger than `capacity` deadlocks against its own consumer.
    pub(crate) fn put(&self, data: &[u8], block: bool, timeout: Option<Duration>) -> usize {
        if self.capacity == 0 || data.is_empty() {
            return 0;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.state.lock().unwrap();
        let mut accepted = 0usize;
        for &byte in data {
            loop {
                if guard.queue.len() < self.capacity {
                    guard.queue.push_back(byte);
                    accepted += 1;
                    self.not_empty.notify_one();
                    self.notify_pool();
                    break;
                }
                if !block {
                    return accepted;
                }
                guard = match deadline {
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return accepted;
                        }
                        let (g, timed_out) = self.not_full.wait_timeout(guard, d - now).unwrap();
                        if timed_out.timed_out() {
                            return accepted;
                        }
                        g
                    }
                    None => self.not_full.wait(guard).unwrap(),
                };
            }
        }
        accepted
    }

    /// Removes up to `length` bytes. Blocking mode always returns exactly
    /// `length` bytes (or blocks forever / until `timeout`); non-blocking
    /// mode returns as many as are immediately available, possibly zero.
    pub(crate) fn get(&self, length: usize, block: bool, timeout: Option<Duration>) -> Vec<u8> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut drained = Vec::with_capacity(length);
        let mut guard = self.state.lock().unwrap();
        while drained.len() < length {
            if let Some(byte) = guard.queue.pop_front() {
                drained.push(byte);
                self.not_full.notify_one();
                continue;
            }
            if !block {
                break;
            }
            guard = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break;
                    }
                    let (g, timed_out) = self.not_empty.wait_timeout(guard, d - now).unwrap();
                    if timed_out.timed_out() {
                        break;
                    }
                    g
                }
                None => self.not_empty.wait(guard).unwrap(),
            };
        }
        drop(guard);
        if let Some(pending) = &self.pending {
            let mut p = pending.lock().unwrap();
            p.extend_from_slice(&drained);
        }
        drained
    }

    /// Clears the pending-staging region; if the buffer still holds
    /// unconsumed bytes, pokes the pool so a worker reconsiders this
    /// channel (spec §4.1).
    pub(crate) fn full_ack(&self) {
        if let Some(pending) = &self.pending {
            pending.lock().unwrap().clear();
        }
        if self.data_size() > 0 {
            self.notify_empty();
        }
    }

    /// Drops the first `n` bytes of the pending-staging region as
    /// acknowledged, then requeues whatever remains at the front of the
    /// main queue so the next `get` retransmits it before any new data.
    pub(crate) fn partial_ack(&self, n: usize) {
        let Some(pending) = &self.pending else { return };
        let remainder = {
            let mut p = pending.lock().unwrap();
            let n = n.min(p.len());
            p.drain(0..n);
            std::mem::take(&mut *p)
        };
        if remainder.is_empty() {
            return;
        }
        let mut guard = self.state.lock().unwrap();
        for byte in remainder.into_iter().rev() {
            guard.queue.push_front(byte);
        }
        drop(guard);
        self.not_empty.notify_one();
    }
}
