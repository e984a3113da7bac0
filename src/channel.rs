//! Per-channel state (spec §3, §4.2): a pair of [`Buf`]s plus the
//! credit-accounting fields `rx_stalled`/`ack_done`/`tx_max_bytes`.
//!
//! Grounded on the original Python `MCom.Channel` class. `tx_max_bytes`'s
//! "no credit granted yet" sentinel is the Python `None`; per the spec's
//! Design Notes it becomes the explicit [`Credit`] sum type here rather than
//! an `Option<i32>` overloaded with two meanings (no-credit vs zero-credit).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buf::Buf;
use crate::frame::MAX_DATA_SIZE;
use crate::pool::ReadyQueuePool;

/// How much more this end is currently allowed to send on a channel.
///
/// `Awaiting` is the state right after a drain that hasn't been acked yet:
/// the peer hasn't told us a level, so nothing more may be sent. `Granted`
/// is a live credit balance. A freshly opened channel starts `Granted` with
/// the maximum frame payload, optimistically sending before any credit
/// exchange happens; the peer's first ACK then reports the real number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Credit {
    Awaiting,
    Granted(u16),
}

impl Credit {
    fn is_awaiting(self) -> bool {
        matches!(self, Credit::Awaiting)
    }

    fn available(self) -> u16 {
        match self {
            Credit::Awaiting => 0,
            Credit::Granted(n) => n,
        }
    }
}

/// One channel's buffers and flow-control bookkeeping. Channel 0 uses this
/// same type (for its pre-encoded control-frame queue); it is simply never
/// subject to `ack_tx`/`resume_tx`, since nothing ever addresses an ACK or
/// RESUME to channel 0 itself.
pub(crate) struct Channel {
    pub(crate) number: u8,
    rx_buf: Buf,
    tx_buf: Buf,
    tx_max_bytes: Mutex<Credit>,
    rx_stalled: AtomicBool,
    ack_done: AtomicBool,
}

impl Channel {
    pub(crate) fn new(
        number: u8,
        rx_buf_size: usize,
        tx_buf_size: usize,
        tx_pool: Arc<ReadyQueuePool>,
        rx_pool: Arc<ReadyQueuePool>,
    ) -> Self {
        Channel {
            number,
            rx_buf: Buf::new(rx_buf_size, false, rx_pool, number),
            tx_buf: Buf::new(tx_buf_size, true, tx_pool, number),
            tx_max_bytes: Mutex::new(Credit::Granted(MAX_DATA_SIZE as u16)),
            rx_stalled: AtomicBool::new(false),
            ack_done: AtomicBool::new(false),
        }
    }

    /// User-facing send: stages bytes in the tx buffer, blocking for space
    /// as requested. The tx worker drains this buffer according to credit.
    pub(crate) fn tx(&self, data: &[u8], block: bool, timeout: Option<Duration>) -> usize {
        self.tx_buf.put(data, block, timeout)
    }

    /// User-facing receive: drains bytes already demultiplexed into the rx
    /// buffer by the rx worker. If this channel was stalled and at least
    /// one byte was freed, pokes the tx side so the tx worker reconsiders
    /// emitting a RESUME.
    pub(crate) fn rx(&self, length: usize, block: bool, timeout: Option<Duration>) -> Vec<u8> {
        let data = self.rx_buf.get(length, block, timeout);
        if self.rx_stalled.load(Ordering::Acquire) && !data.is_empty() {
            self.tx_buf.notify_empty();
        }
        data
    }

    /// Called by the rx worker when a DATA frame for this channel arrives.
    /// Puts as many bytes as fit (non-blocking). Whenever the channel ends
    /// up with nothing left to offer the peer — some bytes were refused, or
    /// the buffer is now exactly full — it is marked stalled and the
    /// returned credit is negative (its magnitude the bytes actually
    /// accepted this call); otherwise the returned credit is the remaining
    /// free space.
    pub(crate) fn add_to_rx_buf(&self, data: &[u8]) -> i32 {
        let accepted = self.rx_buf.put(data, false, None);
        let free = self.rx_buf.free_size();
        if accepted < data.len() || free == 0 {
            self.rx_stalled.store(true, Ordering::Release);
            return -(accepted as i32);
        }
        free as i32
    }

    /// Free space left in the rx buffer, reported to the peer as credit.
    pub(crate) fn rx_free_size(&self) -> usize {
        self.rx_buf.free_size()
    }

    pub(crate) fn is_rx_stalled(&self) -> bool {
        self.rx_stalled.load(Ordering::Acquire)
    }

    /// Called by the tx worker once it has actually put a RESUME for this
    /// channel on the wire.
    pub(crate) fn clear_rx_stalled(&self) {
        self.rx_stalled.store(false, Ordering::Release);
    }

    /// Whether an ACK has left the wire for this channel's most recent rx.
    /// Gates the very first RESUME so it never precedes the ACK it refines.
    pub(crate) fn ack_done(&self) -> bool {
        self.ack_done.load(Ordering::Acquire)
    }

    pub(crate) fn set_ack_done(&self, v: bool) {
        self.ack_done.store(v, Ordering::Release);
    }

    /// Whether this channel has data staged to send and isn't waiting on an
    /// acknowledgement before sending more.
    pub(crate) fn has_tx(&self) -> bool {
        !self.tx_max_bytes.lock().unwrap().is_awaiting() && self.tx_buf.data_size() > 0
    }

    /// Drains up to the current credit's worth of bytes for transmission,
    /// then marks the channel as awaiting the peer's next ACK/RESUME before
    /// offering more.
    pub(crate) fn get_from_tx_buf(&self) -> Vec<u8> {
        let n = {
            let mut credit = self.tx_max_bytes.lock().unwrap();
            let n = credit.available() as usize;
            *credit = Credit::Awaiting;
            n
        };
        self.tx_buf.get(n, false, None)
    }

    /// Drains an explicit number of bytes from the raw tx queue, bypassing
    /// credit entirely. Used only for channel 0's pre-encoded control-frame
    /// queue, where "credit" has no meaning.
    pub(crate) fn ctrl_dequeue(&self, length: usize, block: bool) -> Vec<u8> {
        self.tx_buf.get(length, block, None)
    }

    /// Applies a received ACK. A positive `level` means the peer fully
    /// accepted what we last sent and now has `level` bytes of room: drop
    /// the pending-retransmit staging and grant that much new credit. A
    /// non-positive `level` is a partial ack: `-level` bytes were accepted,
    /// and we stay awaiting a RESUME for the rest before sending again.
    pub(crate) fn ack_tx(&self, level: i16) {
        if level > 0 {
            self.tx_buf.full_ack();
            *self.tx_max_bytes.lock().unwrap() = Credit::Granted(level as u16);
        } else {
            self.tx_buf.partial_ack((-level) as usize);
        }
    }

    /// Applies a received RESUME: the peer is ready for `level` more bytes,
    /// picking up with whatever this side still has staged to (re)send.
    pub(crate) fn resume_tx(&self, level: i16) {
        *self.tx_max_bytes.lock().unwrap() = Credit::Granted(level.max(0) as u16);
        self.tx_buf.notify_empty();
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel {} (rx_free={}, rx_stalled={}, ack_done={})",
            self.number,
            self.rx_free_size(),
            self.is_rx_stalled(),
            self.ack_done()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_channel(number: u8, rx_size: usize, tx_size: usize) -> Channel {
        Channel::new(number, rx_size, tx_size, Arc::new(ReadyQueuePool::new()), Arc::new(ReadyQueuePool::new()))
    }

    #[test]
    fn starts_with_optimistic_credit() {
        let chan = new_channel(1, 16, 16);
        chan.tx(b"hello", true, None);
        assert!(chan.has_tx());
        let sent = chan.get_from_tx_buf();
        assert_eq!(sent, b"hello");
        assert!(!chan.has_tx());
    }

    #[test]
    fn rx_stalls_on_exact_fill() {
        let chan = new_channel(2, 4, 16);
        let credit = chan.add_to_rx_buf(b"abcd");
        assert_eq!(credit, -4);
        assert!(chan.is_rx_stalled());
        let got = chan.rx(4, true, None);
        assert_eq!(got, b"abcd");
        chan.clear_rx_stalled();
        assert!(!chan.is_rx_stalled());
    }

    #[test]
    fn rx_stalls_on_partial_fit() {
        let chan = new_channel(3, 4, 16);
        let credit = chan.add_to_rx_buf(b"abcdef");
        assert_eq!(credit, -4);
        assert!(chan.is_rx_stalled());
    }

    #[test]
    fn partial_ack_then_resume_retransmits_unacked_tail() {
        let chan = new_channel(4, 16, 16);
        chan.tx(b"abcdef", true, None);
        let first = chan.get_from_tx_buf();
        assert_eq!(first, b"abcdef");
        chan.ack_tx(-4); // peer accepted 4 of the 6 bytes
        chan.resume_tx(10);
        let retransmitted = chan.get_from_tx_buf();
        assert_eq!(retransmitted, b"ef");
    }

    #[test]
    fn full_ack_clears_pending_and_grants_credit() {
        let chan = new_channel(5, 16, 16);
        chan.tx(b"abcd", true, None);
        chan.get_from_tx_buf();
        chan.ack_tx(12);
        assert!(matches!(*chan.tx_max_bytes.lock().unwrap(), Credit::Granted(12)));
    }
}
