//! The transport boundary (spec §2, Non-goals: "no concrete serial/TCP
//! driver is in scope") plus an in-memory loopback used by tests and demos.
//!
//! `min-rs`'s `interface.rs` defines exactly this kind of pluggable-byte-sink
//! trait (`HardwareInterface`, implemented by a `VecDeque`-backed fake in
//! its own tests and by a real UART in `examples/real_uart_on_linux.rs`);
//! `ComDriver`/`LoopbackDriver` follow that shape, but sized to a blocking,
//! multi-byte-at-a-time read/write surface rather than MIN's single-byte
//! polling interface.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Mutex;

use crate::error::McomError;
use crate::frame::DATA_UNIT_SIZE;

/// A full-duplex, ordered, reliable byte transport. Implementations need
/// not be lossless internally (that is what MCOM's own flow control and
/// RESUME recovery are for) but must deliver bytes in the order written,
/// with no duplication, for as long as the link is up.
pub trait ComDriver: Send + Sync {
    /// Writes `data` in full, blocking if necessary.
    fn tx(&self, data: &[u8]) -> Result<(), McomError>;

    /// Reads exactly `ndu` data units (`ndu * 4` bytes), blocking until all
    /// of them have arrived or the transport is closed.
    fn rx(&self, ndu: usize) -> Result<Vec<u8>, McomError>;

    /// Whether at least one byte can be read without blocking.
    fn has_rx_dat(&self) -> bool;
}

/// An in-memory, `mpsc`-backed loopback driver, pairing two endpoints so
/// that bytes written to one are read from the other. Used by the
/// integration tests and the bundled demos in place of a real link.
pub struct LoopbackDriver {
    tx: Mutex<Sender<u8>>,
    rx: Mutex<Receiver<u8>>,
    /// Bytes pulled off `rx` by `has_rx_dat`'s availability probe but not
    /// yet consumed by `rx`; `mpsc::Receiver` has no non-destructive peek,
    /// so probed bytes are parked here instead of being lost.
    buffered: Mutex<VecDeque<u8>>,
}

impl LoopbackDriver {
    /// Builds two cross-connected endpoints: `a`'s writes arrive at `b`'s
    /// reads, and vice versa.
    pub fn pair() -> (LoopbackDriver, LoopbackDriver) {
        let (tx_a, rx_b) = std::sync::mpsc::channel();
        let (tx_b, rx_a) = std::sync::mpsc::channel();
        (
            LoopbackDriver { tx: Mutex::new(tx_a), rx: Mutex::new(rx_a), buffered: Mutex::new(VecDeque::new()) },
            LoopbackDriver { tx: Mutex::new(tx_b), rx: Mutex::new(rx_b), buffered: Mutex::new(VecDeque::new()) },
        )
    }
}

impl ComDriver for LoopbackDriver {
    fn tx(&self, data: &[u8]) -> Result<(), McomError> {
        let sender = self.tx.lock().unwrap();
        for &byte in data {
            sender.send(byte).map_err(|_| McomError::TransportClosed)?;
        }
        Ok(())
    }

    fn rx(&self, ndu: usize) -> Result<Vec<u8>, McomError> {
        let want = ndu * DATA_UNIT_SIZE;
        let mut buffered = self.buffered.lock().unwrap();
        let receiver = self.rx.lock().unwrap();
        let mut out = Vec::with_capacity(want);
        while out.len() < want {
            if let Some(byte) = buffered.pop_front() {
                out.push(byte);
                continue;
            }
            out.push(receiver.recv().map_err(|_| McomError::TransportClosed)?);
        }
        Ok(out)
    }

    fn has_rx_dat(&self) -> bool {
        let mut buffered = self.buffered.lock().unwrap();
        let receiver = self.rx.lock().unwrap();
        loop {
            match receiver.try_recv() {
                Ok(byte) => buffered.push_back(byte),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        !buffered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_delivers_whole_data_units_in_order() {
        let (a, b) = LoopbackDriver::pair();
        a.tx(b"raw_data").unwrap(); // 8 bytes = 2 data units
        let got = b.rx(2).unwrap();
        assert_eq!(got, b"raw_data");

        b.tx(b"pong").unwrap(); // 4 bytes = 1 data unit
        let got = a.rx(1).unwrap();
        assert_eq!(got, b"pong");
    }

    #[test]
    fn has_rx_dat_does_not_lose_the_bytes_it_probes() {
        let (a, b) = LoopbackDriver::pair();
        a.tx(b"data").unwrap();
        assert!(b.has_rx_dat());
        let got = b.rx(1).unwrap();
        assert_eq!(got, b"data");
    }
}
