//! MCOM: a multi-channel framed multiplexing protocol with per-channel,
//! credit-based flow control over a single ordered, reliable byte
//! transport.
//!
//! Up to 64 independent byte streams ("channels") share one transport.
//! Each channel's sender may only send as much as the receiver has most
//! recently granted credit for; lost bytes are recovered with a partial-ack
//! and `RESUME` scheme rather than a full retransmit. Channel 0 is reserved
//! for the four control frames (`ACK`, `RESUME`, `CHAN_LIST_REQ`,
//! `CHAN_LIST`) that carry this bookkeeping; [`Engine`] handles all of it
//! internally, so callers only ever see `open_channel`/`tx`/`rx`/
//! `close_channel` on channels 1..64.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcom::{ComDriver, Engine, LoopbackDriver};
//!
//! let (a, b) = LoopbackDriver::pair();
//! let engine_a = Arc::new(Engine::new(Arc::new(a) as Arc<dyn ComDriver>));
//! let engine_b = Arc::new(Engine::new(Arc::new(b) as Arc<dyn ComDriver>));
//! engine_a.start_com().unwrap();
//! engine_b.start_com().unwrap();
//!
//! engine_a.open_channel(1, 0, 0).unwrap();
//! engine_b.open_channel(1, 0, 0).unwrap();
//! engine_a.tx(1, b"hello", true, None).unwrap();
//! let got = engine_b.rx(1, 5, true, None).unwrap();
//! assert_eq!(got, b"hello");
//! ```

mod buf;
mod channel;
mod engine;
mod error;
mod frame;
mod pool;
mod transport;

pub use engine::Engine;
pub use error::McomError;
pub use transport::{ComDriver, LoopbackDriver};

pub use frame::MAX_DATA_SIZE;
