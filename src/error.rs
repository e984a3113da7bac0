//! Error taxonomy for the MCOM engine (spec §7).
//!
//! `min-rs`'s own `Error` enum is a bare two-variant type with no `Display`
//! impl; MCOM's failure surface is wider (transport-fatal, protocol-fatal,
//! precondition, timeout), so it is grown on `thiserror` instead, the way
//! richer engines in this corpus derive their error enums.

use thiserror::Error;

/// Everything that can go wrong while framing, demultiplexing, or accounting
/// credit for an MCOM link.
#[derive(Debug, Error)]
pub enum McomError {
    /// The transport reported a zero-length read, or its read half was torn
    /// down from under us. Transport-fatal: the rx worker exits.
    #[error("transport connection closed")]
    TransportClosed,

    /// The transport refused a write. Transport-fatal: propagated to the
    /// caller that triggered it (tx worker logs and stops).
    #[error("transport write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// The transport refused a read. Transport-fatal.
    #[error("transport read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    /// Channel 0 carried an `INS` byte this implementation does not
    /// recognize. Protocol-fatal: the rx worker exits.
    #[error("unknown control instruction 0x{0:02x} on channel 0")]
    UnknownControlIns(u8),

    /// A frame named a channel number with no matching open channel.
    /// Protocol-fatal.
    #[error("frame addressed to unknown channel {0}")]
    UnknownChannel(u8),

    /// A frame's header was structurally invalid (bad size field, truncated
    /// buffer, etc). Protocol-fatal.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// `open_channel` named a channel number that is already open.
    /// Precondition violation.
    #[error("channel {0} is already open")]
    ChannelAlreadyOpen(u8),

    /// An operation referenced a channel that is not currently open.
    #[error("channel {0} is not open")]
    ChannelNotOpen(u8),

    /// A channel number fell outside the valid 0..64 range.
    #[error("channel number {0} is out of the 0..64 range")]
    InvalidChannel(u8),

    /// A non-zero buffer size smaller than the 4-byte minimum was requested.
    #[error("buffer size {size} for channel {channel} is below the 4-byte minimum")]
    BufferTooSmall { channel: u8, size: usize },

    /// A data-frame payload fell outside 1..=259 bytes.
    #[error("payload of {0} bytes is outside the 1..=259 byte frame limit")]
    InvalidPayloadSize(usize),

    /// An ACK/RESUME level fell outside the representable 10-bit signed
    /// range (spec §9, open question: `level` is defined over [-512, 511]).
    #[error("ack/resume level {0} is outside the representable [-512, 511] range")]
    LevelOutOfRange(i32),

    /// A blocking call's timeout elapsed before it completed.
    #[error("operation timed out")]
    Timeout,

    /// `start_com` was called more than once on the same engine.
    #[error("engine's worker threads are already started")]
    AlreadyStarted,

    /// An operation that is reserved to the engine's internals (e.g. user
    /// `tx`/`rx` on channel 0) was attempted by a caller.
    #[error("channel 0 is reserved for control frames")]
    ReservedChannel,
}
