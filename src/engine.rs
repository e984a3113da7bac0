//! The engine: channel table, rx/tx worker threads, and the public
//! open/close/tx/rx/chan_list operations (spec §4.5, §5).
//!
//! `min-rs`'s `examples/multithread.rs` is the grounding for the
//! two-thread, `Arc`-shared-state shape (one thread per direction, talking
//! through a shared `Context`); here the shared state is the fixed channel
//! table plus the two [`ReadyQueuePool`]s rather than a single `Context`,
//! and the per-direction loops implement MCOM's framing and credit
//! accounting instead of MIN's byte-stuffing state machine. The rx/tx
//! worker algorithms themselves, including channel 0 queuing its own
//! pre-encoded control frames and the tx worker's post-ACK auto-RESUME
//! check, are grounded on the original Python `MCom.rx_worker`/`tx_worker`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::channel::Channel;
use crate::error::McomError;
use crate::frame::{self, Frame, MAX_DATA_SIZE};
use crate::pool::{PoolItem, ReadyQueuePool};
use crate::transport::ComDriver;

const DEFAULT_BUF_SIZE: usize = 256;
const CONTROL_BUF_SIZE: usize = 4;

type Spy = Box<dyn Fn(&[u8]) + Send + Sync>;

struct ChanListWait {
    list: Mutex<Option<Vec<u8>>>,
    cond: Condvar,
}

/// A running MCOM link over one [`ComDriver`]. Owns the fixed 64-slot
/// channel table (channel 0 always present, for control frames) and drives
/// one rx and one tx worker thread once [`Engine::start_com`] is called.
pub struct Engine {
    driver: Arc<dyn ComDriver>,
    channels: [RwLock<Option<Arc<Channel>>>; 64],
    tx_pool: Arc<ReadyQueuePool>,
    rx_pool: Arc<ReadyQueuePool>,
    started: AtomicBool,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    tx_thread: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<String>>,
    chan_list_wait: ChanListWait,
    spy_frame_tx: Mutex<Option<Spy>>,
    spy_frame_rx: Mutex<Option<Spy>>,
}

impl Engine {
    /// Builds an engine over `driver`, with channel 0 already open for
    /// control frames. Call [`Engine::start_com`] to begin the rx/tx
    /// worker threads before opening further channels.
    pub fn new(driver: Arc<dyn ComDriver>) -> Self {
        let tx_pool = Arc::new(ReadyQueuePool::new());
        let rx_pool = Arc::new(ReadyQueuePool::new());
        let channels: [RwLock<Option<Arc<Channel>>>; 64] = std::array::from_fn(|_| RwLock::new(None));
        *channels[0].write().unwrap() = Some(Arc::new(Channel::new(
            0,
            CONTROL_BUF_SIZE,
            CONTROL_BUF_SIZE,
            Arc::clone(&tx_pool),
            Arc::clone(&rx_pool),
        )));
        Engine {
            driver,
            channels,
            tx_pool,
            rx_pool,
            started: AtomicBool::new(false),
            rx_thread: Mutex::new(None),
            tx_thread: Mutex::new(None),
            last_error: Mutex::new(None),
            chan_list_wait: ChanListWait { list: Mutex::new(None), cond: Condvar::new() },
            spy_frame_tx: Mutex::new(None),
            spy_frame_rx: Mutex::new(None),
        }
    }

    /// Installs a callback invoked with the raw bytes of every frame this
    /// engine writes to the transport.
    pub fn set_spy_frame_tx(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.spy_frame_tx.lock().unwrap() = Some(Box::new(f));
    }

    /// Installs a callback invoked with the raw bytes of every frame this
    /// engine reads from the transport.
    pub fn set_spy_frame_rx(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.spy_frame_rx.lock().unwrap() = Some(Box::new(f));
    }

    fn channel(&self, chan: u8) -> Result<Arc<Channel>, McomError> {
        if chan >= 64 {
            return Err(McomError::InvalidChannel(chan));
        }
        self.channels[chan as usize]
            .read()
            .unwrap()
            .clone()
            .ok_or(McomError::ChannelNotOpen(chan))
    }

    fn record_error(&self, err: &McomError) {
        *self.last_error.lock().unwrap() = Some(err.to_string());
    }

    /// The text of the last error observed by either worker thread, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// Spawns the rx and tx worker threads. Calling it twice on the same
    /// engine is a precondition violation.
    pub fn start_com(self: &Arc<Self>) -> Result<(), McomError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(McomError::AlreadyStarted);
        }
        let rx_engine = Arc::clone(self);
        let rx = std::thread::Builder::new()
            .name("mcom-rx".into())
            .spawn(move || rx_engine.rx_worker())
            .expect("failed to spawn mcom rx worker thread");
        let tx_engine = Arc::clone(self);
        let tx = std::thread::Builder::new()
            .name("mcom-tx".into())
            .spawn(move || tx_engine.tx_worker())
            .expect("failed to spawn mcom tx worker thread");
        *self.rx_thread.lock().unwrap() = Some(rx);
        *self.tx_thread.lock().unwrap() = Some(tx);
        info!(target: "mcom::engine", "worker threads started");
        Ok(())
    }

    /// Opens `chan` (1..64) with the given rx/tx buffer sizes (0 uses a
    /// default). Both ends start with optimistic send credit, so no
    /// handshake is required before the first `tx` on a freshly opened
    /// channel.
    pub fn open_channel(&self, chan: u8, rx_buf_size: usize, tx_buf_size: usize) -> Result<(), McomError> {
        if chan >= 64 {
            return Err(McomError::InvalidChannel(chan));
        }
        if chan == 0 {
            return Err(McomError::ReservedChannel);
        }
        let rx_size = if rx_buf_size == 0 { DEFAULT_BUF_SIZE } else { rx_buf_size };
        let tx_size = if tx_buf_size == 0 { DEFAULT_BUF_SIZE } else { tx_buf_size };
        if rx_size < frame::LARGE_FRAME_MIN_DATA_SIZE {
            return Err(McomError::BufferTooSmall { channel: chan, size: rx_size });
        }
        if tx_size < frame::LARGE_FRAME_MIN_DATA_SIZE {
            return Err(McomError::BufferTooSmall { channel: chan, size: tx_size });
        }
        let mut slot = self.channels[chan as usize].write().unwrap();
        if slot.is_some() {
            return Err(McomError::ChannelAlreadyOpen(chan));
        }
        *slot = Some(Arc::new(Channel::new(
            chan,
            rx_size,
            tx_size,
            Arc::clone(&self.tx_pool),
            Arc::clone(&self.rx_pool),
        )));
        debug!(target: "mcom::engine", "opened channel {chan} (rx={rx_size}, tx={tx_size})");
        Ok(())
    }

    /// Closes `chan`, discarding any buffered data.
    pub fn close_channel(&self, chan: u8) -> Result<(), McomError> {
        if chan >= 64 {
            return Err(McomError::InvalidChannel(chan));
        }
        if chan == 0 {
            return Err(McomError::ReservedChannel);
        }
        let mut slot = self.channels[chan as usize].write().unwrap();
        if slot.take().is_none() {
            return Err(McomError::ChannelNotOpen(chan));
        }
        debug!(target: "mcom::engine", "closed channel {chan}");
        Ok(())
    }

    /// Shuts down both worker threads. The rx thread may remain blocked in
    /// a driver read until the transport itself is torn down; only the tx
    /// thread is guaranteed to join here.
    pub fn close_connection(&self) {
        self.tx_pool.put_shutdown();
        self.rx_pool.put_shutdown();
        if let Some(handle) = self.tx_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!(target: "mcom::engine", "connection closed");
    }

    /// Sends a `CHAN_LIST_REQ` and blocks (up to `timeout`) for the peer's
    /// `CHAN_LIST` reply.
    pub fn chan_list_req(&self, timeout: Option<Duration>) -> Result<Vec<u8>, McomError> {
        *self.chan_list_wait.list.lock().unwrap() = None;
        self.queue_ctrl_frame(frame::encode_chan_list_req())?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.chan_list_wait.list.lock().unwrap();
        loop {
            if let Some(list) = guard.take() {
                return Ok(list);
            }
            guard = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(McomError::Timeout);
                    }
                    let (g, timed_out) = self.chan_list_wait.cond.wait_timeout(guard, d - now).unwrap();
                    if timed_out.timed_out() {
                        return Err(McomError::Timeout);
                    }
                    g
                }
                None => self.chan_list_wait.cond.wait(guard).unwrap(),
            };
        }
    }

    /// Stages `data` for transmission on `chan`; the tx worker drains it
    /// according to the peer's granted credit. Returns the number of bytes
    /// actually accepted (may be less than `data.len()` in non-blocking
    /// mode).
    pub fn tx(&self, chan: u8, data: &[u8], block: bool, timeout: Option<Duration>) -> Result<usize, McomError> {
        if chan == 0 {
            return Err(McomError::ReservedChannel);
        }
        let channel = self.channel(chan)?;
        Ok(channel.tx(data, block, timeout))
    }

    /// Reads up to `length` bytes already demultiplexed onto `chan`.
    pub fn rx(&self, chan: u8, length: usize, block: bool, timeout: Option<Duration>) -> Result<Vec<u8>, McomError> {
        if chan == 0 {
            return Err(McomError::ReservedChannel);
        }
        let channel = self.channel(chan)?;
        Ok(channel.rx(length, block, timeout))
    }

    /// Queues a pre-encoded control frame onto channel 0's tx buffer; the
    /// tx worker drains and transmits it in FIFO order with any other
    /// pending control frame.
    fn queue_ctrl_frame(&self, bytes: Vec<u8>) -> Result<(), McomError> {
        let chan0 = self.channel(0)?;
        chan0.tx(&bytes, true, None);
        Ok(())
    }

    fn frame_tx(&self, bytes: Vec<u8>) -> Result<(), McomError> {
        trace!(target: "mcom::engine", "tx {} bytes", bytes.len());
        if let Some(spy) = self.spy_frame_tx.lock().unwrap().as_ref() {
            spy(&bytes);
        }
        self.driver.tx(&bytes)
    }

    /// Reads one frame off the transport via the driver's `ndu`-unit
    /// contract: one data unit first, then — for a large frame — however
    /// many more its size byte calls for (spec §4.4's two-stage read).
    fn read_frame(&self) -> Result<Frame, McomError> {
        let mut bytes = self.driver.rx(1)?;
        let extra = frame::additional_data_units(&bytes);
        if extra > 0 {
            bytes.extend(self.driver.rx(extra)?);
        }
        if let Some(spy) = self.spy_frame_rx.lock().unwrap().as_ref() {
            spy(&bytes);
        }
        frame::decode(&bytes)
    }

    fn open_channel_numbers(&self) -> Vec<u8> {
        (0u8..64)
            .filter(|&c| self.channels[c as usize].read().unwrap().is_some())
            .collect()
    }

    fn rx_worker(&self) {
        loop {
            let frame = match self.read_frame() {
                Ok(f) => f,
                Err(err) => {
                    warn!(target: "mcom::engine", "rx worker stopping: {err}");
                    self.record_error(&err);
                    self.tx_pool.put_shutdown();
                    self.rx_pool.put_shutdown();
                    return;
                }
            };
            if let Err(err) = self.handle_frame(frame) {
                error!(target: "mcom::engine", "dropping unhandled frame: {err}");
                self.record_error(&err);
            }
        }
    }

    fn handle_frame(&self, frame: Frame) -> Result<(), McomError> {
        match frame {
            Frame::Data { chan, payload } => {
                let channel = self.channel(chan).map_err(|_| McomError::UnknownChannel(chan))?;
                let credit = channel.add_to_rx_buf(&payload);
                let level = credit.clamp(-512, 511) as i16;
                self.queue_ctrl_frame(frame::encode_ack(chan, level)?)
            }
            Frame::Ack { ack_chan, level } => {
                if let Ok(channel) = self.channel(ack_chan) {
                    channel.ack_tx(level);
                }
                Ok(())
            }
            Frame::Resume { ack_chan, level } => {
                if let Ok(channel) = self.channel(ack_chan) {
                    channel.resume_tx(level);
                }
                Ok(())
            }
            Frame::ChanListReq => self.queue_ctrl_frame(frame::encode_chan_list(&self.open_channel_numbers())),
            Frame::ChanList { channels } => {
                *self.chan_list_wait.list.lock().unwrap() = Some(channels);
                self.chan_list_wait.cond.notify_all();
                Ok(())
            }
        }
    }

    fn tx_worker(&self) {
        loop {
            match self.tx_pool.get(true, None) {
                None | Some(PoolItem::Shutdown) => {
                    info!(target: "mcom::engine", "tx worker stopping");
                    return;
                }
                Some(PoolItem::Chan(0)) => {
                    if let Err(stop) = self.drain_control_channel() {
                        error!(target: "mcom::engine", "tx worker stopping: {stop}");
                        self.record_error(&stop);
                        return;
                    }
                }
                Some(PoolItem::Chan(chan)) => {
                    if let Err(stop) = self.drain_data_channel(chan) {
                        error!(target: "mcom::engine", "tx worker stopping: {stop}");
                        self.record_error(&stop);
                        return;
                    }
                }
            }
        }
    }

    /// Drains one pre-encoded control frame from channel 0 and transmits
    /// it. If it turns out to have been an ACK, also fires the auto-RESUME
    /// check for the acknowledged channel (spec §4.5).
    fn drain_control_channel(&self) -> Result<(), McomError> {
        let chan0 = match self.channel(0) {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let mut framebytes = chan0.ctrl_dequeue(frame::DATA_UNIT_SIZE, false);
        if framebytes.is_empty() {
            return Ok(());
        }
        let extra = frame::additional_data_units(&framebytes);
        if extra > 0 {
            framebytes.extend(chan0.ctrl_dequeue(extra * frame::DATA_UNIT_SIZE, true));
        }
        self.frame_tx(framebytes.clone())?;
        if let Ok(Frame::Ack { ack_chan, .. }) = frame::decode(&framebytes) {
            if let Ok(acked) = self.channel(ack_chan) {
                acked.set_ack_done(true);
                self.maybe_send_resume(ack_chan, &acked)?;
            }
        }
        Ok(())
    }

    /// If `channel` is stalled and has at least acknowledged once, and now
    /// has free rx space, emits a RESUME for it directly (bypassing channel
    /// 0's queue) and clears the stall.
    fn maybe_send_resume(&self, chan: u8, channel: &Channel) -> Result<(), McomError> {
        if !channel.is_rx_stalled() || !channel.ack_done() {
            return Ok(());
        }
        let free = channel.rx_free_size();
        if free == 0 {
            return Ok(());
        }
        channel.clear_rx_stalled();
        let level = free.min(511) as i16;
        self.frame_tx(frame::encode_resume(chan, level)?)
    }

    fn drain_data_channel(&self, chan: u8) -> Result<(), McomError> {
        let channel = match self.channel(chan) {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        self.maybe_send_resume(chan, &channel)?;
        if !channel.has_tx() {
            return Ok(());
        }
        let data = channel.get_from_tx_buf();
        for chunk in data.chunks(MAX_DATA_SIZE) {
            let frame = frame::encode_data(chan, chunk)?;
            self.frame_tx(frame)?;
        }
        Ok(())
    }
}
