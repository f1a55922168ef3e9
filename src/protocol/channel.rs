//! Connection lifecycle.
//!
//! A [`Channel`] owns one socket for its whole life: a buffered read half, a
//! buffered write half and a scratch buffer sized to the configured chunk
//! limit. It moves through three states:
//!
//! ```text
//! Open --close()--> Closing --> Closed
//! ```
//!
//! Conversations (write request, flush, read response) are driven by a single
//! thread at a time, but `close` may come from anywhere through a
//! [`CloseHandle`]. Closing shuts the socket down in both directions, so a
//! thread blocked in a read wakes up with an i/o fault instead of hanging.
//! `close` is serialized by the [`ExclusiveLock`], which other protocol users
//! can also hold around a whole conversation to keep the channel from being
//! closed under them: while `close` waits for the lock the channel is
//! `Closing`, and reads and writes keep working until the socket is shut.
use std::{
    collections::HashSet,
    io::{BufReader, BufWriter},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::config::ChannelConfig;

use super::{
    ChannelError, Rid,
    codec::{Cleared, Decoder, Encoder, MAX_PREVIEW, Result, WireRead, WireWrite},
    response::{self, ResponseHeader},
    trace::{self, Traced},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl From<u8> for ChannelState {
    fn from(value: u8) -> Self {
        match value {
            0 => ChannelState::Open,
            1 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// Reentrant lock shared by everything that must not overlap with `close`.
#[derive(Clone, Default)]
pub struct ExclusiveLock {
    inner: Arc<ReentrantMutex<()>>,
}

/// Proof of holding the [`ExclusiveLock`]; released on drop.
pub struct ExclusiveGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for the lock. The thread already holding it
    /// re-enters immediately.
    pub fn acquire(&self, timeout: Duration) -> Option<ExclusiveGuard<'_>> {
        self.inner
            .try_lock_for(timeout)
            .map(|guard| ExclusiveGuard { _guard: guard })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

struct Shared {
    state: AtomicU8,
    lock: ExclusiveLock,
    lock_timeout: Duration,
    socket: TcpStream,
    peer: String,
}

impl Shared {
    fn state(&self) -> ChannelState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Shuts the socket down. Only the first caller does any work.
    fn close(&self) {
        if self
            .state
            .compare_exchange(
                ChannelState::Open as u8,
                ChannelState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let guard = self.lock.acquire(self.lock_timeout);
        if guard.is_none() {
            warn!(
                "{} - exclusive lock not acquired within {:?}, closing anyway",
                self.peer, self.lock_timeout
            );
        }

        if let Err(e) = self.socket.shutdown(Shutdown::Read) {
            debug!("{} - closing input: {e}", self.peer);
        }
        if let Err(e) = self.socket.shutdown(Shutdown::Write) {
            debug!("{} - closing output: {e}", self.peer);
        }

        self.state
            .store(ChannelState::Closed as u8, Ordering::Release);
        drop(guard);
        info!("{} - channel closed", self.peer);
    }
}

/// Closes a [`Channel`] from any thread.
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<Shared>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.shared.close()
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }
}

/// One binary protocol connection over a TCP socket.
pub struct Channel {
    input: Box<dyn WireRead + Send>,
    output: Box<dyn WireWrite + Send>,
    buffer: Vec<u8>,
    config: ChannelConfig,
    shared: Arc<Shared>,
}

impl Channel {
    /// Connects to `address` and opens a channel over the new socket.
    pub fn connect<A: ToSocketAddrs>(address: A, config: ChannelConfig) -> Result<Self> {
        let stream = TcpStream::connect(address)?;
        Self::new(stream, config)
    }

    /// Opens a channel over an established socket (e.g. one just accepted).
    pub fn new(stream: TcpStream, config: ChannelConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.socket_timeout)?;
        stream.set_write_timeout(config.socket_timeout)?;

        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let reader = BufReader::with_capacity(config.socket_buffer_size, stream.try_clone()?);
        let writer = BufWriter::with_capacity(config.socket_buffer_size, stream.try_clone()?);
        let decoder = Decoder::new(reader, config.max_chunk_size);
        let encoder = Encoder::new(writer);

        let (input, output): (Box<dyn WireRead + Send>, Box<dyn WireWrite + Send>) =
            if config.debug {
                debug!(target: trace::TARGET, "{peer} - connected");
                (
                    Box::new(Traced::new(decoder, peer.clone())),
                    Box::new(Traced::new(encoder, peer.clone())),
                )
            } else {
                (Box::new(decoder), Box::new(encoder))
            };

        Ok(Self {
            input,
            output,
            buffer: vec![0; config.max_chunk_size],
            shared: Arc::new(Shared {
                state: AtomicU8::new(ChannelState::Open as u8),
                lock: ExclusiveLock::new(),
                lock_timeout: config.lock_timeout,
                socket: stream,
                peer,
            }),
            config,
        })
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn max_chunk_size(&self) -> usize {
        self.config.max_chunk_size
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Scratch space of exactly `max_chunk_size` bytes, free for callers to
    /// stage chunked payloads.
    pub fn buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn exclusive_lock(&self) -> ExclusiveLock {
        self.shared.lock.clone()
    }

    /// Reads a response header; see [`response::read_response`].
    pub fn read_response(&mut self) -> Result<ResponseHeader> {
        response::read_response(self)
    }

    /// Writes any iterable of strings as a collection frame.
    pub fn write_strings<'a, I>(&mut self, items: Option<I>) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let items = items.map(|items| items.into_iter().collect::<Vec<_>>());
        self.write_string_collection(items.as_deref())
    }

    /// Throws away input that has already arrived, typically after a reply
    /// could not be parsed. Never waits for more bytes.
    pub fn clear_input(&mut self) -> Result<Cleared> {
        self.ensure_open()?;
        let cleared = self.input.drain_pending(&mut self.buffer)?;

        if cleared.bytes > 0 {
            error!(
                "received unread response from {}, probably corrupted data from the network \
                 connection. Cleared dirty data in the buffer ({} bytes): [{}{}]",
                self.shared.peer,
                cleared.bytes,
                cleared.preview,
                if cleared.bytes > MAX_PREVIEW { "..." } else { "" }
            );
        }
        Ok(cleared)
    }

    /// Flushes pending output on a best-effort basis, then shuts the socket
    /// down. Calling it again does nothing.
    ///
    /// The flush gives up after `lock_timeout` if the peer stopped reading.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }

        if let Err(e) = self
            .shared
            .socket
            .set_write_timeout(Some(self.config.lock_timeout))
        {
            debug!("{} - bounding flush on close: {e}", self.shared.peer);
        }
        if let Err(e) = self.output.flush() {
            debug!("{} - flush on close: {e}", self.shared.peer);
        }
        self.shared.close();
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ChannelState::Closed => Err(ChannelError::Closed),
            ChannelState::Open | ChannelState::Closing => Ok(()),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl WireRead for Channel {
    fn read_u8(&mut self) -> Result<u8> {
        self.ensure_open()?;
        self.input.read_u8()
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.ensure_open()?;
        self.input.read_i16()
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.ensure_open()?;
        self.input.read_i32()
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.ensure_open()?;
        self.input.read_i64()
    }

    fn read_string(&mut self) -> Result<Option<String>> {
        self.ensure_open()?;
        self.input.read_string()
    }

    fn read_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.input.read_bytes()
    }

    fn read_string_list(&mut self) -> Result<Option<Vec<String>>> {
        self.ensure_open()?;
        self.input.read_string_list()
    }

    fn read_string_set(&mut self) -> Result<Option<HashSet<String>>> {
        self.ensure_open()?;
        self.input.read_string_set()
    }

    fn read_rid(&mut self) -> Result<Rid> {
        self.ensure_open()?;
        self.input.read_rid()
    }

    fn drain_pending(&mut self, scratch: &mut [u8]) -> Result<Cleared> {
        self.ensure_open()?;
        self.input.drain_pending(scratch)
    }
}

impl WireWrite for Channel {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure_open()?;
        self.output.write_u8(value)
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.ensure_open()?;
        self.output.write_i16(value)
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.ensure_open()?;
        self.output.write_i32(value)
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.ensure_open()?;
        self.output.write_i64(value)
    }

    fn write_string(&mut self, value: Option<&str>) -> Result<()> {
        self.ensure_open()?;
        self.output.write_string(value)
    }

    fn write_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        self.ensure_open()?;
        self.output.write_bytes(value)
    }

    fn write_string_collection(&mut self, items: Option<&[&str]>) -> Result<()> {
        self.ensure_open()?;
        self.output.write_string_collection(items)
    }

    fn write_rid(&mut self, rid: &Rid) -> Result<()> {
        self.ensure_open()?;
        self.output.write_rid(rid)
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.output.flush()
    }
}
