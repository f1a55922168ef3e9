//! Server side of the channel protocol.
//!
//! [`ChannelServer`] accepts TCP connections, wraps each in a [`Channel`] and
//! serves it from a worker of a fixed [`ThreadPool`]. Every conversation is
//! one request header, a handler-defined body, and one response written by
//! the server: OK header plus reply frames, or a fault chain.
use std::{
    collections::HashMap,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ChannelConfig;

use super::{
    Channel, ChannelError, CloseHandle, RemoteFault, RequestHeader, ThreadPool,
    codec::{Result, WireRead, WireWrite},
    response::{self, Frame, ResponseStatus},
};

/// What a handler sends back for a request it accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// OK header followed by the frames.
    Ok(Vec<Frame>),
    /// PUSH_DATA header followed by the frames.
    Push(Vec<Frame>),
    /// OK header followed by the frames, then the session ends.
    Close(Vec<Frame>),
}

/// Application logic behind a [`ChannelServer`].
pub trait RequestHandler: Send + Sync + 'static {
    /// Reads the body of request `header.op` from `input` and answers it.
    ///
    /// Returning a [`RemoteFault`] sends an error response; the session goes
    /// on. A [`ChannelError`] other than `Remote` ends the session.
    fn handle(
        &self,
        header: &RequestHeader,
        input: &mut dyn WireRead,
    ) -> std::result::Result<Reply, HandlerError>;
}

/// Failure while handling a request.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Reported to the client as an error response.
    #[error(transparent)]
    Fault(RemoteFault),
    /// The request could not be read; the session is dropped.
    #[error(transparent)]
    Channel(ChannelError),
}

impl From<RemoteFault> for HandlerError {
    fn from(value: RemoteFault) -> Self {
        HandlerError::Fault(value)
    }
}

impl From<ChannelError> for HandlerError {
    fn from(value: ChannelError) -> Self {
        match value {
            ChannelError::Remote(fault) => HandlerError::Fault(fault),
            e => HandlerError::Channel(e),
        }
    }
}

/// Live channels of a server, so they can be closed from outside.
#[derive(Clone, Default)]
pub struct ServerHandle {
    channels: Arc<Mutex<HashMap<u64, CloseHandle>>>,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Stops accepting and closes every live channel, interrupting any
    /// conversation in progress.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);

        let handles = self
            .channels
            .lock()
            .drain()
            .map(|(_, h)| h)
            .collect::<Vec<_>>();
        info!("closing {} live channels", handles.len());
        for handle in handles {
            handle.close();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn live_channels(&self) -> usize {
        self.channels.lock().len()
    }

    /// Tracks a live channel. After shutdown the channel is closed instead
    /// and `false` is returned.
    fn register(&self, id: u64, handle: CloseHandle) -> bool {
        let mut channels = self.channels.lock();
        if self.is_shutdown() {
            drop(channels);
            handle.close();
            return false;
        }
        channels.insert(id, handle);
        true
    }

    fn unregister(&self, id: u64) {
        self.channels.lock().remove(&id);
    }
}

pub struct ChannelServer<H> {
    listener: TcpListener,
    config: ChannelConfig,
    handler: Arc<H>,
    handle: ServerHandle,
    pool: ThreadPool,
    next_id: AtomicU64,
}

impl<H: RequestHandler> ChannelServer<H> {
    pub fn bind(
        address: SocketAddr,
        config: ChannelConfig,
        handler: H,
        workers: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            listener,
            config,
            handler: Arc::new(handler),
            handle: ServerHandle::default(),
            pool: ThreadPool::new(workers),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Accepts connections until [`ServerHandle::shutdown`] is called.
    pub fn listen(self) -> Result<()> {
        info!("listening at {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            if self.handle.is_shutdown() {
                break;
            }

            match stream {
                Ok(stream) => self.dispatch(stream),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream) {
        let channel = match Channel::new(stream, self.config.clone()) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("failed to open channel: {e}");
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.handle.register(id, channel.close_handle()) {
            debug!("{} - refused, server is shutting down", channel.peer());
            return;
        }

        let handle = self.handle.clone();
        let handler = Arc::clone(&self.handler);
        self.pool.execute(move || {
            let peer = channel.peer().to_string();
            match serve(channel, handler.as_ref()) {
                Ok(()) => debug!("{peer} - session ended"),
                Err(e) => error!("{peer} - session failed: {e}"),
            }
            handle.unregister(id);
        });
    }
}

/// Runs conversations on `channel` until the peer hangs up, the handler asks
/// to close, or the channel fails.
pub fn serve<H: RequestHandler + ?Sized>(mut channel: Channel, handler: &H) -> Result<()> {
    loop {
        let header = match RequestHeader::read(&mut channel) {
            Ok(header) => header,
            Err(ChannelError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                channel.close();
                return Ok(());
            }
            Err(ChannelError::Closed) => return Ok(()),
            Err(e) => {
                channel.close();
                return Err(e);
            }
        };
        debug!("{} - request {header:?}", channel.peer());

        let close = match handler.handle(&header, &mut channel) {
            Ok(reply) => write_reply(&mut channel, header.client_tx_id, &reply)?,
            Err(HandlerError::Fault(fault)) => {
                debug!("{} - request {} failed: {fault}", channel.peer(), header.client_tx_id);
                response::write_fault(&mut channel, header.client_tx_id, &fault)?;
                false
            }
            Err(HandlerError::Channel(e)) => {
                channel.close();
                return Err(e);
            }
        };
        channel.flush()?;

        if close {
            channel.close();
            return Ok(());
        }
    }
}

/// Writes `reply`; returns whether the session should end afterwards.
fn write_reply(channel: &mut Channel, client_tx_id: i32, reply: &Reply) -> Result<bool> {
    let (status, frames, close) = match reply {
        Reply::Ok(frames) => (ResponseStatus::Ok, frames, false),
        Reply::Push(frames) => (ResponseStatus::PushData, frames, false),
        Reply::Close(frames) => (ResponseStatus::Ok, frames, true),
    };

    response::write_response(channel, status, client_tx_id)?;
    for frame in frames {
        frame.write(channel)?;
    }
    Ok(close)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::protocol::{ChannelState, FaultKind};

    use super::*;

    const OP_ECHO: u8 = 1;
    const OP_FAIL: u8 = 2;
    const OP_BYE: u8 = 3;
    const OP_PUSH: u8 = 4;

    struct Echo;

    impl RequestHandler for Echo {
        fn handle(
            &self,
            header: &RequestHeader,
            input: &mut dyn WireRead,
        ) -> std::result::Result<Reply, HandlerError> {
            match header.op {
                OP_ECHO => {
                    let text = input.read_string()?;
                    Ok(Reply::Ok(vec![Frame::String(text)]))
                }
                OP_FAIL => Err(RemoteFault::of(FaultKind::CommandExecution, "outer")
                    .caused_by(RemoteFault::of(FaultKind::Storage, "inner"))
                    .into()),
                OP_BYE => Ok(Reply::Close(vec![])),
                OP_PUSH => Ok(Reply::Push(vec![Frame::Int(42), Frame::from("event")])),
                op => Err(RemoteFault::new("unknown-op", Some(format!("op {op}")), None).into()),
            }
        }
    }

    fn start() -> (SocketAddr, ServerHandle) {
        let server = ChannelServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            ChannelConfig::default(),
            Echo,
            2,
        )
        .unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.handle();
        thread::spawn(move || server.listen());
        (address, handle)
    }

    #[test]
    fn serves_requests_and_faults() {
        let (address, _handle) = start();
        let mut client = Channel::connect(address, ChannelConfig::default()).unwrap();

        RequestHeader::new(OP_ECHO, 1).write(&mut client).unwrap();
        client.write_string(Some("hello")).unwrap();
        client.flush().unwrap();

        let header = client.read_response().unwrap();
        assert_eq!(header.client_tx_id, 1);
        assert_eq!(client.read_string().unwrap().as_deref(), Some("hello"));

        RequestHeader::new(OP_FAIL, 2).write(&mut client).unwrap();
        client.flush().unwrap();

        match client.read_response() {
            Err(ChannelError::Remote(fault)) => {
                assert_eq!(fault.kind(), FaultKind::CommandExecution);
                assert_eq!(fault.root_cause().kind(), FaultKind::Storage);
            }
            other => panic!("expected remote fault, got {other:?}"),
        }

        // A remote fault leaves the session usable.
        RequestHeader::new(9, 3).write(&mut client).unwrap();
        client.flush().unwrap();
        match client.read_response() {
            Err(ChannelError::Remote(fault)) => {
                assert_eq!(fault.kind(), FaultKind::Unknown);
                assert_eq!(fault.identifier(), "unknown-op");
            }
            other => panic!("expected remote fault, got {other:?}"),
        }
    }

    #[test]
    fn push_reply_carries_push_status() {
        let (address, _handle) = start();
        let mut client = Channel::connect(address, ChannelConfig::default()).unwrap();

        RequestHeader::new(OP_PUSH, 11).write(&mut client).unwrap();
        client.flush().unwrap();

        let header = client.read_response().unwrap();
        assert_eq!(header.status, ResponseStatus::PushData);
        assert_eq!(header.client_tx_id, 11);
        assert_eq!(client.read_i32().unwrap(), 42);
        assert_eq!(client.read_string().unwrap().as_deref(), Some("event"));
        assert!(client.is_open());
    }

    #[test]
    fn handler_errors_display_their_source() {
        let fault = RemoteFault::of(FaultKind::Storage, "disk full");
        let err: HandlerError = fault.clone().into();
        assert_eq!(err.to_string(), fault.to_string());

        let err: HandlerError = ChannelError::Closed.into();
        assert_eq!(err.to_string(), ChannelError::Closed.to_string());
    }

    #[test]
    fn channels_registered_after_shutdown_are_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = Channel::connect(listener.local_addr().unwrap(), ChannelConfig::default())
            .unwrap();
        let handle = ServerHandle::default();

        handle.shutdown();

        assert!(!handle.register(0, client.close_handle()));
        assert_eq!(client.state(), ChannelState::Closed);
        assert_eq!(handle.live_channels(), 0);
    }

    #[test]
    fn close_reply_ends_session() {
        let (address, _handle) = start();
        let mut client = Channel::connect(address, ChannelConfig::default()).unwrap();

        RequestHeader::new(OP_BYE, 5).write(&mut client).unwrap();
        client.flush().unwrap();

        assert_eq!(client.read_response().unwrap().client_tx_id, 5);
        assert!(matches!(client.read_u8(), Err(ChannelError::Io(_))));
    }

    #[test]
    fn shutdown_interrupts_sessions() {
        let (address, handle) = start();
        let mut client = Channel::connect(address, ChannelConfig::default()).unwrap();

        RequestHeader::new(OP_ECHO, 1).write(&mut client).unwrap();
        client.write_string(Some("up")).unwrap();
        client.flush().unwrap();
        client.read_response().unwrap();
        client.read_string().unwrap();
        assert_eq!(handle.live_channels(), 1);

        handle.shutdown();

        assert!(handle.is_shutdown());
        assert_eq!(handle.live_channels(), 0);
        assert!(matches!(client.read_u8(), Err(ChannelError::Io(_))));
    }
}
