//! Client-server communication protocol.
//!
//! This module defines the binary channel protocol spoken between Strata
//! clients and servers over a persistent TCP connection: how values are laid
//! out on the wire, how a response reports success or a chain of remote
//! faults, and how a connection is opened, used and torn down.
//!
//! # Overview
//!
//! Every conversation on a [`Channel`] follows the same cycle:
//!
//! 1. The caller writes a request (a [`RequestHeader`] and its body) with the
//!    [`WireWrite`] operations.
//! 2. The caller flushes. Nothing is sent implicitly.
//! 3. The caller reads the response header with [`Channel::read_response`].
//!    On success the payload is decoded with the [`WireRead`] operations; an
//!    error response comes back as a [`RemoteFault`] and no payload follows.
//!
//! # Binary Format
//!
//! All integers are big-endian and fixed width.
//!
//! | Frame             | Layout                                               |
//! |-------------------|------------------------------------------------------|
//! | byte/short/int/long | 1 / 2 / 4 / 8 bytes                                |
//! | string, bytes     | i32 length (`-1` = null) + bytes                     |
//! | string collection | i32 count (`-1` = null) + strings                    |
//! | rid               | i16 cluster id + i64 cluster position                |
//! | response header   | u8 status (0 OK, 1 ERROR, 3 PUSH_DATA) + i32 tx id   |
//! | fault entry       | u8 `1` + string identifier + string message          |
//!
//! Declared lengths and counts larger than the configured chunk size are
//! rejected before anything is allocated for them.
//!
//! # Key Components
//!
//! - [`Decoder`] / [`Encoder`]: the wire codec, generic over any stream.
//! - [`Traced`]: logs every codec operation when `debug` is configured.
//! - [`read_response`] / [`write_fault`]: both halves of the response header.
//! - [`Channel`]: a socket plus its codec, scratch buffer and lifecycle.
//! - [`ChannelServer`]: accept loop and worker pool serving channels.
//!
//! # See Also
//!
//! - [`config`](crate::config): options every channel is built from.
mod channel;
mod codec;
mod error;
mod fault;
mod request;
mod response;
mod rid;
mod server;
mod thread;
mod trace;

use thread::ThreadPool;

pub use channel::{Channel, ChannelState, CloseHandle, ExclusiveGuard, ExclusiveLock};
pub use codec::{Cleared, Decoder, Drain, Encoder, MAX_PREVIEW, NULL_LENGTH, WireRead, WireWrite};
pub use error::{ChannelError, ProtocolViolation};
pub use fault::{Chain, FaultKind, RemoteFault};
pub use request::RequestHeader;
pub use response::{
    Frame, ResponseHeader, ResponseStatus, STATUS_ERROR, STATUS_OK, STATUS_PUSH_DATA,
    read_fault_chain, read_response, write_fault, write_response,
};
pub use rid::{ParseRidError, RID_SIZE, Rid};
pub use server::{ChannelServer, HandlerError, Reply, RequestHandler, ServerHandle, serve};
pub use trace::Traced;
