use std::io;

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

use super::RemoteFault;

/// Reasons a peer broke the wire contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("unrecognized response status {0:#04x}")]
    UnknownStatus(u8),

    #[error("oversized frame: declared {declared} bytes, limit is {limit}")]
    OversizedFrame { declared: usize, limit: usize },

    #[error("frame of {0} bytes does not fit a 32-bit length prefix")]
    UnencodableLength(usize),

    #[error("string frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("null element inside a string collection")]
    NullElement,

    #[error("unexpected fault chain flag {0}")]
    ChainFlag(u8),

    #[error("error response carried no fault descriptors")]
    EmptyFaultChain,

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Every way a conversation on a [`Channel`](super::Channel) can fail.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Stream closed, reset or a short read. The channel is unusable afterwards.
    #[error("channel i/o fault: {0}")]
    Io(#[from] io::Error),

    /// The peer sent something the protocol does not allow. The channel is
    /// unusable afterwards and must be closed by the caller.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The server answered the request with an error response.
    #[error("remote fault: {0}")]
    Remote(#[from] RemoteFault),

    #[error("connection closed")]
    Closed,
}

impl ChannelError {
    /// Whether the channel can still carry another conversation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::Remote(_))
    }
}

impl From<DecodeError> for ChannelError {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::Io { inner, .. } => ChannelError::Io(inner),
            DecodeError::UnexpectedEnd { additional } => ChannelError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended {additional} bytes short"),
            )),
            e => ChannelError::Protocol(ProtocolViolation::Malformed(e.to_string())),
        }
    }
}

impl From<EncodeError> for ChannelError {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::Io { inner, .. } => ChannelError::Io(inner),
            e => ChannelError::Protocol(ProtocolViolation::Malformed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_is_io_fault() {
        let err: ChannelError = DecodeError::UnexpectedEnd { additional: 3 }.into();

        match err {
            ChannelError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn remote_faults_are_not_fatal() {
        let fault = RemoteFault::new("storage", Some("disk full".into()), None);

        assert!(!ChannelError::Remote(fault).is_fatal());
        assert!(ChannelError::Closed.is_fatal());
        assert!(ChannelError::Protocol(ProtocolViolation::UnknownStatus(9)).is_fatal());
    }
}
