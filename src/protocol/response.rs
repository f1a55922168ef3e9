//! Response header handling.
//!
//! Every response starts with a status byte and the client transaction id the
//! request carried:
//!
//! ```text
//! +--------+--------------+---------------------------------------+
//! | status | client tx id | payload (OK / PUSH_DATA) or           |
//! | u8     | i32          | fault chain (ERROR)                   |
//! +--------+--------------+---------------------------------------+
//! ```
//!
//! A fault chain is a run of `1, identifier, message` entries closed by a
//! single `0` byte, outermost fault first.
use log::{trace, warn};

use super::{
    ChannelError, ProtocolViolation, RemoteFault, Rid,
    codec::{Result, WireRead, WireWrite},
};

pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
pub const STATUS_PUSH_DATA: u8 = 3;

const CHAIN_MORE: u8 = 1;
const CHAIN_END: u8 = 0;

/// Success-class response statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    PushData,
}

impl ResponseStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            ResponseStatus::Ok => STATUS_OK,
            ResponseStatus::PushData => STATUS_PUSH_DATA,
        }
    }
}

/// Header of a successful response; the payload follows on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: ResponseStatus,
    pub client_tx_id: i32,
}

/// Reads a response header.
///
/// On success the caller decodes the payload next. An error response is
/// consumed entirely and returned as [`ChannelError::Remote`]. An unknown
/// status byte fails with [`ProtocolViolation::UnknownStatus`] without
/// reading anything further; the channel must then be closed.
pub fn read_response<R: WireRead + ?Sized>(input: &mut R) -> Result<ResponseHeader> {
    let status = match input.read_u8()? {
        STATUS_OK => ResponseStatus::Ok,
        STATUS_PUSH_DATA => ResponseStatus::PushData,
        STATUS_ERROR => {
            let client_tx_id = input.read_i32()?;
            let fault = read_fault_chain(input)?;
            trace!("request {client_tx_id} failed remotely: {fault}");
            return Err(ChannelError::Remote(fault));
        }
        other => {
            warn!("unrecognized response status {other:#04x}");
            return Err(ProtocolViolation::UnknownStatus(other).into());
        }
    };

    let client_tx_id = input.read_i32()?;
    Ok(ResponseHeader {
        status,
        client_tx_id,
    })
}

/// Reads the descriptors of an error response and folds them into one fault,
/// the last descriptor being the root cause.
pub fn read_fault_chain<R: WireRead + ?Sized>(input: &mut R) -> Result<RemoteFault> {
    let mut descriptors = Vec::new();

    loop {
        match input.read_u8()? {
            CHAIN_END => break,
            CHAIN_MORE => {
                let identifier = input.read_string()?.unwrap_or_default();
                let message = input.read_string()?;
                descriptors.push((identifier, message));
            }
            flag => return Err(ProtocolViolation::ChainFlag(flag).into()),
        }
    }

    RemoteFault::from_chain(descriptors)
        .ok_or(ChannelError::Protocol(ProtocolViolation::EmptyFaultChain))
}

/// Writes a success header. The caller writes the payload afterwards.
pub fn write_response<W: WireWrite + ?Sized>(
    output: &mut W,
    status: ResponseStatus,
    client_tx_id: i32,
) -> Result<()> {
    output.write_u8(status.as_u8())?;
    output.write_i32(client_tx_id)
}

/// Writes a complete error response for `fault` and its causes.
pub fn write_fault<W: WireWrite + ?Sized>(
    output: &mut W,
    client_tx_id: i32,
    fault: &RemoteFault,
) -> Result<()> {
    output.write_u8(STATUS_ERROR)?;
    output.write_i32(client_tx_id)?;

    for descriptor in fault.chain() {
        output.write_u8(CHAIN_MORE)?;
        output.write_string(Some(descriptor.identifier()))?;
        output.write_string(descriptor.message())?;
    }
    output.write_u8(CHAIN_END)
}

/// A single payload value, used by request handlers to describe a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    String(Option<String>),
    Bytes(Option<Vec<u8>>),
    Strings(Option<Vec<String>>),
    Rid(Rid),
}

impl Frame {
    pub fn write<W: WireWrite + ?Sized>(&self, output: &mut W) -> Result<()> {
        match self {
            Frame::Byte(v) => output.write_u8(*v),
            Frame::Short(v) => output.write_i16(*v),
            Frame::Int(v) => output.write_i32(*v),
            Frame::Long(v) => output.write_i64(*v),
            Frame::String(v) => output.write_string(v.as_deref()),
            Frame::Bytes(v) => output.write_bytes(v.as_deref()),
            Frame::Strings(v) => {
                let items = v
                    .as_ref()
                    .map(|items| items.iter().map(String::as_str).collect::<Vec<_>>());
                output.write_string_collection(items.as_deref())
            }
            Frame::Rid(rid) => output.write_rid(rid),
        }
    }
}

impl From<&str> for Frame {
    fn from(value: &str) -> Self {
        Frame::String(Some(value.to_string()))
    }
}

impl From<Rid> for Frame {
    fn from(value: Rid) -> Self {
        Frame::Rid(value)
    }
}
