//! CLI utilities for Strata.
//!
//! The utilities present in this module back the `strata_cli` and
//! `strata_server` binaries: parsing user input into [`Command`]s and the
//! operation codes both sides agree on.
use std::io::{BufRead, Write};

use thiserror::Error;

use crate::protocol::Rid;

/// Operation codes understood by the demo server.
pub mod op {
    pub const QUERY: u8 = 0x01;
    pub const PING: u8 = 0x02;
    pub const SPLIT: u8 = 0x03;
    pub const FAIL: u8 = 0x04;
    pub const RID: u8 = 0x05;
    pub const CLOSE: u8 = 0x06;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// Round trip check `.ping`
    Ping,
    /// `.split <text>`: ask the server to split text into words
    Split(String),
    /// `.fail <message>`: ask the server to answer with a fault chain
    Fail(String),
    /// `.rid #<cluster>:<position>`: send a record id to be echoed
    Rid(Rid),
    /// Anything not starting with `.` is sent as a query string
    Query(String),
}

impl Command {
    /// Operation code carried by the request header.
    pub fn op(&self) -> u8 {
        match self {
            Command::Exit => op::CLOSE,
            Command::Ping => op::PING,
            Command::Split(_) => op::SPLIT,
            Command::Fail(_) => op::FAIL,
            Command::Rid(_) => op::RID,
            Command::Query(_) => op::QUERY,
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let s = value.trim();
        let (head, rest) = s.split_once(' ').unwrap_or((s, ""));
        let rest = rest.trim();

        match head {
            "" => Err(CommandError::Empty),
            ".exit" => Ok(Command::Exit),
            ".ping" => Ok(Command::Ping),
            ".split" => Ok(Command::Split(rest.to_string())),
            ".fail" => Ok(Command::Fail(rest.to_string())),
            ".rid" => rest
                .parse()
                .map(Command::Rid)
                .map_err(|e: crate::protocol::ParseRidError| {
                    CommandError::InvalidCommandArguments {
                        command: ".rid".to_string(),
                        reason: e.to_string(),
                    }
                }),
            h if h.starts_with('.') => Err(CommandError::UnrecognizedCommand(s.to_string())),
            _ => Ok(Command::Query(s.to_string())),
        }
    }
}

/// Prompt user for a valid Strata command.
///
/// # Panics
/// If the reader or writer fails.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").expect("failed to write to writer.");
    writer.flush().expect("failed to flush writer.");

    let read = reader
        .read_line(&mut s)
        .expect("failed to read from reader.");

    // End of input behaves like `.exit`.
    if read == 0 {
        return Ok(Command::Exit);
    }
    s.as_str().try_into()
}
