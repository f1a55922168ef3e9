use std::{
    error::Error,
    io::{self, Write},
    net::SocketAddr,
};

use clap::Parser;
use strata::{
    ChannelConfig,
    cli::{Command, prompt},
    protocol::{Channel, ChannelError, RemoteFault, RequestHeader, WireRead, WireWrite},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of a running strata_server
    address: SocketAddr,
    /// Log every wire operation
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let config = ChannelConfig::from_env()?.with_debug(cli.debug);
    let mut channel = Channel::connect(cli.address, config)?;
    let mut tx_id = 0;

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        tx_id += 1;
        match send(&mut channel, tx_id, &cmd) {
            Ok(()) => {}
            Err(ChannelError::Remote(fault)) => print_fault(&fault),
            Err(e) => {
                eprintln!("connection lost: {e}");
                break;
            }
        }

        if cmd == Command::Exit {
            break;
        }
    }

    channel.close();
    Ok(())
}

/// Runs one conversation and prints its reply.
fn send(channel: &mut Channel, tx_id: i32, cmd: &Command) -> Result<(), ChannelError> {
    RequestHeader::new(cmd.op(), tx_id).write(channel)?;
    match cmd {
        Command::Query(text) | Command::Split(text) | Command::Fail(text) => {
            channel.write_string(Some(text.as_str()))?
        }
        Command::Rid(rid) => channel.write_rid(rid)?,
        Command::Exit | Command::Ping => {}
    }
    channel.flush()?;

    let header = channel.read_response()?;
    let mut out = io::stdout().lock();
    match cmd {
        Command::Query(_) => {
            let echoed = channel.read_string()?.unwrap_or_default();
            writeln!(out, "[tx {}] {echoed}", header.client_tx_id)?;
        }
        Command::Ping => {
            let millis = channel.read_i64()?;
            writeln!(out, "pong, server clock {millis}")?;
        }
        Command::Split(_) => {
            for word in channel.read_string_list()?.unwrap_or_default() {
                writeln!(out, "- {word}")?;
            }
        }
        Command::Rid(_) => {
            let rid = channel.read_rid()?;
            let label = channel.read_string()?.unwrap_or_default();
            writeln!(out, "{rid}: {label}")?;
        }
        Command::Fail(_) | Command::Exit => {}
    }
    Ok(())
}

fn print_fault(fault: &RemoteFault) {
    eprintln!("server error: {fault}");
    for cause in fault.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}
