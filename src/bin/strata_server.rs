use std::{
    error::Error,
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::Parser;
use log::info;
use strata::{
    ChannelConfig,
    cli::op,
    protocol::{
        ChannelServer, FaultKind, Frame, HandlerError, RemoteFault, Reply, RequestHandler,
        RequestHeader, WireRead,
    },
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connection at address
    address: SocketAddr,
    /// Number of connections served concurrently
    #[arg(long, default_value_t = 15)]
    workers: usize,
    /// Largest frame accepted from a client, in bytes
    #[arg(long)]
    max_chunk_size: Option<usize>,
    /// Log every wire operation
    #[arg(long)]
    debug: bool,
}

/// Answers the requests `strata_cli` sends.
struct DemoHandler;

impl RequestHandler for DemoHandler {
    fn handle(
        &self,
        header: &RequestHeader,
        input: &mut dyn WireRead,
    ) -> Result<Reply, HandlerError> {
        match header.op {
            op::QUERY => {
                let query = input.read_string()?.unwrap_or_default();
                info!("query from tx {}: {query}", header.client_tx_id);
                Ok(Reply::Ok(vec![Frame::String(Some(query))]))
            }
            op::PING => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or_default();
                Ok(Reply::Ok(vec![Frame::Long(now)]))
            }
            op::SPLIT => {
                let text = input.read_string()?.unwrap_or_default();
                let words = text.split_whitespace().map(str::to_string).collect();
                Ok(Reply::Ok(vec![Frame::Strings(Some(words))]))
            }
            op::FAIL => {
                let message = input.read_string()?.unwrap_or_default();
                Err(
                    RemoteFault::of(FaultKind::CommandExecution, "cannot execute the request")
                        .caused_by(RemoteFault::of(FaultKind::Storage, message))
                        .into(),
                )
            }
            op::RID => {
                let rid = input.read_rid()?;
                Ok(Reply::Ok(vec![
                    Frame::Rid(rid),
                    Frame::String(Some(format!("record {rid}"))),
                ]))
            }
            op::CLOSE => Ok(Reply::Close(vec![])),
            other => Err(RemoteFault::of(
                FaultKind::NetworkProtocol,
                format!("unsupported operation {other:#04x}"),
            )
            .into()),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = ChannelConfig::from_env()?;
    if let Some(size) = cli.max_chunk_size {
        config = config.with_max_chunk_size(size);
    }
    if cli.debug {
        config = config.with_debug(true);
    }
    let config = config.validate()?;

    let server = ChannelServer::bind(cli.address, config, DemoHandler, cli.workers)?;
    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("shutting down");
        handle.shutdown();
        std::process::exit(0);
    })?;

    server.listen()?;
    Ok(())
}
