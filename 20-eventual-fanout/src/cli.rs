use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::wire::Update;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an eventually consistent replica that pushes writes to its peers.
    Replica(ReplicaArgs),
    /// Run the paper storage server.
    PaperServer(PaperServerArgs),
    /// Connect to a paper server with an interactive prompt.
    PaperClient(PaperClientArgs),
    /// Run the durable-queue message broker used for paper notifications.
    Broker(BrokerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReplicaArgs {
    /// Socket address to accept peer updates on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:7000")]
    pub listen: SocketAddr,

    /// Peer addresses that receive every local write (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub peer: Vec<String>,

    /// Write applied at startup, as key=value (repeatable).
    #[arg(long, value_parser = parse_put)]
    pub put: Vec<Update>,

    /// Upper bound for a single delivery attempt to a peer.
    #[arg(long, default_value_t = 2000)]
    pub dial_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PaperServerArgs {
    /// Socket address the paper server should bind to.
    #[arg(long, default_value = "127.0.0.1:50051")]
    pub listen: SocketAddr,

    /// Address of the message broker. The server refuses to start without it.
    #[arg(long, default_value = "127.0.0.1:5672")]
    pub broker: SocketAddr,

    /// Broker queue receiving one notification per stored paper.
    #[arg(long, default_value = "papers")]
    pub queue: String,

    /// Notifications buffered per subscribed client before new ones are dropped.
    #[arg(long, default_value_t = 16)]
    pub client_capacity: usize,

    /// Upper bound for connecting to the broker.
    #[arg(long, default_value_t = 2000)]
    pub dial_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PaperClientArgs {
    /// Address of the paper server.
    #[arg(long, default_value = "127.0.0.1:50051")]
    pub server: SocketAddr,

    /// Also print notifications consumed from this broker.
    #[arg(long)]
    pub broker: Option<SocketAddr>,

    /// Broker queue to consume when --broker is set.
    #[arg(long, default_value = "papers")]
    pub queue: String,
}

#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Socket address the broker should bind to.
    #[arg(long, default_value = "127.0.0.1:5672")]
    pub listen: SocketAddr,
}

fn parse_put(raw: &str) -> Result<Update, String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("invalid write '{raw}', expected key=value"));
    };
    Update::try_new(key, value).map_err(|err| format!("invalid write '{raw}': {err}"))
}
