//! Runtime configuration for each subcommand.
//!
//! The CLI layer ([`crate::cli`]) only parses flags; the conversions here
//! validate them and turn raw numbers into typed values.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, ensure};

use crate::cli::{BrokerArgs, PaperClientArgs, PaperServerArgs, ReplicaArgs};
use crate::wire::Update;

/// Upper bound on one peer delivery attempt (dial + write + close).
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Notifications buffered per paper-store client before new ones are dropped.
pub const DEFAULT_CLIENT_CAPACITY: usize = 16;

/// Broker queue that receives one message per stored paper.
pub const DEFAULT_QUEUE: &str = "papers";

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub listen: SocketAddr,
    pub peers: Vec<String>,
    pub dial_timeout: Duration,
    /// Writes applied (and propagated) right after startup.
    pub initial_updates: Vec<Update>,
}

impl TryFrom<ReplicaArgs> for ReplicaConfig {
    type Error = anyhow::Error;

    fn try_from(args: ReplicaArgs) -> Result<Self> {
        ensure!(args.dial_timeout_ms > 0, "--dial-timeout-ms must be positive");
        Ok(Self {
            listen: args.listen,
            peers: args.peer,
            dial_timeout: Duration::from_millis(args.dial_timeout_ms),
            initial_updates: args.put,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PaperServerConfig {
    pub listen: SocketAddr,
    pub broker: SocketAddr,
    pub queue: String,
    pub client_capacity: usize,
    pub dial_timeout: Duration,
}

impl TryFrom<PaperServerArgs> for PaperServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: PaperServerArgs) -> Result<Self> {
        ensure!(args.client_capacity > 0, "--client-capacity must be at least 1");
        ensure!(!args.queue.trim().is_empty(), "--queue cannot be empty");
        ensure!(args.dial_timeout_ms > 0, "--dial-timeout-ms must be positive");
        Ok(Self {
            listen: args.listen,
            broker: args.broker,
            queue: args.queue,
            client_capacity: args.client_capacity,
            dial_timeout: Duration::from_millis(args.dial_timeout_ms),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PaperClientConfig {
    pub server: SocketAddr,
    /// When set, the client also consumes the broker queue.
    pub broker: Option<SocketAddr>,
    pub queue: String,
}

impl From<PaperClientArgs> for PaperClientConfig {
    fn from(args: PaperClientArgs) -> Self {
        Self {
            server: args.server,
            broker: args.broker,
            queue: args.queue,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen: SocketAddr,
}

impl From<BrokerArgs> for BrokerConfig {
    fn from(args: BrokerArgs) -> Self {
        Self { listen: args.listen }
    }
}
