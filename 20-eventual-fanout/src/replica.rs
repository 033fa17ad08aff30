//! Eventually consistent replica.
//!
//! A replica owns a [`KvStore`] and a registry of peer addresses. A local
//! write is applied to the store first and then pushed to every peer as one
//! fire-and-forget `key:value` line. Updates received from peers are applied
//! to the store by [`ingress`] and are not forwarded again.
//!
//! A write whose line could not be parsed back by a peer is refused before
//! it touches the store. Once accepted, the writer always gets a successful
//! local write, whatever happens to the deliveries.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    select,
};
use tracing::{info, warn};

use crate::{
    config::ReplicaConfig,
    console::ReplicaCommand,
    error::ParseError,
    ingress,
    propagation::{PeerDelivery, Propagator, TcpTransport, Transport},
    registry::SubscriberRegistry,
    store::KvStore,
    wire::Update,
};

pub struct Replica<T: Transport = TcpTransport> {
    store: Arc<KvStore>,
    propagator: Propagator<Update, PeerDelivery<T>>,
}

impl Replica<TcpTransport> {
    /// Creates a replica that reaches its peers over TCP.
    pub fn new<I>(peers: I, dial_timeout: Duration) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self::with_transport(peers, TcpTransport, dial_timeout)
    }
}

impl<T: Transport> Replica<T> {
    pub fn with_transport<I>(peers: I, transport: T, dial_timeout: Duration) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let registry = Arc::new(SubscriberRegistry::new());
        for peer in peers {
            registry.register(peer.clone(), peer);
        }

        Self {
            store: Arc::new(KvStore::new()),
            propagator: Propagator::new(registry, PeerDelivery::new(transport, dial_timeout)),
        }
    }

    /// Applies a local write and initiates propagation to every current peer.
    ///
    /// Returns how many delivery attempts were started. Whether any of them
    /// reached its peer is not observable.
    pub fn update(&self, key: impl Into<String>, value: impl Into<String>) -> Result<usize, ParseError> {
        let update = Update::try_new(key, value)?;
        self.store.update(update.key.clone(), update.value.clone());
        info!(key = %update.key, value = %update.value, "initiating update");
        Ok(self.propagator.propagate(&update))
    }

    pub fn read(&self, key: &str) -> Option<String> {
        self.store.read(key)
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    /// Registers a peer; returns `false` if it was already known.
    pub fn add_peer(&self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        self.propagator
            .registry()
            .register(addr.clone(), addr)
            .is_none()
    }

    /// Forgets a peer; returns `false` if it was unknown.
    pub fn remove_peer(&self, addr: &str) -> bool {
        self.propagator.registry().unregister(addr).is_some()
    }

    pub fn peers(&self) -> Vec<String> {
        self.propagator
            .registry()
            .list_targets()
            .into_iter()
            .map(|(_, addr)| addr)
            .collect()
    }

    /// Serves inbound peer updates on `listener` until `shutdown` resolves.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        ingress::serve_until(listener, Arc::clone(&self.store), shutdown).await
    }

    /// Executes one console command and returns the lines to print.
    pub fn execute(&self, command: ReplicaCommand) -> Vec<String> {
        match command {
            ReplicaCommand::Put { key, value } => match self.update(key.clone(), value.clone()) {
                Ok(attempts) => vec![format!("OK: {key} = {value} (sent to {attempts} peers)")],
                Err(err) => vec![format!("ERROR: {err}")],
            },
            ReplicaCommand::Get { key } => match self.read(&key) {
                Some(value) => vec![format!("{key} = {value}")],
                None => vec![format!("{key} not found")],
            },
            ReplicaCommand::Status => {
                let snapshot = self.snapshot();
                if snapshot.is_empty() {
                    return vec!["Store: empty".to_string()];
                }
                snapshot
                    .into_iter()
                    .map(|(key, value)| format!("  {key} = {value}"))
                    .collect()
            }
            ReplicaCommand::Peers => {
                let peers = self.peers();
                if peers.is_empty() {
                    vec!["no peers".to_string()]
                } else {
                    peers
                }
            }
            ReplicaCommand::AddPeer { addr } => {
                if self.add_peer(addr.clone()) {
                    vec![format!("added peer {addr}")]
                } else {
                    vec![format!("peer {addr} already registered")]
                }
            }
            ReplicaCommand::RemovePeer { addr } => {
                if self.remove_peer(&addr) {
                    vec![format!("removed peer {addr}")]
                } else {
                    vec![format!("peer {addr} not registered")]
                }
            }
            ReplicaCommand::Help => ReplicaCommand::help_lines(),
            ReplicaCommand::Exit => vec!["Shutting down...".to_string()],
        }
    }
}

/// Runs a replica node: peer listener plus an interactive console on stdin.
pub async fn run(config: ReplicaConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    let addr = listener.local_addr()?;
    info!("replica listening on {}", addr);

    let replica = Arc::new(Replica::new(config.peers, config.dial_timeout));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            replica.serve_until(listener, shutdown).await
        })
    };

    for update in config.initial_updates {
        if let Err(err) = replica.update(update.key, update.value) {
            warn!(error = %err, "skipping startup write");
        }
    }

    let result = run_console(&replica).await;

    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Err(err)) => warn!(error = ?err, "replica listener failed"),
        Err(err) => warn!(error = ?err, "replica listener task panicked"),
        Ok(Ok(())) => {}
    }

    let snapshot = replica.snapshot();
    info!(?snapshot, "replica data");
    result
}

async fn run_console<T: Transport>(replica: &Replica<T>) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    write_stdout("Type HELP (or h) for commands.").await?;
    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read? == 0 {
                    break;
                }
                if !handle_console_line(replica, &input).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_console_line<T: Transport>(replica: &Replica<T>, input: &str) -> Result<bool> {
    if input.trim().is_empty() {
        return Ok(true);
    }

    match ReplicaCommand::parse(input) {
        Ok(command) => {
            let exit = command == ReplicaCommand::Exit;
            for line in replica.execute(command) {
                write_stdout(&line).await?;
            }
            Ok(!exit)
        }
        Err(err) => {
            write_stdout(&format!("ERROR: {err}")).await?;
            Ok(true)
        }
    }
}

async fn write_stdout(line: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
