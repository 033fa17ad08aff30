//! Durable-queue message broker and its client side.
//!
//! The broker carries the paper store's secondary notification path. It
//! speaks JSON lines ([`BrokerRequest`] / [`BrokerResponse`]):
//!
//! - `publish` appends a body to a named queue, creating it on first use.
//! - `consume` attaches the connection as a consumer of a queue. Bodies
//!   published while nobody consumes are held and handed to the next
//!   consumer in publish order. Several consumers share a queue round-robin.
//!
//! Delivery is auto-acknowledged: a body handed to a consumer whose
//! connection dies before writing it is lost.
//!
//! [`BrokerPublisher`] is the paper server's handle: `publish` never blocks
//! and never fails the caller; a background task owns the connection and
//! re-dials after a failure.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tokio::{
    io::BufReader,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    time::timeout,
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::message::{
    BrokerRequest, BrokerResponse, MAX_LINE_LENGTH, decode_line, read_message, write_message,
};

type ConsumerId = u64;

/// `(queue, body)` handed from the broker state to a consumer connection.
type Delivery = (String, String);

/// Buffered notifications waiting for the publisher task.
const PUBLISH_BUFFER: usize = 256;

/// Sink for the one-per-write broker notification.
///
/// Implementations are best-effort: `publish` must not block and cannot fail
/// the write that triggered it.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, body: String);
}

pub struct Broker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl Broker {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(BrokerState::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Broker { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("broker shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, state: &Arc<BrokerState>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<BrokerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &state).await {
            warn!(peer = %peer, error = ?err, "broker connection closed with error");
        }
    });
}

struct BrokerState {
    queues: Mutex<HashMap<String, Queue>>,
    next_id: AtomicU64,
}

struct Consumer {
    id: ConsumerId,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<String>,
    consumers: VecDeque<Consumer>,
}

impl Queue {
    /// Hands `body` to the next live consumer, dropping dead ones on the way.
    ///
    /// Gives the body back when nobody can take it.
    fn offer(&mut self, name: &str, body: String) -> Option<String> {
        let mut body = body;
        while let Some(consumer) = self.consumers.pop_front() {
            match consumer.tx.send((name.to_string(), body)) {
                Ok(()) => {
                    self.consumers.push_back(consumer);
                    return None;
                }
                Err(mpsc::error::SendError((_, returned))) => body = returned,
            }
        }
        Some(body)
    }
}

impl BrokerState {
    fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ConsumerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn publish(&self, queue: &str, body: String) {
        let mut queues = self.lock();
        let entry = queues.entry(queue.to_string()).or_default();
        if let Some(body) = entry.offer(queue, body) {
            entry.pending.push_back(body);
        }
    }

    fn consume(&self, queue: &str, id: ConsumerId, tx: mpsc::UnboundedSender<Delivery>) {
        let mut queues = self.lock();
        let entry = queues.entry(queue.to_string()).or_default();
        if entry.consumers.iter().any(|consumer| consumer.id == id) {
            return;
        }
        entry.consumers.push_back(Consumer { id, tx });

        while let Some(body) = entry.pending.pop_front() {
            if let Some(body) = entry.offer(queue, body) {
                entry.pending.push_front(body);
                break;
            }
        }
    }

    fn remove_consumer(&self, id: ConsumerId) {
        for queue in self.lock().values_mut() {
            queue.consumers.retain(|consumer| consumer.id != id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Queue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn handle_connection(stream: TcpStream, state: &BrokerState) -> Result<()> {
    let consumer_id = state.next_id();
    let result = run_session(stream, state, consumer_id).await;
    state.remove_consumer(consumer_id);
    result
}

async fn run_session(stream: TcpStream, state: &BrokerState, consumer_id: ConsumerId) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (deliveries_tx, mut deliveries) = mpsc::unbounded_channel::<Delivery>();

    loop {
        select! {
            frame = lines.next() => {
                let Some(frame) = frame else {
                    break;
                };
                let line = frame?;
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line::<BrokerRequest>(&line) {
                    Ok(BrokerRequest::Publish { queue, body }) => {
                        debug!(%queue, "message published");
                        state.publish(&queue, body);
                    }
                    Ok(BrokerRequest::Consume { queue }) => {
                        info!(%queue, consumer = consumer_id, "consumer attached");
                        state.consume(&queue, consumer_id, deliveries_tx.clone());
                    }
                    Err(err) => {
                        write_message(&mut writer, &BrokerResponse::Error {
                            message: format!("invalid request: {err}"),
                        })
                        .await?;
                    }
                }
            }
            Some((queue, body)) = deliveries.recv() => {
                write_message(&mut writer, &BrokerResponse::Delivery { queue, body }).await?;
            }
        }
    }

    Ok(())
}

/// Publishes to one broker queue from a background task.
pub struct BrokerPublisher {
    tx: mpsc::Sender<String>,
}

impl BrokerPublisher {
    /// Dials the broker once up front so a missing broker fails startup.
    pub async fn connect(addr: SocketAddr, queue: impl Into<String>, dial_timeout: Duration) -> Result<Self> {
        let stream = dial(addr, dial_timeout)
            .await
            .with_context(|| format!("failed to connect to broker at {addr}"))?;
        info!(%addr, "connected to broker");

        let (tx, rx) = mpsc::channel(PUBLISH_BUFFER);
        let link = PublisherLink {
            addr,
            queue: queue.into(),
            dial_timeout,
            stream: Some(stream),
        };
        tokio::spawn(link.run(rx));

        Ok(Self { tx })
    }
}

impl Publisher for BrokerPublisher {
    fn publish(&self, body: String) {
        if let Err(err) = self.tx.try_send(body) {
            warn!(error = %err, "broker notification dropped");
        }
    }
}

struct PublisherLink {
    addr: SocketAddr,
    queue: String,
    dial_timeout: Duration,
    stream: Option<TcpStream>,
}

impl PublisherLink {
    async fn run(mut self, mut rx: mpsc::Receiver<String>) {
        while let Some(body) = rx.recv().await {
            self.send(body).await;
        }
        debug!(addr = %self.addr, "broker publisher stopped");
    }

    async fn send(&mut self, body: String) {
        if self.stream.is_none() {
            match dial(self.addr, self.dial_timeout).await {
                Ok(stream) => {
                    info!(addr = %self.addr, "reconnected to broker");
                    self.stream = Some(stream);
                }
                Err(error) => {
                    warn!(addr = %self.addr, ?error, "broker unavailable; notification dropped");
                    return;
                }
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let request = BrokerRequest::Publish {
            queue: self.queue.clone(),
            body,
        };
        match write_message(stream, &request).await {
            Ok(()) => debug!(queue = %self.queue, "notification published"),
            Err(error) => {
                warn!(addr = %self.addr, ?error, "failed to publish notification");
                self.stream = None;
            }
        }
    }
}

async fn dial(addr: SocketAddr, limit: Duration) -> io::Result<TcpStream> {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "broker dial timed out")),
    }
}

/// A connection attached to one broker queue.
pub struct QueueConsumer {
    reader: BufReader<OwnedReadHalf>,
    // Dropping the write half would tell the broker we left.
    _writer: OwnedWriteHalf,
}

impl QueueConsumer {
    pub async fn connect(addr: SocketAddr, queue: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to broker at {addr}"))?;
        let (reader, mut writer) = stream.into_split();
        write_message(
            &mut writer,
            &BrokerRequest::Consume {
                queue: queue.to_string(),
            },
        )
        .await?;

        Ok(Self {
            reader: BufReader::new(reader),
            _writer: writer,
        })
    }

    /// Waits for the next body; `None` once the broker closes the connection.
    pub async fn next_message(&mut self) -> Result<Option<String>> {
        match read_message::<_, BrokerResponse>(&mut self.reader).await? {
            Some(BrokerResponse::Delivery { body, .. }) => Ok(Some(body)),
            Some(BrokerResponse::Error { message }) => bail!("broker error: {message}"),
            None => Ok(None),
        }
    }
}
