//! Fire-and-forget fan-out of updates to every registered subscriber.
//!
//! ```text
//! propagate(msg)
//!     │  list_targets() snapshot
//!     ├──► dispatch(A) ──► PeerDelivery: spawn task ─► dial, write line, close
//!     ├──► dispatch(B) ──► ChannelDelivery: try_send ─► full? drop
//!     └──► dispatch(C)
//! ```
//!
//! ## Rules
//! - **One attempt per subscriber** present in the registry when fan-out
//!   starts; later registrations are not included.
//! - **No acknowledgment**: [`Propagator::propagate`] returns once every
//!   attempt has been initiated. The caller cannot learn whether any
//!   subscriber received the message.
//! - **Isolation**: a failed attempt is logged and dropped. It is never
//!   retried and never affects other subscribers or the local write.
//! - **Ordering**: peer attempts run as independent tasks and may land in
//!   any order. Channel attempts happen inline, so one client's channel sees
//!   a single writer's notifications in write order.

use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::{io::AsyncWriteExt, net::TcpStream, sync::mpsc, time::timeout};
use tracing::{debug, warn};

use crate::config::DEFAULT_DIAL_TIMEOUT;
use crate::registry::{SubscriberId, SubscriberRegistry};
use crate::wire::Update;

/// How a single delivery attempt reaches one subscriber.
///
/// `dispatch` must not block: anything that waits on I/O is spawned.
pub trait Delivery<M>: Send + Sync + 'static {
    type Target: Clone + Send + 'static;

    fn dispatch(&self, subscriber: &str, target: Self::Target, message: &M);
}

/// Byte transport used to reach a remote peer.
///
/// One call opens a connection, sends `payload`, and closes it.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, addr: &str, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Plain TCP: connect, write the whole payload, shut the write side down.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn send(&self, addr: &str, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(payload).await?;
            stream.shutdown().await
        }
    }
}

/// Remote-peer delivery: one short-lived task per attempt.
///
/// Each attempt is bounded by `dial_timeout` so an unreachable peer cannot
/// accumulate stuck tasks.
pub struct PeerDelivery<T = TcpTransport> {
    transport: Arc<T>,
    dial_timeout: Duration,
}

impl Default for PeerDelivery<TcpTransport> {
    fn default() -> Self {
        Self::new(TcpTransport, DEFAULT_DIAL_TIMEOUT)
    }
}

impl<T: Transport> PeerDelivery<T> {
    pub fn new(transport: T, dial_timeout: Duration) -> Self {
        Self {
            transport: Arc::new(transport),
            dial_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T: Transport> Delivery<Update> for PeerDelivery<T> {
    type Target = String;

    /// Spawns the attempt onto the current tokio runtime.
    fn dispatch(&self, _subscriber: &str, peer: String, update: &Update) {
        let transport = Arc::clone(&self.transport);
        let payload = update.encode();
        let limit = self.dial_timeout;

        tokio::spawn(async move {
            match timeout(limit, transport.send(&peer, &payload)).await {
                Ok(Ok(())) => debug!(peer = %peer, "update delivered"),
                Ok(Err(error)) => warn!(peer = %peer, ?error, "failed to deliver update"),
                Err(_) => warn!(peer = %peer, timeout = ?limit, "update delivery timed out"),
            }
        });
    }
}

/// Local-subscriber delivery over a bounded channel.
///
/// A full channel means the subscriber has not drained earlier
/// notifications; the new one is dropped rather than queued.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelDelivery;

impl<M: Clone + Send + 'static> Delivery<M> for ChannelDelivery {
    type Target = mpsc::Sender<M>;

    fn dispatch(&self, subscriber: &str, channel: mpsc::Sender<M>, message: &M) {
        match channel.try_send(message.clone()) {
            Ok(()) => debug!(%subscriber, "notification sent"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%subscriber, "notification skipped (channel full)")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%subscriber, "notification skipped (channel closed)")
            }
        }
    }
}

/// Fans each message out to the registry's current subscribers.
pub struct Propagator<M, D: Delivery<M>> {
    registry: Arc<SubscriberRegistry<D::Target>>,
    delivery: D,
    _message: PhantomData<fn(&M)>,
}

impl<M, D: Delivery<M>> Propagator<M, D> {
    pub fn new(registry: Arc<SubscriberRegistry<D::Target>>, delivery: D) -> Self {
        Self {
            registry,
            delivery,
            _message: PhantomData,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry<D::Target>> {
        &self.registry
    }

    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    /// Initiates one delivery attempt per current subscriber.
    ///
    /// Returns the number of attempts initiated, not the number that
    /// succeeded; delivery success is not observable.
    pub fn propagate(&self, message: &M) -> usize {
        let targets: Vec<(SubscriberId, D::Target)> = self.registry.list_targets();
        let attempts = targets.len();
        for (subscriber, target) in targets {
            self.delivery.dispatch(&subscriber, target, message);
        }
        attempts
    }
}
