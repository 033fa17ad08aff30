//! Inbound peer updates.
//!
//! One long-lived task accepts connections; each accepted connection gets a
//! short-lived task that walks `Open -> Reading -> (Applying -> Reading)* ->
//! Closed`. A malformed line is discarded and reading continues. A read
//! error, a line longer than [`MAX_UPDATE_LENGTH`] or EOF closes that
//! connection only. Remote updates are applied to the local store and are
//! never re-propagated.

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::Result;
use futures::StreamExt;
use tokio::{
    io::AsyncRead,
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, info, warn};

use crate::{
    store::KvStore,
    wire::{MAX_UPDATE_LENGTH, parse_update},
};

/// What a single connection contributed before it closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub applied: usize,
    pub discarded: usize,
}

/// Accepts peer connections until `shutdown` resolves.
///
/// Accept errors are logged and the loop keeps going.
pub async fn serve_until<F>(listener: TcpListener, store: Arc<KvStore>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = &mut shutdown => {
                info!("replica listener shutting down");
                break;
            }
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &store);
            }
        }
    }

    Ok(())
}

fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, store: &Arc<KvStore>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, store),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, store: &Arc<KvStore>) {
    let store = Arc::clone(store);
    tokio::spawn(async move {
        match handle_connection(stream, &store).await {
            Ok(summary) => debug!(
                peer = %peer,
                applied = summary.applied,
                discarded = summary.discarded,
                "peer connection closed"
            ),
            Err(err) => warn!(peer = %peer, error = ?err, "peer connection closed with error"),
        }
    });
}

/// Reads `key:value` lines until EOF, applying each well-formed one.
///
/// Lines are split on raw bytes so a non-UTF-8 line is discarded on its own
/// instead of ending the connection.
pub async fn handle_connection<R>(reader: R, store: &KvStore) -> io::Result<ConnectionSummary>
where
    R: AsyncRead + Unpin,
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_UPDATE_LENGTH);
    let mut lines = FramedRead::new(reader, codec);
    let mut summary = ConnectionSummary::default();

    loop {
        let buf = match lines.next().await {
            None => return Ok(summary),
            Some(Ok(buf)) => buf,
            Some(Err(AnyDelimiterCodecError::Io(err))) => return Err(err),
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("update line longer than {MAX_UPDATE_LENGTH} bytes"),
                ));
            }
        };

        let Ok(line) = std::str::from_utf8(&buf) else {
            debug!("discarding non-utf8 update line");
            summary.discarded += 1;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_update(line) {
            Ok(update) => {
                info!(key = %update.key, value = %update.value, "received update");
                store.update(update.key, update.value);
                summary.applied += 1;
            }
            Err(err) => {
                debug!(error = %err, line = line.trim(), "discarding malformed update");
                summary.discarded += 1;
            }
        }
    }
}
