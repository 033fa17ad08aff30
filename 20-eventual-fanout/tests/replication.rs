use std::{sync::Arc, time::Duration};

use anyhow::Result;
use eventual_fanout::{console::ReplicaCommand, replica::Replica};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};

const DIAL_TIMEOUT: Duration = Duration::from_millis(500);
const WAIT: Duration = Duration::from_secs(2);

struct RunningReplica {
    replica: Arc<Replica>,
    addr: String,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<()>>,
}

impl RunningReplica {
    async fn start(peers: Vec<String>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let replica = Arc::new(Replica::new(peers, DIAL_TIMEOUT));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = {
            let replica = Arc::clone(&replica);
            tokio::spawn(async move {
                let shutdown = async move {
                    let _ = shutdown_rx.await;
                };
                replica.serve_until(listener, shutdown).await
            })
        };

        Ok(Self {
            replica,
            addr,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.server.await?
    }
}

async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn unreachable_addr() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);
    Ok(addr)
}

#[tokio::test]
async fn write_without_peers_is_local_only() -> Result<()> {
    let replica = Replica::new(Vec::new(), DIAL_TIMEOUT);

    assert_eq!(replica.update("key1", "value1")?, 0);
    assert_eq!(replica.read("key1"), Some("value1".to_string()));
    assert_eq!(replica.read("missing"), None);
    Ok(())
}

#[tokio::test]
async fn reachable_peer_gets_the_line_despite_unreachable_one() -> Result<()> {
    let p1 = TcpListener::bind("127.0.0.1:0").await?;
    let p1_addr = p1.local_addr()?.to_string();
    let p2_addr = unreachable_addr().await?;

    let replica = Replica::new(vec![p1_addr, p2_addr], DIAL_TIMEOUT);
    assert_eq!(replica.update("k", "v")?, 2);
    assert_eq!(replica.read("k"), Some("v".to_string()));

    let (mut stream, _) = timeout(WAIT, p1.accept()).await??;
    let mut received = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut received)).await??;
    assert_eq!(received, b"k:v\n");
    Ok(())
}

#[tokio::test]
async fn two_replicas_converge() -> Result<()> {
    let a = RunningReplica::start(Vec::new()).await?;
    let b = RunningReplica::start(vec![a.addr.clone()]).await?;
    assert!(a.replica.add_peer(b.addr.clone()));

    a.replica.update("x", "1")?;
    b.replica.update("y", "2")?;

    assert!(eventually(|| b.replica.read("x").as_deref() == Some("1")).await);
    assert!(eventually(|| a.replica.read("y").as_deref() == Some("2")).await);
    assert_eq!(a.replica.snapshot(), b.replica.snapshot());

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn received_updates_are_not_forwarded() -> Result<()> {
    let watcher = TcpListener::bind("127.0.0.1:0").await?;
    let middle = RunningReplica::start(vec![watcher.local_addr()?.to_string()]).await?;
    let origin = Replica::new(vec![middle.addr.clone()], DIAL_TIMEOUT);

    origin.update("k", "v")?;
    assert!(eventually(|| middle.replica.read("k").as_deref() == Some("v")).await);

    assert!(
        timeout(Duration::from_millis(200), watcher.accept()).await.is_err(),
        "middle replica must not forward a remote update"
    );

    middle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_lines_are_skipped() -> Result<()> {
    let node = RunningReplica::start(Vec::new()).await?;

    let mut stream = TcpStream::connect(&node.addr).await?;
    stream
        .write_all(b"garbage\n:nokey\ntoo:many:parts\ngood:line\n")
        .await?;
    stream.shutdown().await?;

    assert!(eventually(|| node.replica.read("good").as_deref() == Some("line")).await);
    assert_eq!(node.replica.snapshot().len(), 1);

    node.stop().await?;
    Ok(())
}

#[tokio::test]
async fn write_a_peer_could_not_parse_is_refused_everywhere() -> Result<()> {
    let b = RunningReplica::start(Vec::new()).await?;
    let a = Replica::new(vec![b.addr.clone()], DIAL_TIMEOUT);

    assert!(ReplicaCommand::parse("PUT url http://example.com").is_err());
    assert!(a.update("url", "http://example.com").is_err());
    assert_eq!(a.read("url"), None);

    let put = ReplicaCommand::parse("PUT url example.com")?;
    assert_eq!(a.execute(put), vec!["OK: url = example.com (sent to 1 peers)".to_string()]);
    assert!(eventually(|| b.replica.read("url").as_deref() == Some("example.com")).await);
    assert_eq!(a.snapshot(), b.replica.snapshot());

    b.stop().await?;
    Ok(())
}
