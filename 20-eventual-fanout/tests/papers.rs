use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use eventual_fanout::{
    broker::{Broker, BrokerPublisher, QueueConsumer},
    message::{PaperRequest, PaperResponse, read_message, write_message},
    paper_client::{NotificationStream, PaperClient},
    paper_server::{PaperServer, PaperService},
    papers::NewPaper,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(2);

async fn start_broker() -> Result<(SocketAddr, oneshot::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let broker = Broker::new(listener);
    let addr = broker.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = broker.run_until(shutdown).await;
    });
    Ok((addr, shutdown_tx))
}

async fn start_server(broker: SocketAddr) -> Result<(SocketAddr, oneshot::Sender<()>)> {
    let publisher = BrokerPublisher::connect(broker, "papers", WAIT).await?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = PaperServer::new(listener, Arc::new(PaperService::new(publisher, 4)));
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });
    Ok((addr, shutdown_tx))
}

fn paper(title: &str) -> NewPaper {
    NewPaper {
        author: "Lamport".into(),
        title: title.into(),
        format: "PDF".into(),
        content: b"%PDF-1.4 body".to_vec(),
    }
}

#[tokio::test]
async fn added_paper_reaches_subscribers_and_broker_queue() -> Result<()> {
    let (broker_addr, _broker) = start_broker().await?;
    let (server_addr, _server) = start_server(broker_addr).await?;

    let mut client = PaperClient::connect(server_addr).await?;
    let mut notifications = NotificationStream::subscribe(server_addr).await?;
    assert!(!notifications.client_id().is_empty());
    let mut consumer = QueueConsumer::connect(broker_addr, "papers").await?;

    let id = client.add_paper(paper("Paxos")).await?;
    assert_eq!(id, 1);

    let note = timeout(WAIT, notifications.next_notification())
        .await??
        .expect("subscriber should be notified");
    assert_eq!(note, "New paper added: ID=1, Title='Paxos'");

    let queued = timeout(WAIT, consumer.next_message())
        .await??
        .expect("broker should deliver the message");
    assert_eq!(
        queued,
        "New paper of type PDF added to the paper store: Paxos by Lamport"
    );
    Ok(())
}

#[tokio::test]
async fn stored_paper_can_be_listed_and_fetched() -> Result<()> {
    let (broker_addr, _broker) = start_broker().await?;
    let (server_addr, _server) = start_server(broker_addr).await?;
    let mut client = PaperClient::connect(server_addr).await?;

    let first = client.add_paper(paper("Clocks")).await?;
    let second = client.add_paper(paper("Generals")).await?;
    assert_eq!((first, second), (1, 2));

    let titles: Vec<_> = client
        .list_papers()
        .await?
        .into_iter()
        .map(|p| (p.paper_id, p.title))
        .collect();
    assert_eq!(
        titles,
        vec![(1, "Clocks".to_string()), (2, "Generals".to_string())]
    );

    let details = client.paper_details(2).await?;
    assert_eq!(details.title, "Generals");
    assert_eq!(details.format, "PDF");
    assert_eq!(client.fetch_content(1).await?, b"%PDF-1.4 body".to_vec());
    Ok(())
}

#[tokio::test]
async fn unknown_paper_is_an_error_not_a_disconnect() -> Result<()> {
    let (broker_addr, _broker) = start_broker().await?;
    let (server_addr, _server) = start_server(broker_addr).await?;
    let mut client = PaperClient::connect(server_addr).await?;

    let err = client.paper_details(42).await.expect_err("no paper 42");
    assert!(err.to_string().contains("not found"), "got: {err}");
    assert!(client.fetch_content(42).await.is_err());

    assert!(client.list_papers().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn undecodable_request_gets_error_and_connection_survives() -> Result<()> {
    let (broker_addr, _broker) = start_broker().await?;
    let (server_addr, _server) = start_server(broker_addr).await?;

    let stream = TcpStream::connect(server_addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"this is not json\n").await?;
    let response = timeout(WAIT, read_message::<_, PaperResponse>(&mut reader))
        .await??
        .expect("server should answer");
    assert!(matches!(response, PaperResponse::Error { .. }));

    write_message(&mut writer, &PaperRequest::ListPapers).await?;
    let response = timeout(WAIT, read_message::<_, PaperResponse>(&mut reader))
        .await??
        .expect("server should answer");
    assert_eq!(response, PaperResponse::Papers { papers: Vec::new() });
    Ok(())
}

#[tokio::test]
async fn server_refuses_to_start_without_broker() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    assert!(BrokerPublisher::connect(addr, "papers", WAIT).await.is_err());
    Ok(())
}
