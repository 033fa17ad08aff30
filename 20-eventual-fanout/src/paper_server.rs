//! Paper storage service.
//!
//! Every accepted paper is stored first, then announced twice without
//! waiting on anyone: one message to the broker queue through a
//! [`Publisher`], and one notification per subscribed client through that
//! client's bounded channel. A client that has not drained its channel
//! simply misses the notification.

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use futures::StreamExt;
use nanoid::nanoid;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::{
    broker::{BrokerPublisher, Publisher},
    config::PaperServerConfig,
    error::PaperError,
    message::{MAX_LINE_LENGTH, PaperRequest, PaperResponse, decode_line, write_message},
    papers::{NewPaper, PaperDetails, PaperId, PaperStore, PaperSummary},
    propagation::{ChannelDelivery, Propagator},
    registry::{SubscriberId, SubscriberRegistry},
};

const STORED: &str = "paper content stored successfully!";

pub fn broker_notification(paper: &NewPaper) -> String {
    format!(
        "New paper of type {} added to the paper store: {} by {}",
        paper.format, paper.title, paper.author
    )
}

pub fn client_notification(id: PaperId, title: &str) -> String {
    format!("New paper added: ID={id}, Title='{title}'")
}

pub struct PaperService<P: Publisher> {
    store: PaperStore,
    clients: Propagator<String, ChannelDelivery>,
    publisher: P,
    client_capacity: usize,
}

impl<P: Publisher> PaperService<P> {
    pub fn new(publisher: P, client_capacity: usize) -> Self {
        Self {
            store: PaperStore::new(),
            clients: Propagator::new(Arc::new(SubscriberRegistry::new()), ChannelDelivery),
            publisher,
            client_capacity: client_capacity.max(1),
        }
    }

    /// Stores a paper and announces it.
    ///
    /// The id is returned once the paper is stored; neither announcement can
    /// fail or delay the call.
    pub fn add_paper(&self, paper: NewPaper) -> Result<PaperId, PaperError> {
        paper.validate()?;

        let broker_note = broker_notification(&paper);
        let title = paper.title.clone();
        let id = self.store.add(paper);
        info!(paper_id = id, %title, "paper stored");

        self.publisher.publish(broker_note);
        let notified = self.clients.propagate(&client_notification(id, &title));
        debug!(paper_id = id, clients = notified, "client notifications initiated");

        Ok(id)
    }

    pub fn list_papers(&self) -> Vec<PaperSummary> {
        self.store.list()
    }

    pub fn paper_details(&self, id: PaperId) -> Result<PaperDetails, PaperError> {
        self.store.details(id).ok_or(PaperError::NotFound(id))
    }

    pub fn fetch_content(&self, id: PaperId) -> Result<Vec<u8>, PaperError> {
        self.store.content(id).ok_or(PaperError::NotFound(id))
    }

    /// Registers a new client and returns its id and notification channel.
    pub fn register_client(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = nanoid!();
        let (tx, rx) = mpsc::channel(self.client_capacity);
        self.clients.registry().register(id.clone(), tx);
        info!(client = %id, "client registered");
        (id, rx)
    }

    pub fn unregister_client(&self, id: &str) -> bool {
        let removed = self.clients.registry().unregister(id).is_some();
        if removed {
            info!(client = %id, "client unregistered");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.clients.registry().len()
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Answers every request except `subscribe`, which belongs to a
    /// connection rather than the service.
    pub fn respond(&self, request: PaperRequest) -> PaperResponse {
        match request {
            PaperRequest::AddPaper {
                author,
                title,
                format,
                content,
            } => match self.add_paper(NewPaper {
                author,
                title,
                format,
                content,
            }) {
                Ok(paper_id) => PaperResponse::Added {
                    paper_id,
                    message: STORED.to_string(),
                },
                Err(err) => error_response(err),
            },
            PaperRequest::ListPapers => PaperResponse::Papers {
                papers: self.list_papers(),
            },
            PaperRequest::PaperDetails { paper_id } => match self.paper_details(paper_id) {
                Ok(details) => PaperResponse::Details {
                    paper_id,
                    author: details.author,
                    title: details.title,
                    format: details.format,
                },
                Err(err) => error_response(err),
            },
            PaperRequest::FetchContent { paper_id } => match self.fetch_content(paper_id) {
                Ok(content) => PaperResponse::Content { paper_id, content },
                Err(err) => error_response(err),
            },
            PaperRequest::Subscribe => PaperResponse::Error {
                message: "subscribe is only valid on a client connection".to_string(),
            },
        }
    }
}

fn error_response(err: PaperError) -> PaperResponse {
    PaperResponse::Error {
        message: err.to_string(),
    }
}

pub struct PaperServer<P: Publisher> {
    listener: TcpListener,
    service: Arc<PaperService<P>>,
}

impl<P: Publisher> PaperServer<P> {
    pub fn new(listener: TcpListener, service: Arc<PaperService<P>>) -> Self {
        Self { listener, service }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn service(&self) -> &Arc<PaperService<P>> {
        &self.service
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let PaperServer { listener, service } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("paper server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &service);
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

fn handle_accept_result<P: Publisher>(
    result: io::Result<(TcpStream, SocketAddr)>,
    service: &Arc<PaperService<P>>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, service),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler<P: Publisher>(
    stream: TcpStream,
    peer: SocketAddr,
    service: &Arc<PaperService<P>>,
) {
    let service = Arc::clone(service);
    tokio::spawn(async move {
        debug!(peer = %peer, "client connected");
        if let Err(err) = handle_connection(stream, &service).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

type Subscription = Option<(SubscriberId, mpsc::Receiver<String>)>;

async fn handle_connection<P: Publisher>(stream: TcpStream, service: &PaperService<P>) -> Result<()> {
    let mut subscription: Subscription = None;
    let result = run_session(stream, service, &mut subscription).await;
    if let Some((id, _)) = subscription {
        service.unregister_client(&id);
    }
    result
}

async fn run_session<P: Publisher>(
    stream: TcpStream,
    service: &PaperService<P>,
    subscription: &mut Subscription,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

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
                let response = match decode_line::<PaperRequest>(&line) {
                    Ok(PaperRequest::Subscribe) => subscribe(service, subscription),
                    Ok(request) => service.respond(request),
                    Err(err) => PaperResponse::Error {
                        message: format!("invalid request: {err}"),
                    },
                };
                write_message(&mut writer, &response).await?;
            }
            Some(message) = next_notification(subscription) => {
                write_message(&mut writer, &PaperResponse::Notification { message }).await?;
            }
        }
    }

    Ok(())
}

fn subscribe<P: Publisher>(service: &PaperService<P>, subscription: &mut Subscription) -> PaperResponse {
    let (id, _) = subscription.get_or_insert_with(|| service.register_client());
    PaperResponse::Subscribed {
        client_id: id.clone(),
    }
}

async fn next_notification(subscription: &mut Subscription) -> Option<String> {
    match subscription {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Connects to the broker, then serves paper clients until ctrl-c.
pub async fn run(config: PaperServerConfig) -> Result<()> {
    let publisher = BrokerPublisher::connect(config.broker, config.queue.clone(), config.dial_timeout).await?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    let service = Arc::new(PaperService::new(publisher, config.client_capacity));
    let server = PaperServer::new(listener, service);
    info!(queue = %config.queue, "paper server listening on {}", server.local_addr()?);

    server.run_until_ctrl_c().await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Publisher;

    /// Keeps every published body in memory.
    #[derive(Default)]
    pub struct RecordingPublisher {
        bodies: Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        pub fn bodies(&self) -> Vec<String> {
            self.bodies.lock().unwrap().clone()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, body: String) {
            self.bodies.lock().unwrap().push(body);
        }
    }
}
