//! Interactive paper-store client.
//!
//! Opens one connection for requests and a second one subscribed to client
//! notifications, which are printed as they arrive. With `--broker` set it
//! also consumes the broker queue and prints those messages.

use std::{net::SocketAddr, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    broker::QueueConsumer,
    config::PaperClientConfig,
    console::PaperCommand,
    message::{PaperRequest, PaperResponse, read_message, write_message},
    papers::{NewPaper, PaperDetails, PaperId, PaperSummary},
};

async fn open(addr: SocketAddr) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

/// Request/response connection to a paper server.
pub struct PaperClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl PaperClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let (reader, writer) = open(addr).await?;
        info!("connected to {}", addr);
        Ok(Self { reader, writer })
    }

    async fn call(&mut self, request: &PaperRequest) -> Result<PaperResponse> {
        write_message(&mut self.writer, request).await?;
        loop {
            match read_message::<_, PaperResponse>(&mut self.reader).await? {
                Some(PaperResponse::Notification { .. }) => continue,
                Some(PaperResponse::Error { message }) => bail!("{message}"),
                Some(response) => return Ok(response),
                None => bail!("server closed the connection"),
            }
        }
    }

    pub async fn add_paper(&mut self, paper: NewPaper) -> Result<PaperId> {
        let request = PaperRequest::AddPaper {
            author: paper.author,
            title: paper.title,
            format: paper.format,
            content: paper.content,
        };
        match self.call(&request).await? {
            PaperResponse::Added { paper_id, .. } => Ok(paper_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_papers(&mut self) -> Result<Vec<PaperSummary>> {
        match self.call(&PaperRequest::ListPapers).await? {
            PaperResponse::Papers { papers } => Ok(papers),
            other => Err(unexpected(other)),
        }
    }

    pub async fn paper_details(&mut self, paper_id: PaperId) -> Result<PaperDetails> {
        match self.call(&PaperRequest::PaperDetails { paper_id }).await? {
            PaperResponse::Details {
                author,
                title,
                format,
                ..
            } => Ok(PaperDetails {
                author,
                title,
                format,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn fetch_content(&mut self, paper_id: PaperId) -> Result<Vec<u8>> {
        match self.call(&PaperRequest::FetchContent { paper_id }).await? {
            PaperResponse::Content { content, .. } => Ok(content),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: PaperResponse) -> anyhow::Error {
    anyhow!("unexpected response from server: {response:?}")
}

/// A connection registered for client notifications.
pub struct NotificationStream {
    client_id: String,
    reader: BufReader<OwnedReadHalf>,
    _writer: OwnedWriteHalf,
}

impl NotificationStream {
    pub async fn subscribe(addr: SocketAddr) -> Result<Self> {
        let (mut reader, mut writer) = open(addr).await?;
        write_message(&mut writer, &PaperRequest::Subscribe).await?;

        match read_message::<_, PaperResponse>(&mut reader).await? {
            Some(PaperResponse::Subscribed { client_id }) => Ok(Self {
                client_id,
                reader,
                _writer: writer,
            }),
            Some(other) => Err(unexpected(other)),
            None => bail!("server closed the connection before confirming the subscription"),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn next_notification(&mut self) -> Result<Option<String>> {
        loop {
            match read_message::<_, PaperResponse>(&mut self.reader).await? {
                Some(PaperResponse::Notification { message }) => return Ok(Some(message)),
                Some(other) => warn!(response = ?other, "ignoring non-notification message"),
                None => return Ok(None),
            }
        }
    }
}

/// Upper-cased file extension, used as the paper's format.
pub fn detect_format(path: &str) -> Result<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.trim().to_uppercase())
        .filter(|ext| !ext.is_empty())
        .ok_or_else(|| anyhow!("cannot infer a format from '{path}': no file extension"))
}

pub async fn run(config: PaperClientConfig) -> Result<()> {
    let mut client = PaperClient::connect(config.server).await?;
    let notifications = NotificationStream::subscribe(config.server).await?;
    info!(client = %notifications.client_id(), "subscribed to notifications");

    let mut background = vec![spawn_notification_printer(notifications)];
    if let Some(broker) = config.broker {
        let consumer = QueueConsumer::connect(broker, &config.queue).await?;
        info!(queue = %config.queue, "consuming broker queue");
        background.push(spawn_queue_printer(consumer));
    }

    let result = run_repl(&mut client).await;

    for task in background {
        task.abort();
    }
    result
}

fn spawn_notification_printer(mut notifications: NotificationStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match notifications.next_notification().await {
                Ok(Some(message)) => {
                    let line = format!(
                        "[Notification] Client ID: {}, Message: {message}",
                        notifications.client_id()
                    );
                    if write_stdout(&line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(?error, "notification stream failed");
                    break;
                }
            }
        }
    })
}

fn spawn_queue_printer(mut consumer: QueueConsumer) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match consumer.next_message().await {
                Ok(Some(body)) => {
                    if write_stdout(&format!("[Broker] {body}")).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(?error, "broker consumer failed");
                    break;
                }
            }
        }
    })
}

async fn run_repl(client: &mut PaperClient) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    write_stdout("Enter commands (type 'exit' to quit):").await?;
    for line in PaperCommand::help_lines() {
        write_stdout(&line).await?;
    }

    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read? == 0 {
                    break;
                }
                let text = input.trim();
                if text.is_empty() {
                    continue;
                }
                match PaperCommand::parse(text) {
                    Ok(PaperCommand::Exit) => {
                        write_stdout("Exiting...").await?;
                        break;
                    }
                    Ok(command) => {
                        if let Err(err) = execute(client, command).await {
                            write_stderr(&format!("ERROR: {err:#}")).await?;
                        }
                    }
                    Err(err) => write_stderr(&format!("ERROR: {err}")).await?,
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

async fn execute(client: &mut PaperClient, command: PaperCommand) -> Result<()> {
    match command {
        PaperCommand::Add {
            author,
            title,
            path,
        } => {
            let format = detect_format(&path)?;
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            let paper_id = client
                .add_paper(NewPaper {
                    author,
                    title,
                    format: format.clone(),
                    content,
                })
                .await?;
            write_stdout(&format!("Stored {path} as paper {paper_id} ({format})")).await?;
        }
        PaperCommand::List => {
            let papers = client.list_papers().await?;
            write_stdout("Stored Papers:").await?;
            for paper in papers {
                write_stdout(&format!(
                    "Paper ID: {} | Author: {} | Title: {}",
                    paper.paper_id, paper.author, paper.title
                ))
                .await?;
            }
        }
        PaperCommand::Detail { paper_id } => {
            let details = client.paper_details(paper_id).await?;
            write_stdout(&format!(
                "Paper ID: {paper_id}\nAuthor: {}\nTitle: {}\nFormat: {}",
                details.author, details.title, details.format
            ))
            .await?;
        }
        PaperCommand::Fetch { paper_id } => {
            let content = client.fetch_content(paper_id).await?;
            write_stdout(&format!(
                "Paper Content for ID {paper_id}:\n{}",
                String::from_utf8_lossy(&content)
            ))
            .await?;
        }
        PaperCommand::Help => {
            for line in PaperCommand::help_lines() {
                write_stdout(&line).await?;
            }
        }
        PaperCommand::Exit => {}
    }
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
