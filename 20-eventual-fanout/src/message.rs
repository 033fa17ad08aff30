use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::papers::{PaperId, PaperSummary};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest JSON line a server accepts before dropping the connection.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaperRequest {
    AddPaper {
        author: String,
        title: String,
        format: String,
        content: Vec<u8>,
    },
    ListPapers,
    PaperDetails { paper_id: PaperId },
    FetchContent { paper_id: PaperId },
    Subscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaperResponse {
    Added { paper_id: PaperId, message: String },
    Papers { papers: Vec<PaperSummary> },
    Details {
        paper_id: PaperId,
        author: String,
        title: String,
        format: String,
    },
    Content { paper_id: PaperId, content: Vec<u8> },
    Subscribed { client_id: String },
    Notification { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerRequest {
    Publish { queue: String, body: String },
    Consume { queue: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerResponse {
    Delivery { queue: String, body: String },
    Error { message: String },
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // Line-oriented framing keeps the protocol usable from netcat.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return decode_line(trimmed).map(Some);
    }
}

/// Decodes one already-framed JSON line.
///
/// Undecodable input maps to [`io::ErrorKind::InvalidData`] so servers can
/// tell a bad message apart from a broken connection.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> io::Result<T> {
    serde_json::from_str(line).map_err(to_io_error)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_paper_request() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let message = PaperRequest::AddPaper {
            author: "alice".into(),
            title: "notes".into(),
            format: "PDF".into(),
            content: vec![0, 159, 255],
        };

        write_message(&mut writer, &message)
            .await
            .expect("write message");
        let parsed = read_message::<_, PaperRequest>(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(message, parsed);
    }

    #[test]
    fn wire_format_is_tagged_snake_case() {
        let encoded = serde_json::to_string(&BrokerRequest::Publish {
            queue: "papers".into(),
            body: "hi".into(),
        })
        .expect("encode");
        assert_eq!(encoded, r#"{"type":"publish","queue":"papers","body":"hi"}"#);

        let decoded: PaperRequest =
            decode_line(r#"{"type":"paper_details","paper_id":3}"#).expect("decode");
        assert_eq!(decoded, PaperRequest::PaperDetails { paper_id: 3 });
    }

    #[test]
    fn garbage_is_invalid_data() {
        let err = decode_line::<PaperRequest>("not json").expect_err("should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_is_none() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        writer
            .write_all(b"\n\r\n{\"type\":\"list_papers\"}\n")
            .await
            .expect("write");
        drop(writer);

        let first = read_message::<_, PaperRequest>(&mut reader)
            .await
            .expect("read");
        assert_eq!(first, Some(PaperRequest::ListPapers));
        let eof = read_message::<_, PaperRequest>(&mut reader)
            .await
            .expect("read");
        assert_eq!(eof, None);
    }
}
