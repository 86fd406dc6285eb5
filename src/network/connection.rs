use std::path::{Path, PathBuf};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::content::ContentBuffer;
use crate::protocol::{headers, Message, MessageCodec, MessageFrame, ResourceUri};
use crate::service::AgentConfig;
use crate::{AppError, AppResult};

fn content_name(uri: &str) -> String {
    uri.parse::<ResourceUri>()
        .map(|uri| uri.file_name().to_string())
        .unwrap_or_else(|_| uri.to_string())
}

/// Reads and writes whole messages over one byte stream.
///
/// Inbound bodies are streamed into a [`ContentBuffer`] as they are decoded,
/// so a message returned by [`Connection::read_message`] is always complete.
/// Outbound bodies are framed with `Content-Length` up to the chunk
/// threshold and with chunked encoding above it.
#[derive(Debug)]
pub struct Connection<S> {
    framed: Framed<S, MessageCodec>,
    temp_dir: PathBuf,
    chunk_threshold: u64,
    write_chunk_size: usize,
    /// uri of the last message head read, "/" before the first one
    last_uri: String,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: MessageCodec, temp_dir: PathBuf, chunk_threshold: u64) -> Self {
        Connection {
            framed: Framed::new(stream, codec),
            temp_dir,
            chunk_threshold,
            write_chunk_size: 64 * 1024,
            last_uri: "/".to_string(),
        }
    }

    /// Passive side of a connection: decodes requests.
    pub fn server(stream: S, config: &AgentConfig) -> Self {
        let limits = config.codec_limits();
        let write_chunk_size = limits.max_chunk_size;
        let mut connection = Self::new(
            stream,
            MessageCodec::for_server(limits),
            config.temp_dir(),
            config.transfer.chunk_threshold,
        );
        connection.write_chunk_size = write_chunk_size;
        connection
    }

    /// Active side of a connection: decodes responses.
    pub fn client(stream: S, config: &AgentConfig) -> Self {
        let limits = config.codec_limits();
        let write_chunk_size = limits.max_chunk_size;
        let mut connection = Self::new(
            stream,
            MessageCodec::for_client(limits),
            config.temp_dir(),
            config.transfer.chunk_threshold,
        );
        connection.write_chunk_size = write_chunk_size;
        connection
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn last_uri(&self) -> &str {
        &self.last_uri
    }

    /// Waits for the terminal marker that follows a head without body.
    async fn expect_last(&mut self) -> AppResult<()> {
        match self.framed.next().await {
            Some(Ok(MessageFrame::LastContent)) => Ok(()),
            Some(Ok(frame)) => Err(AppError::IllegalState(format!(
                "expected end of message, got {:?}",
                frame
            ))),
            Some(Err(e)) => Err(e),
            None => Err(AppError::DetailedIoError(
                "connection closed before end of message".to_string(),
            )),
        }
    }

    /// Reads the next complete message.
    ///
    /// `Ok(None)` is a clean close between two messages. A message whose
    /// `decode_result` is a failure is the synthetic error produced by the
    /// codec; after it the connection carries no further messages.
    pub async fn read_message(&mut self) -> AppResult<Option<Message>> {
        let mut message = match self.framed.next().await {
            None => return Ok(None),
            Some(Ok(MessageFrame::Head(message))) => message,
            Some(Ok(frame)) => {
                return Err(AppError::MalformedProtocol(format!(
                    "content frame without a message head: {:?}",
                    frame
                )))
            }
            Some(Err(e)) => return Err(e),
        };
        self.last_uri.clone_from(&message.uri);
        if message.decode_result.is_failure() || !message.has_body() {
            self.expect_last().await?;
            return Ok(Some(message));
        }

        let declared = if message.is_chunked() {
            None
        } else {
            message.content_length()?
        };
        let mut content = ContentBuffer::temp(&self.temp_dir, content_name(&message.uri), declared);
        loop {
            match self.framed.next().await {
                Some(Ok(MessageFrame::Content(bytes))) => content.append(&bytes, false).await?,
                Some(Ok(MessageFrame::LastContent)) => {
                    content.append(&[], true).await?;
                    break;
                }
                Some(Ok(MessageFrame::Head(failure))) if failure.decode_result.is_failure() => {
                    // the body was cut short by a framing error
                    self.expect_last().await?;
                    return Ok(Some(failure));
                }
                Some(Ok(MessageFrame::Head(head))) => {
                    return Err(AppError::IllegalState(format!(
                        "new message {} {} inside a body",
                        head.command, head.uri
                    )))
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(AppError::DetailedIoError(format!(
                        "connection closed inside the body of {}",
                        message.uri
                    )))
                }
            }
        }
        trace!("read {} {} with {} body bytes", message.command, message.uri, content.len());
        message.set_content(content);
        Ok(Some(message))
    }

    /// Writes `message` and its body, then flushes.
    pub async fn write_message(&mut self, mut message: Message) -> AppResult<()> {
        let content = message.take_content();
        message.headers.remove(headers::CONTENT_LENGTH);
        message.headers.remove(headers::TRANSFER_ENCODING);
        if let Some(content) = &content {
            if content.len() > self.chunk_threshold {
                message.headers.set(headers::TRANSFER_ENCODING, headers::CHUNKED)?;
            } else {
                message
                    .headers
                    .set(headers::CONTENT_LENGTH, content.len().to_string())?;
            }
        }
        trace!("writing {} {}", message.command, message.uri);
        self.framed.feed(MessageFrame::Head(message)).await?;
        if let Some(mut content) = content {
            while let Some(bytes) = content.read_chunk(self.write_chunk_size).await? {
                self.framed.feed(MessageFrame::Content(bytes)).await?;
            }
        }
        self.framed.feed(MessageFrame::LastContent).await?;
        SinkExt::<MessageFrame>::flush(&mut self.framed).await?;
        Ok(())
    }

    /// Flushes pending output and shuts the write half down.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        SinkExt::<MessageFrame>::flush(&mut self.framed).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, ResponseCode};
    use tempfile::tempdir;
    use tokio::io::duplex;

    fn pair(
        dir: &Path,
        chunk_threshold: u64,
    ) -> (
        Connection<tokio::io::DuplexStream>,
        Connection<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(16 * 1024);
        let mut config = AgentConfig::default();
        config.general.temp_dir = dir.to_string_lossy().into_owned();
        config.transfer.chunk_threshold = chunk_threshold;
        (Connection::client(a, &config), Connection::server(b, &config))
    }

    #[tokio::test]
    async fn test_fixed_and_chunked_bodies_arrive_identical() -> AppResult<()> {
        let dir = tempdir()?;
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        for threshold in [u64::MAX, 1024] {
            let (mut client, mut server) = pair(dir.path(), threshold);
            let mut request = Message::new(Command::Put, "/data.bin");
            request.set_content(ContentBuffer::from_bytes(dir.path(), "data.bin", &data).await?);

            let (sent, received) = tokio::join!(client.write_message(request), server.read_message());
            sent?;
            let mut received = received?.expect("message");
            assert_eq!(received.is_chunked(), threshold == 1024);
            let content = received.take_content().expect("content");
            assert_eq!(tokio::fs::read(content.path()).await?, data);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_header_only_and_empty_body() -> AppResult<()> {
        let dir = tempdir()?;
        let (mut client, mut server) = pair(dir.path(), 1024);

        client.write_message(Message::new(Command::Info, "/health")).await?;
        let received = server.read_message().await?.expect("message");
        assert_eq!(received.command, Command::Info);
        assert!(received.content.is_none());

        let mut empty = Message::new(Command::Put, "/empty");
        empty.set_content(ContentBuffer::from_bytes(dir.path(), "empty", b"").await?);
        client.write_message(empty).await?;
        let received = server.read_message().await?.expect("message");
        assert_eq!(received.header(headers::CONTENT_LENGTH), Some("0"));
        assert_eq!(received.content.as_ref().map(|c| c.len()), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_close_and_garbage() -> AppResult<()> {
        let dir = tempdir()?;
        let (a, b) = duplex(1024);
        let config = AgentConfig {
            general: crate::service::GeneralConfig {
                temp_dir: dir.path().to_string_lossy().into_owned(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut server = Connection::server(b, &config);
        let mut raw = a;
        raw.write_all(b"NOPE /x\r\n\r\n").await?;
        let failure = server.read_message().await?.expect("synthetic response");
        assert!(failure.decode_result.is_failure());
        assert_eq!(failure.response_code(), Some(ResponseCode::BadRequest));

        drop(raw);
        assert!(server.read_message().await?.is_none());
        Ok(())
    }
}
