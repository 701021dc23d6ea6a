//! Client side of the attach socket.

use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::error::{AttachError, AttachResult};
use crate::protocol::{ClientMessage, MAX_LINE, ServerMessage, decode_server, encode};

/// Receiving half of a connection.
#[derive(Debug)]
pub struct ClientReader {
    inner: FramedRead<OwnedReadHalf, LinesCodec>,
}

impl ClientReader {
    /// Next message, or `None` once the server closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error on framing or decode failure.
    pub async fn recv(&mut self) -> AttachResult<Option<ServerMessage>> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(line) => {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return decode_server(&line).map(Some);
                },
            }
        }
    }
}

/// Sending half of a connection.
#[derive(Debug)]
pub struct ClientWriter {
    inner: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl ClientWriter {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub async fn send(&mut self, message: &ClientMessage) -> AttachResult<()> {
        let line = encode(message)?;
        self.inner.send(line).await?;
        Ok(())
    }
}

/// A connection to a running daemon.
#[derive(Debug)]
pub struct AttachClient {
    reader: ClientReader,
    writer: ClientWriter,
}

impl AttachClient {
    /// Connect to the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::Connect`] if nothing is listening.
    pub async fn connect(path: &Path) -> AttachResult<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| AttachError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: ClientReader {
                inner: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE)),
            },
            writer: ClientWriter {
                inner: FramedWrite::new(write, LinesCodec::new()),
            },
        })
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// See [`ClientWriter::send`].
    pub async fn send(&mut self, message: &ClientMessage) -> AttachResult<()> {
        self.writer.send(message).await
    }

    /// Next message from the server.
    ///
    /// # Errors
    ///
    /// See [`ClientReader::recv`].
    pub async fn recv(&mut self) -> AttachResult<Option<ServerMessage>> {
        self.reader.recv().await
    }

    /// Attach as `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub async fn attach(&mut self, user: &str) -> AttachResult<()> {
        self.send(&ClientMessage::Attach {
            user: user.to_string(),
        })
        .await
    }

    /// Send a typed line as `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub async fn input(&mut self, user: &str, line: &str) -> AttachResult<()> {
        self.send(&ClientMessage::Input {
            user: user.to_string(),
            line: line.to_string(),
        })
        .await
    }

    /// Send `message` and return the first reply `pick` accepts.
    ///
    /// Other messages arriving in between are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::NotRunning`] if the server hangs up first.
    pub async fn request<T, F>(&mut self, message: &ClientMessage, mut pick: F) -> AttachResult<T>
    where
        F: FnMut(ServerMessage) -> Option<T>,
    {
        self.send(message).await?;
        while let Some(reply) = self.recv().await? {
            if let ServerMessage::Error { message } = reply {
                return Err(AttachError::Protocol(message));
            }
            if let Some(value) = pick(reply) {
                return Ok(value);
            }
        }
        Err(AttachError::NotRunning)
    }

    /// Split into halves that can be driven from separate tasks.
    #[must_use]
    pub fn into_split(self) -> (ClientReader, ClientWriter) {
        (self.reader, self.writer)
    }
}
