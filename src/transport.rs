//! Framed stdio transport
//!
//! Wraps a child process's stdin/stdout as one bidirectional byte stream.
//! No content interpretation happens here; the JSON-RPC layer reads and
//! writes pre-framed bytes. The child's stderr is drained into the log at
//! debug level and never reaches callers.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::Child;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bidirectional byte stream over a subprocess (or any reader/writer pair).
pub struct StdioTransport {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl StdioTransport {
    /// Take the stdio pipes from a spawned child. Also starts the stderr
    /// drain task if the child has a piped stderr.
    pub fn from_child(child: &mut Child, label: &str) -> Result<Self> {
        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child has no stdin pipe")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child has no stdout pipe")
        })?;

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr, label.to_string());
        }

        Ok(Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
        })
    }

    /// Build a transport over arbitrary streams. Used for in-process
    /// servers and the test suite's duplex pipes.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split into independently owned read and write halves sharing one
    /// closed flag. Read and write proceed independently; each half is
    /// itself sequential.
    pub fn split(self) -> (TransportReader, TransportWriter) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            TransportReader {
                inner: BufReader::new(self.reader),
                closed: closed.clone(),
            },
            TransportWriter {
                inner: self.writer,
                closed,
            },
        )
    }
}

/// Read half of the transport. EOF after close.
pub struct TransportReader {
    inner: BufReader<BoxedReader>,
    closed: Arc<AtomicBool>,
}

impl TransportReader {
    /// Read one header line including the trailing newline. Returns the
    /// number of bytes read; zero means end of stream.
    pub async fn read_line(&mut self, buf: &mut String) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        Ok(self.inner.read_line(buf).await?)
    }

    /// Read exactly `buf.len()` body bytes.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "transport closed",
            )
            .into());
        }
        self.inner.read_exact(buf).await?;
        Ok(())
    }
}

/// Write half of the transport. Writes fail with a closed-pipe kind after
/// close; close is idempotent.
pub struct TransportWriter {
    inner: BoxedWriter,
    closed: Arc<AtomicBool>,
}

impl TransportWriter {
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport closed",
            )
            .into());
        }
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close both directions. The first call shuts the writer down; later
    /// calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!("Transport writer shutdown: {}", e);
        }
        Ok(())
    }
}

/// Drain a child's stderr into the log, one line per debug event.
fn spawn_stderr_drain(stderr: tokio::process::ChildStderr, label: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tracing::debug!("LSP ({}) stderr closed", label);
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        tracing::debug!("LSP ({}) stderr: {}", label, trimmed);
                    }
                }
                Err(e) => {
                    tracing::debug!("LSP ({}) stderr read error: {}", label, e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (client_io, mut server_io) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(client_io);
        let transport = StdioTransport::from_streams(server_read, server_write);
        let (mut reader, mut writer) = transport.split();

        writer.write_all(b"hello\n").await.unwrap();

        let mut received = [0u8; 6];
        server_io.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello\n");

        server_io.write_all(b"world\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "world\n");
    }

    #[tokio::test]
    async fn test_write_after_close_fails_with_broken_pipe() {
        let (client_io, _server_io) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(client_io);
        let (_reader, mut writer) = StdioTransport::from_streams(r, w).split();

        writer.close().await.unwrap();
        let err = writer.write_all(b"x").await.unwrap_err();
        match err {
            BridgeError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client_io, _server_io) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(client_io);
        let (_reader, mut writer) = StdioTransport::from_streams(r, w).split();

        writer.close().await.unwrap();
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_after_close_reports_eof() {
        let (client_io, _server_io) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(client_io);
        let (mut reader, mut writer) = StdioTransport::from_streams(r, w).split();

        writer.close().await.unwrap();
        let mut line = String::new();
        assert_eq!(reader.read_line(&mut line).await.unwrap(), 0);
    }
}
