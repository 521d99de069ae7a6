//! Message channel between supervisor and worker
//!
//! The supervisor binds a Unix socket in a private temporary directory before
//! spawning and hands its path to the worker through [`CHANNEL_ENV`]. Frames
//! are newline-delimited JSON [`Message`]s.

use lambdaspawn_core::{FrameError, Message};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::{UnixListener, UnixStream};

/// Environment variable carrying the channel socket path
pub const CHANNEL_ENV: &str = "LAMBDASPAWN_CHANNEL";

const SOCKET_NAME: &str = "channel.sock";

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Reading half of a channel
pub struct FrameReader {
    lines: Lines<BufReader<BoxReader>>,
}

impl FrameReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let reader: BoxReader = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Next message, or `None` once the peer closed its end.
    ///
    /// A malformed frame is returned as an inner error and does not end the
    /// stream. Cancel safe.
    pub async fn next(&mut self) -> io::Result<Option<Result<Message, FrameError>>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(Message::decode(&line)));
        }
    }
}

/// Writing half of a channel
pub struct FrameWriter {
    inner: BoxWriter,
}

impl FrameWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        let frame = message.encode()?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Signal end of stream to the peer
    pub async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Both halves of an established channel
pub struct Transport {
    pub reader: FrameReader,
    pub writer: FrameWriter,
}

impl Transport {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    pub fn from_unix(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

/// Supervisor end of a channel that the worker has not connected to yet
pub struct ChannelListener {
    // Removed with the socket file once the listener is dropped
    _dir: TempDir,
    path: PathBuf,
    listener: UnixListener,
}

impl ChannelListener {
    /// Bind a fresh socket. Must be called inside a tokio runtime.
    pub fn bind() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("lambdaspawn-").tempdir()?;
        let path = dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            _dir: dir,
            path,
            listener,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the worker to connect; the socket file goes away afterwards
    pub async fn accept(self) -> io::Result<Transport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(Transport::from_unix(stream))
    }
}

/// Worker end: connect to the socket at `path`
pub async fn connect(path: &Path) -> io::Result<Transport> {
    let stream = UnixStream::connect(path).await?;
    Ok(Transport::from_unix(stream))
}
