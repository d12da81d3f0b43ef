//! Named pipe transport
//!
//! Connects to the extension's pipe through the interprocess crate (named
//! pipes on Windows, a local socket on Unix) and moves delimited frames over
//! the resulting byte stream.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::protocol::{find_delimiter, DELIMITER, MAX_FRAME_SIZE};
use crate::common::{paths, Config, Error, Result};

/// ERROR_PIPE_BUSY: every server instance of the pipe is taken
const ERROR_PIPE_BUSY: i32 = 231;

/// ERROR_NO_DATA: the pipe is being closed
const ERROR_NO_DATA: i32 = 232;

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Stream};
    pub use interprocess::local_socket::GenericFilePath;
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Stream};
    pub use interprocess::local_socket::GenericNamespaced;
}

use platform::*;

/// Byte stream to the extension
pub trait PipeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PipeStream for T {}

/// Boxed stream handed out by a [`Connector`]
pub type BoxedStream = Box<dyn PipeStream>;

/// Opens new streams to the extension
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh stream
    async fn connect(&self) -> Result<BoxedStream>;

    /// Human-readable endpoint for logs and error messages
    fn endpoint(&self) -> String;
}

/// Connector for the extension's named pipe
#[derive(Debug, Clone)]
pub struct PipeConnector {
    name: String,
    connect_timeout: Duration,
    busy_poll: Duration,
}

impl PipeConnector {
    pub fn new(name: &str, connect_timeout: Duration, busy_poll: Duration) -> Self {
        Self {
            name: paths::bare_pipe_name(name).to_string(),
            connect_timeout,
            busy_poll,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.pipe.name,
            Duration::from_millis(config.pipe.connect_timeout_ms),
            Duration::from_millis(config.pipe.wait_slice_ms),
        )
    }

    async fn open(&self) -> io::Result<Stream> {
        #[cfg(unix)]
        let stream = {
            let path = paths::socket_path(&self.name).to_string_lossy().into_owned();
            let name = path.to_fs_name::<GenericFilePath>()?;
            Stream::connect(name).await?
        };

        #[cfg(windows)]
        let stream = {
            let name = self.name.as_str().to_ns_name::<GenericNamespaced>()?;
            Stream::connect(name).await?
        };

        Ok(stream)
    }
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            match self.open().await {
                Ok(stream) => {
                    tracing::debug!(pipe = %self.endpoint(), "Connected to pipe");
                    return Ok(Box::new(stream));
                }
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    if Instant::now() >= deadline {
                        return Err(Error::PipeBusy(self.endpoint()));
                    }
                    tracing::debug!(pipe = %self.endpoint(), "Pipe busy, waiting");
                    tokio::time::sleep(self.busy_poll).await;
                }
                Err(e)
                    if e.kind() == io::ErrorKind::NotFound
                        || e.kind() == io::ErrorKind::ConnectionRefused =>
                {
                    return Err(Error::PipeNotFound(self.endpoint()));
                }
                Err(e) => {
                    return Err(Error::Transport(format!(
                        "Failed to connect to WinDbg extension: {}",
                        e
                    )))
                }
            }
        }
    }

    fn endpoint(&self) -> String {
        paths::display_pipe_path(&self.name)
    }
}

/// Map a failed write to the transport taxonomy
fn write_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::BrokenPipe || e.raw_os_error() == Some(ERROR_NO_DATA) {
        Error::PipeClosing
    } else if matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::NotConnected
    ) {
        Error::PipeBroken(e.to_string())
    } else {
        Error::Transport(format!("Failed to write to pipe: {}", e))
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Write a complete frame
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await.map_err(write_error)?;
    writer.flush().await.map_err(write_error)?;
    Ok(())
}

/// Read one delimited frame, returning it with the delimiter.
///
/// Partial data is kept when the peer hangs up mid-frame and returned as
/// the frame; a hang-up before any data is a broken pipe.
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buffer_size: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut data = Vec::new();
    let mut chunk = vec![0u8; buffer_size.max(DELIMITER.len())];

    loop {
        let read = tokio::time::timeout_at(deadline, reader.read(&mut chunk)).await;
        let n = match read {
            Err(_) => return Err(Error::timeout("Read operation", timeout.as_millis() as u64)),
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_disconnect(&e) && !data.is_empty() => {
                tracing::warn!(bytes = data.len(), "Pipe broken but have partial data, using it");
                return Ok(data);
            }
            Ok(Err(e)) if is_disconnect(&e) => {
                return Err(Error::PipeBroken(e.to_string()));
            }
            Ok(Err(e)) => {
                return Err(Error::Transport(format!("Failed to read from pipe: {}", e)));
            }
        };

        if n == 0 {
            if data.is_empty() {
                return Err(Error::PipeBroken("extension closed the pipe".to_string()));
            }
            tracing::warn!(bytes = data.len(), "Pipe closed mid-response, using partial data");
            return Ok(data);
        }

        // Only rescan the tail that could contain a new delimiter
        let scan_from = data.len().saturating_sub(DELIMITER.len() - 1);
        data.extend_from_slice(&chunk[..n]);
        tracing::trace!(read = n, total = data.len(), "Read from pipe");

        if let Some(pos) = find_delimiter(&data[scan_from..]) {
            let end = scan_from + pos + DELIMITER.len();
            if end < data.len() {
                tracing::debug!(extra = data.len() - end, "Discarding bytes after delimiter");
            }
            data.truncate(end);
            return Ok(data);
        }

        if data.len() > MAX_FRAME_SIZE {
            return Err(Error::Decoding(format!(
                "response exceeds {} bytes without a delimiter",
                MAX_FRAME_SIZE
            )));
        }
    }
}
