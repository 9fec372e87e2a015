//! Raw byte-message connections
//!
//! A connection delivers whole binary messages to a single peer. Whatever the
//! underlying medium, it is handed to the upper layers as a pair of channels:
//! a sender for outgoing messages and a receiver for incoming ones. Closing
//! the sender shuts the connection down; the receiver closes when the peer
//! does and fails when the connection breaks.

use std::time::Duration;

use switchboard_core::StatusError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::channel::{bi_channel, Receiver, Sender};
use crate::error::{Error, Result};

pub mod mem;
pub mod tcp;
pub mod unix;
pub mod websocket;

pub use self::mem::MemConnection;
pub use self::tcp::{TcpConnection, TcpConnectionBuilder, TcpConnectionListener};
pub use self::unix::{UnixConnection, UnixConnectionBuilder, UnixConnectionListener};
pub use self::websocket::{WsConnection, WsListener};

/// Largest frame the stream connections accept by default (100MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Outgoing and incoming halves of a connection.
pub type ByteChannel = (Sender<Vec<u8>>, Receiver<Vec<u8>>);

/// A message-oriented connection to one peer.
pub trait Connection: Send + 'static {
    /// Human readable name of the peer, used in logs.
    fn label(&self) -> String;

    /// Start moving messages and hand over the channel pair.
    fn into_channel(self) -> ByteChannel;
}

/// Source of incoming connections.
#[async_trait::async_trait]
pub trait ConnectionListener: Send + Sync {
    type Connection: Connection;

    /// Wait for the next peer.
    async fn accept(&self) -> Result<Self::Connection>;

    /// Stop listening.
    async fn close(&mut self) -> Result<()>;
}

/// Settings shared by the length-prefixed stream connections.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamOptions {
    pub(crate) send_timeout: Option<Duration>,
    pub(crate) receive_timeout: Option<Duration>,
    pub(crate) max_frame_len: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            send_timeout: None,
            receive_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Read one frame: a 4-byte big-endian length followed by that many bytes.
pub(crate) async fn read_frame<R>(reader: &mut R, max_frame_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await.map_err(eof_is_closed)? as usize;
    if len > max_frame_len {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(eof_is_closed)?;
    Ok(buf)
}

/// Write one length-prefixed frame and flush it.
pub(crate) async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::InvalidFrame(format!("Message too large: {} bytes", bytes.len())))?;
    writer.write_u32(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_is_closed(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        err.into()
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    what: &str,
    op: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| Error::Status(StatusError::deadline_exceeded(format!("{what} timeout exceeded"))))?,
        None => op.await,
    }
}

/// Spawn the reader and writer tasks of a length-prefixed byte stream.
pub(crate) fn spawn_stream_pumps<R, W>(
    label: String,
    mut reader: R,
    mut writer: W,
    options: StreamOptions,
) -> ByteChannel
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outer, (inbound, mut outbound)) = bi_channel::<Vec<u8>, Vec<u8>>();

    let reader_label = label.clone();
    tokio::spawn(async move {
        inbound.open();
        loop {
            let frame = with_timeout(
                options.receive_timeout,
                "Receive",
                read_frame(&mut reader, options.max_frame_len),
            )
            .await;
            match frame {
                Ok(bytes) => {
                    if inbound.send(bytes).is_err() {
                        break;
                    }
                }
                Err(Error::ConnectionClosed) => {
                    debug!(connection = %reader_label, "connection closed by peer");
                    inbound.close();
                    break;
                }
                Err(err) => {
                    warn!(connection = %reader_label, error = %err, "connection read failed");
                    inbound.fail(stream_failure(err));
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(connection = %label, error = %err, "outbound channel failed");
                    break;
                }
            };
            let written = with_timeout(options.send_timeout, "Send", write_frame(&mut writer, &bytes)).await;
            if let Err(err) = written {
                warn!(connection = %label, error = %err, "connection write failed");
                outbound.fail(stream_failure(err));
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    outer
}

fn stream_failure(err: Error) -> StatusError {
    match err {
        Error::Status(status) => status,
        other => StatusError::unavailable(other.to_string()),
    }
}
