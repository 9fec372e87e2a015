use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use crate::connection::{spawn_stream_pumps, ByteChannel, Connection, ConnectionListener, StreamOptions};
use crate::error::{Error, Result};

/// Unix domain socket connection with length-prefix framing
pub struct UnixConnection {
    stream: UnixStream,
    label: String,
    options: StreamOptions,
}

impl UnixConnection {
    /// Connect to a Unix socket with no timeouts
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).connect().await
    }

    /// Create a builder for configuring the connection
    pub fn builder() -> UnixConnectionBuilder {
        UnixConnectionBuilder::new()
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            label: "unix://accepted".to_string(),
            options: StreamOptions::default(),
        }
    }
}

impl Connection for UnixConnection {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn into_channel(self) -> ByteChannel {
        let (reader, writer) = self.stream.into_split();
        spawn_stream_pumps(self.label, reader, writer, self.options)
    }
}

/// Unix socket listener for accepting incoming connections
pub struct UnixConnectionListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixConnectionListener {
    /// Bind to a Unix socket path, replacing a stale socket file
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<UnixConnection> {
        let (stream, _) = self.listener.accept().await?;
        let mut connection = UnixConnection::from_stream(stream);
        connection.label = format!("unix://{}", self.path.display());
        Ok(connection)
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the listener and remove the socket file
    pub async fn close(&mut self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for UnixConnectionListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait::async_trait]
impl ConnectionListener for UnixConnectionListener {
    type Connection = UnixConnection;

    async fn accept(&self) -> Result<Self::Connection> {
        UnixConnectionListener::accept(self).await
    }

    async fn close(&mut self) -> Result<()> {
        UnixConnectionListener::close(self).await
    }
}

/// Builder for configuring a Unix socket connection
#[derive(Default)]
pub struct UnixConnectionBuilder {
    path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    options: StreamOptions,
}

impl UnixConnectionBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to connect to
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the per-frame send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.options.send_timeout = Some(timeout);
        self
    }

    /// Set the per-frame receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.options.receive_timeout = Some(timeout);
        self
    }

    /// Set the largest frame accepted from the peer
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.options.max_frame_len = len;
        self
    }

    /// Connect with the configured settings
    pub async fn connect(self) -> Result<UnixConnection> {
        let path = self
            .path
            .ok_or_else(|| Error::Custom("Path not set".to_string()))?;
        let label = format!("unix://{}", path.display());

        let connect_op = UnixStream::connect(&path);

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??
        } else {
            connect_op.await?
        };

        Ok(UnixConnection {
            stream,
            label,
            options: self.options,
        })
    }
}
