use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::connection::{spawn_stream_pumps, ByteChannel, Connection, ConnectionListener, StreamOptions};
use crate::error::{Error, Result};

/// TCP connection with length-prefix framing
///
/// Messages are sent with a 4-byte big-endian length prefix
pub struct TcpConnection {
    stream: TcpStream,
    options: StreamOptions,
}

impl TcpConnection {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::builder().address(addr).connect().await
    }

    /// Create a builder for configuring the connection
    pub fn builder() -> TcpConnectionBuilder {
        TcpConnectionBuilder::new()
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            options: StreamOptions::default(),
        }
    }

    /// Get the remote address of this connection
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }

    /// Get the local address of this connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().map_err(Into::into)
    }
}

impl Connection for TcpConnection {
    fn label(&self) -> String {
        match self.stream.peer_addr() {
            Ok(addr) => format!("tcp://{addr}"),
            Err(_) => "tcp://unknown".to_string(),
        }
    }

    fn into_channel(self) -> ByteChannel {
        let label = self.label();
        let (reader, writer) = self.stream.into_split();
        spawn_stream_pumps(label, reader, writer, self.options)
    }
}

/// TCP listener for accepting incoming connections
pub struct TcpConnectionListener {
    listener: TcpListener,
}

impl TcpConnectionListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<(TcpConnection, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((TcpConnection::from_stream(stream), addr))
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl ConnectionListener for TcpConnectionListener {
    type Connection = TcpConnection;

    async fn accept(&self) -> Result<Self::Connection> {
        let (connection, _) = TcpConnectionListener::accept(self).await?;
        Ok(connection)
    }

    // The socket is released when the listener is dropped.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builder for configuring a TCP connection
#[derive(Default)]
pub struct TcpConnectionBuilder {
    address: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
    options: StreamOptions,
}

impl TcpConnectionBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address to connect to
    pub fn address(mut self, addr: SocketAddr) -> Self {
        self.address = Some(addr);
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
    pub async fn connect(self) -> Result<TcpConnection> {
        let addr = self
            .address
            .ok_or_else(|| Error::Custom("Address not set".to_string()))?;

        let connect_op = TcpStream::connect(addr);

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??
        } else {
            connect_op.await?
        };

        Ok(TcpConnection {
            stream,
            options: self.options,
        })
    }
}
