use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use switchboard_core::StatusError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::channel::bi_channel;
use crate::connection::{ByteChannel, Connection, ConnectionListener};
use crate::error::{Error, Result};

/// WebSocket connection carrying one message per binary frame.
///
/// Text frames are a protocol violation and fail the connection. A close
/// with any code other than normal closure fails it too.
pub struct WsConnection<S> {
    stream: WebSocketStream<S>,
    label: String,
}

impl<S> WsConnection<S> {
    /// Wrap an established WebSocket.
    pub fn new(stream: WebSocketStream<S>, label: impl Into<String>) -> Self {
        Self {
            stream,
            label: label.into(),
        }
    }
}

impl WsConnection<MaybeTlsStream<TcpStream>> {
    /// Open a client connection to a `ws://` or `wss://` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        Ok(Self::new(stream, url))
    }
}

impl WsConnection<TcpStream> {
    /// Run the server side handshake on an accepted TCP stream.
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let label = match stream.peer_addr() {
            Ok(addr) => format!("ws://{addr}"),
            Err(_) => "ws://unknown".to_string(),
        };
        let stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        Ok(Self::new(stream, label))
    }
}

impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn label(&self) -> String {
        self.label.clone()
    }

    fn into_channel(self) -> ByteChannel {
        let (outer, (inbound, mut outbound)) = bi_channel::<Vec<u8>, Vec<u8>>();
        let (mut sink, mut source) = self.stream.split();
        let label = self.label;

        let reader_label = label.clone();
        tokio::spawn(async move {
            inbound.open();
            loop {
                match source.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        if inbound.send(data.to_vec()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        warn!(connection = %reader_label, "text frame received");
                        inbound.fail(StatusError::invalid_argument(
                            "text frames are not supported",
                        ));
                        break;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            None => inbound.close(),
                            Some(frame) if frame.code == CloseCode::Normal => inbound.close(),
                            Some(frame) => inbound.fail(StatusError::unavailable(format!(
                                "WebSocket closed with code {}: {}",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ))),
                        }
                        debug!(connection = %reader_label, "connection closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(connection = %reader_label, error = %err, "connection read failed");
                        inbound.fail(StatusError::unavailable(err.to_string()));
                        break;
                    }
                    None => {
                        inbound.fail(StatusError::unavailable(
                            "WebSocket closed without a close frame",
                        ));
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(item) = outbound.recv().await {
                match item {
                    Ok(bytes) => {
                        if let Err(err) = sink.send(Message::Binary(bytes.into())).await {
                            warn!(connection = %label, error = %err, "connection write failed");
                            outbound.fail(StatusError::unavailable(err.to_string()));
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(connection = %label, error = %err, "outbound channel failed");
                        let close = CloseFrame {
                            code: CloseCode::Error,
                            reason: "session failed".into(),
                        };
                        let _ = sink.send(Message::Close(Some(close))).await;
                        return;
                    }
                }
            }
            let _ = sink.close().await;
        });

        outer
    }
}

/// Accepts WebSocket connections on a TCP socket.
pub struct WsListener {
    listener: TcpListener,
}

impl WsListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl ConnectionListener for WsListener {
    type Connection = WsConnection<TcpStream>;

    async fn accept(&self) -> Result<Self::Connection> {
        let (stream, _) = self.listener.accept().await?;
        WsConnection::accept(stream).await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
