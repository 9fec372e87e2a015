use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use switchboard_core::StatusError;

use crate::codec::Codec;
use crate::connection::{Connection, TcpConnection, UnixConnection, WsConnection};
use crate::error::Result;
use crate::node::Node;
use crate::rpc::{call_unary, CallOptions, ProtoRegistry};

/// Perform a one-off unary call over TCP
///
/// Opens a connection, calls `method` (a full method name such as
/// `hello_world.HelloService.Hello`), and closes the session.
pub async fn request_tcp<Req, Res, C>(
    addr: SocketAddr,
    registry: Arc<ProtoRegistry>,
    method: &str,
    request: &Req,
    codec: C,
) -> Result<Res>
where
    Req: Serialize,
    Res: DeserializeOwned,
    C: Codec,
{
    let connection = TcpConnection::connect(addr).await?;
    request_over(connection, registry, method, request, codec).await
}

/// Perform a one-off unary call over a Unix socket
pub async fn request_unix<Req, Res, C>(
    path: impl AsRef<Path>,
    registry: Arc<ProtoRegistry>,
    method: &str,
    request: &Req,
    codec: C,
) -> Result<Res>
where
    Req: Serialize,
    Res: DeserializeOwned,
    C: Codec,
{
    let connection = UnixConnection::connect(path).await?;
    request_over(connection, registry, method, request, codec).await
}

/// Perform a one-off unary call over a WebSocket
pub async fn request_ws<Req, Res, C>(
    url: &str,
    registry: Arc<ProtoRegistry>,
    method: &str,
    request: &Req,
    codec: C,
) -> Result<Res>
where
    Req: Serialize,
    Res: DeserializeOwned,
    C: Codec,
{
    let connection = WsConnection::connect(url).await?;
    request_over(connection, registry, method, request, codec).await
}

/// Perform a one-off unary call over any connection
pub async fn request_over<Req, Res, C>(
    connection: impl Connection,
    registry: Arc<ProtoRegistry>,
    method: &str,
    request: &Req,
    codec: C,
) -> Result<Res>
where
    Req: Serialize,
    Res: DeserializeOwned,
    C: Codec,
{
    let descriptor = registry
        .lookup_method(method)
        .ok_or_else(|| StatusError::unimplemented(format!("unknown method {method}")))?;
    let session = Node::new(registry).connect(connection);
    let response = call_unary(&session, &descriptor, request, &codec, &CallOptions::default()).await;
    session.close();
    Ok(response?)
}
