//! Switchboard Fabric - multiplexed RPC over message connections
//!
//! Many concurrent request/response and streaming exchanges share one
//! connection (WebSocket, TCP or Unix socket with length-prefix framing, or an
//! in-memory pair). Services are described by a [`ProtoRegistry`], served by
//! typed [`ServiceHandler`]s and called through [`ServiceClient`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchboard_core::StatusError;
//! use switchboard_fabric::connection::{TcpConnection, TcpConnectionListener};
//! use switchboard_fabric::rpc::{Meta, ProtoRegistry, ServiceClient, ServiceHandler};
//! use switchboard_fabric::Node;
//!
//! # async fn example(meta: Meta) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ProtoRegistry::from_meta(&meta)?);
//!
//! // Server
//! let server = Node::new(registry.clone());
//! server.register_handler(ServiceHandler::new("hello_world.HelloService").unary(
//!     "Hello",
//!     |name: String, _ctx| async move { Ok::<_, StatusError>(format!("Hello, {name}")) },
//! ))?;
//! let listener = TcpConnectionListener::bind("127.0.0.1:8080".parse()?).await?;
//! tokio::spawn(async move { server.serve(listener).await });
//!
//! // Client
//! let client = Node::new(registry);
//! let session = client.connect(TcpConnection::connect("127.0.0.1:8080".parse()?).await?);
//! let hello = ServiceClient::new(&session, "hello_world.HelloService")?;
//! let greeting: String = hello.unary("Hello", &"world".to_string()).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod connection;
pub mod error;
pub mod exchange;
pub mod node;
pub mod request;
pub mod rpc;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use channel::{channel, ChannelResult, Receiver, Sender};
pub use error::{Error, Result};
pub use exchange::{Exchange, ExchangeChannel, ExchangeState};
pub use node::Node;
pub use rpc::{CallContext, CallOptions, ProtoRegistry, ServiceClient, ServiceHandler};
pub use session::{Role, Session, SessionConfig};
pub use transport::{Transport, TransportMessage};
