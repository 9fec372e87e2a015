use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::connection::{Connection, ConnectionListener};
use crate::error::Result;
use crate::rpc::{ProtoRegistry, Registration, ServiceHandler, ServiceHandlerDispatch};
use crate::session::{Role, Session, SessionConfig};
use crate::transport::Transport;

/// Process-level scope: one registry, the root handler table and the
/// settings every session starts with.
#[derive(Clone)]
pub struct Node {
    registry: Arc<ProtoRegistry>,
    dispatch: Arc<ServiceHandlerDispatch>,
    config: SessionConfig,
}

impl Node {
    pub fn new(registry: Arc<ProtoRegistry>) -> Self {
        Self {
            dispatch: ServiceHandlerDispatch::new(registry.clone()),
            registry,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ProtoRegistry> {
        &self.registry
    }

    pub fn dispatch(&self) -> &Arc<ServiceHandlerDispatch> {
        &self.dispatch
    }

    /// Serve `handler` on every session of this node.
    pub fn register_handler<C: Codec>(&self, handler: ServiceHandler<C>) -> Result<Registration> {
        self.dispatch.register_handler(handler)
    }

    /// Start a session on a connection this side opened.
    pub fn connect(&self, connection: impl Connection) -> Session {
        self.session(connection, Role::Initiator)
    }

    /// Start a session on a connection this side accepted.
    pub fn accept(&self, connection: impl Connection) -> Session {
        self.session(connection, Role::Acceptor)
    }

    /// Accept connections forever, starting a session for each.
    ///
    /// Failed accepts are logged and skipped.
    pub async fn serve<L: ConnectionListener>(&self, listener: L) {
        loop {
            match listener.accept().await {
                Ok(connection) => {
                    let session = self.accept(connection);
                    debug!(session = %session.label(), "accepted session");
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
    }

    fn session(&self, connection: impl Connection, role: Role) -> Session {
        Session::new(
            Transport::new(connection),
            role,
            &self.dispatch,
            self.config.clone(),
        )
    }
}
