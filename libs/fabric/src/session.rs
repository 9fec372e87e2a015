//! Exchange multiplexing over one transport
//!
//! A session owns a transport and routes its frames to exchanges by id. Each
//! side allocates ids from its own half of the id space, so both can open
//! exchanges at the same time without coordination.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use switchboard_core::StatusError;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::channel::{Receiver, Sender};
use crate::error::{Error, Result};
use crate::exchange::Exchange;
use crate::rpc::{CallContext, ProtoRegistry, ServiceHandlerDispatch};
use crate::transport::{Transport, TransportMessage};

/// Which end of the connection a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection; allocates odd exchange ids.
    Initiator,
    /// Accepted the connection; allocates even exchange ids.
    Acceptor,
}

impl Role {
    fn first_id(self) -> u64 {
        match self {
            Role::Initiator => 1,
            Role::Acceptor => 2,
        }
    }

    /// Whether this side allocates `id`.
    pub fn owns(self, id: u64) -> bool {
        match self {
            Role::Initiator => id % 2 == 1,
            Role::Acceptor => id % 2 == 0,
        }
    }
}

/// Decides whether an incoming call may run. An error is sent back to the
/// caller instead of dispatching.
pub type Authorizer = Arc<dyn Fn(&CallContext) -> std::result::Result<(), StatusError> + Send + Sync>;

/// Per-session settings.
#[derive(Clone, Default)]
pub struct SessionConfig {
    auth_token: Option<String>,
    authorizer: Option<Authorizer>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token announced on every exchange this side opens.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Check applied to every exchange the peer opens.
    pub fn authorizer<F>(mut self, authorizer: F) -> Self
    where
        F: Fn(&CallContext) -> std::result::Result<(), StatusError> + Send + Sync + 'static,
    {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("authorizer", &self.authorizer.is_some())
            .finish()
    }
}

struct Ids {
    next_own: u64,
    highest_peer: u64,
}

struct SessionInner {
    role: Role,
    label: String,
    wire: Sender<TransportMessage>,
    dispatch: Arc<ServiceHandlerDispatch>,
    config: SessionConfig,
    exchanges: Mutex<HashMap<u64, Exchange>>,
    ids: Mutex<Ids>,
    closed: watch::Sender<Option<StatusError>>,
}

/// Handle to a running session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session on `transport`.
    ///
    /// Incoming calls are dispatched through a fresh child of `dispatch`, so
    /// handlers registered on [`Session::dispatch`] only serve this peer.
    pub fn new(
        transport: Transport,
        role: Role,
        dispatch: &Arc<ServiceHandlerDispatch>,
        config: SessionConfig,
    ) -> Self {
        let label = transport.label().to_string();
        let (wire, receiver) = transport.into_parts();
        let (closed, _) = watch::channel(None);
        let inner = Arc::new(SessionInner {
            role,
            label,
            wire,
            dispatch: ServiceHandlerDispatch::child(dispatch),
            config,
            exchanges: Mutex::new(HashMap::new()),
            ids: Mutex::new(Ids {
                next_own: role.first_id(),
                highest_peer: 0,
            }),
            closed,
        });
        debug!(session = %inner.label, role = ?role, "session started");
        tokio::spawn(inbound_loop(inner.clone(), receiver));
        Session { inner }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Session-local handler table, backed by the node's.
    pub fn dispatch(&self) -> &Arc<ServiceHandlerDispatch> {
        &self.inner.dispatch
    }

    pub fn registry(&self) -> &Arc<ProtoRegistry> {
        self.inner.dispatch.registry()
    }

    /// Open a new exchange to the peer, announcing the configured auth token.
    pub fn create_exchange(&self, exchange_type: &str, initial: Option<Vec<u8>>) -> Result<Exchange> {
        self.create_exchange_with_auth(exchange_type, initial, None)
    }

    /// Open a new exchange with an explicit auth token, falling back to the
    /// configured one.
    pub fn create_exchange_with_auth(
        &self,
        exchange_type: &str,
        initial: Option<Vec<u8>>,
        auth: Option<String>,
    ) -> Result<Exchange> {
        if let Some(err) = self.closed_status() {
            return Err(Error::Status(err));
        }
        let id = {
            let mut ids = self.inner.ids.lock();
            let id = ids.next_own;
            ids.next_own += 2;
            id
        };
        let auth = auth.or_else(|| self.inner.config.auth_token.clone());
        let exchange =
            Exchange::prepare_outbound(id, exchange_type, auth, self.inner.wire.clone(), initial);
        // Routable before the opening frame can reach the peer.
        self.inner.register(&exchange);
        // The session may have failed while the exchange was being set up.
        if let Some(err) = self.closed_status() {
            exchange.abort(err);
        }
        exchange.start();
        trace!(session = %self.inner.label, exchange_id = id, exchange_type, "opened exchange");
        Ok(exchange)
    }

    /// Number of live exchanges.
    pub fn exchange_count(&self) -> usize {
        self.inner.exchanges.lock().len()
    }

    pub fn has_exchange(&self, id: u64) -> bool {
        self.inner.exchanges.lock().contains_key(&id)
    }

    /// Close the session, cancelling live exchanges. Frames already queued
    /// are still written before the connection shuts down.
    pub fn close(&self) {
        let err = StatusError::cancelled("session closed");
        if self.inner.mark_closed(&err) {
            self.inner.abort_all(&err);
            self.inner.wire.close();
        }
    }

    /// Why the session ended, or `None` while it runs.
    pub fn closed_status(&self) -> Option<StatusError> {
        self.inner.closed.borrow().clone()
    }

    /// Wait for the session to end.
    pub async fn closed(&self) -> StatusError {
        let mut rx = self.inner.closed.subscribe();
        loop {
            if let Some(err) = rx.borrow_and_update().clone() {
                return err;
            }
            if rx.changed().await.is_err() {
                return StatusError::cancelled("session dropped");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.inner.label)
            .field("role", &self.inner.role)
            .field("exchanges", &self.exchange_count())
            .finish()
    }
}

async fn inbound_loop(inner: Arc<SessionInner>, mut receiver: Receiver<TransportMessage>) {
    while let Some(item) = receiver.recv().await {
        let message = match item {
            Ok(message) => message,
            Err(err) => {
                inner.fail(err);
                return;
            }
        };
        if let Err(err) = inner.route(message) {
            warn!(session = %inner.label, error = %err, "protocol violation");
            inner.fail(err);
            return;
        }
    }
    inner.fail(StatusError::unavailable("session closed"));
}

impl SessionInner {
    fn route(self: &Arc<Self>, message: TransportMessage) -> std::result::Result<(), StatusError> {
        let id = message.header.exchange_id;
        if id == 0 {
            return Err(StatusError::invalid_argument("invalid exchange id 0"));
        }

        let existing = self.exchanges.lock().get(&id).cloned();
        if let Some(exchange) = existing {
            exchange.process_wire_message(message);
            return Ok(());
        }

        if message.header.exchange_type.is_some() {
            if self.role.owns(id) {
                return Err(StatusError::invalid_argument(format!(
                    "peer opened exchange {id} from our id space"
                )));
            }
            {
                let mut ids = self.ids.lock();
                ids.highest_peer = ids.highest_peer.max(id);
            }
            self.accept(message);
            return Ok(());
        }

        if self.was_allocated(id) {
            trace!(session = %self.label, exchange_id = id, "dropping frame for finished exchange");
            return Ok(());
        }

        Err(match message.error_status() {
            Some(err) => StatusError::new(
                err.code,
                format!("error for unknown exchange {id}: {}", err.message),
            ),
            None => StatusError::invalid_argument(format!(
                "frame for unknown exchange {id} without exchange type"
            )),
        })
    }

    fn was_allocated(&self, id: u64) -> bool {
        let ids = self.ids.lock();
        if self.role.owns(id) {
            id < ids.next_own
        } else {
            id <= ids.highest_peer
        }
    }

    fn accept(self: &Arc<Self>, message: TransportMessage) {
        let exchange = Exchange::inbound(message, self.wire.clone());
        self.register(&exchange);

        let session = Session {
            inner: self.clone(),
        };
        let context = CallContext::new(&exchange, Some(session));
        if let Some(authorizer) = &self.config.authorizer {
            if let Err(err) = authorizer(&context) {
                debug!(session = %self.label, exchange_id = exchange.id(), error = %err, "call rejected");
                exchange.close(Some(err));
                return;
            }
        }

        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            dispatch.dispatch(exchange, context).await;
        });
    }

    fn register(self: &Arc<Self>, exchange: &Exchange) {
        let id = exchange.id();
        let serial = exchange.serial();
        self.exchanges.lock().insert(id, exchange.clone());

        let session: Weak<SessionInner> = Arc::downgrade(self);
        exchange.on_complete(move |_| {
            if let Some(session) = session.upgrade() {
                let mut exchanges = session.exchanges.lock();
                if exchanges.get(&id).is_some_and(|e| e.serial() == serial) {
                    exchanges.remove(&id);
                }
            }
        });
    }

    /// Record the terminal status. Returns false if it was already set.
    fn mark_closed(&self, err: &StatusError) -> bool {
        self.closed.send_if_modified(|status| {
            if status.is_some() {
                return false;
            }
            *status = Some(err.clone());
            true
        })
    }

    fn abort_all(&self, err: &StatusError) {
        let exchanges: Vec<Exchange> = self.exchanges.lock().drain().map(|(_, e)| e).collect();
        for exchange in exchanges {
            exchange.abort(err.clone());
        }
    }

    fn fail(&self, err: StatusError) {
        if !self.mark_closed(&err) {
            return;
        }
        debug!(session = %self.label, error = %err, "session ended");
        self.abort_all(&err);
        self.wire.fail(err);
    }
}
