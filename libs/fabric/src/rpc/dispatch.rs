use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use switchboard_core::StatusError;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::exchange::{Exchange, ExchangeChannel};
use crate::rpc::handler::ServiceHandler;
use crate::rpc::registry::{MethodDescriptor, ProtoRegistry};
use crate::session::Session;

/// Type-erased handler: consumes the exchange's channels until the call is
/// answered.
pub(crate) type Callable =
    Arc<dyn Fn(ExchangeChannel, CallContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// What a handler knows about the call it serves.
#[derive(Clone)]
pub struct CallContext {
    exchange_id: u64,
    method: String,
    auth: Option<String>,
    session: Option<Session>,
}

impl CallContext {
    pub fn new(exchange: &Exchange, session: Option<Session>) -> Self {
        Self {
            exchange_id: exchange.id(),
            method: exchange.exchange_type().to_string(),
            auth: exchange.auth().map(str::to_string),
            session,
        }
    }

    pub fn exchange_id(&self) -> u64 {
        self.exchange_id
    }

    /// Full name of the called method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Token the caller announced, if any.
    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    /// The session the call arrived on. Handlers may use it to call back.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("exchange_id", &self.exchange_id)
            .field("method", &self.method)
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

struct HandlerEntry {
    id: u64,
    callable: Callable,
}

struct MethodEntry {
    method: Arc<MethodDescriptor>,
    /// Most recently registered first.
    handlers: Vec<HandlerEntry>,
}

/// Method name to handler table, optionally falling back to a parent table.
pub struct ServiceHandlerDispatch {
    registry: Arc<ProtoRegistry>,
    parent: Option<Arc<ServiceHandlerDispatch>>,
    vtable: Mutex<HashMap<String, MethodEntry>>,
    next_handler_id: AtomicU64,
}

impl ServiceHandlerDispatch {
    pub fn new(registry: Arc<ProtoRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            parent: None,
            vtable: Mutex::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
        })
    }

    /// An empty table sharing the parent's registry and deferring to it for
    /// methods it has no handler for.
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            registry: parent.registry.clone(),
            parent: Some(parent.clone()),
            vtable: Mutex::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
        })
    }

    pub fn registry(&self) -> &Arc<ProtoRegistry> {
        &self.registry
    }

    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Whether a call to `method` would find a handler here or in a parent.
    pub fn has_handler(&self, method: &str) -> bool {
        self.resolve(method).is_some()
    }

    /// Register every method of `handler`, on top of existing handlers for
    /// the same methods.
    ///
    /// Fails without registering anything if the service or one of the
    /// methods is unknown, or a method is implemented with the wrong
    /// streaming shape.
    pub fn register_handler<C: Codec>(self: &Arc<Self>, handler: ServiceHandler<C>) -> Result<Registration> {
        let service_name = handler.service().to_string();
        let service = self
            .registry
            .lookup_service(&service_name)
            .ok_or_else(|| Error::Registry(format!("unknown service {service_name}")))?;

        let mut resolved = Vec::new();
        for method in handler.into_methods() {
            let descriptor = service.method(&method.name).ok_or_else(|| {
                Error::Registry(format!("{service_name} has no method {}", method.name))
            })?;
            if descriptor.kind() != method.kind {
                return Err(Error::Registry(format!(
                    "{} is {:?} but the handler is {:?}",
                    descriptor.full_name,
                    descriptor.kind(),
                    method.kind
                )));
            }
            resolved.push((descriptor, method.callable));
        }

        let mut entries = Vec::with_capacity(resolved.len());
        {
            let mut vtable = self.vtable.lock();
            for (descriptor, callable) in resolved {
                let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
                vtable
                    .entry(descriptor.full_name.clone())
                    .or_insert_with(|| MethodEntry {
                        method: descriptor.clone(),
                        handlers: Vec::new(),
                    })
                    .handlers
                    .insert(0, HandlerEntry { id, callable });
                entries.push((descriptor.full_name.clone(), id));
            }
        }
        debug!(service = %service_name, methods = entries.len(), "registered handler");

        Ok(Registration {
            dispatch: Arc::downgrade(self),
            entries,
            active: AtomicBool::new(true),
        })
    }

    /// Run the handler for `exchange` and wait for it to return.
    ///
    /// Without a handler the exchange fails with `Unimplemented`; a panicking
    /// handler fails it with `Internal`.
    pub async fn dispatch(&self, exchange: Exchange, context: CallContext) {
        let method = exchange.exchange_type().to_string();
        let Some(callable) = self.resolve(&method) else {
            debug!(method = %method, "no handler");
            exchange.close(Some(StatusError::unimplemented(format!(
                "{method} has no registered handler"
            ))));
            return;
        };
        let Some(channel) = exchange.take_channel() else {
            warn!(exchange_id = exchange.id(), "exchange channels already taken");
            return;
        };

        let task = tokio::spawn(callable(channel, context));
        if let Err(err) = task.await {
            warn!(method = %method, error = %err, "handler task failed");
            let status = if err.is_panic() {
                StatusError::internal(format!("handler for {method} panicked"))
            } else {
                StatusError::cancelled(format!("handler for {method} was cancelled"))
            };
            exchange.close(Some(status));
        }
    }

    fn resolve(&self, method: &str) -> Option<Callable> {
        let local = self
            .vtable
            .lock()
            .get(method)
            .and_then(|entry| entry.handlers.first())
            .map(|handler| handler.callable.clone());
        match local {
            Some(callable) => Some(callable),
            None => self.parent.as_ref().and_then(|parent| parent.resolve(method)),
        }
    }

    fn remove(&self, entries: &[(String, u64)]) {
        let mut vtable = self.vtable.lock();
        for (method, id) in entries {
            if let Some(entry) = vtable.get_mut(method) {
                entry.handlers.retain(|h| h.id != *id);
                if entry.handlers.is_empty() {
                    debug!(method = %entry.method.full_name, "last handler removed");
                    vtable.remove(method);
                }
            }
        }
    }
}

/// Proof of a handler registration.
pub struct Registration {
    dispatch: Weak<ServiceHandlerDispatch>,
    entries: Vec<(String, u64)>,
    active: AtomicBool,
}

impl Registration {
    /// Remove the handlers this registration added, exposing whatever was
    /// registered before them. Only the first call has an effect.
    pub fn unregister(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(dispatch) = self.dispatch.upgrade() {
            dispatch.remove(&self.entries);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("methods", &self.entries.iter().map(|(m, _)| m).collect::<Vec<_>>())
            .field("active", &self.is_active())
            .finish()
    }
}
