use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use switchboard_core::StatusError;
use tracing::debug;

use crate::channel::{forward, take_one, ChannelResult, Receiver};
use crate::codec::{BincodeCodec, Codec};
use crate::exchange::{Exchange, ExchangeChannel};
use crate::rpc::handler::{decode_stream, encode_stream};
use crate::rpc::registry::{MethodDescriptor, MethodKind, ServiceDescriptor};
use crate::rpc::{decode_payload, encode_payload};
use crate::session::Session;

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    auth: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with `DeadlineExceeded` if it has not completed in time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Token announced instead of the session's configured one.
    pub fn auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }
}

/// Typed calls to one service over a session.
#[derive(Clone)]
pub struct ServiceClient<C = BincodeCodec> {
    session: Session,
    service: Arc<ServiceDescriptor>,
    codec: C,
    options: CallOptions,
}

impl ServiceClient<BincodeCodec> {
    /// Resolve `service` in the session's registry.
    pub fn new(session: &Session, service: &str) -> Result<Self, StatusError> {
        Self::with_codec(session, service, BincodeCodec)
    }
}

impl<C: Codec> ServiceClient<C> {
    pub fn with_codec(session: &Session, service: &str, codec: C) -> Result<Self, StatusError> {
        let service = session
            .registry()
            .lookup_service(service)
            .ok_or_else(|| StatusError::not_found(format!("unknown service {service}")))?;
        Ok(Self {
            session: session.clone(),
            service,
            codec,
            options: CallOptions::default(),
        })
    }

    /// Options applied to every call made through this client.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub async fn unary<Req, Res>(&self, method: &str, request: &Req) -> Result<Res, StatusError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let method = self.method(method, MethodKind::Unary)?;
        call_unary(&self.session, &method, request, &self.codec, &self.options).await
    }

    pub async fn client_streaming<Req, Res>(
        &self,
        method: &str,
        requests: Receiver<Req>,
    ) -> Result<Res, StatusError>
    where
        Req: Serialize + Send + 'static,
        Res: DeserializeOwned,
    {
        let method = self.method(method, MethodKind::ClientStreaming)?;
        let (exchange, channel) = open(&self.session, &method, None, &self.options)?;
        // The peer may only answer once the request stream started.
        channel.sender.open();
        forward(encode_stream(self.codec.clone(), requests), channel.sender);
        let bytes = with_deadline(&exchange, self.options.timeout, take_one(channel.receiver)).await?;
        decode_payload(&self.codec, &bytes)
    }

    pub async fn server_streaming<Req, Res>(
        &self,
        method: &str,
        request: &Req,
    ) -> Result<Receiver<Res>, StatusError>
    where
        Req: Serialize,
        Res: DeserializeOwned + Send + 'static,
    {
        let method = self.method(method, MethodKind::ServerStreaming)?;
        let payload = encode_payload(&self.codec, request)?;
        let (exchange, channel) = open(&self.session, &method, Some(payload), &self.options)?;
        arm_deadline(&exchange, self.options.timeout);
        Ok(decode_stream(self.codec.clone(), channel.receiver))
    }

    pub fn bidi_streaming<Req, Res>(
        &self,
        method: &str,
        requests: Receiver<Req>,
    ) -> Result<Receiver<Res>, StatusError>
    where
        Req: Serialize + Send + 'static,
        Res: DeserializeOwned + Send + 'static,
    {
        let method = self.method(method, MethodKind::BidiStreaming)?;
        let (exchange, channel) = open(&self.session, &method, None, &self.options)?;
        channel.sender.open();
        forward(encode_stream(self.codec.clone(), requests), channel.sender);
        arm_deadline(&exchange, self.options.timeout);
        Ok(decode_stream(self.codec.clone(), channel.receiver))
    }

    fn method(&self, name: &str, kind: MethodKind) -> Result<Arc<MethodDescriptor>, StatusError> {
        let method = self.service.method(name).ok_or_else(|| {
            StatusError::unimplemented(format!("{} has no method {name}", self.service.full_name))
        })?;
        if method.kind() != kind {
            return Err(StatusError::failed_precondition(format!(
                "{} is {:?}, not {:?}",
                method.full_name,
                method.kind(),
                kind
            )));
        }
        Ok(method)
    }
}

/// Perform one unary call of `method` over `session`.
pub async fn call_unary<C, Req, Res>(
    session: &Session,
    method: &MethodDescriptor,
    request: &Req,
    codec: &C,
    options: &CallOptions,
) -> Result<Res, StatusError>
where
    C: Codec,
    Req: Serialize,
    Res: DeserializeOwned,
{
    let payload = encode_payload(codec, request)?;
    let (exchange, channel) = open(session, method, Some(payload), options)?;
    let bytes = with_deadline(&exchange, options.timeout, take_one(channel.receiver)).await?;
    decode_payload(codec, &bytes)
}

fn open(
    session: &Session,
    method: &MethodDescriptor,
    initial: Option<Vec<u8>>,
    options: &CallOptions,
) -> Result<(Exchange, ExchangeChannel), StatusError> {
    let exchange =
        session.create_exchange_with_auth(&method.full_name, initial, options.auth.clone())?;
    let channel = exchange
        .take_channel()
        .ok_or_else(|| StatusError::internal("exchange channels already taken"))?;
    Ok((exchange, channel))
}

fn deadline_error(exchange: &Exchange, timeout: Duration) -> StatusError {
    StatusError::deadline_exceeded(format!(
        "{} did not complete within {timeout:?}",
        exchange.exchange_type()
    ))
}

async fn with_deadline<T>(
    exchange: &Exchange,
    timeout: Option<Duration>,
    call: impl Future<Output = ChannelResult<T>>,
) -> ChannelResult<T> {
    let Some(limit) = timeout else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            let err = deadline_error(exchange, limit);
            debug!(exchange_id = exchange.id(), "call deadline exceeded");
            exchange.close(Some(err.clone()));
            Err(err)
        }
    }
}

fn arm_deadline(exchange: &Exchange, timeout: Option<Duration>) {
    let Some(limit) = timeout else {
        return;
    };
    let exchange = exchange.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(limit) => {
                debug!(exchange_id = exchange.id(), "stream deadline exceeded");
                exchange.close(Some(deadline_error(&exchange, limit)));
            }
            _ = exchange.completed() => {}
        }
    });
}
