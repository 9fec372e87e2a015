use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use switchboard_core::StatusError;

use crate::channel::{forward, take_one, try_map, Receiver};
use crate::codec::{BincodeCodec, Codec};
use crate::exchange::ExchangeChannel;
use crate::rpc::dispatch::{CallContext, Callable};
use crate::rpc::registry::MethodKind;
use crate::rpc::{decode_payload, encode_payload};

pub(crate) struct MethodHandler {
    pub(crate) name: String,
    pub(crate) kind: MethodKind,
    pub(crate) callable: Callable,
}

/// Typed implementation of some or all methods of one service.
///
/// ```no_run
/// use switchboard_fabric::rpc::ServiceHandler;
/// use switchboard_core::StatusError;
///
/// let handler = ServiceHandler::new("hello_world.HelloService").unary(
///     "Hello",
///     |name: String, _ctx| async move { Ok::<_, StatusError>(format!("Hello, {name}")) },
/// );
/// ```
pub struct ServiceHandler<C = BincodeCodec> {
    service: String,
    codec: C,
    methods: Vec<MethodHandler>,
}

impl ServiceHandler<BincodeCodec> {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_codec(service, BincodeCodec)
    }
}

impl<C: Codec> ServiceHandler<C> {
    pub fn with_codec(service: impl Into<String>, codec: C) -> Self {
        Self {
            service: service.into(),
            codec,
            methods: Vec::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn into_methods(self) -> Vec<MethodHandler> {
        self.methods
    }

    /// One request, one response.
    pub fn unary<Req, Res, F, Fut>(self, method: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, StatusError>> + Send + 'static,
    {
        let codec = self.codec.clone();
        let handler = Arc::new(handler);
        self.add(method, MethodKind::Unary, move |channel, context| {
            let codec = codec.clone();
            let handler = handler.clone();
            Box::pin(async move {
                let ExchangeChannel { sender, receiver } = channel;
                let outcome = async {
                    let bytes = take_one(receiver).await?;
                    let request: Req = decode_payload(&codec, &bytes)?;
                    let response = (*handler)(request, context).await?;
                    encode_payload(&codec, &response)
                }
                .await;
                match outcome {
                    Ok(bytes) => {
                        let _ = sender.send_and_close(bytes);
                    }
                    Err(err) => sender.fail(err),
                }
            })
        })
    }

    /// A stream of requests, one response.
    pub fn client_streaming<Req, Res, F, Fut>(self, method: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Receiver<Req>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, StatusError>> + Send + 'static,
    {
        let codec = self.codec.clone();
        let handler = Arc::new(handler);
        self.add(method, MethodKind::ClientStreaming, move |channel, context| {
            let codec = codec.clone();
            let handler = handler.clone();
            Box::pin(async move {
                let ExchangeChannel { sender, receiver } = channel;
                let requests = decode_stream::<C, Req>(codec.clone(), receiver);
                let outcome = async {
                    let response = (*handler)(requests, context).await?;
                    encode_payload(&codec, &response)
                }
                .await;
                match outcome {
                    Ok(bytes) => {
                        let _ = sender.send_and_close(bytes);
                    }
                    Err(err) => sender.fail(err),
                }
            })
        })
    }

    /// One request, a stream of responses.
    pub fn server_streaming<Req, Res, F, Fut>(self, method: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Receiver<Res>, StatusError>> + Send + 'static,
    {
        let codec = self.codec.clone();
        let handler = Arc::new(handler);
        self.add(method, MethodKind::ServerStreaming, move |channel, context| {
            let codec = codec.clone();
            let handler = handler.clone();
            Box::pin(async move {
                let ExchangeChannel { sender, receiver } = channel;
                let outcome = async {
                    let bytes = take_one(receiver).await?;
                    let request: Req = decode_payload(&codec, &bytes)?;
                    (*handler)(request, context).await
                }
                .await;
                match outcome {
                    Ok(responses) => {
                        let _ = forward(encode_stream(codec, responses), sender).await;
                    }
                    Err(err) => sender.fail(err),
                }
            })
        })
    }

    /// Streams in both directions.
    pub fn bidi_streaming<Req, Res, F, Fut>(self, method: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Receiver<Req>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Receiver<Res>, StatusError>> + Send + 'static,
    {
        let codec = self.codec.clone();
        let handler = Arc::new(handler);
        self.add(method, MethodKind::BidiStreaming, move |channel, context| {
            let codec = codec.clone();
            let handler = handler.clone();
            Box::pin(async move {
                let ExchangeChannel { sender, receiver } = channel;
                let requests = decode_stream::<C, Req>(codec.clone(), receiver);
                match (*handler)(requests, context).await {
                    Ok(responses) => {
                        let _ = forward(encode_stream(codec, responses), sender).await;
                    }
                    Err(err) => sender.fail(err),
                }
            })
        })
    }

    fn add<F>(mut self, method: &str, kind: MethodKind, callable: F) -> Self
    where
        F: Fn(ExchangeChannel, CallContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.methods.push(MethodHandler {
            name: method.to_string(),
            kind,
            callable: Arc::new(callable),
        });
        self
    }
}

pub(crate) fn decode_stream<C, T>(codec: C, bytes: Receiver<Vec<u8>>) -> Receiver<T>
where
    C: Codec,
    T: DeserializeOwned + Send + 'static,
{
    try_map(bytes, move |payload: Vec<u8>| decode_payload::<C, T>(&codec, &payload))
}

pub(crate) fn encode_stream<C, T>(codec: C, values: Receiver<T>) -> Receiver<Vec<u8>>
where
    C: Codec,
    T: Serialize + Send + 'static,
{
    try_map(values, move |value: T| encode_payload(&codec, &value))
}
