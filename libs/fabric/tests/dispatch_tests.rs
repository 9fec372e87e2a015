mod common;

use std::time::Duration;

use futures_util::stream;
use switchboard_core::{Code, StatusError};
use switchboard_fabric::channel::{channel, map, Receiver};
use switchboard_fabric::codec::BincodeCodec;
use switchboard_fabric::connection::TcpConnectionListener;
use switchboard_fabric::error::Error;
use switchboard_fabric::request::request_tcp;
use switchboard_fabric::{CallContext, CallOptions, Node, ServiceClient, ServiceHandler, SessionConfig};

use common::{
    eventually, hello_registry, request, session_pair, session_pair_with, within, HelloReply,
    HelloRequest, SERVICE,
};

fn greeter(greeting: &'static str) -> ServiceHandler {
    ServiceHandler::new(SERVICE).unary("Hello", move |req: HelloRequest, _ctx| async move {
        Ok(HelloReply {
            body: format!("{greeting}, {}", req.body),
        })
    })
}

async fn echo(req: HelloRequest, _ctx: CallContext) -> Result<HelloReply, StatusError> {
    Ok(HelloReply { body: req.body })
}

async fn hello(client: &ServiceClient, body: &str) -> Result<HelloReply, StatusError> {
    within(client.unary("Hello", &request(body))).await
}

async fn collect<T>(mut rx: Receiver<T>) -> Result<Vec<T>, StatusError> {
    let mut values = Vec::new();
    while let Some(item) = within(rx.recv()).await {
        values.push(item?);
    }
    Ok(values)
}

#[tokio::test]
async fn unary_hello_round_trip() {
    let pair = session_pair();
    pair.server_node.register_handler(greeter("Hello")).unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let reply = hello(&client, "hi").await.unwrap();
    assert_eq!(reply.body, "Hello, hi");

    eventually(|| pair.client.exchange_count() == 0 && pair.server.exchange_count() == 0).await;
}

#[tokio::test]
async fn concurrent_calls_share_one_session() {
    let pair = session_pair();
    pair.server_node.register_handler(greeter("Hello")).unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let calls: Vec<_> = (0..20)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { hello(&client, &i.to_string()).await })
        })
        .collect();
    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap().body, format!("Hello, {i}"));
    }
}

#[tokio::test]
async fn latest_registration_wins_until_unregistered() {
    let pair = session_pair();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();
    let first = pair.server_node.register_handler(greeter("Hi")).unwrap();
    let second = pair.server_node.register_handler(greeter("Howdy")).unwrap();

    assert_eq!(hello(&client, "a").await.unwrap().body, "Howdy, a");

    second.unregister();
    assert_eq!(hello(&client, "b").await.unwrap().body, "Hi, b");

    // A second unregister must not remove the other handler.
    second.unregister();
    assert!(!second.is_active());
    assert_eq!(hello(&client, "c").await.unwrap().body, "Hi, c");

    first.unregister();
    let err = hello(&client, "d").await.unwrap_err();
    assert_eq!(err.code, Code::Unimplemented);
    assert_eq!(
        err.message,
        "hello_world.HelloService.Hello has no registered handler"
    );
}

#[tokio::test]
async fn session_handlers_override_node_handlers() {
    let pair = session_pair();
    pair.server_node.register_handler(greeter("Node")).unwrap();
    let local = pair
        .server
        .dispatch()
        .register_handler(greeter("Session"))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    assert_eq!(hello(&client, "x").await.unwrap().body, "Session, x");
    local.unregister();
    assert_eq!(hello(&client, "x").await.unwrap().body, "Node, x");
}

#[tokio::test]
async fn registration_is_checked_against_the_registry() {
    let node = Node::new(hello_registry());

    let unknown_service = ServiceHandler::new("hello_world.Nope");
    assert!(matches!(
        node.register_handler(unknown_service),
        Err(Error::Registry(_))
    ));

    let unknown_method = ServiceHandler::new(SERVICE).unary("Goodbye", echo);
    assert!(matches!(
        node.register_handler(unknown_method),
        Err(Error::Registry(_))
    ));

    let wrong_kind = ServiceHandler::new(SERVICE).unary("Count", echo);
    assert!(matches!(
        node.register_handler(wrong_kind),
        Err(Error::Registry(msg)) if msg.contains("ServerStreaming")
    ));

    let snake_case = ServiceHandler::new(SERVICE).unary("hello", echo);
    assert!(node.register_handler(snake_case).is_ok());
    assert!(node.dispatch().has_handler("hello_world.HelloService.Hello"));
}

#[tokio::test]
async fn client_rejects_unknown_or_mismatched_methods() {
    let pair = session_pair();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let err = client
        .unary::<_, HelloReply>("Goodbye", &request("x"))
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::Unimplemented);

    let err = client
        .unary::<_, HelloReply>("Count", &request("x"))
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::FailedPrecondition);

    assert_eq!(
        ServiceClient::new(&pair.client, "hello_world.Nope").err().map(|e| e.code),
        Some(Code::NotFound)
    );
}

#[tokio::test]
async fn server_streaming_delivers_every_reply() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).server_streaming(
            "Count",
            |req: HelloRequest, _ctx| async move {
                let n: u32 = req
                    .body
                    .parse()
                    .map_err(|_| StatusError::invalid_argument("not a number"))?;
                let (tx, rx) = channel();
                for i in 0..n {
                    let _ = tx.send(HelloReply { body: i.to_string() });
                }
                tx.close();
                Ok(rx)
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let replies: Receiver<HelloReply> = client.server_streaming("Count", &request("3")).await.unwrap();
    let bodies: Vec<String> = collect(replies).await.unwrap().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec!["0", "1", "2"]);

    let replies: Receiver<HelloReply> = client.server_streaming("Count", &request("zero")).await.unwrap();
    assert_eq!(collect(replies).await.unwrap_err().code, Code::InvalidArgument);

    let empty: Receiver<HelloReply> = client.server_streaming("Count", &request("0")).await.unwrap();
    assert!(collect(empty).await.unwrap().is_empty());
}

#[tokio::test]
async fn server_streaming_accepts_any_stream() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).server_streaming(
            "Count",
            |_req: HelloRequest, _ctx| async move {
                let replies = ["a", "b"].map(|body| {
                    Ok::<_, StatusError>(HelloReply {
                        body: body.to_string(),
                    })
                });
                Ok(Receiver::from_stream(stream::iter(replies)))
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let replies: Receiver<HelloReply> = client.server_streaming("Count", &request("")).await.unwrap();
    assert_eq!(collect(replies).await.unwrap().len(), 2);
}

#[tokio::test]
async fn server_stream_ends_when_its_producer_goes_away() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).server_streaming(
            "Count",
            |_req: HelloRequest, _ctx| async move {
                let (tx, rx) = channel();
                tokio::spawn(async move {
                    let _ = tx.send(HelloReply {
                        body: "0".to_string(),
                    });
                });
                Ok(rx)
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let mut replies: Receiver<HelloReply> =
        client.server_streaming("Count", &request("")).await.unwrap();
    assert_eq!(within(replies.recv()).await.unwrap().unwrap().body, "0");
    assert_eq!(within(replies.recv()).await, None);

    eventually(|| pair.client.exchange_count() == 0 && pair.server.exchange_count() == 0).await;
}

#[tokio::test]
async fn client_streaming_folds_requests() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).client_streaming(
            "Join",
            |mut requests: Receiver<HelloRequest>, _ctx| async move {
                let mut parts = Vec::new();
                while let Some(req) = requests.recv().await {
                    parts.push(req?.body);
                }
                Ok(HelloReply {
                    body: parts.join(","),
                })
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let (tx, rx) = channel();
    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.client_streaming::<_, HelloReply>("Join", rx).await })
    };
    tx.send(request("a")).unwrap();
    tx.send(request("b")).unwrap();
    tx.send_and_close(request("c")).unwrap();

    assert_eq!(within(call).await.unwrap().unwrap().body, "a,b,c");

    let (tx, rx) = channel::<HelloRequest>();
    tx.close();
    let reply: HelloReply = within(client.client_streaming("Join", rx)).await.unwrap();
    assert_eq!(reply.body, "");
}

#[tokio::test]
async fn bidi_streaming_answers_as_requests_arrive() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).bidi_streaming(
            "Shout",
            |requests: Receiver<HelloRequest>, _ctx| async move {
                Ok(map(requests, |req| HelloReply {
                    body: req.body.to_uppercase(),
                }))
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let (tx, rx) = channel();
    let mut replies: Receiver<HelloReply> = client.bidi_streaming("Shout", rx).unwrap();

    tx.send(request("hey")).unwrap();
    assert_eq!(within(replies.recv()).await.unwrap().unwrap().body, "HEY");
    tx.send(request("you")).unwrap();
    assert_eq!(within(replies.recv()).await.unwrap().unwrap().body, "YOU");

    tx.close();
    assert_eq!(within(replies.recv()).await, None);
}

#[tokio::test]
async fn handler_errors_reach_the_caller() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).unary(
            "Hello",
            |req: HelloRequest, _ctx| async move {
                Err::<HelloReply, _>(StatusError::not_found(format!("no {}", req.body)))
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let err = hello(&client, "bob").await.unwrap_err();
    assert_eq!(err, StatusError::not_found("no bob"));
    assert!(pair.client.closed_status().is_none());
}

#[tokio::test]
async fn panicking_handler_fails_with_internal() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).unary(
            "Hello",
            |req: HelloRequest, _ctx| async move {
                if req.body == "boom" {
                    panic!("handler exploded");
                }
                Ok(HelloReply { body: req.body })
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    assert_eq!(hello(&client, "boom").await.unwrap_err().code, Code::Internal);
    assert_eq!(hello(&client, "fine").await.unwrap().body, "fine");
}

#[tokio::test]
async fn deadline_fails_slow_calls() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).unary(
            "Slow",
            |req: HelloRequest, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(HelloReply { body: req.body })
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE)
        .unwrap()
        .with_options(CallOptions::new().timeout(Duration::from_millis(50)));

    let err = within(client.unary::<_, HelloReply>("Slow", &request("x")))
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::DeadlineExceeded);

    // The server side is told and drops the exchange.
    eventually(|| pair.server.exchange_count() == 0).await;
}

#[tokio::test]
async fn connection_loss_fails_in_flight_calls() {
    let pair = session_pair();
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).unary(
            "Slow",
            |req: HelloRequest, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(HelloReply { body: req.body })
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary::<_, HelloReply>("Slow", &request("x")).await })
    };
    eventually(|| pair.server.exchange_count() == 1).await;
    pair.server.close();

    let err = within(call).await.unwrap().unwrap_err();
    assert_eq!(err.code, Code::Unavailable);
    assert!(pair.client.closed_status().is_some());
}

#[tokio::test]
async fn handlers_see_the_callers_token() {
    let server_node = Node::new(hello_registry());
    let client_node = Node::new(hello_registry()).with_config(SessionConfig::new().auth_token("default"));
    let pair = session_pair_with(client_node, server_node);
    pair.server_node
        .register_handler(ServiceHandler::new(SERVICE).unary(
            "Hello",
            |_req: HelloRequest, ctx| async move {
                Ok(HelloReply {
                    body: ctx.auth().unwrap_or("none").to_string(),
                })
            },
        ))
        .unwrap();
    let client = ServiceClient::new(&pair.client, SERVICE).unwrap();

    assert_eq!(hello(&client, "").await.unwrap().body, "default");

    let client = client.with_options(CallOptions::new().auth("override"));
    assert_eq!(hello(&client, "").await.unwrap().body, "override");
}

#[tokio::test]
async fn one_off_request_over_tcp() {
    common::init_tracing();
    let server = Node::new(hello_registry());
    server.register_handler(greeter("Hello")).unwrap();
    let listener = TcpConnectionListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    let reply: HelloReply = within(request_tcp(
        addr,
        hello_registry(),
        "hello_world.HelloService.Hello",
        &request("tcp"),
        BincodeCodec,
    ))
    .await
    .unwrap();
    assert_eq!(reply.body, "Hello, tcp");

    let missing: Result<HelloReply, Error> = within(request_tcp(
        addr,
        hello_registry(),
        "hello_world.HelloService.Nope",
        &request("tcp"),
        BincodeCodec,
    ))
    .await;
    assert!(matches!(missing, Err(Error::Status(s)) if s.code == Code::Unimplemented));
}
