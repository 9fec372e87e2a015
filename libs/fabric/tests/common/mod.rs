#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_fabric::connection::MemConnection;
use switchboard_fabric::rpc::{
    Classification, FieldMeta, Meta, MethodMeta, Name, ProtoRegistry, ServiceMeta, TypeMeta,
};
use switchboard_fabric::{Node, Session};
use tracing_subscriber::EnvFilter;

pub const SERVICE: &str = "hello_world.HelloService";
pub const HELLO: &str = "hello_world.HelloService.Hello";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloReply {
    pub body: String,
}

pub fn request(body: &str) -> HelloRequest {
    HelloRequest {
        body: body.to_string(),
    }
}

fn body_type(name: &str) -> TypeMeta {
    TypeMeta {
        name: Name::new("hello_world", name),
        fields: vec![FieldMeta {
            name: "body".to_string(),
            id: 1,
            type_full_name: "string".to_string(),
            is_optional: false,
            is_repeated: false,
            part_of: None,
            classification: Classification::String,
        }],
    }
}

fn method(name: &str, req_streamed: bool, res_streamed: bool) -> MethodMeta {
    MethodMeta {
        name: name.to_string(),
        req_full_type_name: ".hello_world.HelloRequest".to_string(),
        res_full_type_name: ".hello_world.HelloReply".to_string(),
        is_req_streamed: req_streamed,
        is_res_streamed: res_streamed,
    }
}

/// `HelloService` with one method of every kind plus a second unary one.
pub fn hello_meta() -> Meta {
    Meta {
        services: vec![ServiceMeta {
            name: Name::new("hello_world", "HelloService"),
            methods: vec![
                method("Hello", false, false),
                method("Slow", false, false),
                method("Count", false, true),
                method("Join", true, false),
                method("Shout", true, true),
            ],
        }],
        types: vec![body_type("HelloRequest"), body_type("HelloReply")],
        enums: Vec::new(),
    }
}

pub fn hello_registry() -> Arc<ProtoRegistry> {
    Arc::new(ProtoRegistry::from_meta(&hello_meta()).unwrap())
}

pub struct Pair {
    pub client_node: Node,
    pub server_node: Node,
    pub client: Session,
    pub server: Session,
}

/// Two nodes sharing the hello registry, connected in memory.
pub fn session_pair() -> Pair {
    session_pair_with(Node::new(hello_registry()), Node::new(hello_registry()))
}

pub fn session_pair_with(client_node: Node, server_node: Node) -> Pair {
    init_tracing();
    let (a, b) = MemConnection::pair();
    let client = client_node.connect(a);
    let server = server_node.accept(b);
    Pair {
        client_node,
        server_node,
        client,
        server,
    }
}

/// Poll `check` until it holds, panicking after a second.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Await `future`, panicking if it takes longer than a second.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(1), future)
        .await
        .expect("timed out")
}
