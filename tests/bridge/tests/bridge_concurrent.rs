//! Concurrent access: many sessions and many requests against shared adapters.
//!
//! Tests verify that per-identity quota does not leak between sessions and
//! that one handler can be driven from many tasks at once.

use std::sync::Arc;

use capgate::builtin::DataAdapter;
use capgate::Version;
use capgate_mcp::access::{AccessControl, Identity, Policy};
use capgate_mcp::registry::ProtocolRegistry;
use capgate_mcp::server::{Server, ServerHandle, ServerOptions, TransportConfig};
use capgate_mcp::transport::LineTransport;
use capgate_mcp::ProtocolHandler;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Barrier;

// ─── Helpers ───────────────────────────────────────────────────────────────

fn data_registry() -> Arc<ProtocolRegistry> {
    let mut builder = ProtocolRegistry::builder();
    builder.add(Arc::new(DataAdapter::new())).expect("register data");
    Arc::new(builder.build())
}

async fn start(access: AccessControl) -> ServerHandle {
    Server::start_with(
        TransportConfig::Manual,
        data_registry(),
        Arc::new(access),
        ServerOptions::default(),
    )
    .await
    .expect("start server")
}

/// Minimal line client: one request at a time.
struct Client {
    reader: BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
}

impl Client {
    async fn connect(handle: &ServerHandle) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        handle
            .connect(Arc::new(LineTransport::new(server_read, server_write)))
            .await;
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn call(&mut self, id: u64, method: &str, params: Value) -> Value {
        let line = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write");
        loop {
            let mut buf = String::new();
            let read = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                self.reader.read_line(&mut buf),
            )
            .await
            .expect("response timed out")
            .expect("read");
            assert!(read > 0, "session closed early");
            let message: Value = serde_json::from_str(&buf).expect("json");
            if message["id"] == id {
                return message;
            }
        }
    }

    async fn initialize(&mut self, credential: &str) -> Value {
        self.call(
            0,
            "initialize",
            json!({"protocol": "data", "version": "1.0", "credential": credential}),
        )
        .await
    }

    async fn hex(&mut self, id: u64, text: &str) -> Value {
        self.call(
            id,
            "tools/call",
            json!({"name": "hex_encode", "arguments": {"text": text}}),
        )
        .await
    }
}

const TWO_USERS: &str = r#"
allow_anonymous = false

[[credentials]]
key = "alice-key"
identity = "alice"

[[credentials]]
key = "bob-key"
identity = "bob"

[rate_limit]
window_secs = 60
max_weight = 3
"#;

// ─── Tests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn quota_is_tracked_per_identity_across_sessions() {
    let handle = start(AccessControl::new(Policy::from_toml(TWO_USERS).unwrap())).await;

    let mut alice_one = Client::connect(&handle).await;
    let mut alice_two = Client::connect(&handle).await;
    let mut bob = Client::connect(&handle).await;
    for client in [&mut alice_one, &mut alice_two] {
        assert!(client.initialize("alice-key").await.get("result").is_some());
    }
    assert!(bob.initialize("bob-key").await.get("result").is_some());

    // alice spends her window across two sessions
    assert!(alice_one.hex(1, "a").await.get("result").is_some());
    assert!(alice_two.hex(1, "b").await.get("result").is_some());
    assert!(alice_one.hex(2, "c").await.get("result").is_some());
    let limited = alice_two.hex(2, "d").await;
    assert_eq!(limited["error"]["code"], -32005);

    // bob is untouched
    for id in 1..=3 {
        let ok = bob.hex(id, "hi").await;
        assert_eq!(ok["result"]["structuredContent"]["hex"], "6869");
    }

    handle.stop().await;
}

#[tokio::test]
async fn sessions_do_not_share_negotiation_state() {
    let handle = start(AccessControl::open()).await;

    let mut negotiated = Client::connect(&handle).await;
    let mut fresh = Client::connect(&handle).await;
    let init = negotiated
        .call(0, "initialize", json!({"protocol": "data", "version": "1.3"}))
        .await;
    assert_eq!(init["result"]["version"], "1.0.0");

    assert!(negotiated.hex(1, "x").await.get("result").is_some());
    let early = fresh.hex(1, "x").await;
    assert_eq!(early["error"]["code"], -32602);

    assert_eq!(handle.sessions().live().await, 2);
    handle.stop().await;
    assert_eq!(handle.sessions().live().await, 0);
}

#[tokio::test]
async fn one_handler_serves_many_tasks() {
    let registry = data_registry();
    let binding = registry
        .resolve("data", &Version::new(1, 0, 0))
        .expect("resolve data");
    let handler = ProtocolHandler::new(binding, Identity::anonymous(), Arc::new(AccessControl::open()));

    let tasks = 24;
    let barrier = Arc::new(Barrier::new(tasks));
    let mut joins = Vec::new();
    for i in 0..tasks {
        let handler = handler.clone();
        let barrier = Arc::clone(&barrier);
        joins.push(tokio::spawn(async move {
            barrier.wait().await;
            let text = format!("task-{i}");
            let result = handler
                .handle(
                    "tools/call",
                    Some(json!({"name": "hex_encode", "arguments": {"text": text}})),
                )
                .await
                .expect("call succeeds");
            (i, result)
        }));
    }

    for join in joins {
        let (i, result) = join.await.expect("task");
        let expected: String = format!("task-{i}").bytes().map(|b| format!("{b:02x}")).collect();
        assert_eq!(result["structuredContent"]["hex"], expected.as_str());
        assert_eq!(result["content"][0]["type"], "text");
    }
}
