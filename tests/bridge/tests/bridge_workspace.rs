//! Built-in file adapter behind the full access stack.
//!
//! Tests verify that root confinement happens before the adapter runs, and
//! that a serialized adapter still answers pipelined requests in full.

use std::sync::Arc;
use std::time::Duration;

use capgate::builtin::{DataAdapter, FileAdapter};
use capgate_mcp::access::{AccessControl, Policy};
use capgate_mcp::registry::ProtocolRegistry;
use capgate_mcp::server::{Server, ServerHandle, ServerOptions, TransportConfig};
use capgate_mcp::transport::LineTransport;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

// ─── Helpers ───────────────────────────────────────────────────────────────

struct Session {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Session {
    async fn open(handle: &ServerHandle) -> Self {
        let (client, server) = tokio::io::duplex(256 * 1024);
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

    async fn send(&mut self, id: Value, method: &str, params: Value) {
        let line = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write");
    }

    /// Next response, skipping notifications.
    async fn response(&mut self) -> Value {
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("response timed out")
                .expect("read");
            assert!(read > 0, "session closed early");
            let message: Value = serde_json::from_str(&line).expect("json");
            if message.get("id").is_some() {
                return message;
            }
        }
    }

    async fn call(&mut self, id: Value, method: &str, params: Value) -> Value {
        self.send(id.clone(), method, params).await;
        let response = self.response().await;
        assert_eq!(response["id"], id);
        response
    }

    async fn tool(&mut self, id: u64, name: &str, arguments: Value) -> Value {
        self.call(json!(id), "tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }
}

async fn start(workspace: &std::path::Path, policy: Policy) -> ServerHandle {
    let mut builder = ProtocolRegistry::builder();
    builder
        .add(Arc::new(FileAdapter::new(workspace)))
        .expect("register file")
        .add(Arc::new(DataAdapter::new()))
        .expect("register data");
    Server::start_with(
        TransportConfig::Manual,
        Arc::new(builder.build()),
        Arc::new(AccessControl::new(policy)),
        ServerOptions::default(),
    )
    .await
    .expect("start server")
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn writes_and_reads_inside_the_workspace() {
    let dir = tempdir().unwrap();
    let handle = start(dir.path(), Policy::default()).await;
    let mut session = Session::open(&handle).await;

    let init = session
        .call(json!(0), "initialize", json!({"protocol": "file", "version": "1.4"}))
        .await;
    assert_eq!(init["result"]["version"], "1.0.0");
    let root = init["result"]["capabilities"]["roots"][0]["uri"].as_str().unwrap().to_string();
    assert!(root.starts_with("file://"));

    let created = session.tool(1, "create_directory", json!({"path": "notes"})).await;
    assert_eq!(created["result"]["structuredContent"]["created"], true);

    let written = session
        .tool(4, "write_text", json!({"path": "notes/today.md", "content": "# Today\n"}))
        .await;
    assert!(written.get("result").is_some(), "{written}");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes/today.md")).unwrap(),
        "# Today\n"
    );

    let read = session.tool(2, "read_text", json!({"path": "notes/today.md"})).await;
    assert_eq!(read["result"]["structuredContent"]["content"], "# Today\n");

    let roots = session.call(json!(3), "roots/list", json!({})).await;
    assert_eq!(roots["result"]["roots"][0]["uri"], root.as_str());

    handle.stop().await;
}

#[tokio::test]
async fn paths_outside_the_roots_are_denied_before_invocation() {
    let dir = tempdir().unwrap();
    let outside = tempdir().unwrap();
    let target = outside.path().join("stolen.txt");
    let handle = start(dir.path(), Policy::default()).await;
    let mut session = Session::open(&handle).await;
    session
        .call(json!(0), "initialize", json!({"protocol": "file", "version": "1.0"}))
        .await;

    let escape = session
        .tool(1, "write_text", json!({"path": target.display().to_string(), "content": "x"}))
        .await;
    assert_eq!(escape["error"]["code"], -32004);

    let dotdot = session
        .tool(2, "write_text", json!({"path": "../stolen.txt", "content": "x"}))
        .await;
    assert_eq!(dotdot["error"]["code"], -32004);

    assert!(!target.exists());
    assert!(!dir.path().parent().unwrap().join("stolen.txt").exists());
    handle.stop().await;
}

#[tokio::test]
async fn relative_paths_cannot_escape_a_narrower_grant() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("public")).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "TOP SECRET").unwrap();
    std::fs::write(dir.path().join("public/notice.txt"), "hello").unwrap();
    let policy = Policy::from_toml(&format!(
        "[[roots]]\nname = \"public\"\npath = \"{}\"\n",
        dir.path().join("public").display()
    ))
    .unwrap();
    let handle = start(dir.path(), policy).await;
    let mut session = Session::open(&handle).await;
    session
        .call(json!(0), "initialize", json!({"protocol": "file", "version": "1.0"}))
        .await;

    let absolute = dir.path().join("secret.txt").display().to_string();
    let denied = session.tool(1, "read_text", json!({"path": absolute})).await;
    assert_eq!(denied["error"]["code"], -32004);

    let relative = session.tool(2, "read_text", json!({"path": "secret.txt"})).await;
    assert_eq!(relative["error"]["code"], -32004, "{relative}");

    let resource = session
        .call(json!(3), "resources/read", json!({"uri": "file://secret.txt"}))
        .await;
    assert_eq!(resource["error"]["code"], -32004, "{resource}");

    let allowed = session.tool(4, "read_text", json!({"path": "public/notice.txt"})).await;
    assert_eq!(allowed["result"]["structuredContent"]["content"], "hello");
    handle.stop().await;
}

#[tokio::test]
async fn policy_rules_gate_individual_tools() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("keep.txt"), "keep").unwrap();
    let policy = Policy::from_toml(
        r#"
        [[rules]]
        protocol = "file"
        method = "delete_file"
        decision = "deny"
        "#,
    )
    .unwrap();
    let handle = start(dir.path(), policy).await;
    let mut session = Session::open(&handle).await;
    session
        .call(json!(0), "initialize", json!({"protocol": "file", "version": "1"}))
        .await;

    let denied = session.tool(1, "delete_file", json!({"path": "keep.txt"})).await;
    assert_eq!(denied["error"]["code"], -32004);
    assert!(dir.path().join("keep.txt").exists());

    let exists = session.tool(2, "file_exists", json!({"path": "keep.txt"})).await;
    assert_eq!(exists["result"]["structuredContent"]["exists"], true);
    handle.stop().await;
}

#[tokio::test]
async fn serialized_adapter_answers_every_pipelined_request() {
    let dir = tempdir().unwrap();
    let handle = start(dir.path(), Policy::default()).await;
    let mut session = Session::open(&handle).await;
    session
        .call(json!(0), "initialize", json!({"protocol": "file", "version": "1.0"}))
        .await;

    let count = 40u64;
    for id in 1..=count {
        session
            .send(
                json!(id),
                "tools/call",
                json!({"name": "append_text", "arguments": {"path": "log.txt", "content": "x"}}),
            )
            .await;
    }

    let mut answered = std::collections::HashSet::new();
    for _ in 0..count {
        let response = session.response().await;
        assert!(response.get("result").is_some(), "{response}");
        assert!(answered.insert(response["id"].as_u64().unwrap()));
    }
    assert_eq!(answered.len() as u64, count);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("log.txt")).unwrap().len() as u64,
        count
    );
    handle.stop().await;
}

#[tokio::test]
async fn many_short_sessions_leave_nothing_behind() {
    let dir = tempdir().unwrap();
    let handle = start(dir.path(), Policy::default()).await;

    for round in 0..20u64 {
        let mut session = Session::open(&handle).await;
        let init = session
            .call(json!(0), "initialize", json!({"protocol": "data", "version": "1.0"}))
            .await;
        assert!(init.get("result").is_some());
        let bye = session.call(json!(round + 1), "close", json!({})).await;
        assert_eq!(bye["result"], json!({}));
    }

    assert!(handle.sessions().wait_all(Duration::from_secs(5)).await);
    assert_eq!(handle.sessions().live().await, 0);
    handle.stop().await;
}
