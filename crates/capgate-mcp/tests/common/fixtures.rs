//! Shared fixtures: a recording adapter and a line-protocol test client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use capgate::{
    AdapterError, AdapterResult, CapabilityAdapter, Prompt, PromptVariable, ProtocolDescriptor,
    ResourceContents, SamplingPolicy, ToolDefinition,
};
use capgate_mcp::access::AccessControl;
use capgate_mcp::registry::ProtocolRegistry;
use capgate_mcp::server::{Server, ServerHandle, ServerOptions, TransportConfig};
use capgate_mcp::transport::LineTransport;

/// How long a test waits for any single message.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapter that records every invocation.
///
/// Tools: `echo {text}`, `fail`, `slow {ms}`, `panic`, `sample`.
pub struct SpyAdapter {
    descriptor: ProtocolDescriptor,
    calls: AtomicUsize,
}

impl SpyAdapter {
    pub fn new(name: &str, version: &str, range: &str) -> Self {
        let descriptor = ProtocolDescriptor::new(
            name,
            version.parse().expect("version"),
            range.parse().expect("range"),
        )
        .describe("Recording adapter for tests")
        .tool(ToolDefinition::new(
            "echo",
            "Return the text argument",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        ))
        .tool(ToolDefinition::new("fail", "Fail with a backend fault", json!({"type": "object"})))
        .tool(ToolDefinition::new(
            "slow",
            "Sleep, then answer",
            json!({
                "type": "object",
                "properties": { "ms": { "type": "integer", "minimum": 0 } },
                "required": ["ms"]
            }),
        ))
        .tool(ToolDefinition::new("panic", "Panic inside the adapter", json!({"type": "object"})))
        .tool(ToolDefinition::new("sample", "Return the sampling policy", json!({"type": "object"})))
        .prompt(Prompt {
            name: "greet".to_string(),
            description: Some("Say hello".to_string()),
            template: "Hello {name}!".to_string(),
            variables: vec![PromptVariable {
                name: "name".to_string(),
                description: None,
                required: true,
            }],
        })
        .sampling(SamplingPolicy(
            json!({"temperature": 0.2, "top_k": 5}).as_object().cloned().unwrap_or_default(),
        ));

        Self {
            descriptor,
            calls: AtomicUsize::new(0),
        }
    }

    /// `file@1.2`, serving `[1.0,2.0)`.
    pub fn file_1_2() -> Self {
        Self::new("file", "1.2", "[1.0,2.0)")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityAdapter for SpyAdapter {
    fn describe(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, method: &str, args: Value, sampling: &SamplingPolicy) -> AdapterResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        capgate::validate_args(&self.descriptor, method, &args)?;

        match method {
            "echo" => Ok(json!({ "text": args["text"] })),
            "fail" => Err(AdapterError::backend("socket", "connection reset by peer")),
            "slow" => {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept_ms": ms }))
            }
            "panic" => panic!("spy adapter exploded"),
            "sample" => Ok(Value::Object(sampling.0.clone())),
            other => Err(AdapterError::UnknownMethod(other.to_string())),
        }
    }

    async fn read_resource(&self, uri: &str) -> AdapterResult<ResourceContents> {
        if uri != "spy://greeting" {
            return Err(AdapterError::ResourceNotFound(uri.to_string()));
        }
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: Some("text/plain".to_string()),
            text: Some("hello".to_string()),
            blob: None,
        })
    }
}

/// Registry holding a single spy adapter.
pub fn spy_registry(spy: Arc<SpyAdapter>) -> Arc<ProtocolRegistry> {
    let mut builder = ProtocolRegistry::builder();
    builder.add(spy).expect("register spy");
    Arc::new(builder.build())
}

/// Start a server with no listener.
pub async fn manual_server(
    registry: Arc<ProtocolRegistry>,
    access: AccessControl,
    options: ServerOptions,
) -> ServerHandle {
    Server::start_with(TransportConfig::Manual, registry, Arc::new(access), options)
        .await
        .expect("start server")
}

/// Client end of a newline-delimited session.
pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    /// Notifications seen while waiting for responses.
    pub notifications: Vec<Value>,
}

impl TestClient {
    /// Open a session on `handle` and return the client end.
    pub async fn connect(handle: &ServerHandle) -> (Self, String) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let session_id = handle
            .connect(Arc::new(LineTransport::new(server_read, server_write)))
            .await;

        let (client_read, client_write) = tokio::io::split(client);
        let client = Self {
            reader: BufReader::new(client_read),
            writer: client_write,
            notifications: Vec::new(),
        };
        (client, session_id)
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn request(&mut self, id: Value, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    /// Next message, or `None` once the server has closed the stream.
    pub async fn next(&mut self) -> Option<Value> {
        let mut line = String::new();
        let read = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a message")
            .expect("read");
        if read == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).expect("server sent invalid JSON"))
    }

    /// Next response, recording any notifications on the way.
    pub async fn response(&mut self) -> Value {
        loop {
            let message = self.next().await.expect("stream closed before a response");
            if message.get("id").is_some() {
                return message;
            }
            self.notifications.push(message);
        }
    }

    /// Send a request and wait for its response.
    pub async fn call(&mut self, id: Value, method: &str, params: Value) -> Value {
        self.request(id.clone(), method, params).await;
        let response = self.response().await;
        assert_eq!(response["id"], id, "response for another request");
        response
    }

    pub async fn initialize(&mut self, protocol: &str, version: &str) -> Value {
        self.call(
            json!("init"),
            "initialize",
            json!({
                "protocol": protocol,
                "version": version,
                "client_info": {"name": "test-client", "version": "0.0.1"}
            }),
        )
        .await
    }

    pub async fn call_tool(&mut self, id: Value, name: &str, arguments: Value) -> Value {
        self.call(id, "tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    /// Assert the server closes the stream, skipping trailing notifications.
    pub async fn expect_closed(&mut self) {
        while let Some(message) = self.next().await {
            assert!(message.get("id").is_none(), "unexpected response {message}");
            self.notifications.push(message);
        }
    }
}

/// Error code of a response, if it is an error.
pub fn error_code(response: &Value) -> Option<i64> {
    response["error"]["code"].as_i64()
}
