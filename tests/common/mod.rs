//! Shared test support: an in-process mock LSP server.
//!
//! The mock speaks real `Content-Length` framing over a duplex pipe, so
//! everything from the transport up through the bridge is exercised
//! exactly as it would be against a subprocess, minus the subprocess.

#![allow(dead_code)]

use mcp_lsp_bridge::client::LanguageClient;
use mcp_lsp_bridge::config::LanguageServerConfig;
use mcp_lsp_bridge::transport::StdioTransport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Opt-in logging for debugging test runs: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// What the mock answers for one method.
#[derive(Clone)]
enum ScriptedReply {
    Result(Value),
    Error { code: i64, message: String },
}

/// Requests and notifications the mock has seen, for assertions.
#[derive(Clone, Default)]
pub struct ServerLog {
    pub requests: Arc<Mutex<Vec<(String, Value)>>>,
    pub notifications: Arc<Mutex<Vec<(String, Value)>>>,
    abort: Arc<Mutex<Option<tokio::task::AbortHandle>>>,
}

impl ServerLog {
    /// Abort the server task, closing its pipe as a crash would.
    pub fn kill_server(&self) {
        if let Some(handle) = self.abort.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Params of the most recent request with this method.
    pub fn last_request(&self, method: &str) -> Option<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
    }

    pub fn notification_count(&self, method: &str) -> usize {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

/// Scriptable LSP server running on the far end of a duplex pipe.
pub struct MockServer {
    responses: HashMap<String, ScriptedReply>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    pub fn new() -> Self {
        let mut responses = HashMap::new();
        responses.insert(
            "initialize".to_string(),
            ScriptedReply::Result(json!({"capabilities": {}})),
        );
        responses.insert("shutdown".to_string(), ScriptedReply::Result(Value::Null));
        Self { responses }
    }

    /// Script a successful response for a method.
    pub fn respond(mut self, method: &str, result: Value) -> Self {
        self.responses
            .insert(method.to_string(), ScriptedReply::Result(result));
        self
    }

    /// Script a JSON-RPC error for a method.
    pub fn fail(mut self, method: &str, code: i64, message: &str) -> Self {
        self.responses.insert(
            method.to_string(),
            ScriptedReply::Error {
                code,
                message: message.to_string(),
            },
        );
        self
    }

    /// Start the server loop and hand back a fully handshaken client.
    pub async fn start(self, language: &str) -> (Arc<LanguageClient>, ServerLog) {
        self.start_with_config(language, &mock_config()).await
    }

    /// Start with an explicit server config (e.g. initialization options).
    pub async fn start_with_config(
        self,
        language: &str,
        config: &LanguageServerConfig,
    ) -> (Arc<LanguageClient>, ServerLog) {
        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);
        let (reader, writer) = tokio::io::split(client_io);
        let transport = StdioTransport::from_streams(reader, writer);

        let log = ServerLog::default();
        let task = tokio::spawn(serve(server_io, self.responses, log.clone()));
        *log.abort.lock().unwrap() = Some(task.abort_handle());

        let client = LanguageClient::connect_over(language, config, transport)
            .await
            .expect("mock handshake should succeed");
        (client, log)
    }
}

/// A server config that is never actually spawned.
pub fn mock_config() -> LanguageServerConfig {
    serde_json::from_value(json!({
        "command": "mock-language-server",
        "args": [],
        "languages": ["mock"],
        "filetypes": [],
    }))
    .unwrap()
}

async fn serve(
    mut io: DuplexStream,
    responses: HashMap<String, ScriptedReply>,
    log: ServerLog,
) {
    while let Some(message) = read_frame(&mut io).await {
        let method = message.get("method").and_then(Value::as_str);
        let id = message.get("id").cloned();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => {
                log.requests
                    .lock()
                    .unwrap()
                    .push((method.to_string(), params));
                let reply = match responses.get(method) {
                    Some(ScriptedReply::Result(result)) => json!({
                        "jsonrpc": "2.0", "id": id, "result": result,
                    }),
                    Some(ScriptedReply::Error { code, message }) => json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": {"code": code, "message": message},
                    }),
                    None => json!({
                        "jsonrpc": "2.0", "id": id, "result": Value::Null,
                    }),
                };
                if write_frame(&mut io, &reply).await.is_err() {
                    break;
                }
            }
            (None, Some(method)) => {
                log.notifications
                    .lock()
                    .unwrap()
                    .push((method.to_string(), params));
                if method == "exit" {
                    break;
                }
            }
            _ => {}
        }
    }
}

/// Read one `Content-Length`-framed message; `None` on EOF.
pub async fn read_frame(io: &mut DuplexStream) -> Option<Value> {
    let mut header = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match io.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(_) => return None,
        }
        header.push(byte[0]);
        if header.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8(header).ok()?;
    let length: usize = text
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length:"))?
        .trim()
        .parse()
        .ok()?;
    let mut body = vec![0u8; length];
    io.read_exact(&mut body).await.ok()?;
    serde_json::from_slice(&body).ok()
}

/// Write one framed message.
pub async fn write_frame(io: &mut DuplexStream, message: &Value) -> std::io::Result<()> {
    let body = serde_json::to_vec(message).expect("serialisable message");
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    io.write_all(header.as_bytes()).await?;
    io.write_all(&body).await?;
    Ok(())
}
