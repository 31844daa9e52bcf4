//! JSON-RPC multiplexer over the framed transport
//!
//! Implements LSP framing (`Content-Length: N\r\n\r\n<body>`) and the
//! request/response correlation machinery:
//! - one reader task demultiplexes responses to pending oneshot channels
//! - one writer task serialises all outbound writes, preserving
//!   notification order
//! - server-initiated requests get the minimal replies a client must give
//! - a watch channel fires once on unexpected stream termination
//!
//! The pending table is locked only to insert or remove an entry; waiting
//! for a response happens on a per-request oneshot channel so no lock is
//! ever held across an await.

use crate::error::{BridgeError, Result};
use crate::transport::{StdioTransport, TransportReader, TransportWriter};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Maximum accepted message body. Guards against a corrupt or hostile
/// `Content-Length` header exhausting memory.
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Outbound queue depth. Writes block once this many messages are queued.
const OUTBOUND_QUEUE: usize = 64;

/// A JSON-RPC request we send to the server.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC notification (no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A reply to a server-initiated request; the id is echoed verbatim.
#[derive(Debug, Clone, Serialize)]
struct JsonRpcReply {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// One multiplexed JSON-RPC session over a transport.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone, Debug)]
pub struct Connection {
    outbound_tx: mpsc::Sender<Vec<u8>>,
    pending: PendingMap,
    next_id: Arc<AtomicI64>,
    session: CancellationToken,
    io_token: CancellationToken,
    disconnect_rx: watch::Receiver<bool>,
}

impl Connection {
    /// Start the reader and writer tasks over a transport. The session
    /// token cancels every outstanding call when triggered.
    pub fn spawn(transport: StdioTransport, session: CancellationToken, label: &str) -> Self {
        let (reader, writer) = transport.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (disconnect_tx, disconnect_rx) = watch::channel(false);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let io_token = session.child_token();

        tokio::spawn(writer_loop(
            writer,
            outbound_rx,
            io_token.clone(),
            label.to_string(),
        ));
        tokio::spawn(reader_loop(
            reader,
            pending.clone(),
            outbound_tx.clone(),
            disconnect_tx,
            io_token.clone(),
            label.to_string(),
        ));

        Self {
            outbound_tx,
            pending,
            next_id: Arc::new(AtomicI64::new(1)),
            session,
            io_token,
            disconnect_rx,
        }
    }

    /// Send a request and await the matching response.
    ///
    /// Fails with `Timeout` when the deadline passes (the pending entry is
    /// dropped) and with `Cancelled` when the session is cancelled.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_vec(&request).map_err(|e| BridgeError::Decode {
            what: "request params",
            message: e.to_string(),
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        tracing::debug!("-> {} (id {})", method, id);
        if self.outbound_tx.send(body).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection writer stopped",
            )
            .into());
        }

        tokio::select! {
            _ = self.session.cancelled() => {
                self.pending.lock().unwrap().remove(&id);
                Err(BridgeError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.pending.lock().unwrap().remove(&id);
                tracing::warn!("{} (id {}) timed out after {:?}", method, id, timeout);
                Err(BridgeError::Timeout { method: method.to_string(), after: timeout })
            }
            response = rx => match response {
                Ok(result) => result,
                // Sender dropped: the reader drained pending on stream end.
                Err(_) => Err(BridgeError::Cancelled),
            }
        }
    }

    /// Send a notification. Never awaits a response; ordering relative to
    /// other writes from this task is preserved by the writer queue.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_vec(&notification).map_err(|e| BridgeError::Decode {
            what: "notification params",
            message: e.to_string(),
        })?;
        tracing::debug!("-> {}", method);
        self.outbound_tx.send(body).await.map_err(|_| {
            BridgeError::from(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection writer stopped",
            ))
        })
    }

    /// Resolves once when the stream terminates unexpectedly. Voluntary
    /// closes do not fire this.
    pub async fn disconnected(&self) {
        let mut rx = self.disconnect_rx.clone();
        if *rx.borrow() {
            return;
        }
        // Receiver outlives the sender only after the reader exits, in
        // which case wait_for errs and the borrow above already decided.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Whether the peer vanished without a close.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnect_rx.borrow()
    }

    /// Stop the reader and writer tasks and close the transport. All
    /// outstanding calls complete with `Cancelled`. Idempotent.
    pub fn close(&self) {
        self.io_token.cancel();
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(BridgeError::Cancelled));
        }
    }
}

/// Serialise outbound messages: frame and write in queue order.
async fn writer_loop(
    mut writer: TransportWriter,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    io_token: CancellationToken,
    label: String,
) {
    loop {
        let body = tokio::select! {
            _ = io_token.cancelled() => break,
            msg = outbound_rx.recv() => match msg {
                Some(body) => body,
                None => break,
            },
        };

        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        let write = async {
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await
        };
        if let Err(e) = write.await {
            tracing::warn!("LSP ({}) write failed: {}", label, e);
            break;
        }
    }
    let _ = writer.close().await;
    tracing::debug!("LSP ({}) writer task exiting", label);
}

/// Demultiplex inbound messages until the stream ends.
async fn reader_loop(
    mut reader: TransportReader,
    pending: PendingMap,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    disconnect_tx: watch::Sender<bool>,
    io_token: CancellationToken,
    label: String,
) {
    let voluntary = loop {
        let message = tokio::select! {
            _ = io_token.cancelled() => break true,
            msg = read_message(&mut reader) => msg,
        };
        match message {
            Ok(message) => {
                dispatch_message(message, &pending, &outbound_tx, &label).await;
            }
            Err(e) => {
                if io_token.is_cancelled() {
                    break true;
                }
                tracing::warn!("LSP ({}) stream ended: {}", label, e);
                break false;
            }
        }
    };

    // Wake every outstanding caller; a voluntary close reads as
    // cancellation, a crash as an I/O failure.
    let mut map = pending.lock().unwrap();
    let stranded = map.len();
    for (_, tx) in map.drain() {
        let result = if voluntary {
            Err(BridgeError::Cancelled)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "language server stream terminated",
            )
            .into())
        };
        let _ = tx.send(result);
    }
    drop(map);
    if stranded > 0 {
        tracing::warn!("LSP ({}) reader exited with {} pending request(s)", label, stranded);
    }

    if !voluntary {
        let _ = disconnect_tx.send(true);
    }
    tracing::debug!("LSP ({}) reader task exiting", label);
}

/// Read one framed message: headers until the blank line, then the body.
async fn read_message(reader: &mut TransportReader) -> Result<Value> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed",
            )
            .into());
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some(len) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(len.trim().parse().map_err(|e| BridgeError::Decode {
                what: "Content-Length header",
                message: format!("{}", e),
            })?);
        }
    }

    let length = content_length.ok_or(BridgeError::Decode {
        what: "message frame",
        message: "missing Content-Length header".to_string(),
    })?;
    if length > MAX_MESSAGE_SIZE {
        return Err(BridgeError::Decode {
            what: "message frame",
            message: format!("body of {} bytes exceeds limit", length),
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body).map_err(|e| BridgeError::Decode {
        what: "message body",
        message: e.to_string(),
    })
}

/// Route one inbound message: response, server request, or notification.
async fn dispatch_message(
    message: Value,
    pending: &PendingMap,
    outbound_tx: &mpsc::Sender<Vec<u8>>,
    label: &str,
) {
    let has_id = message.get("id").is_some();
    let method = message.get("method").and_then(Value::as_str);

    match (has_id, method) {
        // Response to one of our requests.
        (true, None) => {
            let Some(id) = message.get("id").and_then(Value::as_i64) else {
                tracing::warn!("LSP ({}) response with non-numeric id", label);
                return;
            };
            let result = if let Some(error) = message.get("error") {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
                let text = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                Err(BridgeError::ExternalLsp { code, message: text })
            } else {
                Ok(message.get("result").cloned().unwrap_or(Value::Null))
            };
            let tx = pending.lock().unwrap().remove(&id);
            match tx {
                Some(tx) => {
                    tracing::debug!("<- response (id {})", id);
                    let _ = tx.send(result);
                }
                None => tracing::warn!("LSP ({}) response for unknown id {}", label, id),
            }
        }

        // Server-initiated request: answer with the minimum a client owes.
        (true, Some(method)) => {
            let id = message.get("id").cloned().unwrap_or(Value::Null);
            tracing::debug!("<- server request {} (id {})", method, id);
            let reply = match method {
                "client/registerCapability" => JsonRpcReply {
                    jsonrpc: "2.0",
                    id,
                    result: Some(Value::Object(serde_json::Map::new())),
                    error: None,
                },
                "workspace/configuration" => JsonRpcReply {
                    jsonrpc: "2.0",
                    id,
                    result: Some(Value::Array(Vec::new())),
                    error: None,
                },
                other => {
                    tracing::debug!("LSP ({}) unsupported server request {}", label, other);
                    JsonRpcReply {
                        jsonrpc: "2.0",
                        id,
                        result: None,
                        error: Some(serde_json::json!({
                            "code": -32601,
                            "message": "Method not found",
                        })),
                    }
                }
            };
            if let Ok(body) = serde_json::to_vec(&reply) {
                let _ = outbound_tx.send(body).await;
            }
        }

        // Notification from the server.
        (false, Some(method)) => handle_notification(method, &message, label),

        (false, None) => {
            tracing::warn!("LSP ({}) message with neither id nor method", label);
        }
    }
}

fn handle_notification(method: &str, message: &Value, label: &str) {
    match method {
        "textDocument/publishDiagnostics" => {
            let uri = message
                .pointer("/params/uri")
                .and_then(Value::as_str)
                .unwrap_or("?");
            let count = message
                .pointer("/params/diagnostics")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            tracing::debug!("LSP ({}) {} diagnostics for {}", label, count, uri);
        }
        "window/showMessage" | "window/logMessage" => {
            let kind = message
                .pointer("/params/type")
                .and_then(Value::as_i64)
                .unwrap_or(4);
            let text = message
                .pointer("/params/message")
                .and_then(Value::as_str)
                .unwrap_or("(no message)");
            match kind {
                1 => tracing::error!("LSP ({}): {}", label, text),
                2 => tracing::warn!("LSP ({}): {}", label, text),
                3 => tracing::info!("LSP ({}): {}", label, text),
                _ => tracing::debug!("LSP ({}): {}", label, text),
            }
        }
        other => {
            tracing::debug!("LSP ({}) unhandled notification: {}", label, other);
        }
    }
}
