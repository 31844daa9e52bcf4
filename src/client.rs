//! LSP client
//!
//! One `LanguageClient` owns one language server subprocess and speaks LSP
//! to it over the JSON-RPC connection:
//! - connect performs argv sanitation, spawn, handshake, capability capture
//! - every LSP method used by the bridge has a typed wrapper with its own
//!   timeout discipline
//! - metrics count every request; the status machine tracks the connection
//!   lifecycle and recovers from transient errors on the next success
//!
//! Response decoding is deliberately tolerant: servers disagree about
//! `Location` vs `LocationLink`, hierarchical vs flat document symbols, and
//! null vs missing results, and all of those shapes are accepted here.

use crate::config::LanguageServerConfig;
use crate::error::{BridgeError, Result};
use crate::jsonrpc::Connection;
use crate::semantic::{SemanticTokenDecoder, TokenPosition};
use crate::transport::StdioTransport;
use lsp_types::notification::{Initialized, Notification};
use lsp_types::request::{Initialize, Request};
use lsp_types::{
    CallHierarchyItem, CallHierarchyPrepareParams, ClientCapabilities, ClientInfo,
    CodeActionContext, CodeActionOrCommand, CodeActionParams, Diagnostic,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentFormattingParams, DocumentSymbol, DocumentSymbolParams, FormattingOptions,
    GotoDefinitionParams, Hover, HoverContents, HoverParams, InitializeParams, InitializeResult,
    Location, LocationLink, MarkedString, PartialResultParams, Position, Range,
    ReferenceContext, ReferenceParams, RenameParams, SemanticTokens, SemanticTokensParams,
    SemanticTokensRangeParams, ServerCapabilities, SignatureHelp, SignatureHelpParams, SymbolKind,
    SymbolInformation, TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams,
    Uri, WorkDoneProgressParams, WorkspaceDiagnosticParams, WorkspaceEdit, WorkspaceSymbolParams,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;

/// Default deadline for a single LSP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize and rename involve whole-workspace work on many servers.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RENAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Workspace diagnostics can walk the entire project.
pub const WORKSPACE_DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(30);

/// How long close waits for the child before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    /// Closed, or never constructed. Terminal after `close()`.
    Uninitialized,
    /// Spawn and handshake in progress. Initial state on construction.
    Connecting,
    /// Handshake complete; requests are being served.
    Connected,
    /// The last request failed. The next success returns to Connected.
    Error,
    /// A reconnect attempt is in progress.
    Restarting,
    /// The server vanished without a close.
    Disconnected,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientStatus::Uninitialized => "uninitialized",
            ClientStatus::Connecting => "connecting",
            ClientStatus::Connected => "connected",
            ClientStatus::Error => "error",
            ClientStatus::Restarting => "restarting",
            ClientStatus::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Mutable, rarely-read half of the metrics; guarded separately so the
/// counters stay lock-free to poll.
#[derive(Debug, Default)]
struct MetricsState {
    status: Option<ClientStatus>,
    last_initialized: Option<SystemTime>,
    last_error: Option<String>,
    last_error_time: Option<SystemTime>,
}

/// Per-client request counters and lifecycle stamps, readable from any
/// task.
#[derive(Debug)]
pub struct ClientMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    process_id: AtomicU32,
    state: Mutex<MetricsState>,
}

impl ClientMetrics {
    fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            process_id: AtomicU32::new(0),
            state: Mutex::new(MetricsState {
                status: Some(ClientStatus::Connecting),
                ..Default::default()
            }),
        }
    }

    fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        // A successful call heals a transiently errored connection.
        if state.status == Some(ClientStatus::Error) {
            state.status = Some(ClientStatus::Connected);
        }
    }

    fn record_failure(&self, error: &BridgeError) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.last_error = Some(error.to_string());
        state.last_error_time = Some(SystemTime::now());
        state.status = Some(ClientStatus::Error);
    }

    fn mark_initialized(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = Some(ClientStatus::Connected);
        state.last_initialized = Some(SystemTime::now());
    }

    fn set_status(&self, status: ClientStatus) {
        self.state.lock().unwrap().status = Some(status);
    }

    fn set_process_id(&self, pid: u32) {
        self.process_id.store(pid, Ordering::Relaxed);
    }

    pub fn status(&self) -> ClientStatus {
        self.state
            .lock()
            .unwrap()
            .status
            .unwrap_or(ClientStatus::Uninitialized)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of everything, serialisable for the MCP layer.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            process_id: self.process_id.load(Ordering::Relaxed),
            status: state.status.unwrap_or(ClientStatus::Uninitialized),
            last_initialized: state.last_initialized,
            last_error: state.last_error.clone(),
            last_error_time: state.last_error_time,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub process_id: u32,
    pub status: ClientStatus,
    pub last_initialized: Option<SystemTime>,
    pub last_error: Option<String>,
    pub last_error_time: Option<SystemTime>,
}

/// Connect retry pacing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub total_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            total_timeout: Duration::from_secs(30),
        }
    }
}

/// A definition response element: servers return either shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionEntry {
    Location(Location),
    Link(LocationLink),
}

impl DefinitionEntry {
    /// Collapse to a plain `Location`; links resolve to their target.
    pub fn normalize(self) -> Location {
        match self {
            DefinitionEntry::Location(location) => location,
            DefinitionEntry::Link(link) => Location {
                uri: link.target_uri,
                range: link.target_range,
            },
        }
    }
}

/// One workspace-symbol match, flattened across the `SymbolInformation`
/// and `WorkspaceSymbol` wire shapes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolMatch {
    pub name: String,
    pub kind: SymbolKind,
    pub container_name: Option<String>,
    pub uri: String,
    pub range: Option<Range>,
}

impl SymbolMatch {
    /// The concrete location, when the server supplied a range.
    pub fn location(&self) -> Option<Location> {
        let uri: Uri = self.uri.parse().ok()?;
        Some(Location {
            uri,
            range: self.range?,
        })
    }
}

/// Reject arguments carrying shell metacharacters. The command line is
/// never passed through a shell, but a server config is still user input
/// and some servers re-exec helpers with it.
pub fn sanitize_args(command: &str, args: &[String]) -> Result<()> {
    const FORBIDDEN: &[char] = &[';', '|', '&', '$', '`'];
    for arg in std::iter::once(command).chain(args.iter().map(String::as_str)) {
        if arg.contains(FORBIDDEN) || arg.contains("$(") {
            return Err(BridgeError::DangerousArgument(arg.to_string()));
        }
    }
    Ok(())
}

/// Releases the partially-connected resources unless defused. Every early
/// return and panic inside `connect` goes through this.
struct ConnectGuard {
    child: Option<tokio::process::Child>,
    session: CancellationToken,
    armed: bool,
}

impl ConnectGuard {
    fn defuse(mut self) -> Option<tokio::process::Child> {
        self.armed = false;
        self.child.take()
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        if self.armed {
            self.session.cancel();
            if let Some(child) = self.child.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

/// A connected language server.
#[derive(Debug)]
pub struct LanguageClient {
    language: String,
    config: LanguageServerConfig,
    child: tokio::sync::Mutex<Option<tokio::process::Child>>,
    connection: Connection,
    session: CancellationToken,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
    semantic_decoder: RwLock<Option<SemanticTokenDecoder>>,
    workspace_paths: RwLock<Vec<PathBuf>>,
    metrics: Arc<ClientMetrics>,
    closed: AtomicBool,
}

impl LanguageClient {
    /// Spawn the configured server and drive the LSP handshake.
    pub async fn connect(language: &str, config: &LanguageServerConfig) -> Result<Arc<Self>> {
        sanitize_args(&config.command, &config.args)?;

        tracing::info!(
            "Spawning LSP server for {}: {} {:?}",
            language,
            config.command,
            config.args
        );

        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| BridgeError::ConnectFailed {
            step: "spawn",
            message: format!("{}: {}", config.command, e),
        })?;
        let pid = child.id().unwrap_or(0);

        let transport =
            StdioTransport::from_child(&mut child, language).map_err(|e| {
                BridgeError::ConnectFailed {
                    step: "pipes",
                    message: e.to_string(),
                }
            })?;

        let session = CancellationToken::new();
        let guard = ConnectGuard {
            child: Some(child),
            session: session.clone(),
            armed: true,
        };
        let connection = Connection::spawn(transport, session.clone(), language);

        let client = Self::handshake(language, config, connection, session, guard, pid).await?;
        Ok(client)
    }

    /// Connect with retry pacing. Sanitation failures are permanent and
    /// never retried; everything else is retried up to `max_retries`
    /// within `total_timeout`.
    pub async fn connect_with_retry(
        language: &str,
        config: &LanguageServerConfig,
        policy: &RetryPolicy,
    ) -> Result<Arc<Self>> {
        let deadline = Instant::now() + policy.total_timeout;
        let mut last_error = None;

        for attempt in 1..=policy.max_retries.max(1) {
            match Self::connect(language, config).await {
                Ok(client) => return Ok(client),
                Err(err @ BridgeError::DangerousArgument(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        "Connect attempt {}/{} for {} failed: {}",
                        attempt,
                        policy.max_retries,
                        language,
                        err
                    );
                    last_error = Some(err);
                }
            }

            if attempt < policy.max_retries && Instant::now() + policy.retry_delay < deadline {
                tokio::time::sleep(policy.retry_delay).await;
            } else {
                break;
            }
        }

        Err(last_error.unwrap_or(BridgeError::ConnectFailed {
            step: "retry",
            message: format!("no connect attempts made for {}", language),
        }))
    }

    /// Drive the handshake over an already-established transport. This is
    /// how in-process servers (and the test suite's mock) attach without a
    /// subprocess.
    pub async fn connect_over(
        language: &str,
        config: &LanguageServerConfig,
        transport: StdioTransport,
    ) -> Result<Arc<Self>> {
        let session = CancellationToken::new();
        let guard = ConnectGuard {
            child: None,
            session: session.clone(),
            armed: true,
        };
        let connection = Connection::spawn(transport, session.clone(), language);
        Self::handshake(language, config, connection, session, guard, 0).await
    }

    async fn handshake(
        language: &str,
        config: &LanguageServerConfig,
        connection: Connection,
        session: CancellationToken,
        guard: ConnectGuard,
        pid: u32,
    ) -> Result<Arc<Self>> {
        let metrics = Arc::new(ClientMetrics::new());
        metrics.set_process_id(pid);

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let root_uri_str = crate::bridge::uri::path_to_file_uri(&cwd);
        let root_uri: Option<Uri> = root_uri_str.parse().ok();

        #[allow(deprecated)]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri,
            capabilities: ClientCapabilities::default(),
            client_info: Some(ClientInfo {
                name: "MCP-LSP Bridge".to_string(),
                version: Some("1.0.0".to_string()),
            }),
            initialization_options: config.initialization_options.clone(),
            ..Default::default()
        };

        let params = serde_json::to_value(params).map_err(|e| BridgeError::ConnectFailed {
            step: "initialize",
            message: format!("unserialisable initialize params: {}", e),
        })?;

        let raw = connection
            .call(Initialize::METHOD, Some(params), INITIALIZE_TIMEOUT)
            .await
            .map_err(|e| BridgeError::ConnectFailed {
                step: "initialize",
                message: e.to_string(),
            })?;

        let init: InitializeResult =
            serde_json::from_value(raw).map_err(|e| BridgeError::ConnectFailed {
                step: "initialize",
                message: format!("undecodable initialize result: {}", e),
            })?;

        let decoder = SemanticTokenDecoder::from_capabilities(&init.capabilities);

        connection
            .notify(Initialized::METHOD, Some(serde_json::json!({})))
            .await
            .map_err(|e| BridgeError::ConnectFailed {
                step: "initialized",
                message: e.to_string(),
            })?;

        let child = guard.defuse();
        metrics.mark_initialized();
        tracing::info!("LSP server for {} initialized", language);

        let client = Arc::new(Self {
            language: language.to_string(),
            config: config.clone(),
            child: tokio::sync::Mutex::new(child),
            connection: connection.clone(),
            session: session.clone(),
            server_capabilities: RwLock::new(Some(init.capabilities)),
            semantic_decoder: RwLock::new(decoder),
            workspace_paths: RwLock::new(vec![cwd]),
            metrics,
            closed: AtomicBool::new(false),
        });

        // Watch for the server vanishing underneath us.
        {
            let connection = connection.clone();
            let metrics = client.metrics.clone();
            let session = session.clone();
            let language = language.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = session.cancelled() => {}
                    _ = connection.disconnected() => {
                        // A close() racing in has already settled the status.
                        if !session.is_cancelled() {
                            tracing::warn!("LSP server for {} disconnected", language);
                            metrics.set_status(ClientStatus::Disconnected);
                        }
                    }
                }
            });
        }

        Ok(client)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn server_config(&self) -> &LanguageServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub fn status(&self) -> ClientStatus {
        self.metrics.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ClientStatus::Connected
    }

    /// Whether the session can still serve requests. A dead session means
    /// the bridge should evict and reconnect.
    pub fn is_live(&self) -> bool {
        !self.session.is_cancelled()
            && !self.connection.is_disconnected()
            && !self.closed.load(Ordering::Acquire)
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.read().unwrap().clone()
    }

    pub fn workspace_paths(&self) -> Vec<PathBuf> {
        self.workspace_paths.read().unwrap().clone()
    }

    pub fn add_workspace_path(&self, path: PathBuf) {
        self.workspace_paths.write().unwrap().push(path);
    }

    /// Decode a packed semantic-token array using the legend captured at
    /// initialize time.
    pub fn decode_semantic_tokens(&self, data: &[u32], content: &str) -> Vec<TokenPosition> {
        match self.semantic_decoder.read().unwrap().as_ref() {
            Some(decoder) => decoder.decode(data, content),
            None => Vec::new(),
        }
    }

    /// All requests route through here for metrics and status accounting.
    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.metrics.record_request();
        match self.connection.call(method, Some(params), timeout).await {
            Ok(value) => {
                self.metrics.record_success();
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_failure(&err);
                Err(err)
            }
        }
    }

    fn position_params(uri: &str, line: u32, character: u32) -> Result<TextDocumentPositionParams> {
        let uri: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{}: {:?}", uri, e),
        })?;
        Ok(TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position: Position { line, character },
        })
    }

    fn to_params<T: serde::Serialize>(params: T) -> Result<Value> {
        serde_json::to_value(params).map_err(|e| BridgeError::Decode {
            what: "request params",
            message: e.to_string(),
        })
    }

    // --- document lifecycle -------------------------------------------------

    pub async fn did_open(&self, uri: &str, language_id: &str, text: &str, version: i32) -> Result<()> {
        let uri: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id: language_id.to_string(),
                version,
                text: text.to_string(),
            },
        };
        self.connection
            .notify("textDocument/didOpen", Some(Self::to_params(params)?))
            .await
    }

    pub async fn did_change(&self, uri: &str, text: &str, version: i32) -> Result<()> {
        let params = serde_json::json!({
            "textDocument": {"uri": uri, "version": version},
            "contentChanges": [{"text": text}],
        });
        self.connection
            .notify("textDocument/didChange", Some(params))
            .await
    }

    pub async fn did_save(&self, uri: &str) -> Result<()> {
        let uri: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = DidSaveTextDocumentParams {
            text_document: TextDocumentIdentifier { uri },
            text: None,
        };
        self.connection
            .notify("textDocument/didSave", Some(Self::to_params(params)?))
            .await
    }

    pub async fn did_close(&self, uri: &str) -> Result<()> {
        let uri: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri },
        };
        self.connection
            .notify("textDocument/didClose", Some(Self::to_params(params)?))
            .await
    }

    // --- queries ------------------------------------------------------------

    /// `workspace/symbol`, flattened across both result shapes.
    pub async fn workspace_symbols(&self, query: &str) -> Result<Vec<SymbolMatch>> {
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self
            .request(
                "workspace/symbol",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        Ok(decode_symbol_matches(raw))
    }

    /// `textDocument/definition`. Each element keeps its wire shape; use
    /// [`DefinitionEntry::normalize`] for plain locations.
    pub async fn definition(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<DefinitionEntry>> {
        let params = GotoDefinitionParams {
            text_document_position_params: Self::position_params(uri, line, character)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self
            .request(
                "textDocument/definition",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        decode_definition_entries(raw)
    }

    pub async fn references(
        &self,
        uri: &str,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        let params = ReferenceParams {
            text_document_position: Self::position_params(uri, line, character)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration,
            },
        };
        let raw = self
            .request(
                "textDocument/references",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "references",
            message: e.to_string(),
        })
    }

    /// `textDocument/hover`. Null decodes to absent; present-but-blank
    /// contents is an error.
    pub async fn hover(&self, uri: &str, line: u32, character: u32) -> Result<Option<Hover>> {
        let params = HoverParams {
            text_document_position_params: Self::position_params(uri, line, character)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let raw = self
            .request(
                "textDocument/hover",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        let hover: Hover = serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "hover",
            message: e.to_string(),
        })?;
        if hover_contents_empty(&hover.contents) {
            return Err(BridgeError::EmptyResponse("hover contents"));
        }
        Ok(Some(hover))
    }

    /// `textDocument/documentSymbol`, preferring the hierarchical shape
    /// and synthesising it from the flat one when needed.
    pub async fn document_symbols(&self, uri: &str) -> Result<Vec<DocumentSymbol>> {
        let uri_parsed: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri_parsed },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self
            .request(
                "textDocument/documentSymbol",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        decode_document_symbols(raw)
    }

    /// `textDocument/implementation`; shares definition's wire shapes.
    pub async fn implementation(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        // Same wire shape as definition.
        let params = GotoDefinitionParams {
            text_document_position_params: Self::position_params(uri, line, character)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self
            .request(
                "textDocument/implementation",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        Ok(decode_definition_entries(raw)?
            .into_iter()
            .map(DefinitionEntry::normalize)
            .collect())
    }

    /// `textDocument/signatureHelp`. Null is "no help", not an error.
    pub async fn signature_help(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<SignatureHelp>> {
        let params = SignatureHelpParams {
            context: None,
            text_document_position_params: Self::position_params(uri, line, character)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let raw = self
            .request(
                "textDocument/signatureHelp",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| BridgeError::Decode {
                what: "signature help",
                message: e.to_string(),
            })
    }

    pub async fn code_actions(
        &self,
        uri: &str,
        range: Range,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<Vec<CodeActionOrCommand>> {
        let uri_parsed: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = CodeActionParams {
            text_document: TextDocumentIdentifier { uri: uri_parsed },
            range,
            context: CodeActionContext {
                diagnostics,
                only: None,
                trigger_kind: None,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self
            .request(
                "textDocument/codeAction",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "code actions",
            message: e.to_string(),
        })
    }

    /// `textDocument/rename`. A null edit decodes to an empty one.
    pub async fn rename(
        &self,
        uri: &str,
        line: u32,
        character: u32,
        new_name: &str,
    ) -> Result<WorkspaceEdit> {
        let params = RenameParams {
            text_document_position: Self::position_params(uri, line, character)?,
            new_name: new_name.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let raw = self
            .request(
                "textDocument/rename",
                Self::to_params(params)?,
                RENAME_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(WorkspaceEdit::default());
        }
        serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "workspace edit",
            message: e.to_string(),
        })
    }

    pub async fn formatting(
        &self,
        uri: &str,
        tab_size: u32,
        insert_spaces: bool,
    ) -> Result<Vec<lsp_types::TextEdit>> {
        let uri_parsed: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = DocumentFormattingParams {
            text_document: TextDocumentIdentifier { uri: uri_parsed },
            options: FormattingOptions {
                tab_size,
                insert_spaces,
                properties: Default::default(),
                trim_trailing_whitespace: None,
                insert_final_newline: None,
                trim_final_newlines: None,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let raw = self
            .request(
                "textDocument/formatting",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "formatting edits",
            message: e.to_string(),
        })
    }

    /// `workspace/diagnostic` (pull model). Items are returned raw enough
    /// to serialise losslessly.
    pub async fn workspace_diagnostics(&self) -> Result<Vec<Value>> {
        let params = WorkspaceDiagnosticParams {
            identifier: None,
            previous_result_ids: Vec::new(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self
            .request(
                "workspace/diagnostic",
                Self::to_params(params)?,
                WORKSPACE_DIAGNOSTIC_TIMEOUT,
            )
            .await?;
        let items = raw
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items)
    }

    pub async fn prepare_call_hierarchy(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<CallHierarchyItem>> {
        let params = CallHierarchyPrepareParams {
            text_document_position_params: Self::position_params(uri, line, character)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let raw = self
            .request(
                "textDocument/prepareCallHierarchy",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "call hierarchy items",
            message: e.to_string(),
        })
    }

    pub async fn semantic_tokens_full(&self, uri: &str) -> Result<Option<SemanticTokens>> {
        let uri_parsed: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = SemanticTokensParams {
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            text_document: TextDocumentIdentifier { uri: uri_parsed },
        };
        let raw = self
            .request(
                "textDocument/semanticTokens/full",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| BridgeError::Decode {
                what: "semantic tokens",
                message: e.to_string(),
            })
    }

    pub async fn semantic_tokens_range(
        &self,
        uri: &str,
        range: Range,
    ) -> Result<Option<SemanticTokens>> {
        let uri_parsed: Uri = uri.parse().map_err(|e| BridgeError::Decode {
            what: "uri",
            message: format!("{:?}", e),
        })?;
        let params = SemanticTokensRangeParams {
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            text_document: TextDocumentIdentifier { uri: uri_parsed },
            range,
        };
        let raw = self
            .request(
                "textDocument/semanticTokens/range",
                Self::to_params(params)?,
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| BridgeError::Decode {
                what: "semantic tokens",
                message: e.to_string(),
            })
    }

    // --- shutdown -----------------------------------------------------------

    /// Polite LSP `shutdown` request. Callers wanting a graceful stop send
    /// this (then [`Self::exit`]) before [`Self::close`].
    pub async fn shutdown(&self) -> Result<()> {
        self.request("shutdown", Value::Null, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// LSP `exit` notification.
    pub async fn exit(&self) -> Result<()> {
        self.connection.notify("exit", None).await
    }

    /// Tear the client down: cancel the session, close the connection,
    /// give the child two seconds to exit, then kill and reap it.
    /// Idempotent; runs every cleanup step even when one fails.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Closing LSP client for {}", self.language);

        self.session.cancel();
        self.connection.close();

        let mut failures: Vec<String> = Vec::new();
        let mut child_slot = self.child.lock().await;
        if let Some(child) = child_slot.as_mut() {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("LSP child for {} exited with {}", self.language, status);
                }
                Ok(Err(e)) => failures.push(format!("wait: {}", e)),
                Err(_) => {
                    tracing::warn!(
                        "LSP child for {} did not exit in {:?}, killing",
                        self.language,
                        CLOSE_GRACE
                    );
                    if let Err(e) = child.kill().await {
                        failures.push(format!("kill: {}", e));
                    }
                }
            }
        }
        *child_slot = None;
        drop(child_slot);

        self.metrics.set_status(ClientStatus::Uninitialized);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("close: {}", failures.join("; "))).into())
        }
    }
}

/// True when hover contents carry no text at all.
fn hover_contents_empty(contents: &HoverContents) -> bool {
    fn marked_empty(marked: &MarkedString) -> bool {
        match marked {
            MarkedString::String(s) => s.is_empty(),
            MarkedString::LanguageString(ls) => ls.value.is_empty(),
        }
    }
    match contents {
        HoverContents::Scalar(marked) => marked_empty(marked),
        HoverContents::Array(items) => items.iter().all(marked_empty),
        HoverContents::Markup(markup) => markup.value.is_empty(),
    }
}

/// Decode a definition-style response: null, a bare `Location`, an array
/// of `Location`s, or an array of `LocationLink`s.
fn decode_definition_entries(raw: Value) -> Result<Vec<DefinitionEntry>> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    if raw.is_object() {
        let location: Location =
            serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
                what: "definition",
                message: e.to_string(),
            })?;
        return Ok(vec![DefinitionEntry::Location(location)]);
    }
    let Value::Array(items) = raw else {
        return Err(BridgeError::Decode {
            what: "definition",
            message: "expected null, object, or array".to_string(),
        });
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        // A Location has a `uri`; a LocationLink has a `targetUri`.
        if item.get("targetUri").is_some() {
            let link: LocationLink =
                serde_json::from_value(item).map_err(|e| BridgeError::Decode {
                    what: "location link",
                    message: e.to_string(),
                })?;
            entries.push(DefinitionEntry::Link(link));
        } else {
            let location: Location =
                serde_json::from_value(item).map_err(|e| BridgeError::Decode {
                    what: "location",
                    message: e.to_string(),
                })?;
            entries.push(DefinitionEntry::Location(location));
        }
    }
    Ok(entries)
}

/// Decode a `workspace/symbol` response, accepting both the flat
/// `SymbolInformation[]` and the newer `WorkspaceSymbol[]` shapes.
fn decode_symbol_matches(raw: Value) -> Vec<SymbolMatch> {
    let Value::Array(items) = raw else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let kind: SymbolKind = serde_json::from_value(item.get("kind")?.clone()).ok()?;
            let container_name = item
                .get("containerName")
                .and_then(Value::as_str)
                .map(String::from);
            let location = item.get("location")?;
            let uri = location.get("uri")?.as_str()?.to_string();
            let range = location
                .get("range")
                .and_then(|r| serde_json::from_value(r.clone()).ok());
            Some(SymbolMatch {
                name,
                kind,
                container_name,
                uri,
                range,
            })
        })
        .collect()
}

/// Decode a `documentSymbol` response. Hierarchical `DocumentSymbol[]` is
/// preferred; `SymbolInformation[]` is lifted into it with empty children
/// and `selectionRange == range == location.range`.
fn decode_document_symbols(raw: Value) -> Result<Vec<DocumentSymbol>> {
    if raw.is_null() {
        return Ok(Vec::new());
    }

    if let Ok(symbols) = serde_json::from_value::<Vec<DocumentSymbol>>(raw.clone()) {
        if !symbols.is_empty() {
            return Ok(symbols);
        }
    }

    let flat: Vec<SymbolInformation> =
        serde_json::from_value(raw).map_err(|e| BridgeError::Decode {
            what: "document symbols",
            message: e.to_string(),
        })?;

    #[allow(deprecated)]
    Ok(flat
        .into_iter()
        .map(|info| DocumentSymbol {
            name: info.name,
            detail: None,
            kind: info.kind,
            tags: info.tags,
            deprecated: None,
            range: info.location.range,
            selection_range: info.location.range,
            children: Some(Vec::new()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rejects_shell_metacharacters() {
        for bad in [
            "foo;rm -rf /",
            "a|b",
            "x&",
            "$HOME",
            "`id`",
            "run$(id)",
        ] {
            let err = sanitize_args("server", &[bad.to_string()]).unwrap_err();
            assert!(
                matches!(err, BridgeError::DangerousArgument(_)),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_sanitize_rejects_dangerous_command() {
        let err = sanitize_args("gopls;true", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::DangerousArgument(_)));
    }

    #[test]
    fn test_sanitize_accepts_plain_arguments() {
        sanitize_args(
            "typescript-language-server",
            &["--stdio".to_string(), "--log-level=4".to_string()],
        )
        .unwrap();
    }

    #[test]
    fn test_definition_decodes_location_array() {
        let raw = serde_json::json!([{
            "uri": "file:///d.go",
            "range": {"start": {"line": 5, "character": 0}, "end": {"line": 5, "character": 10}},
        }]);
        let entries = decode_definition_entries(raw).unwrap();
        assert_eq!(entries.len(), 1);
        let location = entries[0].clone().normalize();
        assert_eq!(location.uri.as_str(), "file:///d.go");
        assert_eq!(location.range.start.line, 5);
        assert_eq!(location.range.end.character, 10);
    }

    #[test]
    fn test_definition_decodes_location_link_array() {
        let raw = serde_json::json!([{
            "targetUri": "file:///t.go",
            "targetRange": {"start": {"line": 1, "character": 2}, "end": {"line": 1, "character": 9}},
            "targetSelectionRange": {"start": {"line": 1, "character": 2}, "end": {"line": 1, "character": 9}},
        }]);
        let entries = decode_definition_entries(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], DefinitionEntry::Link(_)));
        let location = entries[0].clone().normalize();
        assert_eq!(location.uri.as_str(), "file:///t.go");
        assert_eq!(location.range.start.line, 1);
    }

    #[test]
    fn test_definition_null_is_empty() {
        assert!(decode_definition_entries(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_definition_bare_location_accepted() {
        let raw = serde_json::json!({
            "uri": "file:///one.go",
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
        });
        let entries = decode_definition_entries(raw).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_document_symbol_flat_fallback() {
        let raw = serde_json::json!([{
            "name": "Handler",
            "kind": 12,
            "location": {
                "uri": "file:///x.go",
                "range": {"start": {"line": 3, "character": 0}, "end": {"line": 9, "character": 1}},
            },
        }]);
        let symbols = decode_document_symbols(raw).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "Handler");
        assert_eq!(symbols[0].range, symbols[0].selection_range);
        assert_eq!(symbols[0].range.start.line, 3);
        assert_eq!(symbols[0].children.as_deref(), Some(&[] as &[DocumentSymbol]));
    }

    #[test]
    fn test_document_symbol_hierarchical_preferred() {
        let raw = serde_json::json!([{
            "name": "Server",
            "kind": 5,
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 20, "character": 1}},
            "selectionRange": {"start": {"line": 0, "character": 5}, "end": {"line": 0, "character": 11}},
            "children": [{
                "name": "run",
                "kind": 6,
                "range": {"start": {"line": 2, "character": 0}, "end": {"line": 10, "character": 1}},
                "selectionRange": {"start": {"line": 2, "character": 3}, "end": {"line": 2, "character": 6}},
            }],
        }]);
        let symbols = decode_document_symbols(raw).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].children.as_ref().unwrap().len(), 1);
        assert_eq!(symbols[0].children.as_ref().unwrap()[0].name, "run");
    }

    #[test]
    fn test_symbol_match_decodes_symbol_information() {
        let raw = serde_json::json!([{
            "name": "Handler",
            "kind": 12,
            "location": {
                "uri": "file:///x.go",
                "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 7}},
            },
        }]);
        let matches = decode_symbol_matches(raw);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Handler");
        assert!(matches[0].location().is_some());
    }

    #[test]
    fn test_symbol_match_tolerates_uri_only_location() {
        let raw = serde_json::json!([{
            "name": "Thing",
            "kind": 13,
            "location": {"uri": "file:///y.go"},
        }]);
        let matches = decode_symbol_matches(raw);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].range.is_none());
        assert!(matches[0].location().is_none());
    }

    #[test]
    fn test_hover_empty_detection() {
        assert!(hover_contents_empty(&HoverContents::Scalar(
            MarkedString::String(String::new())
        )));
        assert!(hover_contents_empty(&HoverContents::Array(vec![])));
        assert!(!hover_contents_empty(&HoverContents::Scalar(
            MarkedString::String("docs".to_string())
        )));
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert_eq!(policy.total_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_metrics_error_then_success_returns_to_connected() {
        let metrics = ClientMetrics::new();
        metrics.mark_initialized();
        assert_eq!(metrics.status(), ClientStatus::Connected);

        metrics.record_request();
        metrics.record_failure(&BridgeError::Cancelled);
        assert_eq!(metrics.status(), ClientStatus::Error);
        assert_eq!(metrics.failed_requests(), 1);

        metrics.record_request();
        metrics.record_success();
        assert_eq!(metrics.status(), ClientStatus::Connected);
        assert_eq!(metrics.total_requests(), 2);
    }

    #[tokio::test]
    async fn test_connect_spawn_failure_reports_step() {
        let config = LanguageServerConfig {
            command: "definitely-not-a-real-language-server".to_string(),
            args: vec![],
            languages: vec!["x".to_string()],
            filetypes: vec![],
            initialization_options: None,
        };
        let err = LanguageClient::connect("x", &config).await.unwrap_err();
        match err {
            BridgeError::ConnectFailed { step, .. } => assert_eq!(step, "spawn"),
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_dangerous_args_before_spawn() {
        let config = LanguageServerConfig {
            command: "gopls".to_string(),
            args: vec!["serve; rm -rf /".to_string()],
            languages: vec!["go".to_string()],
            filetypes: vec![],
            initialization_options: None,
        };
        let err = LanguageClient::connect("go", &config).await.unwrap_err();
        assert!(matches!(err, BridgeError::DangerousArgument(_)));
    }
}
