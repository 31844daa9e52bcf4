//! Bridge/router
//!
//! Owns one lazily-connected [`LanguageClient`] per language and exposes
//! the operation surface the MCP layer calls. Responsibilities:
//! - infer the language of a file from its extension
//! - connect, cache, and evict clients as their sessions live and die
//! - make sure documents are opened before position-based queries
//! - normalise URIs on the way in and apply text edits on the way out
//!
//! Callers hand in filesystem paths or URIs interchangeably; everything is
//! validated against the allowed-directory set before it reaches a server.

pub mod edits;
pub mod uri;

use crate::client::{
    ClientStatus, DefinitionEntry, LanguageClient, RetryPolicy, SymbolMatch,
};
use crate::config::LspServerConfig;
use crate::error::{BridgeError, Result};
use crate::fanout;
use crate::security;
use lsp_types::{CallHierarchyItem, CodeActionOrCommand, DocumentSymbol, Hover, Location, Range, SignatureHelp, WorkspaceEdit};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A per-language failure surfaced from a fan-out operation.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageFailure {
    pub language: String,
    pub message: String,
}

/// Aggregated workspace diagnostics with per-language partial failures.
#[derive(Debug, Clone, Serialize, Default)]
pub struct WorkspaceDiagnosticsOutcome {
    pub reports: Vec<Value>,
    pub errors: Vec<LanguageFailure>,
}

/// Rename result; the preview maps each touched URI to its post-edit
/// content without writing anything to disk.
#[derive(Debug, Clone, Serialize)]
pub struct RenameOutcome {
    pub edit: WorkspaceEdit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<BTreeMap<String, String>>,
}

/// Document symbols plus the references of each named symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticExtract {
    pub symbols: Vec<DocumentSymbol>,
    pub references: BTreeMap<String, Vec<Location>>,
}

/// The multiplexing router over all language clients.
pub struct Bridge {
    config: Arc<LspServerConfig>,
    clients: tokio::sync::Mutex<HashMap<String, Arc<LanguageClient>>>,
    allowed_dirs: Vec<PathBuf>,
    open_documents: std::sync::Mutex<HashSet<String>>,
    retry_policy: RetryPolicy,
}

impl Bridge {
    pub fn new(config: LspServerConfig, allowed_dirs: Vec<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            clients: tokio::sync::Mutex::new(HashMap::new()),
            allowed_dirs,
            open_documents: std::sync::Mutex::new(HashSet::new()),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn config(&self) -> &LspServerConfig {
        &self.config
    }

    pub fn allowed_directories(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    /// Infer the language of a file from its extension.
    pub fn infer_language(&self, path: &str) -> Result<String> {
        let as_path = uri::uri_to_path(path);
        let ext = Path::new(&as_path)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| BridgeError::UnknownExtension(as_path.clone()))?;
        self.config
            .find_extension_language(ext)
            .map(str::to_string)
    }

    /// Get the client for a language, connecting lazily. A cached client
    /// whose session has died is closed, dropped, and replaced.
    pub async fn get_client_for_language(&self, language: &str) -> Result<Arc<LanguageClient>> {
        let mut clients = self.clients.lock().await;

        if let Some(existing) = clients.get(language) {
            if existing.is_live() {
                return Ok(existing.clone());
            }
            tracing::warn!("Evicting dead LSP client for {}", language);
            let stale = clients.remove(language);
            if let Some(stale) = stale {
                let _ = stale.close().await;
            }
        }

        let server_config = self.config.find_server_config(language)?;
        let client =
            LanguageClient::connect_with_retry(language, server_config, &self.retry_policy)
                .await?;
        clients.insert(language.to_string(), client.clone());
        Ok(client)
    }

    /// Adopt an already-connected client (an in-process server, or a test
    /// double speaking real LSP over pipes).
    pub async fn register_client(&self, language: &str, client: Arc<LanguageClient>) {
        self.clients
            .lock()
            .await
            .insert(language.to_string(), client);
    }

    /// Snapshot of the live clients, for fan-out operations.
    pub async fn connected_clients(&self) -> Vec<(String, Arc<LanguageClient>)> {
        self.clients
            .lock()
            .await
            .iter()
            .filter(|(_, c)| c.is_live())
            .map(|(lang, c)| (lang.clone(), c.clone()))
            .collect()
    }

    /// Resolve a caller-supplied path or URI: allowed-directory check,
    /// then normalisation to URI form. Non-file schemes pass through
    /// untouched.
    fn resolve_target(&self, target: &str) -> Result<String> {
        let normalised = uri::normalize_uri(target);
        if let Some(_rest) = normalised.strip_prefix("file://") {
            let path = uri::uri_to_path(&normalised);
            security::within_allowed(Path::new(&path), &self.allowed_dirs)?;
        }
        Ok(normalised)
    }

    /// Open a document on a client before querying it. Failures are
    /// logged and suppressed: several servers tolerate implicit opens, so
    /// the follow-up request is attempted regardless.
    pub async fn ensure_document_open(
        &self,
        client: &LanguageClient,
        normalised_uri: &str,
        language: &str,
    ) {
        let key = format!("{}:{}", language, normalised_uri);
        if self.open_documents.lock().unwrap().contains(&key) {
            return;
        }

        let path = uri::uri_to_path(normalised_uri);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Could not read {} for didOpen: {}", path, e);
                return;
            }
        };

        match client.did_open(normalised_uri, language, &text, 1).await {
            Ok(()) => {
                self.open_documents.lock().unwrap().insert(key);
            }
            Err(e) => {
                tracing::warn!("didOpen for {} failed (continuing): {}", normalised_uri, e);
            }
        }
    }

    /// Resolve target and client, opening the document along the way.
    async fn client_for_target(
        &self,
        language: &str,
        target: &str,
    ) -> Result<(Arc<LanguageClient>, String)> {
        let uri = self.resolve_target(target)?;
        let client = self.get_client_for_language(language).await?;
        self.ensure_document_open(&client, &uri, language).await;
        Ok((client, uri))
    }

    // --- operation surface --------------------------------------------------

    /// Find all references to the symbol at a position.
    pub async fn find_symbol_references(
        &self,
        language: &str,
        target: &str,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        let (client, uri) = self.client_for_target(language, target).await?;
        client
            .references(&uri, line, character, include_declaration)
            .await
    }

    /// Find the definitions of the symbol at a position. Server errors
    /// collapse to an empty list: "no definition found" is an answer, not
    /// a failure.
    pub async fn find_symbol_definitions(
        &self,
        language: &str,
        target: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let (client, uri) = self.client_for_target(language, target).await?;
        match client.definition(&uri, line, character).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(DefinitionEntry::normalize)
                .collect()),
            Err(BridgeError::ExternalLsp { code, message }) => {
                tracing::debug!(
                    "definition lookup failed ({}: {}), returning empty",
                    code,
                    message
                );
                Ok(Vec::new())
            }
            Err(other) => Err(other),
        }
    }

    /// Search workspace symbols on one language's server.
    pub async fn search_text_in_workspace(
        &self,
        language: &str,
        query: &str,
    ) -> Result<Vec<SymbolMatch>> {
        let client = self.get_client_for_language(language).await?;
        client.workspace_symbols(query).await
    }

    /// Document symbols for a file, language inferred from its extension.
    pub async fn document_symbols(&self, target: &str) -> Result<Vec<DocumentSymbol>> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        client.document_symbols(&uri).await
    }

    pub async fn signature_help(
        &self,
        target: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<SignatureHelp>> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        client.signature_help(&uri, line, character).await
    }

    pub async fn hover(&self, target: &str, line: u32, character: u32) -> Result<Option<Hover>> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        client.hover(&uri, line, character).await
    }

    pub async fn code_actions(
        &self,
        target: &str,
        range: Range,
    ) -> Result<Vec<CodeActionOrCommand>> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        client.code_actions(&uri, range, Vec::new()).await
    }

    /// Format a document and return the edited content; the file on disk
    /// is never touched.
    pub async fn format_document(
        &self,
        target: &str,
        tab_size: u32,
        insert_spaces: bool,
    ) -> Result<String> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        let edits = client.formatting(&uri, tab_size, insert_spaces).await?;
        let path = uri::uri_to_path(&uri);
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(edits::apply_text_edits_to_content(&content, &edits))
    }

    /// Rename the symbol at a position. With `preview`, the outcome also
    /// carries each touched file's post-edit content.
    pub async fn rename_symbol(
        &self,
        target: &str,
        line: u32,
        character: u32,
        new_name: &str,
        preview: bool,
    ) -> Result<RenameOutcome> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        let edit = client.rename(&uri, line, character, new_name).await?;

        let preview = if preview {
            Some(self.render_edit_preview(&edit).await)
        } else {
            None
        };
        Ok(RenameOutcome { edit, preview })
    }

    /// Apply a workspace edit to in-memory copies of the touched files.
    async fn render_edit_preview(&self, edit: &WorkspaceEdit) -> BTreeMap<String, String> {
        let mut per_uri: BTreeMap<String, Vec<lsp_types::TextEdit>> = BTreeMap::new();

        if let Some(changes) = &edit.changes {
            for (uri, edits) in changes {
                per_uri
                    .entry(uri.as_str().to_string())
                    .or_default()
                    .extend(edits.iter().cloned());
            }
        }
        if let Some(lsp_types::DocumentChanges::Edits(doc_edits)) = &edit.document_changes {
            for doc_edit in doc_edits {
                let entry = per_uri
                    .entry(doc_edit.text_document.uri.as_str().to_string())
                    .or_default();
                for one_of in &doc_edit.edits {
                    match one_of {
                        lsp_types::OneOf::Left(text_edit) => entry.push(text_edit.clone()),
                        lsp_types::OneOf::Right(annotated) => {
                            entry.push(annotated.text_edit.clone())
                        }
                    }
                }
            }
        }

        let mut preview = BTreeMap::new();
        for (uri, edits) in per_uri {
            let path = uri::uri_to_path(&uri);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    preview.insert(uri, edits::apply_text_edits_to_content(&content, &edits));
                }
                Err(e) => {
                    tracing::warn!("Could not read {} for rename preview: {}", path, e);
                }
            }
        }
        preview
    }

    pub async fn find_implementations(
        &self,
        target: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        client.implementation(&uri, line, character).await
    }

    pub async fn prepare_call_hierarchy(
        &self,
        target: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<CallHierarchyItem>> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        client.prepare_call_hierarchy(&uri, line, character).await
    }

    /// Pull workspace diagnostics from each named language's server,
    /// concurrently. An empty language set means there is no work to do.
    /// Per-language failures are collected rather than aborting the
    /// fan-out.
    pub async fn workspace_diagnostics(
        &self,
        languages: &[String],
    ) -> WorkspaceDiagnosticsOutcome {
        let mut outcome = WorkspaceDiagnosticsOutcome::default();

        let mut clients = Vec::new();
        for language in languages {
            match self.get_client_for_language(language).await {
                Ok(client) => clients.push((language.clone(), client)),
                Err(e) => {
                    tracing::warn!("Skipping diagnostics for {}: {}", language, e);
                    outcome.errors.push(LanguageFailure {
                        language: language.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let ctx = CancellationToken::new();
        let operations: Vec<_> = clients
            .into_iter()
            .map(|(language, client)| {
                (language, move || async move {
                    client.workspace_diagnostics().await
                })
            })
            .collect();

        match fanout::map_with_keys(&ctx, operations).await {
            Ok(outcomes) => {
                for keyed in outcomes {
                    match (keyed.value, keyed.error) {
                        (Some(items), _) => outcome.reports.extend(items),
                        (None, Some(e)) => outcome.errors.push(LanguageFailure {
                            language: keyed.key,
                            message: e.to_string(),
                        }),
                        (None, None) => {}
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Diagnostics fan-out aborted: {}", e);
            }
        }

        outcome
    }

    /// Document symbols plus the reference set of every named symbol in
    /// the file.
    pub async fn semantic_extract(&self, target: &str) -> Result<SemanticExtract> {
        let language = self.infer_language(target)?;
        let (client, uri) = self.client_for_target(&language, target).await?;
        let symbols = client.document_symbols(&uri).await?;

        let mut references = BTreeMap::new();
        for symbol in &symbols {
            let position = symbol.selection_range.start;
            match client
                .references(&uri, position.line, position.character, true)
                .await
            {
                Ok(locations) => {
                    references.insert(symbol.name.clone(), locations);
                }
                Err(e) => {
                    tracing::debug!("references for {} failed: {}", symbol.name, e);
                }
            }
        }

        Ok(SemanticExtract { symbols, references })
    }

    /// Status of every cached client, for observability.
    pub async fn client_statuses(&self) -> BTreeMap<String, ClientStatus> {
        self.clients
            .lock()
            .await
            .iter()
            .map(|(lang, c)| (lang.clone(), c.status()))
            .collect()
    }

    /// Close every client and drop the map. Safe to call more than once.
    pub async fn close(&self) {
        let drained: Vec<(String, Arc<LanguageClient>)> =
            self.clients.lock().await.drain().collect();
        for (language, client) in drained {
            if let Err(e) = client.close().await {
                tracing::warn!("Error closing client for {}: {}", language, e);
            }
        }
        self.open_documents.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bridge() -> Bridge {
        let config = LspServerConfig::from_json(
            r#"{
                "language_servers": {
                    "gopls": {"command": "gopls", "languages": ["go"]}
                },
                "extension_language_map": {".go": "go", ".py": "python"},
                "language_server_map": {"gopls": ["go"]}
            }"#,
        )
        .unwrap();
        Bridge::new(config, vec![PathBuf::from("/")])
    }

    #[test]
    fn test_infer_language_from_path_and_uri() {
        let bridge = test_bridge();
        assert_eq!(bridge.infer_language("/src/main.go").unwrap(), "go");
        assert_eq!(bridge.infer_language("file:///src/main.go").unwrap(), "go");
        assert_eq!(bridge.infer_language("script.py").unwrap(), "python");
    }

    #[test]
    fn test_infer_language_unknown_extension() {
        let bridge = test_bridge();
        assert!(matches!(
            bridge.infer_language("/src/main.zig"),
            Err(BridgeError::UnknownExtension(_))
        ));
        assert!(matches!(
            bridge.infer_language("/no-extension"),
            Err(BridgeError::UnknownExtension(_))
        ));
    }

    #[test]
    fn test_resolve_target_rejects_disallowed_path() {
        let config = LspServerConfig::from_json(
            r#"{"extension_language_map": {".go": "go"}}"#,
        )
        .unwrap();
        let bridge = Bridge::new(config, vec![PathBuf::from("/workspace")]);
        assert!(matches!(
            bridge.resolve_target("/etc/passwd"),
            Err(BridgeError::PathNotAllowed(_))
        ));
        assert!(bridge.resolve_target("/workspace/main.go").is_ok());
    }

    #[test]
    fn test_resolve_target_passes_non_file_schemes() {
        let bridge = test_bridge();
        assert_eq!(
            bridge.resolve_target("untitled://buffer-7").unwrap(),
            "untitled://buffer-7"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_language_fails_fast() {
        let bridge = test_bridge();
        let err = bridge.get_client_for_language("cobol").await.unwrap_err();
        assert!(matches!(err, BridgeError::NoServerConfig(_)));
    }

    #[tokio::test]
    async fn test_workspace_diagnostics_empty_language_set_is_no_work() {
        let bridge = test_bridge();
        let outcome = bridge.workspace_diagnostics(&[]).await;
        assert!(outcome.reports.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let bridge = test_bridge();
        bridge.close().await;
        bridge.close().await;
    }
}
