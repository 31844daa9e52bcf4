//! Error taxonomy for the bridge
//!
//! Every failure the crate can surface is one of these variants. The MCP
//! layer maps variants to human-readable strings; nothing here formats
//! prose beyond the `Display` impls.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// All failures the bridge can report.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration file is unparsable or missing a required section.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A file extension has no entry in the extension-language map.
    #[error("unknown file extension: {0}")]
    UnknownExtension(String),

    /// A language has no server mapping in the configuration.
    #[error("no language server configured for {0}")]
    NoServerConfig(String),

    /// Spawn, pipe setup, or the initialize exchange failed after retries.
    #[error("connection failed at {step}: {message}")]
    ConnectFailed { step: &'static str, message: String },

    /// Argv sanitation rejected a shell-metacharacter argument.
    #[error("rejected dangerous argument: {0:?}")]
    DangerousArgument(String),

    /// A request exceeded its deadline.
    #[error("request {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The session or an individual request was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A server response did not match any accepted shape.
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// Structurally present but semantically empty data where non-empty
    /// content is required (e.g. hover with blank contents).
    #[error("server returned empty {0}")]
    EmptyResponse(&'static str),

    /// Stream-level failure on the child's pipes.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied path is outside the allowed directory set.
    #[error("path not allowed: {}", .0.display())]
    PathNotAllowed(PathBuf),

    /// A symbol-relationship target could not be resolved to a location.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// The analysis request named a type outside the supported set.
    #[error("unsupported analysis type: {0}")]
    UnsupportedAnalysisType(String),

    /// The pattern-analysis request named a pattern outside the supported set.
    #[error("unsupported pattern type: {0}")]
    UnsupportedPatternType(String),

    /// The server answered with a JSON-RPC error; code and message verbatim.
    #[error("language server error {code}: {message}")]
    ExternalLsp { code: i64, message: String },
}

impl BridgeError {
    /// Whether this error is a cancellation (session teardown or request
    /// abort), as opposed to a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }

    /// Whether this error is a per-request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}
