//! Language server configuration
//!
//! Loads the JSON configuration that maps file extensions to languages and
//! languages to server commands. The extension map is the one required
//! section; everything else has workable defaults.

use crate::error::{BridgeError, Result};
use crate::security;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Configuration for a single language server process.
///
/// Immutable after load; cloned into each client on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageServerConfig {
    /// Executable to spawn.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Languages this server claims to support.
    #[serde(default)]
    pub languages: Vec<String>,

    /// File extensions this server claims to support.
    #[serde(default)]
    pub filetypes: Vec<String>,

    /// Opaque initialization options forwarded verbatim in the
    /// `initialize` request. Some servers require these (e.g. Deno's
    /// `{"enable": true}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
}

/// Global parameters shared by all servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub log_file_path: Option<String>,

    #[serde(default = "GlobalConfig::default_log_level")]
    pub log_level: String,

    #[serde(default = "GlobalConfig::default_max_log_files")]
    pub max_log_files: u32,

    #[serde(default = "GlobalConfig::default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    #[serde(default = "GlobalConfig::default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

impl GlobalConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_max_log_files() -> u32 {
        5
    }

    fn default_max_restart_attempts() -> u32 {
        3
    }

    fn default_restart_delay_ms() -> u64 {
        2000
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_file_path: None,
            log_level: Self::default_log_level(),
            max_log_files: Self::default_max_log_files(),
            max_restart_attempts: Self::default_max_restart_attempts(),
            restart_delay_ms: Self::default_restart_delay_ms(),
        }
    }
}

/// The full bridge configuration.
///
/// Invariant: `extension_language_map` and `language_extension_map` are
/// mutual inverses modulo languages with several extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspServerConfig {
    /// Map from server name to its process configuration.
    #[serde(default)]
    pub language_servers: HashMap<String, LanguageServerConfig>,

    /// Map from file extension (leading dot) to language. Required.
    #[serde(default)]
    pub extension_language_map: HashMap<String, String>,

    /// Map from language to its extensions.
    #[serde(default)]
    pub language_extension_map: HashMap<String, Vec<String>>,

    /// Map from server name to the languages it serves.
    #[serde(default)]
    pub language_server_map: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub global: GlobalConfig,
}

impl LspServerConfig {
    /// Load a configuration file after validating the path against the
    /// allowed directory set.
    pub fn load(path: &Path, allowed_dirs: &[std::path::PathBuf]) -> Result<Self> {
        let path = security::within_allowed(path, allowed_dirs)?;
        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_json(&text)?;
        tracing::info!(
            "Loaded LSP config from {}: {} servers, {} extensions",
            path.display(),
            config.language_servers.len(),
            config.extension_language_map.len()
        );
        Ok(config)
    }

    /// Parse and validate a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: LspServerConfig = serde_json::from_str(text)
            .map_err(|e| BridgeError::ConfigInvalid(format!("unparsable JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations missing the required extension map.
    pub fn validate(&self) -> Result<()> {
        if self.extension_language_map.is_empty() {
            return Err(BridgeError::ConfigInvalid(
                "missing extension_language_map".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a file extension (with or without leading dot) to a language.
    pub fn find_extension_language(&self, ext: &str) -> Result<&str> {
        let dotted;
        let key = if ext.starts_with('.') {
            ext
        } else {
            dotted = format!(".{}", ext);
            &dotted
        };
        self.extension_language_map
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| BridgeError::UnknownExtension(ext.to_string()))
    }

    /// Resolve a language to its server configuration, going through
    /// `language_server_map` first and falling back to a server whose
    /// declared languages include it.
    pub fn find_server_config(&self, language: &str) -> Result<&LanguageServerConfig> {
        for (server_name, languages) in &self.language_server_map {
            if languages.iter().any(|l| l == language) {
                if let Some(config) = self.language_servers.get(server_name) {
                    return Ok(config);
                }
                tracing::warn!(
                    "language_server_map names '{}' for {} but no such server is defined",
                    server_name,
                    language
                );
            }
        }

        self.language_servers
            .values()
            .find(|c| c.languages.iter().any(|l| l == language))
            .ok_or_else(|| BridgeError::NoServerConfig(language.to_string()))
    }

    /// Extensions registered for a language, if any.
    pub fn extensions_for_language(&self, language: &str) -> &[String] {
        self.language_extension_map
            .get(language)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
