//! MCP-LSP Bridge
//!
//! Multiplexes many Language Server Protocol servers behind one typed
//! operation surface. An MCP host calls operations such as "find
//! references" or "workspace diagnostics"; this crate infers the relevant
//! language, spawns and supervises the matching LSP subprocess over
//! stdio, drives the handshake and document lifecycle, and returns
//! normalised results.
//!
//! Layering, leaves first:
//! - [`transport`]: framed stdio byte stream over a child process
//! - [`jsonrpc`]: LSP framing and request/response multiplexing
//! - [`client`]: typed LSP methods, connect/retry, metrics, shutdown
//! - [`config`] and [`detection`]: server config and project language
//!   scoring
//! - [`bridge`]: one lazily-connected client per language and the
//!   operation set the MCP layer consumes
//! - [`analysis`]: cross-language analyses with a TTL+LRU cache and
//!   bounded error handling
//! - [`fanout`]: cancellable concurrent fan-out used by the analyses
//!
//! The MCP tool surface itself (tool registration, argument decoding,
//! response formatting) lives with the host; this crate is the runtime
//! underneath it.

pub mod analysis;
pub mod bridge;
pub mod client;
pub mod config;
pub mod detection;
pub mod error;
pub mod fanout;
pub mod jsonrpc;
pub mod security;
pub mod semantic;
pub mod transport;

pub use bridge::Bridge;
pub use client::{ClientStatus, LanguageClient, RetryPolicy};
pub use config::{LanguageServerConfig, LspServerConfig};
pub use error::{BridgeError, Result};
