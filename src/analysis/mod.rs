//! Cross-language project analyzer
//!
//! Orchestrates LSP calls across every connected language client to answer
//! workspace, symbol-relationship, file, and pattern analyses. Results are
//! cached for an hour under a canonical request key; per-language failures
//! are absorbed by the bounded error handler so a partially-broken
//! workspace still yields a partial answer.

pub mod cache;
pub mod error_handler;
pub mod types;

mod file;
mod patterns;
mod relationships;
mod workspace;

use self::cache::{CacheStats, TtlCache};
use self::error_handler::ErrorHandler;
use self::types::{AnalysisData, AnalysisMetadata, AnalysisRequest, AnalysisResult, AnalysisType};
use crate::bridge::Bridge;
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long a finished analysis stays valid.
const RESULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Bound on distinct cached analyses.
const CACHE_CAPACITY: usize = 128;

/// The analyzer. Shares the bridge's clients read-only; owns its cache
/// and error policy.
pub struct ProjectAnalyzer {
    bridge: Arc<Bridge>,
    cache: TtlCache<AnalysisResult>,
    error_handler: ErrorHandler,
    ctx: CancellationToken,
}

impl ProjectAnalyzer {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self::with_error_handler(bridge, ErrorHandler::default())
    }

    pub fn with_error_handler(bridge: Arc<Bridge>, error_handler: ErrorHandler) -> Self {
        Self {
            bridge,
            cache: TtlCache::new(CACHE_CAPACITY, RESULT_TTL),
            error_handler,
            ctx: CancellationToken::new(),
        }
    }

    /// Cancel every in-flight analysis fan-out.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Run (or recall) one analysis.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult> {
        let key = request.cache_key();

        if let Some(mut cached) = self.cache.get(&key) {
            tracing::debug!("Analysis cache hit for {}", key);
            cached.metadata.cache_hits += 1;
            return Ok(cached);
        }

        tracing::info!(
            "Running {} for target {:?}",
            request.analysis_type.as_str(),
            request.target
        );
        let mut metadata = AnalysisMetadata {
            cache_misses: 1,
            ..Default::default()
        };
        let started = Instant::now();

        let data = match request.analysis_type {
            AnalysisType::WorkspaceAnalysis => AnalysisData::Workspace(
                workspace::run(
                    &self.bridge,
                    &request,
                    &mut metadata,
                    &self.error_handler,
                    &self.ctx,
                )
                .await?,
            ),
            AnalysisType::SymbolRelationships => AnalysisData::SymbolRelationships(Box::new(
                relationships::run(
                    &self.bridge,
                    &request,
                    &mut metadata,
                    &self.error_handler,
                    &self.ctx,
                )
                .await?,
            )),
            AnalysisType::FileAnalysis => AnalysisData::File(
                file::run(
                    &self.bridge,
                    &request,
                    &mut metadata,
                    &self.error_handler,
                    &self.ctx,
                )
                .await?,
            ),
            AnalysisType::PatternAnalysis => AnalysisData::Pattern(
                patterns::run(
                    &self.bridge,
                    &request,
                    &mut metadata,
                    &self.error_handler,
                    &self.ctx,
                )
                .await?,
            ),
        };

        metadata.duration_ms = started.elapsed().as_millis() as u64;
        let result = AnalysisResult {
            analysis_type: request.analysis_type,
            target: request.target,
            data,
            metadata,
        };
        self.cache.set_with_ttl(&key, result.clone(), RESULT_TTL);
        Ok(result)
    }
}
