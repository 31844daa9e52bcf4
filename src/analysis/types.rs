//! Analysis request and result types
//!
//! Everything here serialises to JSON without loss; the MCP layer renders
//! these structures directly.

use crate::error::{BridgeError, Result};
use lsp_types::{CallHierarchyItem, Location};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The four supported analysis types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    WorkspaceAnalysis,
    SymbolRelationships,
    FileAnalysis,
    PatternAnalysis,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::WorkspaceAnalysis => "workspace_analysis",
            AnalysisType::SymbolRelationships => "symbol_relationships",
            AnalysisType::FileAnalysis => "file_analysis",
            AnalysisType::PatternAnalysis => "pattern_analysis",
        }
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "workspace_analysis" => Ok(AnalysisType::WorkspaceAnalysis),
            "symbol_relationships" => Ok(AnalysisType::SymbolRelationships),
            "file_analysis" => Ok(AnalysisType::FileAnalysis),
            "pattern_analysis" => Ok(AnalysisType::PatternAnalysis),
            other => Err(BridgeError::UnsupportedAnalysisType(other.to_string())),
        }
    }
}

/// One analysis request. Options keep a sorted map so the derived cache
/// key is canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    /// A symbol name, file path, or pattern name depending on the type.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl AnalysisRequest {
    pub fn new(analysis_type: AnalysisType, target: impl Into<String>) -> Self {
        Self {
            analysis_type,
            target: target.into(),
            scope: None,
            depth: None,
            options: BTreeMap::new(),
        }
    }

    /// Deterministic cache key: type, target, scope, and the options in
    /// sorted order.
    pub fn cache_key(&self) -> String {
        let options = serde_json::to_string(&self.options).unwrap_or_default();
        format!(
            "{}:{}:{}:{}",
            self.analysis_type.as_str(),
            self.target,
            self.scope.as_deref().unwrap_or(""),
            options
        )
    }
}

/// One recorded analysis failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Bookkeeping accumulated while an analysis runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub duration_ms: u64,
    pub files_scanned: usize,
    pub symbols_scanned: usize,
    pub languages_analyzed: Vec<String>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: Vec<AnalysisError>,
}

/// A finished analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    pub target: String,
    pub data: AnalysisData,
    pub metadata: AnalysisMetadata,
}

/// The typed payload per analysis type.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisData {
    Workspace(WorkspaceAnalysisData),
    SymbolRelationships(Box<SymbolRelationshipsData>),
    File(FileAnalysisData),
    Pattern(PatternAnalysisData),
}

// --- workspace analysis ----------------------------------------------------

#[derive(Debug, Clone, Serialize, Default)]
pub struct WorkspaceAnalysisData {
    pub language_stats: BTreeMap<String, LanguageStats>,
    pub dependency_patterns: Vec<DependencyPattern>,
    pub architectural_health: ArchitecturalHealth,
    pub total_files: usize,
    pub total_symbols: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LanguageStats {
    pub file_count: usize,
    pub symbol_count: usize,
    /// Share of all scanned files belonging to this language, 0..=100.
    pub percentage: f64,
    pub complexity_avg: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyPattern {
    #[serde(rename = "type")]
    pub pattern_type: String,
    pub source: String,
    pub target: String,
    pub frequency: usize,
    pub is_circular: bool,
    pub depth: usize,
}

/// Score bands for a health dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Poor,
    Moderate,
    Good,
    Excellent,
}

impl HealthLevel {
    /// Band a 0..=100 score: <60 poor, <75 moderate, <90 good, else
    /// excellent.
    pub fn from_score(score: f64) -> Self {
        if score < 60.0 {
            HealthLevel::Poor
        } else if score < 75.0 {
            HealthLevel::Moderate
        } else if score < 90.0 {
            HealthLevel::Good
        } else {
            HealthLevel::Excellent
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthScore {
    pub score: f64,
    pub level: HealthLevel,
    pub suggestions: Vec<String>,
}

impl Default for HealthScore {
    fn default() -> Self {
        Self {
            score: 0.0,
            level: HealthLevel::Poor,
            suggestions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ArchitecturalHealth {
    pub code_organization: HealthScore,
    pub naming_consistency: HealthScore,
    pub error_handling: HealthScore,
    pub test_coverage: HealthScore,
    pub documentation: HealthScore,
    pub overall_score: f64,
}

// --- symbol relationships --------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SymbolRelationshipsData {
    pub symbol: String,
    pub language: String,
    pub references: Vec<Location>,
    pub definitions: Vec<Location>,
    pub implementations: Vec<Location>,
    pub call_hierarchy: Vec<CallHierarchyItem>,
    /// Reserved: LSP type-hierarchy support is not wired up yet.
    pub type_hierarchy: Vec<Value>,
    pub usage_patterns: UsagePatterns,
    pub impact_analysis: ImpactAnalysis,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct UsagePatterns {
    /// Referencing-file classification counts (handler, service, test, …).
    pub caller_types: BTreeMap<String, usize>,
    /// Usage-context classification counts (input_validation, …).
    pub usage_contexts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactoringComplexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakingChange {
    #[serde(rename = "type")]
    pub change_type: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactAnalysis {
    pub files_affected: Vec<String>,
    pub critical_paths: Vec<String>,
    pub dependencies: Vec<String>,
    pub breaking_changes: Vec<BreakingChange>,
    pub refactoring_complexity: RefactoringComplexity,
}

impl Default for ImpactAnalysis {
    fn default() -> Self {
        Self {
            files_affected: Vec::new(),
            critical_paths: Vec::new(),
            dependencies: Vec::new(),
            breaking_changes: Vec::new(),
            refactoring_complexity: RefactoringComplexity::Low,
        }
    }
}

// --- file analysis ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl ComplexityLevel {
    /// Band a weighted complexity score: <5, <15, <30, <50, else.
    pub fn from_score(score: f64) -> Self {
        if score < 5.0 {
            ComplexityLevel::Low
        } else if score < 15.0 {
            ComplexityLevel::Moderate
        } else if score < 30.0 {
            ComplexityLevel::High
        } else if score < 50.0 {
            ComplexityLevel::VeryHigh
        } else {
            ComplexityLevel::Extreme
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplexityMetrics {
    pub function_count: usize,
    pub class_count: usize,
    pub total_lines: u64,
    pub complexity_score: f64,
    pub level: ComplexityLevel,
}

impl Default for ComplexityMetrics {
    fn default() -> Self {
        Self {
            function_count: 0,
            class_count: 0,
            total_lines: 0,
            complexity_score: 0.0,
            level: ComplexityLevel::Low,
        }
    }
}

/// Import/export surface of a file. Population requires syntax-aware
/// support the LSP surface does not expose, so these stay empty for now.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ImportExportAnalysis {
    pub imports: Vec<String>,
    pub exports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CodeQualityMetrics {
    pub maintainability_score: f64,
    pub duplication_ratio: f64,
    pub comment_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FileAnalysisData {
    pub file: String,
    pub language: String,
    pub complexity: ComplexityMetrics,
    pub imports_exports: ImportExportAnalysis,
    pub cross_file_relations: Vec<Value>,
    pub quality: CodeQualityMetrics,
    pub recommendations: Vec<String>,
}

// --- pattern analysis ------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PatternInstance {
    pub pattern: String,
    pub confidence: f64,
    pub quality: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternViolation {
    pub message: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendAnalysis {
    pub direction: String,
    pub confidence: f64,
    pub factors: Vec<String>,
}

impl Default for TrendAnalysis {
    fn default() -> Self {
        Self {
            direction: "stable".to_string(),
            confidence: 0.7,
            factors: vec![
                "consistent project activity".to_string(),
                "no structural churn detected".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternAnalysisData {
    pub pattern_type: String,
    pub instances: Vec<PatternInstance>,
    pub violations: Vec<PatternViolation>,
    /// Agreement across detected instances, 0..=1.
    pub consistency_score: f64,
    pub trend: TrendAnalysis,
}
