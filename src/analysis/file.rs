//! Single-file analysis
//!
//! Probes each connected server for the file's document symbols, adopts
//! the first language that answers with substance, and derives complexity
//! metrics, quality placeholders, and recommendations from the symbol
//! tree.

use crate::analysis::error_handler::ErrorHandler;
use crate::analysis::types::{
    AnalysisMetadata, AnalysisRequest, CodeQualityMetrics, ComplexityLevel, ComplexityMetrics,
    FileAnalysisData, ImportExportAnalysis,
};
use crate::bridge::{uri as uri_util, Bridge};
use crate::error::{BridgeError, Result};
use crate::fanout;
use lsp_types::{DocumentSymbol, SymbolKind};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One of the four derived views computed over the symbol tree.
enum FilePart {
    Complexity(ComplexityMetrics),
    ImportsExports(ImportExportAnalysis),
    CrossFile(Vec<Value>),
    Quality(CodeQualityMetrics),
}

pub(crate) async fn run(
    bridge: &Bridge,
    request: &AnalysisRequest,
    metadata: &mut AnalysisMetadata,
    _handler: &ErrorHandler,
    ctx: &CancellationToken,
) -> Result<FileAnalysisData> {
    let uri = uri_util::normalize_uri(&request.target);

    // Probe until some server recognises the file.
    let mut chosen: Option<(String, Vec<DocumentSymbol>)> = None;
    for (language, client) in bridge.connected_clients().await {
        bridge.ensure_document_open(&client, &uri, &language).await;
        match client.document_symbols(&uri).await {
            Ok(symbols) if !symbols.is_empty() => {
                chosen = Some((language, symbols));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("documentSymbol probe on {} failed: {}", language, e);
            }
        }
    }

    let (language, symbols) = chosen.ok_or_else(|| {
        BridgeError::SymbolNotFound(format!("no server produced symbols for {}", request.target))
    })?;

    metadata.languages_analyzed.push(language.clone());
    metadata.files_scanned = 1;
    metadata.symbols_scanned = count_symbols(&symbols);

    type Op = Box<
        dyn FnOnce() -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<FilePart>> + Send>,
        >,
    >;
    let operations: Vec<Op> = vec![
        {
            let symbols = symbols.clone();
            Box::new(move || {
                Box::pin(async move { Ok(FilePart::Complexity(complexity_metrics(&symbols))) })
            })
        },
        {
            Box::new(move || {
                Box::pin(async move {
                    // Requires syntax-level information LSP does not expose.
                    Ok(FilePart::ImportsExports(ImportExportAnalysis::default()))
                })
            })
        },
        {
            Box::new(move || Box::pin(async move { Ok(FilePart::CrossFile(Vec::new())) }))
        },
        {
            let symbols = symbols.clone();
            Box::new(move || {
                Box::pin(async move { Ok(FilePart::Quality(quality_metrics(&symbols))) })
            })
        },
    ];

    let outcomes = fanout::map(ctx, operations).await?;

    let mut data = FileAnalysisData {
        file: request.target.clone(),
        language,
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome.value {
            Some(FilePart::Complexity(metrics)) => data.complexity = metrics,
            Some(FilePart::ImportsExports(ie)) => data.imports_exports = ie,
            Some(FilePart::CrossFile(relations)) => data.cross_file_relations = relations,
            Some(FilePart::Quality(quality)) => data.quality = quality,
            None => {}
        }
    }
    data.recommendations = recommendations(&data.complexity);
    Ok(data)
}

fn count_symbols(symbols: &[DocumentSymbol]) -> usize {
    let mut stack: Vec<&DocumentSymbol> = symbols.iter().collect();
    let mut count = 0;
    while let Some(symbol) = stack.pop() {
        count += 1;
        if let Some(children) = &symbol.children {
            stack.extend(children.iter());
        }
    }
    count
}

fn kind_weight(kind: SymbolKind) -> f64 {
    match kind {
        SymbolKind::FUNCTION => 1.0,
        SymbolKind::METHOD => 1.5,
        SymbolKind::CLASS => 3.0,
        SymbolKind::INTERFACE => 2.5,
        SymbolKind::VARIABLE => 0.5,
        SymbolKind::CONSTANT => 0.3,
        _ => 0.0,
    }
}

fn complexity_metrics(symbols: &[DocumentSymbol]) -> ComplexityMetrics {
    let mut function_count = 0;
    let mut class_count = 0;
    let mut score = 0.0;

    let mut stack: Vec<&DocumentSymbol> = symbols.iter().collect();
    while let Some(symbol) = stack.pop() {
        score += kind_weight(symbol.kind);
        match symbol.kind {
            SymbolKind::FUNCTION | SymbolKind::METHOD => function_count += 1,
            SymbolKind::CLASS | SymbolKind::INTERFACE => class_count += 1,
            _ => {}
        }
        if let Some(children) = &symbol.children {
            stack.extend(children.iter());
        }
    }

    let total_lines: u64 = symbols
        .iter()
        .map(|s| u64::from(s.range.end.line - s.range.start.line + 1))
        .sum();

    ComplexityMetrics {
        function_count,
        class_count,
        total_lines,
        complexity_score: score,
        level: ComplexityLevel::from_score(score),
    }
}

/// Quality numbers derivable without syntax access: maintainability from
/// the symbol density, the rest pinned until a richer source exists.
fn quality_metrics(symbols: &[DocumentSymbol]) -> CodeQualityMetrics {
    let complexity = complexity_metrics(symbols);
    let per_line = if complexity.total_lines == 0 {
        0.0
    } else {
        complexity.complexity_score / complexity.total_lines as f64
    };
    CodeQualityMetrics {
        maintainability_score: (100.0 - per_line * 200.0).clamp(0.0, 100.0),
        duplication_ratio: 0.0,
        comment_ratio: 0.0,
    }
}

fn recommendations(complexity: &ComplexityMetrics) -> Vec<String> {
    let mut out = Vec::new();
    match complexity.level {
        ComplexityLevel::Low | ComplexityLevel::Moderate => {}
        ComplexityLevel::High => {
            out.push("optimize: split the densest functions into smaller units".to_string());
        }
        ComplexityLevel::VeryHigh | ComplexityLevel::Extreme => {
            out.push("optimize: break this file into focused modules".to_string());
            out.push("optimize: reduce per-function branching before adding features".to_string());
        }
    }
    if complexity.function_count > 0 {
        out.push(format!(
            "test: cover the {} callable(s) in this file",
            complexity.function_count
        ));
    }
    if complexity.class_count > 0 {
        out.push("document: describe the responsibilities of each type".to_string());
    }
    out
}
