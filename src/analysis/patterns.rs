//! Pattern analysis
//!
//! Detects coding patterns across the workspace symbol surface. Three
//! detectors are supported: error handling, naming conventions, and
//! architecture patterns. Anything else is rejected.

use crate::analysis::error_handler::{ErrorDecision, ErrorHandler};
use crate::analysis::types::{
    AnalysisMetadata, AnalysisRequest, PatternAnalysisData, PatternInstance, PatternViolation,
    TrendAnalysis,
};
use crate::bridge::Bridge;
use crate::client::SymbolMatch;
use crate::error::{BridgeError, Result};
use lsp_types::SymbolKind;
use tokio_util::sync::CancellationToken;

pub(crate) async fn run(
    bridge: &Bridge,
    request: &AnalysisRequest,
    metadata: &mut AnalysisMetadata,
    handler: &ErrorHandler,
    _ctx: &CancellationToken,
) -> Result<PatternAnalysisData> {
    let pattern_type = request
        .options
        .get("pattern_type")
        .and_then(|v| v.as_str())
        .unwrap_or(&request.target)
        .to_string();

    let queries: &[&str] = match pattern_type.as_str() {
        "error_handling" => &["error", "err"],
        "naming_conventions" => &[""],
        "architecture_patterns" => &["handler", "service", "repository", "controller"],
        other => return Err(BridgeError::UnsupportedPatternType(other.to_string())),
    };

    let mut symbols: Vec<SymbolMatch> = Vec::new();
    for (language, client) in bridge.connected_clients().await {
        for query in queries {
            match client.workspace_symbols(query).await {
                Ok(mut found) => {
                    metadata.symbols_scanned += found.len();
                    symbols.append(&mut found);
                }
                Err(e) => {
                    if handler.handle(&e, &language, metadata) == ErrorDecision::Stop {
                        return Ok(finish(pattern_type, &[]));
                    }
                }
            }
        }
        if !metadata.languages_analyzed.contains(&language) {
            metadata.languages_analyzed.push(language);
        }
    }

    Ok(finish(pattern_type, &symbols))
}

fn finish(pattern_type: String, symbols: &[SymbolMatch]) -> PatternAnalysisData {
    let (instances, violations, consistency_score) = match pattern_type.as_str() {
        "error_handling" => detect_error_handling(symbols),
        "naming_conventions" => detect_naming_conventions(symbols),
        _ => detect_architecture_patterns(symbols),
    };
    PatternAnalysisData {
        pattern_type,
        instances,
        violations,
        consistency_score,
        trend: TrendAnalysis::default(),
    }
}

fn detect_error_handling(
    symbols: &[SymbolMatch],
) -> (Vec<PatternInstance>, Vec<PatternViolation>, f64) {
    let mut instances = Vec::new();
    let mut typed = 0usize;

    for symbol in symbols {
        let lower = symbol.name.to_lowercase();
        if !lower.contains("err") {
            continue;
        }
        let (pattern, confidence) = match symbol.kind {
            SymbolKind::CLASS | SymbolKind::STRUCT | SymbolKind::ENUM => ("error_type", 0.9),
            SymbolKind::FUNCTION | SymbolKind::METHOD => ("error_handler", 0.7),
            _ => ("error_value", 0.5),
        };
        if pattern == "error_type" {
            typed += 1;
        }
        instances.push(PatternInstance {
            pattern: pattern.to_string(),
            confidence,
            quality: if confidence >= 0.7 { "good" } else { "fair" }.to_string(),
        });
    }

    let mut violations = Vec::new();
    if instances.is_empty() {
        violations.push(PatternViolation {
            message: "no error-handling symbols detected in the workspace".to_string(),
            severity: "warning".to_string(),
        });
    }

    let consistency = if instances.is_empty() {
        0.0
    } else {
        typed as f64 / instances.len() as f64
    };
    (instances, violations, consistency)
}

/// Name-style classification over the sampled symbols. The dominant style
/// sets the consistency score; outliers become violations.
fn detect_naming_conventions(
    symbols: &[SymbolMatch],
) -> (Vec<PatternInstance>, Vec<PatternViolation>, f64) {
    if symbols.is_empty() {
        return (Vec::new(), Vec::new(), 1.0);
    }

    let mut snake = 0usize;
    let mut camel = 0usize;
    let mut pascal = 0usize;
    for symbol in symbols {
        match classify_name(&symbol.name) {
            NameStyle::Snake => snake += 1,
            NameStyle::Camel => camel += 1,
            NameStyle::Pascal => pascal += 1,
            NameStyle::Other => {}
        }
    }
    let classified = snake + camel + pascal;
    let dominant = snake.max(camel).max(pascal);
    let consistency = if classified == 0 {
        0.0
    } else {
        dominant as f64 / classified as f64
    };

    let mut instances = Vec::new();
    for (style, count) in [("snake_case", snake), ("camelCase", camel), ("PascalCase", pascal)] {
        if count > 0 {
            instances.push(PatternInstance {
                pattern: style.to_string(),
                confidence: count as f64 / classified as f64,
                quality: if count == dominant { "good" } else { "fair" }.to_string(),
            });
        }
    }

    let mut violations = Vec::new();
    if consistency < 0.8 && classified > 0 {
        violations.push(PatternViolation {
            message: format!(
                "mixed naming styles: {} snake_case, {} camelCase, {} PascalCase",
                snake, camel, pascal
            ),
            severity: "info".to_string(),
        });
    }

    (instances, violations, consistency)
}

fn detect_architecture_patterns(
    symbols: &[SymbolMatch],
) -> (Vec<PatternInstance>, Vec<PatternViolation>, f64) {
    const ROLES: &[&str] = &["handler", "service", "repository", "controller", "manager"];

    let mut instances = Vec::new();
    let mut matched = 0usize;
    for role in ROLES {
        let count = symbols
            .iter()
            .filter(|s| s.name.to_lowercase().contains(role))
            .count();
        if count > 0 {
            matched += count;
            instances.push(PatternInstance {
                pattern: format!("{}_layer", role),
                confidence: 0.7,
                quality: if count > 1 { "good" } else { "fair" }.to_string(),
            });
        }
    }

    let mut violations = Vec::new();
    if instances.is_empty() && !symbols.is_empty() {
        violations.push(PatternViolation {
            message: "no layered-architecture roles recognised".to_string(),
            severity: "info".to_string(),
        });
    }

    let consistency = if symbols.is_empty() {
        0.0
    } else {
        (matched as f64 / symbols.len() as f64).min(1.0)
    };
    (instances, violations, consistency)
}

#[derive(PartialEq)]
enum NameStyle {
    Snake,
    Camel,
    Pascal,
    Other,
}

fn classify_name(name: &str) -> NameStyle {
    if name.is_empty() {
        return NameStyle::Other;
    }
    let has_underscore = name.contains('_');
    let has_upper = name.chars().any(|c| c.is_ascii_uppercase());
    let first_upper = name
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false);

    if has_underscore && !has_upper {
        NameStyle::Snake
    } else if has_underscore {
        NameStyle::Other
    } else if first_upper {
        NameStyle::Pascal
    } else if has_upper {
        NameStyle::Camel
    } else {
        // Single lowercase word reads as snake_case's degenerate form.
        NameStyle::Snake
    }
}
