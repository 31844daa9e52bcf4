//! Symbol-relationship analysis
//!
//! Resolves a symbol name to its defining location, then fans out the
//! relationship queries (references, definitions, implementations, call
//! hierarchy) concurrently on that symbol's language server and derives
//! usage and impact summaries from the combined answer.

use crate::analysis::error_handler::{ErrorDecision, ErrorHandler};
use crate::analysis::types::{
    AnalysisMetadata, AnalysisRequest, BreakingChange, ImpactAnalysis, RefactoringComplexity,
    SymbolRelationshipsData, UsagePatterns,
};
use crate::bridge::{uri as uri_util, Bridge};
use crate::client::{DefinitionEntry, LanguageClient, SymbolMatch};
use crate::error::{BridgeError, Result};
use crate::fanout;
use lsp_types::{CallHierarchyItem, Location};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Payload of one relationship query in the fan-out.
enum Relation {
    References(Vec<Location>),
    Definitions(Vec<Location>),
    CallHierarchy(Vec<CallHierarchyItem>),
    Implementations(Vec<Location>),
    TypeHierarchy(Vec<Value>),
}

pub(crate) async fn run(
    bridge: &Bridge,
    request: &AnalysisRequest,
    metadata: &mut AnalysisMetadata,
    handler: &ErrorHandler,
    ctx: &CancellationToken,
) -> Result<SymbolRelationshipsData> {
    let (client, language, symbol) = locate_symbol(bridge, &request.target).await?;
    let location = symbol
        .location()
        .ok_or_else(|| BridgeError::SymbolNotFound(request.target.clone()))?;

    metadata.languages_analyzed.push(language.clone());
    let uri = location.uri.as_str().to_string();
    let position = location.range.start;
    bridge.ensure_document_open(&client, &uri, &language).await;

    type Op = Box<
        dyn FnOnce() -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Relation>> + Send>,
        >,
    >;
    let operations: Vec<(&'static str, Op)> = vec![
        ("references", {
            let client = client.clone();
            let uri = uri.clone();
            Box::new(move || {
                Box::pin(async move {
                    client
                        .references(&uri, position.line, position.character, true)
                        .await
                        .map(Relation::References)
                })
            })
        }),
        ("definitions", {
            let client = client.clone();
            let uri = uri.clone();
            Box::new(move || {
                Box::pin(async move {
                    client
                        .definition(&uri, position.line, position.character)
                        .await
                        .map(|entries| {
                            Relation::Definitions(
                                entries.into_iter().map(DefinitionEntry::normalize).collect(),
                            )
                        })
                })
            })
        }),
        ("call_hierarchy", {
            let client = client.clone();
            let uri = uri.clone();
            Box::new(move || {
                Box::pin(async move {
                    client
                        .prepare_call_hierarchy(&uri, position.line, position.character)
                        .await
                        .map(Relation::CallHierarchy)
                })
            })
        }),
        ("implementations", {
            let client = client.clone();
            let uri = uri.clone();
            Box::new(move || {
                Box::pin(async move {
                    client
                        .implementation(&uri, position.line, position.character)
                        .await
                        .map(Relation::Implementations)
                })
            })
        }),
        // Type hierarchy stays a placeholder until servers we target
        // support it broadly.
        ("type_hierarchy", {
            Box::new(move || Box::pin(async move { Ok(Relation::TypeHierarchy(Vec::new())) }))
        }),
    ];

    let outcomes = fanout::map_with_keys(ctx, operations).await?;

    let mut references = Vec::new();
    let mut definitions = Vec::new();
    let mut implementations = Vec::new();
    let mut call_hierarchy = Vec::new();
    let mut type_hierarchy = Vec::new();

    for outcome in outcomes {
        match (outcome.value, outcome.error) {
            (Some(Relation::References(v)), _) => references = v,
            (Some(Relation::Definitions(v)), _) => definitions = v,
            (Some(Relation::CallHierarchy(v)), _) => call_hierarchy = v,
            (Some(Relation::Implementations(v)), _) => implementations = v,
            (Some(Relation::TypeHierarchy(v)), _) => type_hierarchy = v,
            (None, Some(error)) => {
                if handler.handle(&error, outcome.key, metadata) == ErrorDecision::Stop {
                    break;
                }
            }
            (None, None) => {}
        }
    }

    metadata.symbols_scanned = 1;
    metadata.files_scanned = reference_files(&references, &implementations).len();

    let usage_patterns = usage_patterns(&references);
    let impact_analysis = impact_analysis(&references, &definitions, &implementations);

    Ok(SymbolRelationshipsData {
        symbol: symbol.name,
        language,
        references,
        definitions,
        implementations,
        call_hierarchy,
        type_hierarchy,
        usage_patterns,
        impact_analysis,
    })
}

/// Find the first workspace-symbol match with a concrete location across
/// all connected clients.
async fn locate_symbol(
    bridge: &Bridge,
    target: &str,
) -> Result<(Arc<LanguageClient>, String, SymbolMatch)> {
    for (language, client) in bridge.connected_clients().await {
        match client.workspace_symbols(target).await {
            Ok(symbols) => {
                if let Some(symbol) = symbols.into_iter().find(|s| s.location().is_some()) {
                    return Ok((client, language, symbol));
                }
            }
            Err(e) => {
                tracing::debug!("workspace/symbol on {} failed: {}", language, e);
            }
        }
    }
    Err(BridgeError::SymbolNotFound(target.to_string()))
}

fn reference_files<'a>(
    references: &'a [Location],
    implementations: &'a [Location],
) -> BTreeSet<&'a str> {
    references
        .iter()
        .chain(implementations)
        .map(|l| l.uri.as_str())
        .collect()
}

/// Classify a referencing file by its filename.
fn caller_type(uri: &str) -> &'static str {
    let file = uri_util::uri_to_path(uri).to_lowercase();
    if file.contains("handler") || file.contains("controller") {
        "handler"
    } else if file.contains("middleware") {
        "middleware"
    } else if file.contains("service") {
        "service"
    } else if file.contains("auth") {
        "authentication"
    } else if file.contains("test") {
        "test"
    } else if file.contains("util") || file.contains("helper") {
        "utility"
    } else if file.contains("manager") {
        "manager"
    } else {
        "generic"
    }
}

/// Classify the context a reference appears in.
fn usage_context(uri: &str) -> &'static str {
    let file = uri_util::uri_to_path(uri).to_lowercase();
    if file.contains("validation") {
        "input_validation"
    } else if file.contains("security") || file.contains("auth") {
        "authentication"
    } else if file.contains("config") {
        "configuration"
    } else if file.contains("database") || file.contains("db") || file.contains("store") {
        "data_access"
    } else if file.contains("api") || file.contains("rpc") {
        "api_boundary"
    } else {
        "general"
    }
}

fn usage_patterns(references: &[Location]) -> UsagePatterns {
    let mut patterns = UsagePatterns::default();
    for reference in references {
        let uri = reference.uri.as_str();
        *patterns
            .caller_types
            .entry(caller_type(uri).to_string())
            .or_default() += 1;
        *patterns
            .usage_contexts
            .entry(usage_context(uri).to_string())
            .or_default() += 1;
    }
    patterns
}

/// Filenames that indicate load-bearing infrastructure.
const CRITICAL_MARKERS: &[&str] = &[
    "core",
    "main",
    "config",
    "bootstrap",
    "server",
    "router",
    "middleware",
    "database",
    "auth",
    "security",
];

fn impact_analysis(
    references: &[Location],
    definitions: &[Location],
    implementations: &[Location],
) -> ImpactAnalysis {
    let files_affected: Vec<String> = reference_files(references, implementations)
        .into_iter()
        .map(String::from)
        .collect();

    let critical_paths: Vec<String> = files_affected
        .iter()
        .filter(|f| {
            let lower = f.to_lowercase();
            CRITICAL_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .cloned()
        .collect();

    let dependencies: Vec<String> = definitions
        .iter()
        .map(|l| l.uri.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut breaking_changes = Vec::new();
    if definitions.len() > 1 {
        breaking_changes.push(BreakingChange {
            change_type: "multiple_definitions".to_string(),
            detail: format!("symbol has {} definitions", definitions.len()),
        });
    }
    if implementations.len() > 3 {
        breaking_changes.push(BreakingChange {
            change_type: "interface_complexity".to_string(),
            detail: format!("{} implementors depend on this contract", implementations.len()),
        });
    }
    let referencing_files: BTreeSet<&str> =
        references.iter().map(|l| l.uri.as_str()).collect();
    if referencing_files.len() > 5 {
        breaking_changes.push(BreakingChange {
            change_type: "high_coupling".to_string(),
            detail: format!("referenced from {} files", referencing_files.len()),
        });
    }

    let score = files_affected.len() as f64
        + 2.0 * critical_paths.len() as f64
        + 1.5 * dependencies.len() as f64;
    let refactoring_complexity = if score < 5.0 {
        RefactoringComplexity::Low
    } else if score < 15.0 {
        RefactoringComplexity::Medium
    } else {
        RefactoringComplexity::High
    };

    ImpactAnalysis {
        files_affected,
        critical_paths,
        dependencies,
        breaking_changes,
        refactoring_complexity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    fn location(uri: &str) -> Location {
        Location {
            uri: uri.parse().unwrap(),
            range: Range {
                start: Position { line: 0, character: 0 },
                end: Position { line: 0, character: 1 },
            },
        }
    }

    #[test]
    fn test_caller_type_buckets() {
        assert_eq!(caller_type("file:///api/user_handler.go"), "handler");
        assert_eq!(caller_type("file:///web/controller.py"), "handler");
        assert_eq!(caller_type("file:///svc/billing_service.go"), "service");
        assert_eq!(caller_type("file:///http/middleware.go"), "middleware");
        assert_eq!(caller_type("file:///pkg/auth.go"), "authentication");
        assert_eq!(caller_type("file:///pkg/auth_test.go"), "authentication");
        assert_eq!(caller_type("file:///x/helpers.go"), "utility");
        assert_eq!(caller_type("file:///x/pool_manager.go"), "manager");
        assert_eq!(caller_type("file:///x/misc.go"), "generic");
    }

    #[test]
    fn test_usage_context_buckets() {
        assert_eq!(usage_context("file:///input/validation.go"), "input_validation");
        assert_eq!(usage_context("file:///security/token.go"), "authentication");
        assert_eq!(usage_context("file:///app/config.go"), "configuration");
        assert_eq!(usage_context("file:///store/database.go"), "data_access");
        assert_eq!(usage_context("file:///api/routes.go"), "api_boundary");
        assert_eq!(usage_context("file:///lib/strings.go"), "general");
    }

    #[test]
    fn test_usage_patterns_count_by_bucket() {
        let refs = vec![
            location("file:///a/user_handler.go"),
            location("file:///b/order_handler.go"),
            location("file:///c/misc.go"),
        ];
        let patterns = usage_patterns(&refs);
        assert_eq!(patterns.caller_types["handler"], 2);
        assert_eq!(patterns.caller_types["generic"], 1);
    }

    #[test]
    fn test_impact_flags_multiple_definitions() {
        let defs = vec![location("file:///a.go"), location("file:///b.go")];
        let impact = impact_analysis(&[], &defs, &[]);
        assert!(impact
            .breaking_changes
            .iter()
            .any(|c| c.change_type == "multiple_definitions"));
    }

    #[test]
    fn test_impact_flags_high_coupling() {
        let refs: Vec<Location> = (0..6)
            .map(|i| location(&format!("file:///pkg/file{}.go", i)))
            .collect();
        let impact = impact_analysis(&refs, &[], &[]);
        assert!(impact
            .breaking_changes
            .iter()
            .any(|c| c.change_type == "high_coupling"));
    }

    #[test]
    fn test_impact_flags_interface_complexity() {
        let impls: Vec<Location> = (0..4)
            .map(|i| location(&format!("file:///impl{}.go", i)))
            .collect();
        let impact = impact_analysis(&[], &[], &impls);
        assert!(impact
            .breaking_changes
            .iter()
            .any(|c| c.change_type == "interface_complexity"));
    }

    #[test]
    fn test_refactoring_complexity_thresholds() {
        // 1 affected file, nothing critical: score 1 -> low.
        let impact = impact_analysis(&[location("file:///x.go")], &[], &[]);
        assert_eq!(impact.refactoring_complexity, RefactoringComplexity::Low);

        // 6 files, one critical (server.go): 6 + 2 + 1.5 = 9.5 -> medium.
        let refs: Vec<Location> = (0..5)
            .map(|i| location(&format!("file:///f{}.go", i)))
            .chain([location("file:///server.go")])
            .collect();
        let defs = vec![location("file:///server.go")];
        let impact = impact_analysis(&refs, &defs, &[]);
        assert_eq!(impact.refactoring_complexity, RefactoringComplexity::Medium);
    }

    #[test]
    fn test_critical_paths_matched_by_marker() {
        let refs = vec![
            location("file:///cmd/main.go"),
            location("file:///pkg/router.go"),
            location("file:///pkg/strings.go"),
        ];
        let impact = impact_analysis(&refs, &[], &[]);
        assert_eq!(impact.critical_paths.len(), 2);
    }
}
