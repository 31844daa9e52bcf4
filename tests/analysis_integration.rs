//! Analyzer integration: fan-out over mock language servers.

mod common;

use common::MockServer;
use mcp_lsp_bridge::analysis::types::{AnalysisData, AnalysisRequest, AnalysisType};
use mcp_lsp_bridge::analysis::ProjectAnalyzer;
use mcp_lsp_bridge::bridge::Bridge;
use mcp_lsp_bridge::config::LspServerConfig;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn bridge() -> Bridge {
    let config = LspServerConfig::from_json(
        r#"{"extension_language_map": {".go": "go", ".py": "python"}}"#,
    )
    .unwrap();
    Bridge::new(config, vec![PathBuf::from("/")])
}

fn symbol(name: &str, kind: u32, uri: &str) -> serde_json::Value {
    json!({
        "name": name,
        "kind": kind,
        "location": {
            "uri": uri,
            "range": {
                "start": {"line": 0, "character": 0},
                "end": {"line": 0, "character": 5},
            },
        },
    })
}

#[tokio::test]
async fn test_workspace_analysis_aggregates_languages() {
    let (go_client, _) = MockServer::new()
        .respond(
            "workspace/symbol",
            json!([
                symbol("Handler", 12, "file:///a.go"),
                symbol("Server", 5, "file:///b.go"),
            ]),
        )
        .start("go")
        .await;
    let (py_client, _) = MockServer::new()
        .respond(
            "workspace/symbol",
            json!([symbol("handler", 12, "file:///c.py")]),
        )
        .start("python")
        .await;

    let bridge = bridge();
    bridge.register_client("go", go_client).await;
    bridge.register_client("python", py_client).await;

    let analyzer = ProjectAnalyzer::new(Arc::new(bridge));
    let result = analyzer
        .analyze(AnalysisRequest::new(
            AnalysisType::WorkspaceAnalysis,
            "Handler",
        ))
        .await
        .unwrap();

    assert_eq!(result.metadata.files_scanned, 3);
    assert_eq!(result.metadata.symbols_scanned, 3);
    let AnalysisData::Workspace(data) = result.data else {
        panic!("expected workspace payload");
    };
    assert_eq!(data.language_stats.len(), 2);
    assert_eq!(data.language_stats["go"].file_count, 2);
    assert_eq!(data.language_stats["python"].symbol_count, 1);
    let total_pct: f64 = data
        .language_stats
        .values()
        .map(|s| s.percentage)
        .sum();
    assert!((total_pct - 100.0).abs() < 1e-9);
    assert!(data.architectural_health.overall_score > 0.0);
}

#[tokio::test]
async fn test_workspace_analysis_partial_failure_recorded() {
    let (go_client, _) = MockServer::new()
        .respond(
            "workspace/symbol",
            json!([symbol("Handler", 12, "file:///a.go")]),
        )
        .start("go")
        .await;
    let (py_client, _) = MockServer::new()
        .fail("workspace/symbol", -32603, "index broken")
        .start("python")
        .await;

    let bridge = bridge();
    bridge.register_client("go", go_client).await;
    bridge.register_client("python", py_client).await;

    let analyzer = ProjectAnalyzer::new(Arc::new(bridge));
    let result = analyzer
        .analyze(AnalysisRequest::new(
            AnalysisType::WorkspaceAnalysis,
            "Handler",
        ))
        .await
        .unwrap();

    let AnalysisData::Workspace(data) = result.data else {
        panic!("expected workspace payload");
    };
    assert!(data.language_stats.contains_key("go"));
    assert!(!data.language_stats.contains_key("python"));
    assert_eq!(result.metadata.errors.len(), 1);
    assert!(result.metadata.errors[0].message.contains("index broken"));
}

#[tokio::test]
async fn test_symbol_relationships_end_to_end() {
    let (client, _) = MockServer::new()
        .respond(
            "workspace/symbol",
            json!([symbol("Serve", 12, "file:///srv/server.go")]),
        )
        .respond(
            "textDocument/references",
            json!([
                {
                    "uri": "file:///srv/handler.go",
                    "range": {
                        "start": {"line": 4, "character": 0},
                        "end": {"line": 4, "character": 5},
                    },
                },
                {
                    "uri": "file:///srv/server_test.go",
                    "range": {
                        "start": {"line": 9, "character": 0},
                        "end": {"line": 9, "character": 5},
                    },
                },
            ]),
        )
        .respond(
            "textDocument/definition",
            json!([{
                "uri": "file:///srv/server.go",
                "range": {
                    "start": {"line": 0, "character": 0},
                    "end": {"line": 0, "character": 5},
                },
            }]),
        )
        .respond("textDocument/implementation", json!([]))
        .respond("textDocument/prepareCallHierarchy", json!([]))
        .start("go")
        .await;

    let bridge = bridge();
    bridge.register_client("go", client).await;

    let analyzer = ProjectAnalyzer::new(Arc::new(bridge));
    let result = analyzer
        .analyze(AnalysisRequest::new(
            AnalysisType::SymbolRelationships,
            "Serve",
        ))
        .await
        .unwrap();

    let AnalysisData::SymbolRelationships(data) = result.data else {
        panic!("expected relationship payload");
    };
    assert_eq!(data.symbol, "Serve");
    assert_eq!(data.language, "go");
    assert_eq!(data.references.len(), 2);
    assert_eq!(data.definitions.len(), 1);
    assert!(data.usage_patterns.caller_types.contains_key("handler"));
    // server.go is a critical path marker.
    assert!(!data.impact_analysis.critical_paths.is_empty());
    assert!(data.impact_analysis.breaking_changes.is_empty());
}

#[tokio::test]
async fn test_file_analysis_complexity_from_symbols() {
    let (client, _) = MockServer::new()
        .respond(
            "textDocument/documentSymbol",
            json!([
                {
                    "name": "Server",
                    "kind": 5,
                    "range": {
                        "start": {"line": 0, "character": 0},
                        "end": {"line": 29, "character": 1},
                    },
                    "selectionRange": {
                        "start": {"line": 0, "character": 6},
                        "end": {"line": 0, "character": 12},
                    },
                    "children": [{
                        "name": "run",
                        "kind": 6,
                        "range": {
                            "start": {"line": 2, "character": 0},
                            "end": {"line": 10, "character": 1},
                        },
                        "selectionRange": {
                            "start": {"line": 2, "character": 3},
                            "end": {"line": 2, "character": 6},
                        },
                    }],
                },
            ]),
        )
        .start("go")
        .await;

    let bridge = bridge();
    bridge.register_client("go", client).await;

    let analyzer = ProjectAnalyzer::new(Arc::new(bridge));
    let result = analyzer
        .analyze(AnalysisRequest::new(
            AnalysisType::FileAnalysis,
            "/srv/server.go",
        ))
        .await
        .unwrap();

    let AnalysisData::File(data) = result.data else {
        panic!("expected file payload");
    };
    assert_eq!(data.language, "go");
    // class 3.0 + method 1.5
    assert!((data.complexity.complexity_score - 4.5).abs() < 1e-9);
    assert_eq!(data.complexity.function_count, 1);
    assert_eq!(data.complexity.class_count, 1);
    assert_eq!(data.complexity.total_lines, 30);
    assert!(data
        .recommendations
        .iter()
        .any(|r| r.starts_with("test:")));
}

#[tokio::test]
async fn test_pattern_analysis_error_handling() {
    let (client, _) = MockServer::new()
        .respond(
            "workspace/symbol",
            json!([
                symbol("ParseError", 23, "file:///err.go"),
                symbol("handleError", 12, "file:///err.go"),
            ]),
        )
        .start("go")
        .await;

    let bridge = bridge();
    bridge.register_client("go", client).await;

    let analyzer = ProjectAnalyzer::new(Arc::new(bridge));
    let result = analyzer
        .analyze(AnalysisRequest::new(
            AnalysisType::PatternAnalysis,
            "error_handling",
        ))
        .await
        .unwrap();

    let AnalysisData::Pattern(data) = result.data else {
        panic!("expected pattern payload");
    };
    assert_eq!(data.pattern_type, "error_handling");
    assert!(!data.instances.is_empty());
    assert_eq!(data.trend.direction, "stable");
}

#[tokio::test]
async fn test_cached_result_round_trips() {
    let (client, log) = MockServer::new()
        .respond("workspace/symbol", json!([symbol("X", 12, "file:///x.go")]))
        .start("go")
        .await;

    let bridge = bridge();
    bridge.register_client("go", client).await;

    let analyzer = ProjectAnalyzer::new(Arc::new(bridge));
    let request = AnalysisRequest::new(AnalysisType::WorkspaceAnalysis, "X");

    analyzer.analyze(request.clone()).await.unwrap();
    let first_count = log
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, _)| m == "workspace/symbol")
        .count();

    let cached = analyzer.analyze(request).await.unwrap();
    let second_count = log
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, _)| m == "workspace/symbol")
        .count();

    assert_eq!(cached.metadata.cache_hits, 1);
    assert_eq!(first_count, second_count, "cache hit must not re-query");
}
