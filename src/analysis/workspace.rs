//! Workspace-wide analysis
//!
//! Fans a symbol query out to every connected language server, then
//! derives per-language statistics, inter-symbol dependency patterns, and
//! an architectural health summary from the combined result.

use crate::analysis::error_handler::{ErrorDecision, ErrorHandler};
use crate::analysis::types::{
    AnalysisMetadata, AnalysisRequest, ArchitecturalHealth, DependencyPattern, HealthLevel,
    HealthScore, LanguageStats, WorkspaceAnalysisData,
};
use crate::bridge::Bridge;
use crate::client::SymbolMatch;
use crate::error::Result;
use crate::fanout;
use lsp_types::SymbolKind;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tokio_util::sync::CancellationToken;

pub(crate) async fn run(
    bridge: &Bridge,
    request: &AnalysisRequest,
    metadata: &mut AnalysisMetadata,
    handler: &ErrorHandler,
    ctx: &CancellationToken,
) -> Result<WorkspaceAnalysisData> {
    let clients = bridge.connected_clients().await;
    let query = request.target.clone();

    let operations: Vec<_> = clients
        .into_iter()
        .map(|(language, client)| {
            let query = query.clone();
            (language, move || async move {
                client.workspace_symbols(&query).await
            })
        })
        .collect();

    let outcomes = fanout::map_with_keys(ctx, operations).await?;

    let mut per_language: BTreeMap<String, Vec<SymbolMatch>> = BTreeMap::new();
    for outcome in outcomes {
        match (outcome.value, outcome.error) {
            (Some(symbols), _) => {
                metadata.languages_analyzed.push(outcome.key.clone());
                per_language.insert(outcome.key, symbols);
            }
            (None, Some(error)) => {
                if handler.handle(&error, &outcome.key, metadata) == ErrorDecision::Stop {
                    break;
                }
            }
            (None, None) => {}
        }
    }

    let data = build_workspace_data(&per_language);
    metadata.files_scanned = data.total_files;
    metadata.symbols_scanned = data.total_symbols;
    Ok(data)
}

fn build_workspace_data(
    per_language: &BTreeMap<String, Vec<SymbolMatch>>,
) -> WorkspaceAnalysisData {
    let mut files_per_language: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for (language, symbols) in per_language {
        let files = files_per_language.entry(language).or_default();
        for symbol in symbols {
            files.insert(symbol.uri.as_str());
        }
    }
    let total_files: usize = files_per_language.values().map(HashSet::len).sum();
    let total_symbols: usize = per_language.values().map(Vec::len).sum();

    let mut language_stats = BTreeMap::new();
    for (language, symbols) in per_language {
        let file_count = files_per_language
            .get(language.as_str())
            .map(HashSet::len)
            .unwrap_or(0);
        language_stats.insert(
            language.clone(),
            LanguageStats {
                file_count,
                symbol_count: symbols.len(),
                percentage: if total_files == 0 {
                    0.0
                } else {
                    file_count as f64 / total_files as f64 * 100.0
                },
                complexity_avg: complexity_average(symbols, file_count),
            },
        );
    }

    let all_symbols: Vec<&SymbolMatch> = per_language.values().flatten().collect();
    let dependency_patterns = dependency_patterns(&all_symbols);
    let architectural_health =
        architectural_health(&all_symbols, &language_stats, &files_per_language);

    WorkspaceAnalysisData {
        language_stats,
        dependency_patterns,
        architectural_health,
        total_files,
        total_symbols,
    }
}

/// Weight a symbol kind for complexity purposes: containers weigh most,
/// callables next, data least.
fn kind_weight(kind: SymbolKind) -> f64 {
    match kind {
        SymbolKind::CLASS | SymbolKind::INTERFACE => 3.0,
        SymbolKind::METHOD | SymbolKind::FUNCTION => 2.0,
        SymbolKind::PROPERTY | SymbolKind::VARIABLE => 1.0,
        _ => 0.5,
    }
}

/// Average symbol weight scaled by project size and kind diversity.
fn complexity_average(symbols: &[SymbolMatch], file_count: usize) -> f64 {
    if symbols.is_empty() {
        return 0.0;
    }
    let avg: f64 =
        symbols.iter().map(|s| kind_weight(s.kind)).sum::<f64>() / symbols.len() as f64;
    let distinct_kinds = symbols
        .iter()
        .map(|s| format!("{:?}", s.kind))
        .collect::<HashSet<_>>()
        .len();
    avg * ((file_count as f64 + 1.0).ln()) * (1.0 + distinct_kinds as f64 / 10.0)
}

/// Pair symbols that share a kind or a name prefix and describe each pair
/// as an inter-symbol dependency, with BFS depth and DFS-checked
/// circularity over the undirected pairing graph.
fn dependency_patterns(symbols: &[&SymbolMatch]) -> Vec<DependencyPattern> {
    let n = symbols.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut edges: Vec<(usize, usize)> = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let a = symbols[i];
            let b = symbols[j];
            let related = a.kind == b.kind
                || a.name.starts_with(&b.name)
                || b.name.starts_with(&a.name);
            if related {
                adjacency[i].push(j);
                adjacency[j].push(i);
                edges.push((i, j));
            }
        }
    }

    // Collapse parallel edges between same-named symbols into a frequency.
    let mut grouped: BTreeMap<(String, String), (usize, usize, usize)> = BTreeMap::new();
    for &(i, j) in &edges {
        let key = (symbols[i].name.clone(), symbols[j].name.clone());
        let entry = grouped.entry(key).or_insert((0, i, j));
        entry.0 += 1;
    }

    grouped
        .into_iter()
        .map(|((source, target), (frequency, i, j))| DependencyPattern {
            pattern_type: "inter_symbol".to_string(),
            source,
            target,
            frequency,
            is_circular: edge_in_cycle(&adjacency, i, j),
            depth: bfs_depth(&adjacency, i, j),
        })
        .collect()
}

/// Shortest path length between two nodes; iterative BFS.
fn bfs_depth(adjacency: &[Vec<usize>], from: usize, to: usize) -> usize {
    if from == to {
        return 0;
    }
    let mut visited = vec![false; adjacency.len()];
    let mut queue = VecDeque::new();
    visited[from] = true;
    queue.push_back((from, 0usize));
    while let Some((node, depth)) = queue.pop_front() {
        for &next in &adjacency[node] {
            if next == to {
                return depth + 1;
            }
            if !visited[next] {
                visited[next] = true;
                queue.push_back((next, depth + 1));
            }
        }
    }
    0
}

/// An edge lies on a cycle iff its endpoints stay connected without it;
/// iterative DFS, since user-scale graphs overflow a recursive stack.
fn edge_in_cycle(adjacency: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut visited = vec![false; adjacency.len()];
    let mut stack = vec![from];
    visited[from] = true;
    while let Some(node) = stack.pop() {
        for &next in &adjacency[node] {
            // Skip the direct edge under test (one crossing, either way).
            if (node == from && next == to) || (node == to && next == from) {
                continue;
            }
            if next == to {
                return true;
            }
            if !visited[next] {
                visited[next] = true;
                stack.push(next);
            }
        }
    }
    false
}

fn architectural_health(
    symbols: &[&SymbolMatch],
    language_stats: &BTreeMap<String, LanguageStats>,
    files_per_language: &BTreeMap<&str, HashSet<&str>>,
) -> ArchitecturalHealth {
    let code_organization = score_code_organization(language_stats);
    let naming_consistency = score_naming_consistency(symbols);
    let error_handling = score_error_handling(symbols);
    let test_coverage = score_test_coverage(files_per_language);
    let documentation = score_documentation(symbols);

    let overall_score = [
        &code_organization,
        &naming_consistency,
        &error_handling,
        &test_coverage,
        &documentation,
    ]
    .iter()
    .map(|h| h.score)
    .sum::<f64>()
        / 5.0;

    ArchitecturalHealth {
        code_organization,
        naming_consistency,
        error_handling,
        test_coverage,
        documentation,
        overall_score,
    }
}

fn health(score: f64, poor_hint: &str, moderate_hint: &str) -> HealthScore {
    let score = score.clamp(0.0, 100.0);
    let level = HealthLevel::from_score(score);
    let suggestions = match level {
        HealthLevel::Poor => vec![poor_hint.to_string(), moderate_hint.to_string()],
        HealthLevel::Moderate => vec![moderate_hint.to_string()],
        _ => Vec::new(),
    };
    HealthScore {
        score,
        level,
        suggestions,
    }
}

/// Dense files drag the organisation score down.
fn score_code_organization(language_stats: &BTreeMap<String, LanguageStats>) -> HealthScore {
    let avg_complexity = if language_stats.is_empty() {
        0.0
    } else {
        language_stats.values().map(|s| s.complexity_avg).sum::<f64>()
            / language_stats.len() as f64
    };
    health(
        95.0 - avg_complexity * 8.0,
        "split oversized modules into focused units",
        "group related symbols into cohesive modules",
    )
}

/// Share of names following the dominant convention.
fn score_naming_consistency(symbols: &[&SymbolMatch]) -> HealthScore {
    if symbols.is_empty() {
        return health(
            75.0,
            "adopt one naming convention",
            "document the naming convention",
        );
    }
    let snake = symbols
        .iter()
        .filter(|s| s.name.contains('_') || s.name.chars().all(|c| !c.is_uppercase()))
        .count();
    let camel = symbols.len() - snake;
    let majority = snake.max(camel) as f64 / symbols.len() as f64;
    health(
        majority * 100.0,
        "unify symbol naming to one convention",
        "rename outliers to the dominant convention",
    )
}

fn score_error_handling(symbols: &[&SymbolMatch]) -> HealthScore {
    let error_symbols = symbols
        .iter()
        .filter(|s| s.name.to_lowercase().contains("err"))
        .count();
    let score = if symbols.is_empty() {
        60.0
    } else if error_symbols > 0 {
        75.0 + (error_symbols as f64 / symbols.len() as f64 * 50.0).min(20.0)
    } else {
        60.0
    };
    health(
        score,
        "introduce structured error types",
        "propagate errors instead of swallowing them",
    )
}

fn score_test_coverage(files_per_language: &BTreeMap<&str, HashSet<&str>>) -> HealthScore {
    let all_files: Vec<&&str> = files_per_language.values().flatten().collect();
    if all_files.is_empty() {
        return health(60.0, "add a test suite", "cover the core paths with tests");
    }
    let test_files = all_files
        .iter()
        .filter(|f| f.to_lowercase().contains("test"))
        .count();
    let ratio = test_files as f64 / all_files.len() as f64;
    health(
        50.0 + ratio * 150.0,
        "add a test suite",
        "raise coverage of untested files",
    )
}

/// Documentation quality is not observable through the symbol surface;
/// this stays a fixed mid-band heuristic.
fn score_documentation(symbols: &[&SymbolMatch]) -> HealthScore {
    let score = if symbols.is_empty() { 60.0 } else { 65.0 };
    health(
        score,
        "document the public surface",
        "add doc comments to exported symbols",
    )
}
