//! Project language detection
//!
//! Scores a workspace directory by root markers and file extensions to pick
//! the primary and secondary languages. Root markers at the top level weigh
//! far more than individual files so that one stray script does not
//! reclassify a project.

use crate::config::LspServerConfig;
use crate::error::{BridgeError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Score added for a root marker present at the top level of the project.
const ROOT_MARKER_SCORE: u32 = 100;

/// Directories never descended into during the extension scan.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "build", "dist"];

/// Filenames whose presence at a project root strongly implies a language.
const ROOT_MARKERS: &[(&str, &str)] = &[
    ("go.mod", "go"),
    ("go.sum", "go"),
    ("package.json", "typescript"),
    ("yarn.lock", "typescript"),
    ("package-lock.json", "typescript"),
    ("tsconfig.json", "typescript"),
    ("Cargo.toml", "rust"),
    ("Cargo.lock", "rust"),
    ("pyproject.toml", "python"),
    ("setup.py", "python"),
    ("requirements.txt", "python"),
    ("Pipfile", "python"),
    ("poetry.lock", "python"),
    ("pom.xml", "java"),
    ("build.gradle", "java"),
    ("Gemfile", "ruby"),
    ("composer.json", "php"),
    ("CMakeLists.txt", "cpp"),
    ("Makefile", "c"),
    ("Dockerfile", "dockerfile"),
];

/// Detect all languages present in a project directory, ordered by score
/// descending. Returns an empty list when nothing is recognised and an
/// error when the path does not exist.
pub fn detect_project_languages(config: &LspServerConfig, path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(BridgeError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("project path does not exist: {}", path.display()),
        )));
    }

    let mut scores: HashMap<String, u32> = HashMap::new();

    // Root markers are only meaningful at the top level.
    for (marker, language) in ROOT_MARKERS {
        if path.join(marker).is_file() {
            tracing::debug!("Root marker {} found, scoring {}", marker, language);
            *scores.entry((*language).to_string()).or_default() += ROOT_MARKER_SCORE;
        }
    }

    let walker = ignore::WalkBuilder::new(path)
        .standard_filters(false)
        .hidden(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && SKIPPED_DIRS.contains(&name.as_ref()))
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry during detection: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if let Ok(language) = config.find_extension_language(ext) {
            *scores.entry(language.to_string()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, u32)> = scores.into_iter().filter(|(_, s)| *s > 0).collect();
    // Name is the tiebreaker so equal scores rank deterministically.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let languages: Vec<String> = ranked.into_iter().map(|(lang, _)| lang).collect();
    tracing::info!(
        "Detected languages for {}: {:?}",
        path.display(),
        languages
    );
    Ok(languages)
}

/// The highest-scoring language of a project, or an error when nothing is
/// recognised.
pub fn detect_primary_project_language(
    config: &LspServerConfig,
    path: &Path,
) -> Result<String> {
    detect_project_languages(config, path)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            BridgeError::UnknownExtension(format!(
                "no recognised languages in {}",
                path.display()
            ))
        })
}
