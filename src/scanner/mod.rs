//! Discovery of histogram source files.
//!
//! Inputs can be given as individual files, as directories (walked
//! recursively for matching extensions) or through a list file containing
//! whitespace-separated paths.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Configuration for source scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include when walking directories.
    pub extensions: Vec<String>,
    /// Directory or file names to skip.
    pub excludes: Vec<String>,
    /// Maximum number of sources to return.
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["json".to_string()],
            excludes: Vec::new(),
            max_files: None,
        }
    }
}

impl From<&crate::config::InputConfig> for ScanConfig {
    fn from(config: &crate::config::InputConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_files: config.max_files,
        }
    }
}

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedSource {
    pub path: PathBuf,
    pub size: u64,
}

/// Finds source files under the given input paths.
pub struct SourceScanner {
    config: ScanConfig,
}

impl SourceScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Resolve `inputs` into a de-duplicated list of source files.
    ///
    /// Explicit files are taken as-is, in the given order; directories
    /// contribute their matching files in lexicographic order.
    pub fn scan(&self, inputs: &[PathBuf]) -> Result<Vec<ScannedSource>> {
        let mut sources: Vec<ScannedSource> = Vec::new();

        for input in inputs {
            if input.is_dir() {
                self.walk_dir(input, &mut sources);
            } else if input.is_file() {
                let metadata = fs::metadata(input)
                    .with_context(|| format!("Failed to stat {}", input.display()))?;
                push_unique(
                    &mut sources,
                    ScannedSource {
                        path: input.clone(),
                        size: metadata.len(),
                    },
                );
            } else {
                warn!("Input {} does not exist, skipping", input.display());
            }
        }

        if let Some(max) = self.config.max_files {
            sources.truncate(max);
        }

        Ok(sources)
    }

    /// Check if a file matches the extension filter.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.config.extensions.iter().any(|e| e == ext)
    }

    fn is_excluded(&self, name: &str) -> bool {
        // hidden files and directories
        if name.starts_with('.') && name != "." && name != ".." {
            return true;
        }
        self.config.excludes.iter().any(|pattern| name == pattern)
    }

    fn walk_dir(&self, dir: &Path, sources: &mut Vec<ScannedSource>) {
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !self.is_excluded(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Cannot read entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            push_unique(
                sources,
                ScannedSource {
                    path: entry.into_path(),
                    size,
                },
            );
        }
    }
}

fn push_unique(sources: &mut Vec<ScannedSource>, source: ScannedSource) {
    if !sources.iter().any(|s| s.path == source.path) {
        sources.push(source);
    }
}

/// Read a list file of whitespace-separated source paths.
///
/// Relative entries are resolved against the list file's directory.
pub fn read_input_list(list: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(list)
        .with_context(|| format!("Failed to read input list {}", list.display()))?;
    let base = list.parent().unwrap_or_else(|| Path::new(""));

    Ok(content
        .split_whitespace()
        .map(|entry| {
            let path = PathBuf::from(entry);
            if path.is_relative() {
                base.join(path)
            } else {
                path
            }
        })
        .collect())
}
