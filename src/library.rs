//! Library scan and in-memory cache of decoded series
//!
//! Scanning walks a root directory for .dsp files, skipping the
//! generated `daily`/`function`/`f(x)` families. Loading decodes every
//! candidate in parallel; one bad file never aborts the batch.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::codec;

/// File name prefixes excluded from the library (case sensitive)
const EXCLUDED_PREFIXES: [&str; 3] = ["daily", "function", "f(x)"];

/// Series shorter than this are not worth searching at any scale
const MIN_SERIES_LEN: usize = 400;

/// One candidate file found by `scan`
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub full_path: String,
    pub display_name: String,
}

/// A decoded series held by the cache
#[derive(Debug)]
pub struct CachedStock {
    pub symbol: String,
    pub full_path: String,
    pub data: Vec<f64>,
    pub is_fred: bool,
}

/// Recursively find all .dsp files under `root`
pub fn scan(root: &Path) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    if root.is_dir() {
        scan_dir(root, root, &mut entries);
    }
    entries
}

fn scan_dir(root: &Path, dir: &Path, entries: &mut Vec<FileEntry>) {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            tracing::debug!("Skipping unreadable directory {:?}: {}", dir, e);
            return;
        }
    };

    for entry in read.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_dir(root, &path, entries);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("dsp") {
            continue;
        }

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if EXCLUDED_PREFIXES.iter().any(|p| file_name.starts_with(p)) {
            continue;
        }

        let display = path
            .strip_prefix(root)
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|_| file_name.to_string());

        entries.push(FileEntry {
            full_path: path.to_string_lossy().replace('\\', "/"),
            display_name: display.replace('\\', "/"),
        });
    }
}

/// Probe the current directory and up to four parents for `target`
pub fn find_root(target: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    for _ in 0..5 {
        let candidate = current.join(target);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

fn contains_fred(path: &str) -> bool {
    path.to_lowercase().contains("fred")
}

/// Decoded library, built once and queried many times
#[derive(Debug, Default)]
pub struct LibraryCache {
    stocks: Vec<CachedStock>,
    loaded: bool,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every candidate into the cache. Idempotent by flag: once
    /// loaded, later calls return the existing count without rescanning.
    pub fn load(&mut self, entries: &[FileEntry]) -> usize {
        if self.loaded {
            return self.stocks.len();
        }

        tracing::info!("Loading library: {} candidates", entries.len());

        self.stocks = entries
            .par_iter()
            .filter_map(|entry| match load_one(entry) {
                Ok(Some(stock)) => Some(stock),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", entry.full_path, e);
                    None
                }
            })
            .collect();
        self.loaded = true;

        tracing::info!("Loaded {} valid series", self.stocks.len());
        self.stocks.len()
    }

    pub fn stocks(&self) -> &[CachedStock] {
        &self.stocks
    }

    pub fn len(&self) -> usize {
        self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }
}

/// Decode one file; Ok(None) means valid but too short to keep
fn load_one(entry: &FileEntry) -> anyhow::Result<Option<CachedStock>> {
    let bytes = std::fs::read(&entry.full_path)?;
    let series = codec::decode(&bytes)?;
    if series.values.len() < MIN_SERIES_LEN {
        return Ok(None);
    }
    Ok(Some(CachedStock {
        symbol: entry.display_name.clone(),
        full_path: entry.full_path.clone(),
        data: series.values,
        is_fred: contains_fred(&entry.full_path),
    }))
}
