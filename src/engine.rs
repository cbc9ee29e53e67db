//! Multi-scale similarity search over the decoded library
//!
//! Each cached series is searched independently: sliding-window Pearson
//! correlation against the query pattern at the native resolution, then
//! again at every power-of-two downsampling of the series, keeping the
//! single best window. Matches below the relevance threshold are
//! dropped; survivors are ranked by angular distance.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::library::{CachedStock, LibraryCache};

/// Queries shorter than this yield an empty result set
pub const MIN_PATTERN_LEN: usize = 10;

/// Matches correlating below this are discarded
pub const CORRELATION_FLOOR: f64 = 0.7;

/// One match, best window of one cached series
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub symbol: String,
    /// Start index into the matched series at the scale it was found
    pub offset: usize,
    /// Power-of-two downsampling factor, 1 = native resolution
    pub scale: u32,
    pub pearson: f64,
    /// acos(pearson), ascending = most similar first
    pub distance: f64,
    /// Index into the cache's stocks; valid only while the cache lives
    pub stock_index: usize,
}

/// Two-pass Pearson correlation of equal-length slices.
/// Returns 0 when either side is constant.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let size = a.len();
    if size == 0 {
        return 0.0;
    }

    let mean_a: f64 = a.iter().sum::<f64>() / size as f64;
    let mean_b: f64 = b.iter().sum::<f64>() / size as f64;

    let mut num = 0.0;
    let mut sum_sq_a = 0.0;
    let mut sum_sq_b = 0.0;
    for i in 0..size {
        let diff_a = a[i] - mean_a;
        let diff_b = b[i] - mean_b;
        num += diff_a * diff_b;
        sum_sq_a += diff_a * diff_a;
        sum_sq_b += diff_b * diff_b;
    }

    let den = (sum_sq_a * sum_sq_b).sqrt();
    if den == 0.0 {
        return 0.0;
    }
    num / den
}

/// Halve a series by pairwise averaging; a trailing unpaired sample is
/// dropped. This is the exact per-scale step the search uses, exposed so
/// callers can rebuild the series a match was found against.
pub fn downsample(input: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(input.len() / 2);
    let mut i = 0;
    while i + 1 < input.len() {
        out.push((input[i] + input[i + 1]) * 0.5);
        i += 2;
    }
    out
}

/// Search every cached series for the window most correlated with
/// `pattern`, ranked best first. `lookahead` reserves that many points
/// after each candidate window so callers can project forward.
pub fn search(
    cache: &LibraryCache,
    pattern: &[f64],
    include_fred: bool,
    top_k: usize,
    lookahead: usize,
) -> Vec<SearchResult> {
    let pattern_size = pattern.len();
    if pattern_size < MIN_PATTERN_LEN {
        return Vec::new();
    }

    let mut results: Vec<SearchResult> = cache
        .stocks()
        .par_iter()
        .enumerate()
        .filter_map(|(index, stock)| {
            if !include_fred && stock.is_fred {
                return None;
            }
            best_match(stock, pattern, lookahead, index)
        })
        .collect();

    tracing::debug!("Search merged {} candidate results", results.len());

    // acos is monotonically decreasing, so ascending distance is exactly
    // descending pearson
    results.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    results.truncate(top_k);
    results
}

/// Best window of one series across all scales, or None if the series
/// never fits the pattern or correlates below the floor
fn best_match(
    stock: &CachedStock,
    pattern: &[f64],
    lookahead: usize,
    stock_index: usize,
) -> Option<SearchResult> {
    let pattern_size = pattern.len();

    let mut best_pearson = -1.0;
    let mut best_offset: Option<usize> = None;
    let mut best_scale = 1u32;

    let mut current = stock.data.clone();
    let mut scale = 1u32;

    while current.len() >= pattern_size + lookahead {
        let search_limit = current.len() - lookahead - pattern_size;

        let mut local_pearson = -1.0;
        let mut local_offset = None;
        for j in 0..=search_limit {
            let p = pearson(pattern, &current[j..j + pattern_size]);
            if p > local_pearson {
                local_pearson = p;
                local_offset = Some(j);
            }
        }

        // Strict improvement: the native scale is tried first and wins
        // exact ties against coarser scales
        if local_pearson > best_pearson {
            best_pearson = local_pearson;
            best_offset = local_offset;
            best_scale = scale;
        }

        current = downsample(&current);
        scale *= 2;
    }

    let offset = best_offset?;
    if best_pearson < CORRELATION_FLOOR {
        return None;
    }

    let distance = best_pearson.clamp(-1.0, 1.0).acos();
    Some(SearchResult {
        symbol: stock.symbol.clone(),
        offset,
        scale: best_scale,
        pearson: best_pearson,
        distance,
        stock_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{FileEntry, LibraryCache};
    use crate::testutil;
    use std::path::Path;

    fn write_dsp(dir: &Path, name: &str, values: &[f64]) -> FileEntry {
        let bytes = testutil::write_series(values, 0.0, 1);
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        FileEntry {
            full_path: path.to_string_lossy().replace('\\', "/"),
            display_name: name.to_string(),
        }
    }

    /// 500-point wave with an exact copy of `pattern` spliced in at `at`
    fn series_with_pattern(pattern: &[f64], at: usize) -> Vec<f64> {
        let mut series: Vec<f64> = (0..500)
            .map(|i| (i as f64 * 0.37).sin() * 1e-3)
            .collect();
        series[at..at + pattern.len()].copy_from_slice(pattern);
        series
    }

    fn load_series(dir: &Path, named: &[(&str, Vec<f64>)]) -> LibraryCache {
        let entries: Vec<FileEntry> = named
            .iter()
            .map(|(name, values)| write_dsp(dir, name, values))
            .collect();
        let mut cache = LibraryCache::new();
        cache.load(&entries);
        assert_eq!(cache.len(), named.len());
        cache
    }

    fn test_pattern() -> Vec<f64> {
        // Irregular enough that nothing else in the carrier wave beats it
        (0..50)
            .map(|i| ((i as f64 * 1.13).sin() + (i as f64 * 0.41).cos()) * 2e-3)
            .collect()
    }

    #[test]
    fn test_short_pattern_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = load_series(dir.path(), &[("A.dsp", series_with_pattern(&test_pattern(), 200))]);

        let nine = vec![1.0; 9];
        assert!(search(&cache, &nine, true, 10, 0).is_empty());
    }

    #[test]
    fn test_exact_match_at_native_scale() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = test_pattern();
        let cache = load_series(dir.path(), &[("A.dsp", series_with_pattern(&pattern, 200))]);

        let results = search(&cache, &pattern, true, 10, 0);
        assert_eq!(results.len(), 1);
        let top = &results[0];
        assert!(top.pearson > 0.999999, "pearson was {}", top.pearson);
        assert_eq!(top.offset, 200);
        assert_eq!(top.scale, 1);
        assert_eq!(top.stock_index, 0);
        assert!((top.distance - top.pearson.clamp(-1.0, 1.0).acos()).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_discards_weak_matches() {
        let dir = tempfile::tempdir().unwrap();
        // Linear ramp: correlates poorly with an alternating pattern
        let ramp: Vec<f64> = (0..500).map(|i| i as f64 * 1e-4).collect();
        let cache = load_series(dir.path(), &[("RAMP.dsp", ramp)]);

        let alternating: Vec<f64> = (0..50).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let results = search(&cache, &alternating, true, 10, 0);
        assert!(results.is_empty(), "got {:?}", results);
    }

    #[test]
    fn test_fred_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let fred_dir = dir.path().join("fred");
        std::fs::create_dir_all(&fred_dir).unwrap();
        let pattern = test_pattern();
        let entry = write_dsp(&fred_dir, "GDP.dsp", &series_with_pattern(&pattern, 200));
        let mut cache = LibraryCache::new();
        cache.load(&[entry]);
        assert!(cache.stocks()[0].is_fred);

        assert!(search(&cache, &pattern, false, 10, 0).is_empty());
        assert_eq!(search(&cache, &pattern, true, 10, 0).len(), 1);
    }

    #[test]
    fn test_results_sorted_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = test_pattern();
        // Perfect copy, noisy copy, and another perfect copy
        let mut noisy = series_with_pattern(&pattern, 100);
        for (i, v) in noisy[100..150].iter_mut().enumerate() {
            *v += (i as f64 * 0.71).sin() * 2e-4;
        }
        let cache = load_series(
            dir.path(),
            &[
                ("NOISY.dsp", noisy),
                ("EXACT1.dsp", series_with_pattern(&pattern, 200)),
                ("EXACT2.dsp", series_with_pattern(&pattern, 300)),
            ],
        );

        let results = search(&cache, &pattern, true, 10, 0);
        assert_eq!(results.len(), 3);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        for r in &results {
            assert!((r.distance - r.pearson.clamp(-1.0, 1.0).acos()).abs() < 1e-12);
        }

        let top2 = search(&cache, &pattern, true, 2, 0);
        assert_eq!(top2.len(), 2);
    }

    #[test]
    fn test_lookahead_excludes_tail_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = test_pattern();
        // Pattern at the very end: with lookahead there is no room after it
        let cache = load_series(dir.path(), &[("TAIL.dsp", series_with_pattern(&pattern, 450))]);

        let results = search(&cache, &pattern, true, 10, 0);
        assert_eq!(results[0].offset, 450);

        let constrained = search(&cache, &pattern, true, 10, 100);
        if let Some(top) = constrained.first() {
            assert!(top.offset <= 500 - 100 - pattern.len());
        }
    }

    #[test]
    fn test_downsample_pairwise_average() {
        let out = downsample(&[1.0, 3.0, 5.0, 7.0, 9.0]);
        assert_eq!(out, vec![2.0, 6.0]);
        assert!(downsample(&[4.0]).is_empty());
        assert!(downsample(&[]).is_empty());
    }

    #[test]
    fn test_match_found_at_coarser_scale() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = test_pattern();
        // Embed the pattern stretched 2x so it only lines up after one halving
        let mut series: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.59).sin() * 1e-3).collect();
        for (i, &p) in pattern.iter().enumerate() {
            series[400 + 2 * i] = p;
            series[400 + 2 * i + 1] = p;
        }
        let cache = load_series(dir.path(), &[("WIDE.dsp", series)]);

        let results = search(&cache, &pattern, true, 10, 0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].scale, 2);
        assert_eq!(results[0].offset, 200);
        assert!(results[0].pearson > 0.999);
    }

    #[test]
    fn test_pearson_basics() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let up = [2.0, 4.0, 6.0, 8.0];
        let down = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&a, &up) - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &down) + 1.0).abs() < 1e-12);

        // Constant series: defined as 0
        let flat = [5.0; 4];
        assert_eq!(pearson(&a, &flat), 0.0);
        assert_eq!(pearson(&[], &[]), 0.0);
    }
}
