//! Formatted terminal output: run summary and shape comparison.
//!
//! We keep formatting code in one place so the fitting code stays clean and
//! output changes are localized.

use crate::data::Dataset;
use crate::domain::{FitMap, GeneRegion, Shard};
use crate::fit::Fitter;
use crate::math::stats::{mean, sem};

/// Aggregate view of a fit map.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    pub n_fits: usize,
    /// Fits whose overall optimization failed.
    pub n_failed: usize,
    /// Fits with a LOO score.
    pub n_scored: usize,
    pub mean_loo: Option<f64>,
    /// Best series by LOO score, descending.
    pub top: Vec<(GeneRegion, f64)>,
}

pub fn summarize(fits: &FitMap, top_n: usize) -> FitSummary {
    let mut scored: Vec<(GeneRegion, f64)> = fits
        .iter()
        .filter_map(|(k, r)| r.loo_score.map(|s| (k.clone(), s)))
        .collect();
    let scores: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_n);

    FitSummary {
        n_fits: fits.len(),
        n_failed: fits.values().filter(|r| !r.has_fit()).count(),
        n_scored: scores.len(),
        mean_loo: mean(&scores),
        top: scored,
    }
}

/// Format the run summary printed after `fit`.
pub fn format_fit_summary(data: &Dataset, fitter: &Fitter, shard: Option<Shard>, summary: &FitSummary) -> String {
    let mut out = String::new();

    out.push_str("=== gexfit - Gene Expression Fits ===\n");
    out.push_str(&format!(
        "Dataset: {} | genes={} | regions={} | age scale={}\n",
        data.name,
        data.gene_names.len(),
        data.region_names.len(),
        data.age_scale.cache_tag(),
    ));
    out.push_str(&format!("Fitter: {}\n", fitter.cache_name()));
    if let Some(s) = shard {
        out.push_str(&format!("Shard: {s}\n"));
    }
    out.push_str(&format!(
        "Fits: n={} | failed={} | scored={} | mean LOO R2={}\n",
        summary.n_fits,
        summary.n_failed,
        summary.n_scored,
        fmt_opt(summary.mean_loo),
    ));

    if !summary.top.is_empty() {
        out.push_str("\nTop series by LOO R2:\n");
        out.push_str(&format!("{:<32} {:>8}\n", "series", "LOO R2"));
        out.push_str(&format!("{:-<32} {:-<8}\n", "", ""));
        for (key, score) in &summary.top {
            out.push_str(&format!("{:<32} {:>8.3}\n", truncate(&key.to_string(), 32), score));
        }
    }
    out
}

/// Mean LOO score of one shape, with its standard error.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeComparison {
    pub name: String,
    pub n: usize,
    pub mean: Option<f64>,
    pub sem: Option<f64>,
}

/// Per-shape LOO statistics, best mean first.
pub fn compare_shapes(named_fits: &[(String, FitMap)]) -> Vec<ShapeComparison> {
    let mut rows: Vec<ShapeComparison> = named_fits
        .iter()
        .map(|(name, fits)| {
            let scores: Vec<f64> = fits.values().filter_map(|r| r.loo_score).collect();
            ShapeComparison {
                name: name.clone(),
                n: scores.len(),
                mean: mean(&scores),
                sem: sem(&scores),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        let a = a.mean.unwrap_or(f64::NEG_INFINITY);
        let b = b.mean.unwrap_or(f64::NEG_INFINITY);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

/// LOO score pairs of series scored under both fit maps.
pub fn paired_loo_scores(a: &FitMap, b: &FitMap) -> Vec<(f64, f64)> {
    a.iter()
        .filter_map(|(key, ra)| {
            let rb = b.get(key)?;
            Some((ra.loo_score?, rb.loo_score?))
        })
        .collect()
}

pub fn format_comparison(rows: &[ShapeComparison]) -> String {
    let mut out = String::new();
    out.push_str("Shape comparison (LOO R2):\n");
    out.push_str(&format!("{:<24} {:>8} {:>10} {:>10}\n", "shape", "n", "mean", "sem"));
    out.push_str(&format!("{:-<24} {:-<8} {:-<10} {:-<10}\n", "", "", "", ""));
    for r in rows {
        out.push_str(&format!(
            "{:<24} {:>8} {:>10} {:>10}\n",
            truncate(&r.name, 24),
            r.n,
            fmt_opt(r.mean),
            fmt_opt(r.sem),
        ));
    }
    out
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitRecord;

    fn record(theta: bool, loo: Option<f64>) -> FitRecord {
        FitRecord {
            fitter: "sigmoid".to_string(),
            seed: 0,
            theta: theta.then(|| vec![0.0; 4]),
            sigma: None,
            fit_predictions: None,
            loo_predictions: Vec::new(),
            fit_score: None,
            loo_score: loo,
        }
    }

    fn fits(entries: &[(&str, bool, Option<f64>)]) -> FitMap {
        entries
            .iter()
            .map(|(g, theta, loo)| (GeneRegion::new(*g, "R"), record(*theta, *loo)))
            .collect()
    }

    #[test]
    fn summary_counts_and_top() {
        let f = fits(&[("A", true, Some(0.2)), ("B", true, Some(0.8)), ("C", false, None)]);
        let s = summarize(&f, 1);
        assert_eq!(s.n_fits, 3);
        assert_eq!(s.n_failed, 1);
        assert_eq!(s.n_scored, 2);
        assert!((s.mean_loo.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(s.top, vec![(GeneRegion::new("B", "R"), 0.8)]);
    }

    #[test]
    fn comparison_sorted_by_mean() {
        let named = vec![
            ("poly1".to_string(), fits(&[("A", true, Some(0.1)), ("B", true, Some(0.3))])),
            ("sigmoid".to_string(), fits(&[("A", true, Some(0.5)), ("B", true, Some(0.7))])),
            ("spline".to_string(), fits(&[("A", false, None)])),
        ];
        let rows = compare_shapes(&named);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sigmoid", "poly1", "spline"]);
        assert!((rows[0].sem.unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(rows[2].mean, None);

        let table = format_comparison(&rows);
        assert!(table.contains("sigmoid"));
        assert!(table.contains("n/a"));
    }

    #[test]
    fn pairs_need_both_scores() {
        let a = fits(&[("A", true, Some(0.1)), ("B", true, Some(0.3)), ("C", true, None)]);
        let b = fits(&[("A", true, Some(0.5)), ("C", true, Some(0.7))]);
        assert_eq!(paired_loo_scores(&a, &b), vec![(0.1, 0.5)]);
    }

    #[test]
    fn truncate_long_names() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
