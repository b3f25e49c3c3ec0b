//! Fit scoring.
//!
//! Two scores per fit:
//! - `fit_score`: configurable in-sample score of the overall fit
//! - `loo_score`: R² of the leave-one-out predictions
//!
//! Scores never fail the sweep: anything that cannot be scored is `None`.

use rayon::prelude::*;

use crate::data::Dataset;
use crate::domain::{FitMap, FitRecord, ScoreKind};
use crate::math::stats::{pearson, r_squared};

/// In-sample score of predictions against observed values.
pub fn score(kind: ScoreKind, y: &[f64], y_pred: &[f64]) -> Option<f64> {
    match kind {
        ScoreKind::R2 => r_squared(y, y_pred),
        ScoreKind::Pearson => pearson(y, y_pred),
    }
}

/// R² over the points that have a leave-one-out prediction.
pub fn loo_score(y: &[f64], loo_predictions: &[Option<f64>]) -> Option<f64> {
    if y.len() != loo_predictions.len() {
        return None;
    }
    let (obs, pred): (Vec<f64>, Vec<f64>) = y
        .iter()
        .zip(loo_predictions)
        .filter_map(|(&yi, p)| p.map(|p| (yi, p)))
        .unzip();
    r_squared(&obs, &pred)
}

/// Set both score fields of one record from its series values.
pub fn score_record(kind: ScoreKind, y: &[f64], record: &mut FitRecord) {
    record.fit_score = record
        .fit_predictions
        .as_deref()
        .and_then(|pred| score(kind, y, pred));
    record.loo_score = loo_score(y, &record.loo_predictions);
}

/// Score every fit in the map (in parallel).
pub fn compute_scores(data: &Dataset, kind: ScoreKind, fits: &mut FitMap) {
    fits.par_iter_mut().for_each(|(key, record)| {
        let series = data.series(key);
        score_record(kind, &series.expression, record);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fit: Option<Vec<f64>>, loo: Vec<Option<f64>>) -> FitRecord {
        FitRecord {
            fitter: "poly1".to_string(),
            seed: 0,
            theta: fit.as_ref().map(|_| vec![0.0, 1.0]),
            sigma: None,
            fit_predictions: fit,
            loo_predictions: loo,
            fit_score: Some(123.0),
            loo_score: Some(123.0),
        }
    }

    #[test]
    fn loo_score_ignores_missing_predictions() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let loo = [Some(1.0), None, Some(3.0), Some(4.0)];
        assert_eq!(loo_score(&y, &loo), Some(1.0));
    }

    #[test]
    fn failed_fit_scores_are_unavailable() {
        let y = [1.0, 2.0, 3.0];
        let mut r = record(None, vec![None, None, None]);
        score_record(ScoreKind::R2, &y, &mut r);
        assert_eq!(r.fit_score, None);
        assert_eq!(r.loo_score, None);
    }

    #[test]
    fn mismatched_lengths_are_unavailable() {
        let y = [1.0, 2.0, 3.0];
        let mut r = record(Some(vec![1.0, 2.0]), vec![Some(1.0)]);
        score_record(ScoreKind::R2, &y, &mut r);
        assert_eq!(r.fit_score, None);
        assert_eq!(r.loo_score, None);
    }

    #[test]
    fn pearson_score_kind() {
        let y = [1.0, 2.0, 3.0];
        let s = score(ScoreKind::Pearson, &y, &[2.0, 4.0, 6.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-12);
    }
}
