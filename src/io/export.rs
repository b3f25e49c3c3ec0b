//! Export fitted parameters to a tab-separated text file.
//!
//! One line per fit with parameters: `gene<TAB>region<TAB>theta_1<TAB>...`.
//! Fits without parameters are left out. For splines, theta is the knot
//! positions followed by the basis coefficients.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::domain::FitMap;
use crate::error::AppError;

/// Write the theta of every successful fit to `path`.
pub fn save_theta_text_file(fits: &FitMap, path: &Path) -> Result<usize, AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create theta file '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);

    let mut written = 0;
    for (key, record) in fits {
        let Some(theta) = &record.theta else { continue };
        let mut line = format!("{}\t{}", key.gene, key.region);
        for v in theta {
            line.push_str(&format!("\t{v:.10e}"));
        }
        writeln!(out, "{line}")
            .map_err(|e| AppError::input(format!("Failed to write theta file row: {e}")))?;
        written += 1;
    }
    out.flush()
        .map_err(|e| AppError::input(format!("Failed to write theta file '{}': {e}", path.display())))?;

    info!(path = %path.display(), fits = written, "Saved theta text file");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitRecord, GeneRegion};

    fn record(theta: Option<Vec<f64>>) -> FitRecord {
        FitRecord {
            fitter: "spline-k5-priors".to_string(),
            seed: 0,
            theta,
            sigma: None,
            fit_predictions: None,
            loo_predictions: Vec::new(),
            fit_score: None,
            loo_score: None,
        }
    }

    #[test]
    fn writes_one_line_per_fit_with_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("theta.txt");
        let mut fits = FitMap::new();
        fits.insert(GeneRegion::new("A", "R1"), record(Some(vec![1.0, -0.5])));
        fits.insert(GeneRegion::new("B", "R1"), record(None));

        assert_eq!(save_theta_text_file(&fits, &path).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let cols: Vec<&str> = lines[0].split('\t').collect();
        assert_eq!(&cols[..2], &["A", "R1"]);
        assert_eq!(cols[2].parse::<f64>().unwrap(), 1.0);
        assert_eq!(cols[3].parse::<f64>().unwrap(), -0.5);
    }
}
