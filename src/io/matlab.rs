//! Level 5 MAT-file export.
//!
//! Only the subset of the format the fit export needs is implemented: real
//! double arrays of any rank, char row vectors and cell arrays, written
//! uncompressed and little-endian.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::data::Dataset;
use crate::domain::FitMap;
use crate::error::AppError;
use crate::fit::Fitter;
use crate::models::{can_export_params, n_params};

const MI_INT8: u32 = 1;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;

const MX_CELL_CLASS: u32 = 1;
const MX_CHAR_CLASS: u32 = 4;
const MX_DOUBLE_CLASS: u32 = 6;

/// A value that can be stored as a MAT-file variable.
#[derive(Debug, Clone, PartialEq)]
pub enum MatValue {
    /// Real double array; `data` is column-major.
    Double { dims: Vec<usize>, data: Vec<f64> },
    /// Char row vector.
    Char(String),
    /// Cell array; `items` is column-major.
    Cell { dims: Vec<usize>, items: Vec<MatValue> },
}

impl MatValue {
    pub fn scalar(v: f64) -> Self {
        MatValue::Double {
            dims: vec![1, 1],
            data: vec![v],
        }
    }

    /// Column cell array of strings.
    pub fn strings(values: &[String]) -> Self {
        MatValue::Cell {
            dims: vec![values.len(), 1],
            items: values.iter().cloned().map(MatValue::Char).collect(),
        }
    }
}

/// Column-major dense array filled with NaN.
#[derive(Debug, Clone)]
struct NdArray {
    dims: Vec<usize>,
    data: Vec<f64>,
}

impl NdArray {
    fn nan(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
            data: vec![f64::NAN; dims.iter().product()],
        }
    }

    fn offset(&self, idx: &[usize]) -> usize {
        let mut off = 0;
        let mut stride = 1;
        for (i, d) in idx.iter().zip(&self.dims) {
            off += i * stride;
            stride *= d;
        }
        off
    }

    fn set(&mut self, idx: &[usize], v: Option<f64>) {
        let off = self.offset(idx);
        if let Some(slot) = self.data.get_mut(off) {
            *slot = v.unwrap_or(f64::NAN);
        }
    }

    fn into_value(self) -> MatValue {
        MatValue::Double {
            dims: self.dims,
            data: self.data,
        }
    }
}

/// Write the fits of one (dataset, fitter) pair as a MAT-file.
///
/// Variables: `gene_names`, `region_names`, `theta`
/// (n_params × genes × regions, or NaN when the shape's parameters have no
/// fixed layout), `fit_scores`, `LOO_scores` (genes × regions) and
/// `fit_predictions`, `LOO_predictions` (samples × genes × regions).
pub fn save_as_mat_file(data: &Dataset, fitter: &Fitter, fits: &FitMap, path: &Path) -> Result<(), AppError> {
    info!(path = %path.display(), "Saving mat file");

    let gene_idx: HashMap<&str, usize> = data.gene_names.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();
    let region_idx: HashMap<&str, usize> =
        data.region_names.iter().enumerate().map(|(i, r)| (r.as_str(), i)).collect();
    let (n_genes, n_regions) = (data.gene_names.len(), data.region_names.len());
    let n_samples = data.max_samples();

    let shape = fitter.shape();
    let mut theta = match n_params(shape) {
        Some(p) if can_export_params(shape) => Some(NdArray::nan(&[p, n_genes, n_regions])),
        _ => None,
    };
    let mut fit_scores = NdArray::nan(&[n_genes, n_regions]);
    let mut loo_scores = NdArray::nan(&[n_genes, n_regions]);
    let mut fit_predictions = NdArray::nan(&[n_samples, n_genes, n_regions]);
    let mut loo_predictions = NdArray::nan(&[n_samples, n_genes, n_regions]);

    for (key, record) in fits {
        let (Some(&ig), Some(&ir)) = (gene_idx.get(key.gene.as_str()), region_idx.get(key.region.as_str())) else {
            continue;
        };
        fit_scores.set(&[ig, ir], record.fit_score);
        loo_scores.set(&[ig, ir], record.loo_score);

        if let (Some(theta), Some(values)) = (theta.as_mut(), record.theta.as_ref()) {
            for (p, v) in values.iter().enumerate() {
                theta.set(&[p, ig, ir], Some(*v));
            }
        }

        let series = data.series(key);
        if let Some(preds) = &record.fit_predictions {
            for (&i, v) in series.original_inds.iter().zip(preds) {
                fit_predictions.set(&[i, ig, ir], Some(*v));
            }
        }
        for (&i, v) in series.original_inds.iter().zip(&record.loo_predictions) {
            loo_predictions.set(&[i, ig, ir], *v);
        }
    }

    let vars = vec![
        ("gene_names", MatValue::strings(&data.gene_names)),
        ("region_names", MatValue::strings(&data.region_names)),
        ("theta", theta.map_or(MatValue::scalar(f64::NAN), NdArray::into_value)),
        ("fit_scores", fit_scores.into_value()),
        ("LOO_scores", loo_scores.into_value()),
        ("fit_predictions", fit_predictions.into_value()),
        ("LOO_predictions", loo_predictions.into_value()),
    ];
    write_mat_file(path, &vars)
}

/// Write named variables to a MAT-file.
pub fn write_mat_file(path: &Path, vars: &[(&str, MatValue)]) -> Result<(), AppError> {
    let mut buf = header();
    for (name, value) in vars {
        encode_matrix(&mut buf, name, value);
    }
    fs::write(path, buf).map_err(|e| AppError::input(format!("Failed to write mat file '{}': {e}", path.display())))
}

fn header() -> Vec<u8> {
    let created = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
    let text = format!("MATLAB 5.0 MAT-file, Platform: gexfit, Created on: {created}");
    let mut buf: Vec<u8> = text.into_bytes();
    buf.resize(116, b' ');
    buf.truncate(116);
    // Subsystem data offset (unused).
    buf.extend_from_slice(&[0u8; 8]);
    buf.extend_from_slice(&0x0100u16.to_le_bytes());
    buf.extend_from_slice(b"IM");
    buf
}

fn push_element(buf: &mut Vec<u8>, data_type: u32, payload: &[u8]) {
    buf.extend_from_slice(&data_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    pad8(buf);
}

fn pad8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

fn encode_matrix(buf: &mut Vec<u8>, name: &str, value: &MatValue) {
    let mut body = Vec::new();

    let (class, dims): (u32, Vec<usize>) = match value {
        MatValue::Double { dims, .. } => (MX_DOUBLE_CLASS, dims.clone()),
        MatValue::Char(s) => (MX_CHAR_CLASS, vec![1, s.encode_utf16().count()]),
        MatValue::Cell { dims, .. } => (MX_CELL_CLASS, dims.clone()),
    };

    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&class.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(&mut body, MI_UINT32, &flags);

    let dim_bytes: Vec<u8> = dims.iter().flat_map(|&d| (d as i32).to_le_bytes()).collect();
    push_element(&mut body, MI_INT32, &dim_bytes);

    push_element(&mut body, MI_INT8, name.as_bytes());

    match value {
        MatValue::Double { data, .. } => {
            let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
            push_element(&mut body, MI_DOUBLE, &bytes);
        }
        MatValue::Char(s) => {
            let bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
            push_element(&mut body, MI_UINT16, &bytes);
        }
        MatValue::Cell { items, .. } => {
            for item in items {
                encode_matrix(&mut body, "", item);
            }
        }
    }

    push_element(buf, MI_MATRIX, &body);
}
