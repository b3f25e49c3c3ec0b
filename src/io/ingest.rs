//! Dataset CSV ingest.
//!
//! Expected schema (long format, one measurement per row):
//!
//! ```text
//! gene,region,sample,age,expression
//! GRIN2A,DFC,H376.IIA.51,-0.4,3.1
//! ```
//!
//! - `gene`, `region`, `age`, `expression` are required columns
//! - `sample` is optional; without it the age identifies the sample
//! - an empty `expression` cell is a missing value
//!
//! Malformed rows are skipped and reported; a file with no usable rows is an
//! error.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::time::UNIX_EPOCH;

use csv::StringRecord;
use tracing::{info, warn};

use crate::data::{Dataset, Measurement};
use crate::domain::AgeScale;
use crate::error::{AppError, EXIT_DATA};
use crate::util::{cached, fnv1a64};

const REQUIRED_COLUMNS: [&str; 4] = ["gene", "region", "age", "expression"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Parsed rows plus diagnostics.
#[derive(Debug, Clone)]
pub struct IngestedRows {
    pub rows: Vec<Measurement>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Read measurement rows from a CSV file.
pub fn read_measurements(path: &Path) -> Result<IngestedRows, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open dataset CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !header_map.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::input(format!(
            "Dataset CSV '{}' is missing required column(s): {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse_row(&record, &header_map));
        match parsed {
            Ok(row) => rows.push(row),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if rows.is_empty() {
        return Err(AppError::new(
            EXIT_DATA,
            format!("No valid rows in dataset CSV '{}'.", path.display()),
        ));
    }

    Ok(IngestedRows {
        rows,
        row_errors,
        rows_read,
    })
}

/// Load a dataset from CSV, reusing a binary snapshot under `cache_dir` when present.
///
/// `name` defaults to the file stem. `refresh` forces re-reading the CSV.
pub fn load_dataset(
    path: &Path,
    name: Option<&str>,
    age_scale: AgeScale,
    cache_dir: &Path,
    refresh: bool,
) -> Result<Dataset, AppError> {
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::input(format!("Cannot derive dataset name from '{}'.", path.display())))?,
    };

    let snapshot = cache_dir
        .join("datasets")
        .join(format!("{name}-{:016x}.bin", source_fingerprint(path)?));
    let dataset: Dataset = cached(&snapshot, "dataset", refresh, || {
        let ingested = read_measurements(path)?;
        if !ingested.row_errors.is_empty() {
            warn!(
                skipped = ingested.row_errors.len(),
                rows = ingested.rows_read,
                "Skipped malformed dataset rows"
            );
            for err in ingested.row_errors.iter().take(5) {
                warn!(line = err.line, "{}", err.message);
            }
        }
        Ok(Dataset::from_measurements(name.clone(), ingested.rows))
    })?;

    info!(
        dataset = %dataset.name,
        genes = dataset.gene_names.len(),
        regions = dataset.region_names.len(),
        "Loaded dataset"
    );
    Ok(dataset.with_age_scale(age_scale))
}

/// Key of the CSV's current contents: its absolute path, size and mtime.
///
/// Editing or replacing the file changes the key, so a stale snapshot is
/// never reused.
fn source_fingerprint(path: &Path) -> Result<u64, AppError> {
    let meta = fs::metadata(path)
        .map_err(|e| AppError::input(format!("Failed to read dataset '{}': {e}", path.display())))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos() as u64);
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let mut bytes = absolute.to_string_lossy().into_owned().into_bytes();
    bytes.extend_from_slice(&meta.len().to_le_bytes());
    bytes.extend_from_slice(&mtime.to_le_bytes());
    Ok(fnv1a64(&bytes))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn field_value<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> &'a str {
    header_map
        .get(name)
        .and_then(|&i| record.get(i))
        .unwrap_or("")
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<Measurement, String> {
    let field = |name: &str| field_value(record, header_map, name);

    let gene = field("gene");
    let region = field("region");
    if gene.is_empty() || region.is_empty() {
        return Err("empty gene or region".to_string());
    }

    let age = field("age")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid age '{}'", field("age")))?;

    let raw_expr = field("expression");
    let expression = if raw_expr.is_empty() || raw_expr.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(
            raw_expr
                .parse::<f64>()
                .map_err(|_| format!("invalid expression '{raw_expr}'"))?,
        )
    };

    let sample = Some(field("sample")).filter(|s| !s.is_empty()).map(str::to_string);

    Ok(Measurement {
        gene: gene.to_string(),
        region: region.to_string(),
        sample,
        age,
        expression,
    })
}
