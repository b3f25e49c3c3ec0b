//! SVG figures drawn with Plotters.
//!
//! Every `draw_*` function draws onto a caller-provided drawing area, so the
//! same series panel is used both for a full-size figure and as one cell of a
//! gene's subplot grid. `save_svg` owns the backend and file lifecycle.

use std::error::Error;
use std::fs;
use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use crate::data::Series;
use crate::domain::{FitRecord, ScoreKind, ShapeKind};
use crate::error::AppError;
use crate::models::{format_params, high_res_preds};

pub type DrawResult<T> = Result<T, Box<dyn Error>>;
pub type Area<'a> = DrawingArea<SVGBackend<'a>, Shift>;

pub const FIGURE_SIZE: (u32, u32) = (800, 600);
pub const GENE_FIGURE_SIZE: (u32, u32) = (1200, 900);

/// Range of the LOO score histogram.
pub const SCORE_RANGE: (f64, f64) = (-1.0, 1.0);
pub const SCORE_BINS: usize = 50;

const GREY: RGBColor = RGBColor(128, 128, 128);
const LIGHT_GREY: RGBColor = RGBColor(217, 217, 217);

/// Let `draw` fill an in-memory SVG, then write it to `path`.
///
/// Nothing is written when drawing fails.
pub fn save_svg<F>(path: &Path, size: (u32, u32), draw: F) -> Result<(), AppError>
where
    F: FnOnce(&Area) -> DrawResult<()>,
{
    let mut svg = String::new();
    let drawn = (|| -> DrawResult<()> {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE)?;
        draw(&root)?;
        root.present()?;
        Ok(())
    })();
    drawn.map_err(|e| AppError::input(format!("Failed to draw figure '{}': {e}", path.display())))?;

    fs::write(path, svg).map_err(|e| AppError::input(format!("Failed to write figure '{}': {e}", path.display())))
}

/// Subplot grid for `n` panels: `rows = ceil(sqrt(n))`, `cols = ceil(n / rows)`.
pub fn rect_subplot(n: usize) -> (usize, usize) {
    let n = n.max(1);
    let rows = (n as f64).sqrt().ceil() as usize;
    let cols = n.div_ceil(rows);
    (rows, cols)
}

/// Finite min/max of `values` padded by 5% (or ±1 for a degenerate range).
fn padded_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !(lo.is_finite() && hi.is_finite()) {
        return None;
    }
    if hi - lo < 1e-12 {
        return Some((lo - 1.0, hi + 1.0));
    }
    let pad = 0.05 * (hi - lo);
    Some((lo - pad, hi + pad))
}

fn format_age(years: f64) -> String {
    if years.abs() < 1.0 {
        format!("{years:.2}")
    } else {
        format!("{years:.0}")
    }
}

/// Draw one series: points, the smooth fit and the LOO predictions with their
/// residual lines.
///
/// `compact` panels (gene subplots) get a short title and no legend.
pub fn draw_series_fit(
    area: &Area,
    series: &Series,
    shape: ShapeKind,
    record: Option<&FitRecord>,
    score: ScoreKind,
    compact: bool,
) -> DrawResult<()> {
    let xs = &series.ages;
    let ys = &series.expression;
    let theta = record.and_then(|r| r.theta.as_deref());
    let smooth = theta.map(|t| high_res_preds(shape, t, xs));
    let loo: Vec<(f64, f64, f64)> = record
        .map(|r| {
            xs.iter()
                .zip(ys)
                .zip(&r.loo_predictions)
                .filter_map(|((&x, &y), p)| p.filter(|p| p.is_finite()).map(|p| (x, y, p)))
                .collect()
        })
        .unwrap_or_default();

    let (x0, x1) = padded_range(xs.iter().copied()).unwrap_or((0.0, 1.0));
    let smooth_y = smooth.iter().flat_map(|(_, y)| y.iter().copied());
    let (y0, y1) = padded_range(ys.iter().copied().chain(smooth_y).chain(loo.iter().map(|l| l.2)))
        .unwrap_or((0.0, 1.0));

    let title = match (compact, theta) {
        (true, _) => format!("Region {}", series.region_name),
        (false, None) => format!("{}@{}", series.gene_name, series.region_name),
        (false, Some(t)) => format!(
            "{}@{}, {} fit: {}",
            series.gene_name,
            series.region_name,
            shape.display_name(),
            format_params(shape, t, series.age_scale)
        ),
    };
    let font_size = if compact { 14 } else { 18 };

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", font_size))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(45)
        .build_cartesian_2d(x0..x1, y0..y1)?;

    // Tick labels show unscaled ages in years.
    let age_scale = series.age_scale;
    let x_fmt = move |v: &f64| format_age(age_scale.unscale(*v));
    let mut mesh = chart.configure_mesh();
    mesh.disable_x_mesh()
        .disable_y_mesh()
        .x_labels(6)
        .y_labels(6)
        .x_label_formatter(&x_fmt);
    if !compact {
        mesh.x_desc("age (years)").y_desc("expression level");
    }
    mesh.draw()?;

    let birth = age_scale.scale(0.0);
    if birth.is_finite() && birth > x0 && birth < x1 {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(birth, y0), (birth, y1)],
            &LIGHT_GREY,
        )))?;
    }

    chart.draw_series(xs.iter().zip(ys).map(|(&x, &y)| {
        EmptyElement::at((x, y)) + Rectangle::new([(-3, -3), (3, 3)], BLACK.filled())
    }))?;

    if let Some((gx, gy)) = smooth {
        let label = match record.and_then(|r| r.fit_score) {
            Some(s) => format!("fit ({}={s:.3})", score.display_name()),
            None => "fit".to_string(),
        };
        chart
            .draw_series(LineSeries::new(gx.into_iter().zip(gy), BLUE.stroke_width(3)))?
            .label(label)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(3)));
    }

    if !loo.is_empty() {
        let label = match record.and_then(|r| r.loo_score) {
            Some(s) => format!("LOO ({}={s:.3})", ScoreKind::R2.display_name()),
            None => "LOO".to_string(),
        };
        chart
            .draw_series(loo.iter().map(|&(x, y, p)| PathElement::new(vec![(x, y), (x, p)], &GREY)))?
            .label(label)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &GREY));
        chart.draw_series(loo.iter().map(|&(x, _, p)| Cross::new((x, p), 4, GREY.stroke_width(2))))?;
    }

    if !compact && theta.is_some() {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(WHITE.mix(0.8))
            .border_style(&LIGHT_GREY)
            .draw()?;
    }
    Ok(())
}

/// Draw all regions of one gene as a grid of compact panels.
pub fn draw_gene(
    area: &Area,
    gene: &str,
    panels: &[(Series, Option<&FitRecord>)],
    shape: ShapeKind,
    score: ScoreKind,
) -> DrawResult<()> {
    let body = area.titled(&format!("Gene {gene}"), ("sans-serif", 24))?;
    let cells = body.split_evenly(rect_subplot(panels.len()));
    for (cell, (series, record)) in cells.iter().zip(panels) {
        draw_series_fit(cell, series, shape, *record, score, true)?;
    }
    Ok(())
}

/// Binned LOO scores plus the counts the histogram cannot show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreHistogram {
    pub counts: Vec<usize>,
    /// Fits without a score.
    pub failed: usize,
    /// Scores below the histogram range.
    pub below: usize,
}

impl ScoreHistogram {
    pub fn from_scores(scores: &[Option<f64>], bins: usize) -> Self {
        let (low, high) = SCORE_RANGE;
        let bins = bins.max(1);
        let width = (high - low) / bins as f64;
        let mut counts = vec![0; bins];
        let mut failed = 0;
        let mut below = 0;

        for s in scores {
            match s {
                None => failed += 1,
                Some(v) if *v < low => below += 1,
                Some(v) if *v <= high => {
                    let i = (((v - low) / width) as usize).min(bins - 1);
                    counts[i] += 1;
                }
                Some(_) => {}
            }
        }
        Self { counts, failed, below }
    }
}

/// Histogram of LOO scores over [-1, 1].
pub fn draw_score_histogram(area: &Area, scores: &[Option<f64>]) -> DrawResult<()> {
    let hist = ScoreHistogram::from_scores(scores, SCORE_BINS);
    let (low, high) = SCORE_RANGE;
    let width = (high - low) / hist.counts.len() as f64;
    let y_max = hist.counts.iter().copied().max().unwrap_or(0).max(1) as f64 * 1.1;

    let mut title = "LOO R2 score distribution".to_string();
    if hist.failed > 0 || hist.below > 0 {
        title = format!(
            "{title} (another {} failed fits and {} scores below {low})",
            hist.failed, hist.below
        );
    }

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(low..high, 0.0..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("R2")
        .y_desc("count")
        .draw()?;

    chart.draw_series(hist.counts.iter().enumerate().filter(|(_, c)| **c > 0).map(|(i, &c)| {
        let left = low + width * i as f64;
        Rectangle::new([(left, 0.0), (left + width, c as f64)], BLUE.mix(0.7).filled())
    }))?;
    Ok(())
}

/// Scatter of per-series LOO scores of two shapes, with the diagonal.
pub fn draw_comparison_scatter(area: &Area, name1: &str, name2: &str, pairs: &[(f64, f64)]) -> DrawResult<()> {
    let (low, high) = SCORE_RANGE;
    let mut chart = ChartBuilder::on(area)
        .caption(format!("LOO R2: {name1} vs {name2}"), ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(45)
        .build_cartesian_2d(low..high, low..high)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc(format!("R2 for {name1}"))
        .y_desc(format!("R2 for {name2}"))
        .draw()?;

    chart.draw_series(LineSeries::new(vec![(low, low), (high, high)], &BLACK))?;
    chart.draw_series(
        pairs
            .iter()
            .map(|&(a, b)| Circle::new((a.clamp(low, high), b.clamp(low, high)), 3, BLUE.mix(0.3).filled())),
    )?;
    Ok(())
}

/// Probability density of LOO scores over [-1, 1] as `(bin center, density)`.
///
/// Scores below the range count toward the lowest bin.
pub fn score_density(scores: &[f64], bins: usize) -> Vec<(f64, f64)> {
    let (low, high) = SCORE_RANGE;
    let bins = bins.max(1);
    let width = (high - low) / bins as f64;
    let mut counts = vec![0usize; bins];
    let mut n = 0usize;
    for &s in scores.iter().filter(|s| s.is_finite()) {
        let i = (((s.max(low) - low) / width) as usize).min(bins - 1);
        counts[i] += 1;
        n += 1;
    }
    counts
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let center = low + width * (i as f64 + 0.5);
            let density = if n == 0 { 0.0 } else { c as f64 / (n as f64 * width) };
            (center, density)
        })
        .collect()
}

/// One LOO score density curve per shape.
pub fn draw_score_densities(area: &Area, shapes: &[(String, Vec<f64>)]) -> DrawResult<()> {
    let (low, high) = SCORE_RANGE;
    let curves: Vec<(&str, Vec<(f64, f64)>)> = shapes
        .iter()
        .map(|(name, scores)| (name.as_str(), score_density(scores, SCORE_BINS)))
        .collect();
    let y_max = curves
        .iter()
        .flat_map(|(_, c)| c.iter().map(|p| p.1))
        .fold(0.0, f64::max)
        .max(1e-3)
        * 1.1;

    let mut chart = ChartBuilder::on(area)
        .caption("LOO R2 score density", ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(low..high, 0.0..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc("test R2 score")
        .y_desc("probability density")
        .draw()?;

    for (i, (name, curve)) in curves.into_iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(curve, color.stroke_width(3)))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3)));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(&LIGHT_GREY)
        .draw()?;
    Ok(())
}

/// Bar per shape at its mean LOO score, with a standard error bar.
///
/// `rows` holds `(name, mean, sem)`.
pub fn draw_mean_scores(area: &Area, rows: &[(String, f64, f64)]) -> DrawResult<()> {
    let n = rows.len().max(1);
    let y_top = rows.iter().map(|(_, m, s)| m + s).fold(0.0, f64::max);
    let y_bottom = rows.iter().map(|(_, m, s)| m - s).fold(0.0, f64::min);
    let pad = 0.1 * (y_top - y_bottom).max(1e-3);
    let y0 = if y_bottom < 0.0 { y_bottom - pad } else { 0.0 };

    let mut chart = ChartBuilder::on(area)
        .caption("Mean LOO R2 by shape", ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), y0..(y_top + pad))?;

    let names: Vec<&str> = rows.iter().map(|(name, _, _)| name.as_str()).collect();
    let x_fmt = |v: &f64| {
        let i = v.round();
        match names.get(i as usize) {
            Some(name) if (v - i).abs() < 1e-6 && i >= 0.0 => name.to_string(),
            _ => String::new(),
        }
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&x_fmt)
        .y_desc("mean LOO R2")
        .draw()?;

    chart.draw_series(rows.iter().enumerate().map(|(i, (_, m, _))| {
        let x = i as f64;
        Rectangle::new([(x - 0.4, 0.0), (x + 0.4, *m)], BLUE.filled())
    }))?;
    chart.draw_series(rows.iter().enumerate().map(|(i, (_, m, s))| {
        let x = i as f64;
        PathElement::new(vec![(x, m - s), (x, m + s)], GREY.stroke_width(2))
    }))?;
    Ok(())
}
