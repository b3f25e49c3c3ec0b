//! HTML report of a fit run.
//!
//! `fits.html` is a genes × regions table. Each cell links to the series
//! figure and shows the LOO score, colored by rank:
//!
//! ```text
//! rank = ceil(5 * score)   when score > 0
//! rank = 0                 otherwise
//! ```
//!
//! With a pathways file (JSON object: pathway name -> gene list) the same
//! table is also broken down per pathway.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::data::Dataset;
use crate::domain::{FitMap, GeneRegion};
use crate::error::AppError;
use crate::fit::Fitter;
use crate::plot::{HISTOGRAM_FILE, gene_figure_rel, series_figure_rel};

pub const HTML_FILE: &str = "fits.html";
pub const CSS_FILE: &str = "fits.css";
pub const PATHWAYS_FILE: &str = "pathway-fits.html";
pub const PATHWAYS_UNIQUE_FILE: &str = "pathway-fits-unique.html";

const N_RANKS: f64 = 5.0;

const FITS_CSS: &str = "\
body { font-family: sans-serif; }
table { border-collapse: collapse; }
td { padding: 2px 6px; text-align: center; }
td.tableHeading { font-weight: bold; }
a { text-decoration: none; color: inherit; }
.score { padding: 2px; border-radius: 3px; }
.rank0 { background-color: #ffffff; }
.rank1 { background-color: #fde0dd; }
.rank2 { background-color: #fcc5c0; }
.rank3 { background-color: #fa9fb5; }
.rank4 { background-color: #f768a1; }
.rank5 { background-color: #dd3497; color: #ffffff; }
.footer { color: #888888; font-size: small; }
";

/// Pathway name -> genes.
pub type Pathways = BTreeMap<String, Vec<String>>;

/// Score rank used for the cell color class.
pub fn score_rank(score: f64) -> u8 {
    if score > 0.0 {
        (N_RANKS * score).ceil().min(N_RANKS) as u8
    } else {
        0
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Read a pathways JSON file.
pub fn load_pathways(path: &Path) -> Result<Pathways, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::input(format!("Failed to read pathways file '{}': {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| AppError::input(format!("Invalid pathways file '{}': {e}", path.display())))
}

/// Restrict each pathway to genes that belong to no other pathway.
pub fn unique_pathways(pathways: &Pathways) -> Pathways {
    let mut count: HashMap<&str, usize> = HashMap::new();
    for genes in pathways.values() {
        let distinct: HashSet<&str> = genes.iter().map(String::as_str).collect();
        for g in distinct {
            *count.entry(g).or_default() += 1;
        }
    }
    pathways
        .iter()
        .map(|(name, genes)| {
            let only_here = genes.iter().filter(|g| count.get(g.as_str()) == Some(&1)).cloned().collect();
            (name.clone(), only_here)
        })
        .collect()
}

/// Whether the dataset covers enough of the pathway genes for a breakdown.
fn pathways_cover_data(data: &Dataset, pathways: &Pathways) -> bool {
    let all: HashSet<&str> = pathways.values().flatten().map(String::as_str).collect();
    let present: HashSet<&str> = data.gene_names.iter().map(String::as_str).collect();
    let missing = all.iter().filter(|g| !present.contains(*g)).count();
    missing < all.len().div_ceil(2)
}

fn page_head(out: &mut String, title: &str) {
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    out.push_str(&format!("<link rel=\"stylesheet\" type=\"text/css\" href=\"{CSS_FILE}\">\n"));
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(title)));
}

fn page_foot(out: &mut String, fitter: &Fitter) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M");
    out.push_str(&format!(
        "<p class=\"footer\">{} | generated {now}</p>\n",
        escape_html(&fitter.cache_name())
    ));
    out.push_str("</body>\n</html>\n");
}

fn fit_table(out: &mut String, genes: &[String], regions: &[String], fits: &FitMap) {
    out.push_str("<table>\n<tr>\n<th></th>\n");
    for region in regions {
        out.push_str(&format!("<th class=\"tableHeading\">{}</th>\n", escape_html(region)));
    }
    out.push_str("</tr>\n");

    for gene in genes {
        out.push_str("<tr>\n");
        out.push_str(&format!(
            "<td><a href=\"{}\"><b>{}</b></a></td>\n",
            escape_html(&gene_figure_rel(gene)),
            escape_html(gene)
        ));
        for region in regions {
            let key = GeneRegion::new(gene, region);
            let Some(record) = fits.get(&key) else {
                out.push_str("<td></td>\n");
                continue;
            };
            let href = escape_html(&series_figure_rel(&key));
            let body = match record.loo_score {
                Some(s) => format!("<div class=\"score rank{}\">{s:.2}</div>", score_rank(s)),
                None => "No Score".to_string(),
            };
            out.push_str(&format!("<td><a href=\"{href}\">{body}</a></td>\n"));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
}

/// Render the main `fits.html` page.
pub fn render_fits_html(data: &Dataset, fitter: &Fitter, fits: &FitMap, with_pathways: bool) -> String {
    let mut out = String::new();
    page_head(&mut out, &format!("Fits for every Gene and Region ({})", fitter.shape().display_name()));

    out.push_str(&format!(
        "<p><a href=\"{HISTOGRAM_FILE}\">Distribution of LOO R2 scores</a></p>\n"
    ));
    if with_pathways {
        out.push_str(&format!(
            "<p><a href=\"{PATHWAYS_UNIQUE_FILE}\">Breakdown of fits by pathway (unique)</a><br/>\n\
             <a href=\"{PATHWAYS_FILE}\">Breakdown of fits by pathway (overlapping)</a></p>\n"
        ));
    }

    fit_table(&mut out, &data.gene_names, &data.region_names, fits);
    page_foot(&mut out, fitter);
    out
}

/// Render a per-pathway breakdown page.
pub fn render_pathways_html(data: &Dataset, fitter: &Fitter, fits: &FitMap, pathways: &Pathways, unique: bool) -> String {
    let mut out = String::new();
    let title = if unique {
        "Fits broken down by pathway (unique genes only)"
    } else {
        "Fits broken down by pathway"
    };
    page_head(&mut out, title);

    for (name, genes) in pathways {
        out.push_str(&format!("<h2>{}</h2>\n", escape_html(name)));
        fit_table(&mut out, genes, &data.region_names, fits);
    }
    page_foot(&mut out, fitter);
    out
}

fn write_file(path: &Path, contents: &str) -> Result<(), AppError> {
    fs::write(path, contents).map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

/// Write `fits.html`, `fits.css` and (optionally) the pathway pages.
pub fn create_html(
    data: &Dataset,
    fitter: &Fitter,
    fits: &FitMap,
    basedir: &Path,
    pathways: Option<&Pathways>,
) -> Result<(), AppError> {
    fs::create_dir_all(basedir)
        .map_err(|e| AppError::input(format!("Failed to create results dir '{}': {e}", basedir.display())))?;

    let pathways = match pathways {
        Some(p) if pathways_cover_data(data, p) => Some(p),
        Some(_) => {
            warn!("Most pathway genes are missing from the dataset, skipping pathway pages");
            None
        }
        None => None,
    };

    if let Some(p) = pathways {
        write_file(&basedir.join(PATHWAYS_FILE), &render_pathways_html(data, fitter, fits, p, false))?;
        let unique = unique_pathways(p);
        write_file(&basedir.join(PATHWAYS_UNIQUE_FILE), &render_pathways_html(data, fitter, fits, &unique, true))?;
    }

    let html_path = basedir.join(HTML_FILE);
    write_file(&html_path, &render_fits_html(data, fitter, fits, pathways.is_some()))?;
    write_file(&basedir.join(CSS_FILE), FITS_CSS)?;
    info!(path = %html_path.display(), "Saved HTML");
    Ok(())
}
