//! In-memory expression dataset.
//!
//! A dataset is a gene × region × sample cube. Each region has its own sample
//! list (sorted by age); each (gene, region) pair holds one optional
//! expression value per sample of that region.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AgeScale, GeneRegion};

/// One measurement row, as read from (or written to) the dataset CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub gene: String,
    pub region: String,
    /// Sample (donor) id; when absent the age identifies the sample.
    pub sample: Option<String>,
    /// Age in years (negative for prenatal samples).
    pub age: f64,
    pub expression: Option<f64>,
}

/// One sample of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub age: f64,
}

/// Expression-vs-age data of one (gene, region) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub gene_name: String,
    pub region_name: String,
    /// Ages after applying the dataset's age scale, ascending.
    pub ages: Vec<f64>,
    pub expression: Vec<f64>,
    /// Index of each point in its region's sample list.
    pub original_inds: Vec<usize>,
    pub age_scale: AgeScale,
}

impl Series {
    pub fn len(&self) -> usize {
        self.ages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ages.is_empty()
    }

    pub fn key(&self) -> GeneRegion {
        GeneRegion::new(&self.gene_name, &self.region_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Genes in first-appearance order.
    pub gene_names: Vec<String>,
    /// Regions in first-appearance order.
    pub region_names: Vec<String>,
    pub age_scale: AgeScale,
    samples: HashMap<String, Vec<Sample>>,
    values: HashMap<GeneRegion, Vec<Option<f64>>>,
}

impl Dataset {
    /// Build a dataset from measurement rows.
    ///
    /// Rows with a non-finite age are ignored. When the same (gene, region,
    /// sample) appears more than once, the first value is kept.
    pub fn from_measurements<I>(name: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Measurement>,
    {
        let mut gene_names: Vec<String> = Vec::new();
        let mut region_names: Vec<String> = Vec::new();
        let mut samples: HashMap<String, Vec<Sample>> = HashMap::new();
        let mut sample_index: HashMap<(String, String), usize> = HashMap::new();
        let mut raw: HashMap<GeneRegion, Vec<(usize, Option<f64>)>> = HashMap::new();

        for m in rows {
            if !m.age.is_finite() {
                continue;
            }
            if !gene_names.contains(&m.gene) {
                gene_names.push(m.gene.clone());
            }
            if !region_names.contains(&m.region) {
                region_names.push(m.region.clone());
            }

            let sample_id = m.sample.clone().unwrap_or_else(|| format!("{}", m.age));
            let region_samples = samples.entry(m.region.clone()).or_default();
            let idx = *sample_index
                .entry((m.region.clone(), sample_id.clone()))
                .or_insert_with(|| {
                    region_samples.push(Sample { id: sample_id, age: m.age });
                    region_samples.len() - 1
                });

            let entries = raw.entry(GeneRegion::new(m.gene, m.region)).or_default();
            if !entries.iter().any(|(i, _)| *i == idx) {
                entries.push((idx, m.expression.filter(|v| v.is_finite())));
            }
        }

        // Sort each region's samples by age and remap value positions.
        let mut remap: HashMap<String, Vec<usize>> = HashMap::new();
        for (region, list) in samples.iter_mut() {
            let mut order: Vec<usize> = (0..list.len()).collect();
            order.sort_by(|&a, &b| {
                list[a]
                    .age
                    .partial_cmp(&list[b].age)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| list[a].id.cmp(&list[b].id))
            });
            let mut new_pos = vec![0; list.len()];
            for (pos, &old) in order.iter().enumerate() {
                new_pos[old] = pos;
            }
            *list = order.iter().map(|&i| list[i].clone()).collect();
            remap.insert(region.clone(), new_pos);
        }

        let values = raw
            .into_iter()
            .map(|(key, entries)| {
                let n = samples.get(&key.region).map_or(0, Vec::len);
                let mut v = vec![None; n];
                if let Some(pos) = remap.get(&key.region) {
                    for (old, value) in entries {
                        v[pos[old]] = value;
                    }
                }
                (key, v)
            })
            .collect();

        Self {
            name: name.into(),
            gene_names,
            region_names,
            age_scale: AgeScale::None,
            samples,
            values,
        }
    }

    pub fn with_age_scale(mut self, scale: AgeScale) -> Self {
        self.age_scale = scale;
        self
    }

    /// Identity used in cache and results paths (`<name>-<scale>`).
    pub fn cache_id(&self) -> String {
        format!("{}-{}", self.name, self.age_scale.cache_tag())
    }

    /// The full gene × region product, gene-major.
    pub fn gene_regions(&self) -> Vec<GeneRegion> {
        self.gene_names
            .iter()
            .flat_map(|g| self.region_names.iter().map(move |r| GeneRegion::new(g, r)))
            .collect()
    }

    pub fn region_samples(&self, region: &str) -> &[Sample] {
        self.samples.get(region).map_or(&[], Vec::as_slice)
    }

    /// Largest number of samples in any region.
    pub fn max_samples(&self) -> usize {
        self.samples.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Extract the series of one (gene, region) pair.
    ///
    /// Missing values and ages that do not survive scaling are dropped. A pair
    /// without data yields an empty series.
    pub fn series(&self, key: &GeneRegion) -> Series {
        let mut series = Series {
            gene_name: key.gene.clone(),
            region_name: key.region.clone(),
            ages: Vec::new(),
            expression: Vec::new(),
            original_inds: Vec::new(),
            age_scale: self.age_scale,
        };
        let Some(values) = self.values.get(key) else {
            return series;
        };
        let samples = self.region_samples(&key.region);

        for (i, (sample, value)) in samples.iter().zip(values).enumerate() {
            let Some(y) = value else { continue };
            let x = self.age_scale.scale(sample.age);
            if !x.is_finite() {
                continue;
            }
            series.ages.push(x);
            series.expression.push(*y);
            series.original_inds.push(i);
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(gene: &str, region: &str, sample: &str, age: f64, y: Option<f64>) -> Measurement {
        Measurement {
            gene: gene.to_string(),
            region: region.to_string(),
            sample: Some(sample.to_string()),
            age,
            expression: y,
        }
    }

    #[test]
    fn product_is_gene_major() {
        let data = Dataset::from_measurements(
            "t",
            vec![
                m("G1", "R1", "s1", 1.0, Some(1.0)),
                m("G2", "R2", "s1", 1.0, Some(1.0)),
            ],
        );
        let keys: Vec<String> = data.gene_regions().iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["G1@R1", "G1@R2", "G2@R1", "G2@R2"]);
    }

    #[test]
    fn series_sorted_by_age_and_skips_missing() {
        let data = Dataset::from_measurements(
            "t",
            vec![
                m("G", "R", "old", 30.0, Some(3.0)),
                m("G", "R", "young", 1.0, Some(1.0)),
                m("G", "R", "mid", 10.0, None),
            ],
        );
        let s = data.series(&GeneRegion::new("G", "R"));
        assert_eq!(s.ages, vec![1.0, 30.0]);
        assert_eq!(s.expression, vec![1.0, 3.0]);
        assert_eq!(s.original_inds, vec![0, 2]);
        assert_eq!(data.max_samples(), 3);
    }

    #[test]
    fn missing_pair_gives_empty_series() {
        let data = Dataset::from_measurements("t", vec![m("G", "R", "s", 1.0, Some(1.0))]);
        assert!(data.series(&GeneRegion::new("G", "X")).is_empty());
    }

    #[test]
    fn log_scale_applies_to_series_ages() {
        let data = Dataset::from_measurements("t", vec![m("G", "R", "s", 10.0, Some(1.0))])
            .with_age_scale(AgeScale::Log);
        let s = data.series(&GeneRegion::new("G", "R"));
        assert!((s.ages[0] - AgeScale::Log.scale(10.0)).abs() < 1e-12);
        assert_eq!(data.cache_id(), "t-log");
    }
}
