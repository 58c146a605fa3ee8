//! Named parallel series.

use crate::{BanditError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// A tokenized sentence.
pub type Sentence = Vec<String>;

/// An ordered collection of aligned series (source, target, ...).
///
/// Every series holds the same number of sentences; position `i` in each
/// series belongs to the same instance.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    name: String,
    series: BTreeMap<String, Vec<Sentence>>,
    /// Where model outputs for a series are written when running on this dataset.
    pub series_outputs: HashMap<String, PathBuf>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a series. Fails if its length disagrees with the series already present.
    pub fn with_series(mut self, id: impl Into<String>, data: Vec<Sentence>) -> Result<Self> {
        let id = id.into();
        if let Some(existing) = self.series.values().next() {
            if existing.len() != data.len() {
                return Err(BanditError::ShapeMismatch {
                    expected: vec![existing.len()],
                    actual: vec![data.len()],
                });
            }
        }
        self.series.insert(id, data);
        Ok(self)
    }

    /// Register an output file for a generated series.
    pub fn with_output(mut self, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.series_outputs.insert(id.into(), path.into());
        self
    }

    /// Load series from plain-text files, one whitespace-tokenized sentence per line.
    pub fn from_files<P: AsRef<Path>>(name: &str, files: &[(&str, P)]) -> Result<Self> {
        let mut dataset = Self::new(name);
        for (id, path) in files {
            let content = fs::read_to_string(path.as_ref())?;
            let sentences = content
                .lines()
                .map(|line| line.split_whitespace().map(str::to_string).collect())
                .collect();
            dataset = dataset.with_series(*id, sentences)?;
            tracing::debug!(series = id, path = %path.as_ref().display(), "Loaded series");
        }
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.series.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_series(&self, id: &str) -> bool {
        self.series.contains_key(id)
    }

    pub fn get_series(&self, id: &str) -> Result<&[Sentence]> {
        self.series
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| BanditError::MissingSeries(id.to_string()))
    }

    /// Series ids in sorted order.
    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Shuffle all series with the same permutation.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        for data in self.series.values_mut() {
            let mut taken: Vec<Option<Sentence>> = data.drain(..).map(Some).collect();
            data.extend(order.iter().filter_map(|&i| taken[i].take()));
        }
    }

    /// Split into consecutive batches of at most `batch_size` instances.
    ///
    /// Batches keep the output paths of the parent dataset.
    pub fn batch_dataset(&self, batch_size: usize) -> Vec<Dataset> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::with_capacity(self.len().div_ceil(batch_size));
        let mut start = 0;
        while start < self.len() {
            let end = (start + batch_size).min(self.len());
            let series = self
                .series
                .iter()
                .map(|(id, data)| (id.clone(), data[start..end].to_vec()))
                .collect();
            batches.push(Dataset {
                name: format!("{}[{}..{}]", self.name, start, end),
                series,
                series_outputs: self.series_outputs.clone(),
            });
            start = end;
        }
        batches
    }
}
