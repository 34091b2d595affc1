//! Tensor construction and vocabularies
//!
//! Flattens an [`AlignedSplit`] into a dense `(examples, neurons)` matrix
//! and a label-index vector. Row order is sentence order then token order
//! and is never shuffled here, so row `i` can always be traced back to its
//! source token.
//!
//! The training split is passed to [`TensorBuilder::build`], which creates
//! the [`Vocabulary`]. The test split goes through [`TensorBuilder::apply`],
//! which borrows that vocabulary immutably.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProbeError, Result};
use crate::representations::AlignedSplit;

/// Bidirectional label and source-token index tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    label2idx: BTreeMap<String, usize>,
    idx2label: Vec<String>,
    src2idx: BTreeMap<String, usize>,
    idx2src: Vec<String>,
}

impl Vocabulary {
    fn insert_label(&mut self, label: &str) -> usize {
        insert(&mut self.label2idx, &mut self.idx2label, label)
    }

    fn insert_source(&mut self, token: &str) -> usize {
        insert(&mut self.src2idx, &mut self.idx2src, token)
    }

    /// Index of a label seen during training
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.label2idx.get(label).copied()
    }

    /// Label for an index
    pub fn label(&self, idx: usize) -> Option<&str> {
        self.idx2label.get(idx).map(String::as_str)
    }

    /// Index of a source token seen during training
    pub fn source_index(&self, token: &str) -> Option<usize> {
        self.src2idx.get(token).copied()
    }

    /// Source token for an index
    pub fn source(&self, idx: usize) -> Option<&str> {
        self.idx2src.get(idx).map(String::as_str)
    }

    pub fn label2idx(&self) -> &BTreeMap<String, usize> {
        &self.label2idx
    }

    pub fn idx2label(&self) -> &[String] {
        &self.idx2label
    }

    pub fn src2idx(&self) -> &BTreeMap<String, usize> {
        &self.src2idx
    }

    pub fn idx2src(&self) -> &[String] {
        &self.idx2src
    }

    /// Number of distinct labels (probe output classes)
    pub fn n_labels(&self) -> usize {
        self.idx2label.len()
    }

    /// Number of distinct source tokens
    pub fn n_sources(&self) -> usize {
        self.idx2src.len()
    }
}

fn insert(map: &mut BTreeMap<String, usize>, list: &mut Vec<String>, key: &str) -> usize {
    if let Some(&idx) = map.get(key) {
        return idx;
    }
    let idx = list.len();
    map.insert(key.to_string(), idx);
    list.push(key.to_string());
    idx
}

/// Dense training or evaluation data
#[derive(Debug, Clone)]
pub struct Tensors {
    /// Shape (examples, neurons)
    pub x: Array2<f32>,
    /// Label index per row
    pub y: Array1<usize>,
}

impl Tensors {
    pub fn n_examples(&self) -> usize {
        self.y.len()
    }

    pub fn n_neurons(&self) -> usize {
        self.x.ncols()
    }
}

/// What [`TensorBuilder::apply`] had to substitute or could not map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Test labels missing from the vocabulary, with occurrence counts
    pub unseen_labels: BTreeMap<String, usize>,
    /// Test source tokens missing from the vocabulary
    pub unseen_tokens: BTreeSet<String>,
}

impl BuildReport {
    /// Number of rows whose label was replaced by the fallback tag
    pub fn n_substituted(&self) -> usize {
        self.unseen_labels.values().sum()
    }
}

/// Builds tensors, either creating (`build`) or reusing (`apply`) a vocabulary
#[derive(Debug, Clone)]
pub struct TensorBuilder {
    fallback_tag: String,
}

impl TensorBuilder {
    /// `fallback_tag` replaces any test label absent from training
    pub fn new(fallback_tag: impl Into<String>) -> Self {
        Self {
            fallback_tag: fallback_tag.into(),
        }
    }

    pub fn fallback_tag(&self) -> &str {
        &self.fallback_tag
    }

    /// Build training tensors and a fresh first-seen-order vocabulary
    pub fn build(&self, split: &AlignedSplit) -> Result<(Tensors, Vocabulary)> {
        let mut vocab = Vocabulary::default();
        let tensors = fill(split, |token, label| {
            vocab.insert_source(token);
            Ok(vocab.insert_label(label))
        })?;

        info!(
            "Train tensors: X {:?}, {} labels, {} source tokens",
            tensors.x.dim(),
            vocab.n_labels(),
            vocab.n_sources()
        );
        if vocab.label_index(&self.fallback_tag).is_none() {
            warn!(
                "Fallback tag {:?} does not occur in the training labels",
                self.fallback_tag
            );
        }
        Ok((tensors, vocab))
    }

    /// Build evaluation tensors against a frozen vocabulary
    pub fn apply(&self, split: &AlignedSplit, vocab: &Vocabulary) -> Result<(Tensors, BuildReport)> {
        let mut report = BuildReport::default();
        let tensors = fill(split, |token, label| {
            if vocab.source_index(token).is_none() {
                report.unseen_tokens.insert(token.to_string());
            }
            if let Some(idx) = vocab.label_index(label) {
                return Ok(idx);
            }
            *report.unseen_labels.entry(label.to_string()).or_insert(0) += 1;
            vocab.label_index(&self.fallback_tag).ok_or_else(|| {
                ProbeError::config(format!(
                    "test label {label:?} is unseen and fallback tag {:?} is not a training label",
                    self.fallback_tag
                ))
            })
        })?;

        for (label, count) in &report.unseen_labels {
            warn!(
                "Unseen label {label:?} ({count} rows) mapped to {:?}",
                self.fallback_tag
            );
        }
        debug!(
            "{} test source tokens not seen in training",
            report.unseen_tokens.len()
        );
        info!("Test tensors: X {:?}", tensors.x.dim());
        Ok((tensors, report))
    }
}

fn fill<F>(split: &AlignedSplit, mut label_index: F) -> Result<Tensors>
where
    F: FnMut(&str, &str) -> Result<usize>,
{
    let n_examples = split.n_examples();
    let n_neurons = split.n_neurons();
    let mut x = Array2::zeros((n_examples, n_neurons));
    let mut y = Array1::zeros(n_examples);

    let mut idx = 0;
    for example in split.examples() {
        if example.activation.len() != n_neurons {
            return Err(ProbeError::mismatch(format!(
                "example {idx} has {} neurons, expected {n_neurons}",
                example.activation.len()
            )));
        }
        x.row_mut(idx).assign(&example.activation);
        y[idx] = label_index(example.token, example.label)?;
        idx += 1;
    }

    if idx != n_examples {
        return Err(ProbeError::mismatch(format!(
            "flattened {idx} examples but split has {n_examples} labels"
        )));
    }
    Ok(Tensors { x, y })
}
