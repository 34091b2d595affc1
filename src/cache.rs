//! Activation cache for per-sentence neuron activations
//!
//! Each sentence owns a matrix of shape `(rows, n_neurons)` where rows are
//! either source tokens or auxiliary (sub-word / character) tokens. The
//! neuron width is constant across a dataset and is the flat concatenation
//! of every layer and direction of the upstream model.

use std::path::Path;

use ndarray::{Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::error::{ProbeError, Result};

/// Stores activation matrices for an ordered list of sentences
#[derive(Debug, Clone)]
pub struct ActivationCache {
    /// One matrix per sentence, shape (rows, n_neurons)
    sentences: Vec<Array2<f32>>,
    n_neurons: usize,
}

impl ActivationCache {
    /// Create a cache, checking that every sentence has the same width
    pub fn new(mut sentences: Vec<Array2<f32>>) -> Result<Self> {
        // Empty sentences carry no width of their own
        let n_neurons = sentences
            .iter()
            .find(|m| m.nrows() > 0)
            .or_else(|| sentences.first())
            .map_or(0, Array2::ncols);
        for (idx, matrix) in sentences.iter_mut().enumerate() {
            if matrix.nrows() == 0 {
                if matrix.ncols() != n_neurons {
                    *matrix = Array2::zeros((0, n_neurons));
                }
            } else if matrix.ncols() != n_neurons {
                return Err(ProbeError::mismatch(format!(
                    "sentence {idx} has {} neurons, expected {n_neurons}",
                    matrix.ncols()
                )));
            }
        }
        Ok(Self {
            sentences,
            n_neurons,
        })
    }

    /// Load a JSON dump: an array of sentences, each an array of rows
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ProbeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: Vec<Vec<Vec<f32>>> = serde_json::from_str(&content)?;
        let sentences = raw
            .into_iter()
            .enumerate()
            .map(|(idx, rows)| rows_to_matrix(idx, rows))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Loaded {} activation matrices from {}",
            sentences.len(),
            path.display()
        );
        Self::new(sentences)
    }

    /// Get the activation matrix of one sentence
    pub fn get_sentence(&self, idx: usize) -> Option<ArrayView2<'_, f32>> {
        self.sentences.get(idx).map(Array2::view)
    }

    /// Get a single activation row
    pub fn get_row(&self, sentence: usize, row: usize) -> Option<ArrayView1<'_, f32>> {
        self.sentences
            .get(sentence)
            .filter(|m| row < m.nrows())
            .map(|m| m.row(row))
    }

    /// Number of rows stored for a sentence
    pub fn n_rows(&self, sentence: usize) -> Option<usize> {
        self.sentences.get(sentence).map(Array2::nrows)
    }

    /// Number of sentences
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Neuron width shared by every sentence
    pub fn n_neurons(&self) -> usize {
        self.n_neurons
    }

    /// Total number of rows over all sentences
    pub fn total_rows(&self) -> usize {
        self.sentences.iter().map(Array2::nrows).sum()
    }

    /// Get all matrices
    pub fn sentences(&self) -> &[Array2<f32>] {
        &self.sentences
    }

    /// Consume the cache, returning the matrices
    pub fn into_sentences(self) -> Vec<Array2<f32>> {
        self.sentences
    }
}

fn rows_to_matrix(idx: usize, rows: Vec<Vec<f32>>) -> Result<Array2<f32>> {
    let n_rows = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != width) {
        return Err(ProbeError::mismatch(format!(
            "sentence {idx} has ragged activation rows"
        )));
    }
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_rows, width), flat)?)
}
