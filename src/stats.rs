//! Label and token frequency statistics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::representations::AlignedSplit;

/// Frequency tables reported next to the accuracies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    /// Occurrences of each training label
    pub label_counts: BTreeMap<String, usize>,
    /// Occurrences of each training source token
    pub train_token_counts: BTreeMap<String, usize>,
    /// For every distinct test token, how often it occurred in training
    pub token_counts: BTreeMap<String, usize>,
}

impl CorpusStats {
    pub fn compute(train: &AlignedSplit, test: &AlignedSplit) -> Self {
        let label_counts = count(&train.target);
        let train_token_counts = count(&train.source);
        let token_counts = test
            .source
            .iter()
            .flatten()
            .map(|t| (t.clone(), train_token_counts.get(t).copied().unwrap_or(0)))
            .collect();
        Self {
            label_counts,
            train_token_counts,
            token_counts,
        }
    }

    /// Test tokens never seen in training
    pub fn n_unseen_test_tokens(&self) -> usize {
        self.token_counts.values().filter(|&&c| c == 0).count()
    }
}

/// Count every item of a nested token list
pub fn count(sentences: &[Vec<String>]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for token in sentences.iter().flatten() {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}
