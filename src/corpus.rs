//! Corpus loading for probing experiments
//!
//! A split is a set of parallel, sentence-aligned inputs: whitespace
//! tokenized source sentences, label sequences, an optional auxiliary
//! (BPE / character) stream, and one activation matrix per sentence.

use std::path::{Path, PathBuf};

use ndarray::{s, Array2};
use tracing::{debug, info};

use crate::cache::ActivationCache;
use crate::error::{ProbeError, Result};
use crate::representations::ExtractionMode;

/// Default hard cutoff on sentence length (in source words)
pub const DEFAULT_MAX_SENT_LEN: usize = 250;

/// Token streams of one split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitTokens {
    /// Source words per sentence
    pub source: Vec<Vec<String>>,
    /// Labels per sentence
    pub target: Vec<Vec<String>>,
    /// Sub-word or character tokens per sentence
    pub source_aux: Option<Vec<Vec<String>>>,
}

impl SplitTokens {
    /// Build from the text of parallel one-sentence-per-line files
    pub fn from_text(source: &str, labels: &str, aux: Option<&str>) -> Self {
        Self {
            source: tokenize_lines(source),
            target: tokenize_lines(labels),
            source_aux: aux.map(tokenize_lines),
        }
    }

    /// Number of sentences
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Check if there are no sentences
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Total number of labels
    pub fn n_labels(&self) -> usize {
        self.target.iter().map(Vec::len).sum()
    }

    /// Total number of source words
    pub fn n_source_tokens(&self) -> usize {
        self.source.iter().map(Vec::len).sum()
    }

    /// Total number of auxiliary tokens, if an aux stream is present
    pub fn n_aux_tokens(&self) -> Option<usize> {
        self.source_aux
            .as_ref()
            .map(|aux| aux.iter().map(Vec::len).sum())
    }

    /// Check that every stream has the same number of sentences
    pub fn check_parallel(&self) -> Result<()> {
        if self.target.len() != self.source.len() {
            return Err(ProbeError::mismatch(format!(
                "{} source sentences but {} label sentences",
                self.source.len(),
                self.target.len()
            )));
        }
        if let Some(aux) = &self.source_aux {
            if aux.len() != self.source.len() {
                return Err(ProbeError::mismatch(format!(
                    "{} source sentences but {} aux sentences",
                    self.source.len(),
                    aux.len()
                )));
            }
        }
        Ok(())
    }
}

/// File locations of one split
#[derive(Debug, Clone)]
pub struct SplitPaths {
    pub source: PathBuf,
    pub labels: PathBuf,
    pub aux: Option<PathBuf>,
    pub activations: PathBuf,
}

/// A validated, truncated split ready for extraction
#[derive(Debug, Clone)]
pub struct Corpus {
    tokens: SplitTokens,
    activations: ActivationCache,
}

impl Corpus {
    /// Load a split from disk
    pub fn load(paths: &SplitPaths, mode: ExtractionMode, max_sent_len: usize) -> Result<Self> {
        let source = read_text(&paths.source)?;
        let labels = read_text(&paths.labels)?;
        let aux = paths.aux.as_deref().map(read_text).transpose()?;
        let tokens = SplitTokens::from_text(&source, &labels, aux.as_deref());
        let activations = ActivationCache::load_json(&paths.activations)?;
        info!(
            "Loaded {} sentences from {}",
            tokens.len(),
            paths.source.display()
        );
        Self::from_parts(tokens, activations, mode, max_sent_len)
    }

    /// Validate parallel inputs against `mode` and truncate long sentences
    pub fn from_parts(
        mut tokens: SplitTokens,
        activations: ActivationCache,
        mode: ExtractionMode,
        max_sent_len: usize,
    ) -> Result<Self> {
        if max_sent_len == 0 {
            return Err(ProbeError::config("maximum sentence length must be positive"));
        }
        if mode.uses_aux() && tokens.source_aux.is_none() {
            return Err(ProbeError::config(format!(
                "{mode} requires an auxiliary source stream"
            )));
        }
        if !mode.uses_aux() {
            tokens.source_aux = None;
        }
        tokens.check_parallel()?;
        if activations.len() != tokens.len() {
            return Err(ProbeError::mismatch(format!(
                "{} sentences but {} activation matrices",
                tokens.len(),
                activations.len()
            )));
        }

        let mut truncated = Vec::with_capacity(activations.len());
        let mut n_truncated = 0;
        for (i, acts) in activations.into_sentences().into_iter().enumerate() {
            check_sentence(&tokens, &acts, i, mode)?;
            let rows = truncate_sentence(&mut tokens, i, mode, max_sent_len)?;
            if rows < acts.nrows() {
                n_truncated += 1;
                truncated.push(acts.slice(s![..rows, ..]).to_owned());
            } else {
                truncated.push(acts);
            }
        }
        if n_truncated > 0 {
            debug!("Truncated {n_truncated} sentences to {max_sent_len} words");
        }

        Ok(Self {
            tokens,
            activations: ActivationCache::new(truncated)?,
        })
    }

    /// Token streams
    pub fn tokens(&self) -> &SplitTokens {
        &self.tokens
    }

    /// Activation matrices
    pub fn activations(&self) -> &ActivationCache {
        &self.activations
    }

    /// Number of sentences
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if corpus is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Split into tokens and activations
    pub fn into_parts(self) -> (SplitTokens, ActivationCache) {
        (self.tokens, self.activations)
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ProbeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn tokenize_lines(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(|line| line.split_whitespace().map(String::from).collect())
        .collect()
}

fn check_sentence(
    tokens: &SplitTokens,
    acts: &Array2<f32>,
    i: usize,
    mode: ExtractionMode,
) -> Result<()> {
    let n_words = tokens.source[i].len();
    let n_labels = tokens.target[i].len();

    let expected_labels = if mode.is_sentence_level() { 1 } else { n_words };
    if n_labels != expected_labels {
        return Err(ProbeError::mismatch(format!(
            "sentence {i}: {n_labels} labels, expected {expected_labels}"
        )));
    }

    let (expected_rows, unit) = match &tokens.source_aux {
        Some(aux) => (aux[i].len(), "aux tokens"),
        None => (n_words, "words"),
    };
    if acts.nrows() != expected_rows {
        return Err(ProbeError::mismatch(format!(
            "sentence {i}: {} activation rows for {expected_rows} {unit}",
            acts.nrows()
        )));
    }
    Ok(())
}

/// Cut sentence `i` to `max_len` words, returning the number of activation rows to keep
fn truncate_sentence(
    tokens: &mut SplitTokens,
    i: usize,
    mode: ExtractionMode,
    max_len: usize,
) -> Result<usize> {
    let n_words = tokens.source[i].len();
    if n_words <= max_len {
        return Ok(tokens
            .source_aux
            .as_ref()
            .map_or(n_words, |aux| aux[i].len()));
    }

    let rows = match (mode.aux_granularity(), tokens.source_aux.as_mut()) {
        (Some(granularity), Some(aux)) => {
            let runs = granularity
                .segment(&tokens.source[i], &aux[i])
                .map_err(|e| ProbeError::mismatch(format!("sentence {i}: {e}")))?;
            let end = runs[max_len - 1].end;
            aux[i].truncate(end);
            end
        }
        _ => max_len,
    };

    tokens.source[i].truncate(max_len);
    if !mode.is_sentence_level() {
        tokens.target[i].truncate(max_len);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representations::{extract, Direction};
    use ndarray::array;

    fn word_cache() -> ActivationCache {
        ActivationCache::new(vec![
            array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]],
            array![[4.0, 4.0]],
        ])
        .unwrap()
    }

    #[test]
    fn test_from_text() {
        let tokens = SplitTokens::from_text("a b\nc\n", "X Y\nZ\n", None);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens.n_labels(), 3);
        assert_eq!(tokens.source[0], vec!["a", "b"]);
        assert!(tokens.n_aux_tokens().is_none());
    }

    #[test]
    fn test_word_truncation() {
        let tokens = SplitTokens::from_text("a b c\nd", "X Y Z\nW", None);
        let corpus = Corpus::from_parts(tokens, word_cache(), ExtractionMode::Word, 2).unwrap();

        assert_eq!(corpus.tokens().source[0], vec!["a", "b"]);
        assert_eq!(corpus.tokens().target[0], vec!["X", "Y"]);
        assert_eq!(corpus.activations().n_rows(0), Some(2));
        assert_eq!(corpus.activations().n_rows(1), Some(1));
    }

    #[test]
    fn test_sentence_count_mismatch() {
        let tokens = SplitTokens::from_text("a b c\nd\ne", "X Y Z\nW\nV", None);
        let err = Corpus::from_parts(tokens, word_cache(), ExtractionMode::Word, 10).unwrap_err();
        assert!(matches!(err, ProbeError::DataMismatch(_)));

        let tokens = SplitTokens::from_text("a b c\nd", "X Y Z", None);
        let err = Corpus::from_parts(tokens, word_cache(), ExtractionMode::Word, 10).unwrap_err();
        assert!(matches!(err, ProbeError::DataMismatch(_)));
    }

    #[test]
    fn test_row_count_mismatch() {
        let tokens = SplitTokens::from_text("a b\nd", "X Y\nW", None);
        let err = Corpus::from_parts(tokens, word_cache(), ExtractionMode::Word, 10).unwrap_err();
        assert!(matches!(err, ProbeError::DataMismatch(_)));
    }

    #[test]
    fn test_sentence_level_labels() {
        let tokens = SplitTokens::from_text("a b c\nd", "POS\nNEG", None);
        let corpus = Corpus::from_parts(tokens, word_cache(), ExtractionMode::SentLast, 2).unwrap();
        assert_eq!(corpus.tokens().target[0], vec!["POS"]);
        assert_eq!(corpus.activations().n_rows(0), Some(2));

        let tokens = SplitTokens::from_text("a b c\nd", "POS POS POS\nNEG", None);
        let err = Corpus::from_parts(tokens, word_cache(), ExtractionMode::SentLast, 10).unwrap_err();
        assert!(matches!(err, ProbeError::DataMismatch(_)));
    }

    #[test]
    fn test_aux_truncation_keeps_whole_words() {
        let tokens = SplitTokens::from_text("I love cats", "A B C", Some("I lo@@ ve ca@@ ts"));
        let cache = ActivationCache::new(vec![Array2::zeros((5, 3))]).unwrap();
        let corpus = Corpus::from_parts(tokens, cache, ExtractionMode::BpeAvg, 2).unwrap();

        let aux = corpus.tokens().source_aux.as_ref().unwrap();
        assert_eq!(aux[0], vec!["I", "lo@@", "ve"]);
        assert_eq!(corpus.tokens().target[0], vec!["A", "B"]);
        assert_eq!(corpus.activations().n_rows(0), Some(3));
    }

    #[test]
    fn test_char_truncation_keeps_whole_words() {
        let tokens = SplitTokens::from_text("ab cd e", "A B C", Some("a b _ c d _ e"));
        let cache = ActivationCache::new(vec![array![
            [1.0],
            [2.0],
            [3.0],
            [4.0],
            [5.0],
            [6.0],
            [7.0]
        ]])
        .unwrap();
        let corpus = Corpus::from_parts(tokens, cache, ExtractionMode::CharLast, 2).unwrap();

        let aux = corpus.tokens().source_aux.as_ref().unwrap();
        assert_eq!(aux[0], vec!["a", "b", "_", "c", "d"]);
        assert_eq!(corpus.tokens().target[0], vec!["A", "B"]);
        assert_eq!(
            corpus.activations().get_sentence(0).unwrap(),
            array![[1.0], [2.0], [3.0], [4.0], [5.0]]
        );

        let split = extract(
            corpus.tokens(),
            corpus.activations(),
            ExtractionMode::CharLast,
            Direction::Backward,
        )
        .unwrap();
        assert_eq!(split.activations[0], array![[1.0], [4.0]]);
    }

    #[test]
    fn test_aux_mode_without_aux_stream() {
        let tokens = SplitTokens::from_text("a b c\nd", "X Y Z\nW", None);
        let err = Corpus::from_parts(tokens, word_cache(), ExtractionMode::CharAvg, 10).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn test_zero_max_len_rejected() {
        let tokens = SplitTokens::from_text("a b c\nd", "X Y Z\nW", None);
        let err = Corpus::from_parts(tokens, word_cache(), ExtractionMode::Word, 0).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
}
