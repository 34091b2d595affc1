//! Sub-token to word segmentation
//!
//! Activations for sub-word and character models are produced one row per
//! auxiliary token, while labels live on whitespace-separated source words.
//! This module rebuilds the many-to-one mapping as a list of contiguous
//! runs, one per source word, covering the auxiliary stream without gaps
//! or overlaps (character separators excepted).
//!
//! ## Conventions
//!
//! - **BPE**: every non-final piece of a word ends with [`BPE_CONTINUATION`]
//!   (`"lo@@ ve"` spells `love`). Pieces are concatenated with the marker
//!   stripped until the text equals the current source word.
//! - **Characters**: one aux token per character, words separated by a
//!   standalone [`CHAR_WORD_SEPARATOR`] token. Separator rows belong to no
//!   word.

use std::ops::Range;

use crate::error::{ProbeError, Result};

/// Continuation marker appended to non-final BPE pieces
pub const BPE_CONTINUATION: &str = "@@";

/// Aux token separating words in a character stream
pub const CHAR_WORD_SEPARATOR: &str = "_";

/// Granularity of an auxiliary token stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxGranularity {
    /// Byte-pair-encoding pieces with `@@` continuation markers
    Bpe,
    /// Single characters with `_` word separators
    Char,
}

impl AuxGranularity {
    /// Segment `aux` into one run per word of `source`
    pub fn segment(self, source: &[String], aux: &[String]) -> Result<Vec<Range<usize>>> {
        match self {
            Self::Bpe => segment_bpe(source, aux),
            Self::Char => segment_chars(source, aux),
        }
    }
}

/// Segment a BPE stream into per-word runs
pub fn segment_bpe(source: &[String], aux: &[String]) -> Result<Vec<Range<usize>>> {
    let mut runs = Vec::with_capacity(source.len());
    let mut start = 0;
    let mut current = String::new();

    for (j, piece) in aux.iter().enumerate() {
        let Some(word) = source.get(runs.len()) else {
            return Err(ProbeError::mismatch(format!(
                "{} BPE pieces left over after the last word",
                aux.len() - j
            )));
        };

        let (text, continues) = match piece.strip_suffix(BPE_CONTINUATION) {
            Some(stem) => (stem, true),
            None => (piece.as_str(), false),
        };
        current.push_str(text);

        if current == *word {
            runs.push(start..j + 1);
            start = j + 1;
            current.clear();
        } else if !continues || !word.starts_with(current.as_str()) {
            return Err(ProbeError::mismatch(format!(
                "BPE pieces {start}..={j} spell {current:?}, which does not match word {word:?}"
            )));
        }
    }

    if runs.len() != source.len() {
        return Err(ProbeError::mismatch(format!(
            "word {} ({:?}) has no BPE pieces",
            runs.len(),
            source[runs.len()]
        )));
    }
    Ok(runs)
}

/// Segment a character stream into per-word runs
pub fn segment_chars(source: &[String], aux: &[String]) -> Result<Vec<Range<usize>>> {
    if source.is_empty() && aux.is_empty() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::with_capacity(source.len());
    let mut start = 0;

    for (j, ch) in aux.iter().enumerate() {
        if ch == CHAR_WORD_SEPARATOR {
            runs.push(start..j);
            start = j + 1;
        }
    }
    runs.push(start..aux.len());

    if runs.len() != source.len() {
        return Err(ProbeError::mismatch(format!(
            "character stream has {} words, source has {}",
            runs.len(),
            source.len()
        )));
    }
    if let Some(empty) = runs.iter().position(Range::is_empty) {
        return Err(ProbeError::mismatch(format!(
            "word {empty} ({:?}) has no characters",
            source[empty]
        )));
    }
    Ok(runs)
}
