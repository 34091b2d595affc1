//! Representation extraction
//!
//! Maps activation rows onto the label-bearing token stream. Word-level
//! activations pass through unchanged; sub-word and character activations
//! are pooled over each word's run (see [`crate::segment`]); `sent_last`
//! collapses every sentence into a single example.

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ActivationCache;
use crate::corpus::SplitTokens;
use crate::error::{ProbeError, Result};
use crate::segment::AuxGranularity;

/// How activation rows are turned into one vector per labeled token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMode {
    /// One activation row per source word
    #[serde(rename = "word")]
    Word,
    /// Character-CNN word encoder: one row per source word
    #[serde(rename = "charcnn")]
    CharCnn,
    /// Mean of the BPE rows of each word
    #[serde(rename = "bpe_avg")]
    BpeAvg,
    /// Final BPE row of each word (direction dependent)
    #[serde(rename = "bpe_last")]
    BpeLast,
    /// Mean of the character rows of each word
    #[serde(rename = "char_avg")]
    CharAvg,
    /// Final character row of each word (direction dependent)
    #[serde(rename = "char_last")]
    CharLast,
    /// One example per sentence taken from its final position
    #[serde(rename = "sent_last")]
    SentLast,
}

impl ExtractionMode {
    /// Every mode, in CLI order
    pub const ALL: [Self; 7] = [
        Self::Word,
        Self::CharCnn,
        Self::BpeAvg,
        Self::BpeLast,
        Self::CharAvg,
        Self::CharLast,
        Self::SentLast,
    ];

    /// Name used on the command line and in result files
    pub fn name(self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::CharCnn => "charcnn",
            Self::BpeAvg => "bpe_avg",
            Self::BpeLast => "bpe_last",
            Self::CharAvg => "char_avg",
            Self::CharLast => "char_last",
            Self::SentLast => "sent_last",
        }
    }

    /// Granularity of the auxiliary stream this mode reads, if any
    pub fn aux_granularity(self) -> Option<AuxGranularity> {
        match self {
            Self::BpeAvg | Self::BpeLast => Some(AuxGranularity::Bpe),
            Self::CharAvg | Self::CharLast => Some(AuxGranularity::Char),
            Self::Word | Self::CharCnn | Self::SentLast => None,
        }
    }

    /// Whether activation rows are indexed by auxiliary tokens
    pub fn uses_aux(self) -> bool {
        self.aux_granularity().is_some()
    }

    /// Whether each sentence carries a single label
    pub fn is_sentence_level(self) -> bool {
        self == Self::SentLast
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExtractionMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|m| m.name()).collect();
                ProbeError::config(format!(
                    "unknown extraction mode {s:?} (expected one of {})",
                    names.join(", ")
                ))
            })
    }
}

/// Which row of a run counts as its "last" position
///
/// The upstream model's bidirectional output is a concatenation of a
/// forward pass (reading left to right) and a backward pass (reading right
/// to left). For the backward pass the final position of a run is its
/// first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Unidirectional model: take the run's last row
    Forward,
    /// Take the run's first row
    #[default]
    Backward,
    /// Forward half of the columns from the last row, backward half from the first
    Split,
}

impl Direction {
    /// Map the legacy `is_brnn` flag
    pub fn from_brnn(is_brnn: bool) -> Self {
        if is_brnn {
            Self::Backward
        } else {
            Self::Forward
        }
    }

    /// Pick the direction for a run, defaulting from the model's bidirectionality
    ///
    /// A unidirectional model has no backward half, so only `Forward` is
    /// accepted for it.
    pub fn resolve(explicit: Option<Self>, bidirectional: bool) -> Result<Self> {
        match explicit {
            None => Ok(Self::from_brnn(bidirectional)),
            Some(Self::Forward) => Ok(Self::Forward),
            Some(dir) if bidirectional => Ok(dir),
            Some(dir) => Err(ProbeError::config(format!(
                "direction {dir} needs a bidirectional model"
            ))),
        }
    }

    /// Select the representative row of a non-empty run
    pub fn select(self, run: ArrayView2<'_, f32>) -> Array1<f32> {
        let first = run.row(0);
        let last = run.row(run.nrows() - 1);
        match self {
            Self::Forward => last.to_owned(),
            Self::Backward => first.to_owned(),
            Self::Split => {
                let half = run.ncols() / 2;
                let mut out = last.to_owned();
                out.slice_mut(s![half..]).assign(&first.slice(s![half..]));
                out
            }
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Split => "split",
        })
    }
}

impl FromStr for Direction {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            "split" => Ok(Self::Split),
            _ => Err(ProbeError::config(format!(
                "unknown direction {s:?} (expected forward, backward or split)"
            ))),
        }
    }
}

/// One labeled token with its representation vector
#[derive(Debug, Clone, Copy)]
pub struct AlignedExample<'a> {
    pub token: &'a str,
    pub label: &'a str,
    pub activation: ArrayView1<'a, f32>,
}

/// A split after extraction: one activation row per (token, label)
#[derive(Debug, Clone)]
pub struct AlignedSplit {
    /// Source tokens per sentence (synthetic ids for `sent_last`)
    pub source: Vec<Vec<String>>,
    /// Labels per sentence, parallel to `source`
    pub target: Vec<Vec<String>>,
    /// Representation matrices, rows parallel to `source`
    pub activations: Vec<Array2<f32>>,
}

impl AlignedSplit {
    /// Total number of examples
    pub fn n_examples(&self) -> usize {
        self.target.iter().map(Vec::len).sum()
    }

    /// Representation width (0 for an empty split)
    pub fn n_neurons(&self) -> usize {
        self.activations.first().map_or(0, Array2::ncols)
    }

    /// Flattened examples in sentence order, then token order
    pub fn examples(&self) -> impl Iterator<Item = AlignedExample<'_>> + '_ {
        self.source
            .iter()
            .zip(&self.target)
            .zip(&self.activations)
            .flat_map(|((tokens, labels), acts)| {
                tokens
                    .iter()
                    .zip(labels)
                    .zip(acts.rows())
                    .map(|((token, label), activation)| AlignedExample {
                        token,
                        label,
                        activation,
                    })
            })
    }
}

/// Extract one representation per labeled token
pub fn extract(
    tokens: &SplitTokens,
    cache: &ActivationCache,
    mode: ExtractionMode,
    direction: Direction,
) -> Result<AlignedSplit> {
    tokens.check_parallel()?;
    if cache.len() != tokens.len() {
        return Err(ProbeError::mismatch(format!(
            "{} activation matrices for {} sentences",
            cache.len(),
            tokens.len()
        )));
    }

    let activations = match mode {
        ExtractionMode::Word | ExtractionMode::CharCnn => word_activations(tokens, cache)?,
        ExtractionMode::BpeAvg | ExtractionMode::CharAvg => {
            pooled_activations(tokens, cache, mode, |run| {
                run.mean_axis(Axis(0))
                    .ok_or_else(|| ProbeError::mismatch("cannot average an empty run"))
            })?
        }
        ExtractionMode::BpeLast | ExtractionMode::CharLast => {
            pooled_activations(tokens, cache, mode, |run| Ok(direction.select(run)))?
        }
        ExtractionMode::SentLast => sentence_activations(cache, direction)?,
    };

    let source = if mode.is_sentence_level() {
        (0..tokens.len()).map(|i| vec![format!("sent_{i}")]).collect()
    } else {
        tokens.source.clone()
    };

    let split = AlignedSplit {
        source,
        target: tokens.target.clone(),
        activations,
    };
    check_aligned(&split)?;
    debug!(
        "Extracted {} examples ({} mode, {:?})",
        split.n_examples(),
        mode,
        direction
    );
    Ok(split)
}

fn word_activations(tokens: &SplitTokens, cache: &ActivationCache) -> Result<Vec<Array2<f32>>> {
    tokens
        .source
        .iter()
        .zip(cache.sentences())
        .enumerate()
        .map(|(i, (words, acts))| {
            if acts.nrows() != words.len() {
                return Err(ProbeError::mismatch(format!(
                    "sentence {i}: {} activation rows for {} words",
                    acts.nrows(),
                    words.len()
                )));
            }
            Ok(acts.clone())
        })
        .collect()
}

fn pooled_activations<F>(
    tokens: &SplitTokens,
    cache: &ActivationCache,
    mode: ExtractionMode,
    pool: F,
) -> Result<Vec<Array2<f32>>>
where
    F: Fn(ArrayView2<'_, f32>) -> Result<Array1<f32>>,
{
    let granularity = mode
        .aux_granularity()
        .ok_or_else(|| ProbeError::config(format!("{mode} does not use an auxiliary stream")))?;
    let aux = tokens
        .source_aux
        .as_ref()
        .ok_or_else(|| ProbeError::config(format!("{mode} requires auxiliary source tokens")))?;

    let mut out = Vec::with_capacity(tokens.len());
    for (i, acts) in cache.sentences().iter().enumerate() {
        let (words, pieces) = (&tokens.source[i], &aux[i]);
        if acts.nrows() != pieces.len() {
            return Err(ProbeError::mismatch(format!(
                "sentence {i}: {} activation rows for {} aux tokens",
                acts.nrows(),
                pieces.len()
            )));
        }
        let runs = granularity
            .segment(words, pieces)
            .map_err(|e| ProbeError::mismatch(format!("sentence {i}: {e}")))?;

        let mut pooled = Array2::zeros((words.len(), cache.n_neurons()));
        for (w, run) in runs.into_iter().enumerate() {
            let vector = pool(acts.slice(s![run, ..]))?;
            pooled.row_mut(w).assign(&vector);
        }
        out.push(pooled);
    }
    Ok(out)
}

fn sentence_activations(cache: &ActivationCache, direction: Direction) -> Result<Vec<Array2<f32>>> {
    cache
        .sentences()
        .iter()
        .enumerate()
        .map(|(i, acts)| {
            if acts.nrows() == 0 {
                return Err(ProbeError::mismatch(format!(
                    "sentence {i} has no activation rows"
                )));
            }
            Ok(direction.select(acts.view()).insert_axis(Axis(0)))
        })
        .collect()
}

fn check_aligned(split: &AlignedSplit) -> Result<()> {
    for (i, ((tokens, labels), acts)) in split
        .source
        .iter()
        .zip(&split.target)
        .zip(&split.activations)
        .enumerate()
    {
        if tokens.len() != labels.len() || labels.len() != acts.nrows() {
            return Err(ProbeError::mismatch(format!(
                "sentence {i}: {} tokens, {} labels, {} representation rows",
                tokens.len(),
                labels.len(),
                acts.nrows()
            )));
        }
    }
    Ok(())
}
