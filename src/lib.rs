// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→i32 step counters
#![allow(clippy::many_single_char_names)] // x, y, w, b standard in math
#![allow(clippy::similar_names)] // related variables like `label`/`labels`
#![allow(clippy::module_name_repetitions)] // ProbeError in error.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility

//! lingprobe-rs: Linguistic Probing of Neural Activations
//!
//! Trains linear probes that predict word-level linguistic labels (POS,
//! morphology, semantic tags, ...) from frozen activations of an external
//! model, reconciling activations produced at sub-word or character
//! granularity with labels defined on words.
//!
//! ## Architecture
//!
//! - `cache`: ActivationCache holding one activation matrix per sentence
//! - `corpus`: Parallel split loading, validation and truncation
//! - `segment`: Sub-word / character stream to word run segmentation
//! - `representations`: Extraction modes (word, bpe/char avg/last, sent_last)
//! - `layers`: Layer/direction column filtering
//! - `tensors`: Vocabularies and dense tensor construction
//! - `probe`: L1/L2-regularized multinomial logistic regression
//! - `evaluate`: Overall and per-label accuracy, per-token predictions
//! - `stats`: Label and token frequency tables
//! - `experiment`: Experiment runner coordinating the full pipeline

pub mod cache;
pub mod corpus;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod layers;
pub mod probe;
pub mod representations;
pub mod segment;
pub mod stats;
pub mod tensors;

pub use cache::ActivationCache;
pub use corpus::{Corpus, SplitPaths, SplitTokens, DEFAULT_MAX_SENT_LEN};
pub use error::{ProbeError, Result};
pub use evaluate::{
    evaluate, evaluate_with_predictions, Evaluation, LabelAccuracy, Prediction, OVERALL_KEY,
};
pub use experiment::{Experiment, ExperimentConfig, ExperimentResults};
pub use layers::{LayerFilter, LayerLayout, LayerSlice};
pub use probe::{softmax_rows, LinearProbe, ProbeTrainer, TrainConfig};
pub use representations::{extract, AlignedExample, AlignedSplit, Direction, ExtractionMode};
pub use segment::{segment_bpe, segment_chars, AuxGranularity};
pub use stats::CorpusStats;
pub use tensors::{BuildReport, TensorBuilder, Tensors, Vocabulary};
