//! Experiment runner for probing experiments
//!
//! Coordinates loading, representation extraction, layer filtering,
//! tensor construction, probe training and evaluation.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::{Corpus, SplitPaths, DEFAULT_MAX_SENT_LEN};
use crate::error::{ProbeError, Result};
use crate::evaluate::{evaluate, evaluate_with_predictions, Evaluation};
use crate::layers::{LayerFilter, LayerLayout};
use crate::probe::{LinearProbe, ProbeTrainer, TrainConfig};
use crate::representations::{extract, AlignedSplit, Direction, ExtractionMode};
use crate::stats::CorpusStats;
use crate::tensors::{BuildReport, TensorBuilder, Vocabulary};

/// Configuration for a probing experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// How activations are aligned to labeled tokens
    pub mode: ExtractionMode,
    /// Which row of a run is its "last" position
    pub direction: Direction,
    /// Label substituted for test labels unseen in training
    pub fallback_tag: String,
    /// Hard cutoff on sentence length, in source words
    pub max_sent_len: usize,
    /// Optional layer filter such as "f1,b1"
    pub filter_layers: Option<String>,
    /// Upstream layer layout, used by the layer filter
    pub layout: LayerLayout,
    pub train: TrainConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Word,
            direction: Direction::default(),
            fallback_tag: "O".to_string(),
            max_sent_len: DEFAULT_MAX_SENT_LEN,
            filter_layers: None,
            layout: LayerLayout::default(),
            train: TrainConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Reject bad settings before any data is read
    pub fn validate(&self) -> Result<()> {
        if self.fallback_tag.trim().is_empty() {
            return Err(ProbeError::config("fallback tag must not be empty"));
        }
        if self.max_sent_len == 0 {
            return Err(ProbeError::config("maximum sentence length must be positive"));
        }
        self.train.validate()?;
        if self.layout.num_directions == 1 && self.direction != Direction::Forward {
            return Err(ProbeError::config(format!(
                "direction {} needs a bidirectional layout",
                self.direction
            )));
        }
        if let Some(spec) = &self.filter_layers {
            let full_width =
                self.layout.layer_width * self.layout.num_layers * self.layout.num_directions;
            LayerFilter::parse(spec, &self.layout, full_width)?;
        }
        Ok(())
    }
}

/// Results from a full probing experiment
#[derive(Debug)]
pub struct ExperimentResults {
    pub probe: LinearProbe,
    pub vocab: Vocabulary,
    pub train_accuracy: Evaluation,
    /// Test evaluation, with per-token predictions
    pub test_accuracy: Evaluation,
    pub test_report: BuildReport,
    pub stats: CorpusStats,
    pub epoch_losses: Vec<f32>,
    pub train_split: AlignedSplit,
    pub test_split: AlignedSplit,
}

/// Main experiment runner
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    /// Create a new experiment
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Load both splits from disk and run
    pub fn run_paths(&self, train: &SplitPaths, test: &SplitPaths) -> Result<ExperimentResults> {
        self.config.validate()?;
        let cfg = &self.config;
        let train = Corpus::load(train, cfg.mode, cfg.max_sent_len)?;
        let test = Corpus::load(test, cfg.mode, cfg.max_sent_len)?;
        self.run(&train, &test)
    }

    /// Run the full experiment on loaded splits
    pub fn run(&self, train: &Corpus, test: &Corpus) -> Result<ExperimentResults> {
        let cfg = &self.config;
        cfg.validate()?;
        info!("Starting probing experiment");
        info!("Config: {:?}", cfg);

        info!(
            "Sentences: {} train, {} test",
            train.len(),
            test.len()
        );
        info!("Number of train labels: {}", train.tokens().n_labels());
        info!("Number of source words: {}", train.tokens().n_source_tokens());
        if let Some(n_aux) = train.tokens().n_aux_tokens() {
            info!("Number of aux source tokens: {}", n_aux);
        }
        info!("Number of neurons: {}", train.activations().n_neurons());

        let mut train_split = extract(train.tokens(), train.activations(), cfg.mode, cfg.direction)?;
        let mut test_split = extract(test.tokens(), test.activations(), cfg.mode, cfg.direction)?;

        if let Some(spec) = &cfg.filter_layers {
            let filter = LayerFilter::parse(spec, &cfg.layout, train_split.n_neurons())?;
            train_split = filter.apply_split(train_split)?;
            test_split = filter.apply_split(test_split)?;
            info!("Filtered to {} neurons", filter.n_columns());
        }

        let builder = TensorBuilder::new(cfg.fallback_tag.as_str());
        info!("Creating train tensors...");
        let (train_tensors, vocab) = builder.build(&train_split)?;
        info!("Creating test tensors...");
        let (test_tensors, test_report) = builder.apply(&test_split, &vocab)?;

        info!("Building model...");
        let trainer = ProbeTrainer::new(cfg.train.clone());
        let (probe, epoch_losses) = trainer.train_with_history(&train_tensors, vocab.n_labels())?;

        let train_accuracy = evaluate(&probe, &train_tensors, &vocab)?;
        let test_accuracy =
            evaluate_with_predictions(&probe, &test_tensors, &vocab, &test_split.source)?;
        info!(
            "Train accuracy: {:.2}%, test accuracy: {:.2}%",
            train_accuracy.accuracy * 100.0,
            test_accuracy.accuracy * 100.0
        );

        let stats = CorpusStats::compute(&train_split, &test_split);

        Ok(ExperimentResults {
            probe,
            vocab,
            train_accuracy,
            test_accuracy,
            test_report,
            stats,
            epoch_losses,
            train_split,
            test_split,
        })
    }
}
