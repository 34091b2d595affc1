//! lingprobe-rs CLI: train and evaluate a linguistic probe

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lingprobe_rs::{
    Direction, Experiment, ExperimentConfig, ExtractionMode, LayerLayout, LinearProbe,
    SplitPaths, TrainConfig, Vocabulary,
};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "lingprobe-rs")]
#[command(about = "Train a linear probe on token activations")]
#[command(version)]
struct Cli {
    /// Train source file, one whitespace-tokenized sentence per line
    #[arg(long)]
    train_source: PathBuf,

    /// Train auxiliary source file (BPE/CHAR)
    #[arg(long)]
    train_aux_source: Option<PathBuf>,

    /// Train labels, parallel to the source file
    #[arg(long)]
    train_labels: PathBuf,

    /// Train activations (JSON array of per-sentence matrices)
    #[arg(long)]
    train_activations: PathBuf,

    /// Test source file
    #[arg(long)]
    test_source: PathBuf,

    /// Test auxiliary source file (BPE/CHAR)
    #[arg(long)]
    test_aux_source: Option<PathBuf>,

    /// Test labels
    #[arg(long)]
    test_labels: PathBuf,

    /// Test activations
    #[arg(long)]
    test_activations: PathBuf,

    /// Extraction mode: word, charcnn, bpe_avg, bpe_last, char_avg, char_last, sent_last
    #[arg(long, default_value = "word")]
    exp_type: String,

    /// Tag used for test labels unseen during training
    #[arg(long)]
    task_specific_tag: String,

    /// Maximum sentence length
    #[arg(long, default_value_t = 250)]
    max_sent_l: usize,

    /// Which row is "last" for a run: forward, backward or split
    /// [default: backward, or forward with --unidirectional]
    #[arg(long)]
    direction: Option<String>,

    /// Location to save all results
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Use specific layers for training. Format: f1,b1,f2,b2
    #[arg(long)]
    filter_layers: Option<String>,

    /// Neurons per layer and direction
    #[arg(long, default_value_t = 500)]
    layer_width: usize,

    /// Layers per direction
    #[arg(long, default_value_t = 2)]
    num_layers: usize,

    /// Upstream model is unidirectional
    #[arg(long)]
    unidirectional: bool,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 512)]
    batch_size: usize,

    /// Random seed for reproducibility
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Trained probe together with its vocabularies
#[derive(Serialize)]
struct SavedModel<'a> {
    model: &'a LinearProbe,
    label2idx: &'a BTreeMap<String, usize>,
    idx2label: &'a [String],
    src2idx: &'a BTreeMap<String, usize>,
    idx2src: &'a [String],
}

impl<'a> SavedModel<'a> {
    fn new(model: &'a LinearProbe, vocab: &'a Vocabulary) -> Self {
        Self {
            model,
            label2idx: vocab.label2idx(),
            idx2label: vocab.idx2label(),
            src2idx: vocab.src2idx(),
            idx2src: vocab.idx2src(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mode: ExtractionMode = cli.exp_type.parse()?;
    let explicit = cli.direction.as_deref().map(str::parse).transpose()?;
    let direction = Direction::resolve(explicit, !cli.unidirectional)?;

    println!("=== lingprobe-rs: Linguistic Probing ===");
    println!("Mode:   {mode} ({direction})");
    println!("Train:  {}", cli.train_source.display());
    println!("Test:   {}", cli.test_source.display());
    println!("Output: {}", cli.output_dir.display());

    let config = ExperimentConfig {
        mode,
        direction,
        fallback_tag: cli.task_specific_tag.clone(),
        max_sent_len: cli.max_sent_l,
        filter_layers: cli.filter_layers.clone(),
        layout: LayerLayout {
            layer_width: cli.layer_width,
            num_layers: cli.num_layers,
            num_directions: if cli.unidirectional { 1 } else { 2 },
        },
        train: TrainConfig {
            num_epochs: cli.epochs,
            batch_size: cli.batch_size,
            seed: cli.seed,
            ..TrainConfig::default()
        },
    };
    config.validate().context("Invalid configuration")?;

    info!("Creating output directory...");
    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;

    let train_paths = SplitPaths {
        source: cli.train_source.clone(),
        labels: cli.train_labels.clone(),
        aux: cli.train_aux_source.clone(),
        activations: cli.train_activations.clone(),
    };
    let test_paths = SplitPaths {
        source: cli.test_source.clone(),
        labels: cli.test_labels.clone(),
        aux: cli.test_aux_source.clone(),
        activations: cli.test_activations.clone(),
    };

    let results = Experiment::new(config)
        .run_paths(&train_paths, &test_paths)
        .context("Experiment failed")?;

    println!("\n=== Results ===");
    println!("Train: {:.2}%", results.train_accuracy.accuracy * 100.0);
    println!("Test:  {:.2}%", results.test_accuracy.accuracy * 100.0);
    for (label, acc) in &results.test_accuracy.per_label {
        println!("  {label:>12}: {:.1}% (n={})", acc.accuracy * 100.0, acc.count);
    }

    info!("Saving everything...");
    let out = &cli.output_dir;
    write_json(&out.join("model.json"), &SavedModel::new(&results.probe, &results.vocab))?;
    write_json(
        &out.join("train_accuracies.json"),
        &results.train_accuracy.accuracy_table(),
    )?;
    write_json(
        &out.join("test_accuracies.json"),
        &results.test_accuracy.accuracy_table(),
    )?;
    write_json(&out.join("label_counts.json"), &results.stats.label_counts)?;
    write_json(&out.join("token_counts.json"), &results.stats.token_counts)?;
    write_json(
        &out.join("test_predictions.json"),
        &results.test_accuracy.predictions,
    )?;
    info!("Results saved to {}", out.display());

    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
