//! Integration tests for lingprobe-rs
//!
//! Write small parallel corpora to temporary files and drive the full
//! pipeline through the public API.

use std::fs;
use std::path::Path;

use lingprobe_rs::{
    extract, Corpus, Direction, Experiment, ExperimentConfig, ExtractionMode, LayerFilter,
    LayerLayout, ProbeError, SplitPaths, TensorBuilder, TrainConfig,
};
use tempfile::TempDir;

/// Write a split to `dir` and return its paths
fn write_split(
    dir: &Path,
    name: &str,
    source: &str,
    labels: &str,
    aux: Option<&str>,
    activations: &str,
) -> SplitPaths {
    let path = |suffix: &str| dir.join(format!("{name}.{suffix}"));
    fs::write(path("src"), source).unwrap();
    fs::write(path("labels"), labels).unwrap();
    fs::write(path("acts.json"), activations).unwrap();
    if let Some(aux) = aux {
        fs::write(path("aux"), aux).unwrap();
    }
    SplitPaths {
        source: path("src"),
        labels: path("labels"),
        aux: aux.map(|_| path("aux")),
        activations: path("acts.json"),
    }
}

const WORD_ACTS: &str = "[[[1,0,0,0],[0,1,0,0]],[[0,0,1,0]]]";

/// Test word-level tensor shapes on the two-sentence corpus
#[test]
fn test_word_tensor_shapes() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(dir.path(), "train", "a b\nc\n", "X Y\nZ\n", None, WORD_ACTS);

    let corpus = Corpus::load(&paths, ExtractionMode::Word, 250).unwrap();
    let split = extract(
        corpus.tokens(),
        corpus.activations(),
        ExtractionMode::Word,
        Direction::Forward,
    )
    .unwrap();
    let (tensors, vocab) = TensorBuilder::new("X").build(&split).unwrap();

    assert_eq!(tensors.x.dim(), (3, 4));
    assert_eq!(tensors.y.len(), 3);
    assert_eq!(vocab.n_labels(), 3);
}

/// Test sent_last collapses each sentence to one example
#[test]
fn test_sent_last_collapses_sentences() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(dir.path(), "train", "a b\nc\n", "POS\nNEG\n", None, WORD_ACTS);

    let corpus = Corpus::load(&paths, ExtractionMode::SentLast, 250).unwrap();
    let split = extract(
        corpus.tokens(),
        corpus.activations(),
        ExtractionMode::SentLast,
        Direction::Forward,
    )
    .unwrap();

    assert_eq!(split.n_examples(), 2);
    assert_eq!(split.source, vec![vec!["sent_0"], vec!["sent_1"]]);
    let (tensors, _) = TensorBuilder::new("POS").build(&split).unwrap();
    assert_eq!(tensors.x.dim(), (2, 4));
}

/// Test BPE averaging through file loading
#[test]
fn test_bpe_avg_from_files() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(
        dir.path(),
        "train",
        "I love\n",
        "PRP VBP\n",
        Some("I lo@@ ve\n"),
        "[[[1,1],[2,4],[4,8]]]",
    );

    let corpus = Corpus::load(&paths, ExtractionMode::BpeAvg, 250).unwrap();
    let split = extract(
        corpus.tokens(),
        corpus.activations(),
        ExtractionMode::BpeAvg,
        Direction::Forward,
    )
    .unwrap();

    assert_eq!(split.activations[0].row(0).to_vec(), vec![1.0, 1.0]);
    assert_eq!(split.activations[0].row(1).to_vec(), vec![3.0, 6.0]);
}

/// Test an empty first sentence loads and contributes no rows
#[test]
fn test_empty_first_sentence() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(
        dir.path(),
        "train",
        "\na b\n",
        "\nX Y\n",
        None,
        "[[],[[1,0],[0,1]]]",
    );

    let corpus = Corpus::load(&paths, ExtractionMode::Word, 250).unwrap();
    assert_eq!(corpus.activations().n_neurons(), 2);
    assert_eq!(corpus.activations().n_rows(0), Some(0));

    let split = extract(
        corpus.tokens(),
        corpus.activations(),
        ExtractionMode::Word,
        Direction::Forward,
    )
    .unwrap();
    let (tensors, _) = TensorBuilder::new("X").build(&split).unwrap();
    assert_eq!(tensors.x.dim(), (2, 2));
}

/// Test an empty middle sentence in a character-stream corpus
#[test]
fn test_empty_middle_sentence_char_avg() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(
        dir.path(),
        "train",
        "ab\n\nc\n",
        "X\n\nY\n",
        Some("a b\n\nc\n"),
        "[[[1,1],[3,3]],[],[[5,5]]]",
    );

    let corpus = Corpus::load(&paths, ExtractionMode::CharAvg, 250).unwrap();
    let split = extract(
        corpus.tokens(),
        corpus.activations(),
        ExtractionMode::CharAvg,
        Direction::Forward,
    )
    .unwrap();

    assert_eq!(split.n_examples(), 2);
    assert_eq!(split.activations[0].row(0).to_vec(), vec![2.0, 2.0]);
    assert_eq!(split.activations[1].dim(), (0, 2));
    assert_eq!(split.activations[2].row(0).to_vec(), vec![5.0, 5.0]);
}

/// Test mismatched sentence counts fail at load time
#[test]
fn test_sentence_count_mismatch() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(dir.path(), "train", "a b\nc\nd\n", "X Y\nZ\nW\n", None, WORD_ACTS);

    let err = Corpus::load(&paths, ExtractionMode::Word, 250).unwrap_err();
    assert!(matches!(err, ProbeError::DataMismatch(_)));
}

/// Test missing files surface as IO errors
#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let mut paths = write_split(dir.path(), "train", "a b\nc\n", "X Y\nZ\n", None, WORD_ACTS);
    paths.labels = dir.path().join("missing.labels");

    let err = Corpus::load(&paths, ExtractionMode::Word, 250).unwrap_err();
    assert!(matches!(err, ProbeError::Io { .. }));
}

/// Test layer filtering keeps m * width columns
#[test]
fn test_layer_filter_on_split() {
    let dir = TempDir::new().unwrap();
    let paths = write_split(dir.path(), "train", "a b\nc\n", "X Y\nZ\n", None, WORD_ACTS);
    let corpus = Corpus::load(&paths, ExtractionMode::Word, 250).unwrap();
    let split = extract(
        corpus.tokens(),
        corpus.activations(),
        ExtractionMode::Word,
        Direction::Forward,
    )
    .unwrap();

    let layout = LayerLayout {
        layer_width: 1,
        num_layers: 2,
        num_directions: 2,
    };
    let filter = LayerFilter::parse("f2,b1,b2", &layout, 4).unwrap();
    let filtered = filter.apply_split(split).unwrap();
    assert!(filtered.activations.iter().all(|a| a.ncols() == 3));
}

/// Test the full experiment end to end, with an unseen test label
#[test]
fn test_full_experiment() {
    let dir = TempDir::new().unwrap();
    let train = write_split(dir.path(), "train", "a b\nc\n", "X Y\nZ\n", None, WORD_ACTS);
    let test = write_split(dir.path(), "test", "a b\nc\n", "X Y\nQ\n", None, WORD_ACTS);

    let config = ExperimentConfig {
        fallback_tag: "X".to_string(),
        train: TrainConfig {
            num_epochs: 300,
            batch_size: 2,
            learning_rate: 0.05,
            ..TrainConfig::default()
        },
        ..ExperimentConfig::default()
    };
    let results = Experiment::new(config).run_paths(&train, &test).unwrap();

    assert_eq!(results.vocab.n_labels(), 3);
    assert_eq!(results.train_accuracy.accuracy, 1.0);
    assert_eq!(results.test_report.unseen_labels.get("Q"), Some(&1));

    let preds = results.test_accuracy.predictions.as_ref().unwrap();
    let tokens: Vec<&str> = preds.iter().map(|p| p.token.as_str()).collect();
    assert_eq!(tokens, vec!["a", "b", "c"]);
    assert_eq!(preds[2].predicted, "Z");
    // Q was substituted by X, so the Z prediction counts as wrong
    assert!(!preds[2].correct);
    assert_eq!(results.stats.token_counts["c"], 1);
}

/// Test config defaults
#[test]
fn test_experiment_config_defaults() {
    let config = ExperimentConfig::default();
    assert_eq!(config.max_sent_len, 250);
    assert_eq!(config.train.seed, 42);
    assert_eq!(config.direction, Direction::Backward);
    assert!(config.filter_layers.is_none());
}
