//! Probe evaluation
//!
//! Overall and per-label accuracy, plus optional per-token predictions in
//! the flattened (sentence, token) row order of the tensors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProbeError, Result};
use crate::probe::LinearProbe;
use crate::tensors::{Tensors, Vocabulary};

/// Key of the overall accuracy in [`Evaluation::accuracy_table`]
pub const OVERALL_KEY: &str = "__OVERALL__";

/// Accuracy of one label over its support
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelAccuracy {
    pub accuracy: f64,
    pub correct: usize,
    pub count: usize,
}

/// Prediction for one flattened row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub token: String,
    pub predicted: String,
    pub correct: bool,
}

/// Results of evaluating a probe on one tensor set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
    /// Every vocabulary label, including those without support
    pub per_label: BTreeMap<String, LabelAccuracy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<Prediction>>,
}

impl Evaluation {
    /// Flat label -> accuracy table with the overall score under [`OVERALL_KEY`]
    ///
    /// Labels that never occur in the evaluated split are left out.
    pub fn accuracy_table(&self) -> BTreeMap<String, f64> {
        let mut table: BTreeMap<String, f64> = self
            .per_label
            .iter()
            .filter(|(_, acc)| acc.count > 0)
            .map(|(label, acc)| (label.clone(), acc.accuracy))
            .collect();
        table.insert(OVERALL_KEY.to_string(), self.accuracy);
        table
    }
}

/// Evaluate without collecting predictions
pub fn evaluate(probe: &LinearProbe, tensors: &Tensors, vocab: &Vocabulary) -> Result<Evaluation> {
    run(probe, tensors, vocab, None)
}

/// Evaluate and pair every row with its source token
///
/// `source_tokens` is per sentence; flattened it must have one token per row.
pub fn evaluate_with_predictions(
    probe: &LinearProbe,
    tensors: &Tensors,
    vocab: &Vocabulary,
    source_tokens: &[Vec<String>],
) -> Result<Evaluation> {
    run(probe, tensors, vocab, Some(source_tokens))
}

fn run(
    probe: &LinearProbe,
    tensors: &Tensors,
    vocab: &Vocabulary,
    source_tokens: Option<&[Vec<String>]>,
) -> Result<Evaluation> {
    let n_rows = tensors.n_examples();
    if probe.n_labels() != vocab.n_labels() {
        return Err(ProbeError::mismatch(format!(
            "probe has {} outputs but vocabulary has {} labels",
            probe.n_labels(),
            vocab.n_labels()
        )));
    }
    let flat_tokens: Option<Vec<&str>> = source_tokens.map(|sents| {
        sents
            .iter()
            .flat_map(|s| s.iter().map(String::as_str))
            .collect()
    });
    if let Some(tokens) = &flat_tokens {
        if tokens.len() != n_rows {
            return Err(ProbeError::mismatch(format!(
                "{} source tokens for {n_rows} rows",
                tokens.len()
            )));
        }
    }

    let predicted = probe.predict(tensors.x.view())?;
    let mut counts = vec![(0_usize, 0_usize); vocab.n_labels()];
    let mut predictions = flat_tokens.as_ref().map(|_| Vec::with_capacity(n_rows));

    for (row, (&pred, &gold)) in predicted.iter().zip(&tensors.y).enumerate() {
        let hit = pred == gold;
        let entry = counts.get_mut(gold).ok_or_else(|| {
            ProbeError::mismatch(format!("label index {gold} missing from vocabulary"))
        })?;
        entry.0 += usize::from(hit);
        entry.1 += 1;

        if let (Some(out), Some(tokens)) = (predictions.as_mut(), flat_tokens.as_ref()) {
            out.push(Prediction {
                token: tokens[row].to_string(),
                predicted: vocab.label(pred).unwrap_or_default().to_string(),
                correct: hit,
            });
        }
    }

    let correct: usize = counts.iter().map(|c| c.0).sum();
    let per_label = vocab
        .idx2label()
        .iter()
        .zip(&counts)
        .map(|(label, &(correct, count))| {
            (
                label.clone(),
                LabelAccuracy {
                    accuracy: ratio(correct, count),
                    correct,
                    count,
                },
            )
        })
        .collect();

    let evaluation = Evaluation {
        accuracy: ratio(correct, n_rows),
        correct,
        total: n_rows,
        per_label,
        predictions,
    };
    info!(
        "Accuracy: {:.2}% ({}/{})",
        evaluation.accuracy * 100.0,
        evaluation.correct,
        evaluation.total
    );
    Ok(evaluation)
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representations::AlignedSplit;
    use crate::tensors::TensorBuilder;
    use ndarray::{array, Array2};

    /// Identity probe over 3 one-hot features, labels A B C
    fn setup() -> (LinearProbe, Tensors, Vocabulary) {
        let split = AlignedSplit {
            source: vec![vec!["x".into(), "y".into()], vec!["z".into()]],
            target: vec![vec!["A".into(), "B".into()], vec!["C".into()]],
            activations: vec![
                array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                array![[1.0, 0.0, 0.0]],
            ],
        };
        let (tensors, vocab) = TensorBuilder::new("A").build(&split).unwrap();
        let probe = LinearProbe {
            weights: Array2::eye(3),
            bias: array![0.0, 0.0, 0.0],
        };
        (probe, tensors, vocab)
    }

    #[test]
    fn test_overall_and_per_label() {
        let (probe, tensors, vocab) = setup();
        let eval = evaluate(&probe, &tensors, &vocab).unwrap();

        assert_eq!(eval.correct, 2);
        assert_eq!(eval.total, 3);
        assert!((eval.accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(eval.per_label["A"].accuracy, 1.0);
        assert_eq!(eval.per_label["C"].count, 1);
        assert_eq!(eval.per_label["C"].accuracy, 0.0);
        assert!(eval.predictions.is_none());
        assert_eq!(eval.accuracy_table()[OVERALL_KEY], eval.accuracy);
    }

    #[test]
    fn test_accuracy_table_skips_unsupported_labels() {
        let (probe, _, vocab) = setup();
        let split = AlignedSplit {
            source: vec![vec!["x".into(), "y".into()]],
            target: vec![vec!["A".into(), "B".into()]],
            activations: vec![array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]],
        };
        let (tensors, _) = TensorBuilder::new("A").apply(&split, &vocab).unwrap();
        let eval = evaluate(&probe, &tensors, &vocab).unwrap();

        assert_eq!(eval.per_label["C"].count, 0);
        let table = eval.accuracy_table();
        assert!(!table.contains_key("C"));
        assert_eq!(table["A"], 1.0);
        assert_eq!(table["B"], 1.0);
        assert_eq!(table[OVERALL_KEY], 1.0);
    }

    #[test]
    fn test_predictions_are_aligned() {
        let (probe, tensors, vocab) = setup();
        let source = vec![vec!["x".to_string(), "y".to_string()], vec!["z".to_string()]];
        let eval = evaluate_with_predictions(&probe, &tensors, &vocab, &source).unwrap();

        let preds = eval.predictions.unwrap();
        assert_eq!(preds.len(), 3);
        assert_eq!(preds[1].token, "y");
        assert_eq!(preds[1].predicted, "B");
        assert!(preds[1].correct);
        assert_eq!(preds[2].predicted, "A");
        assert!(!preds[2].correct);
    }

    #[test]
    fn test_prediction_length_mismatch() {
        let (probe, tensors, vocab) = setup();
        let source = vec![vec!["x".to_string()]];
        assert!(matches!(
            evaluate_with_predictions(&probe, &tensors, &vocab, &source),
            Err(ProbeError::DataMismatch(_))
        ));
    }
}
