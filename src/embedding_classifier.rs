//! Embedding-based classification stage.
//!
//! Encodes a log message with the sentence-embedding model, runs a
//! pretrained linear head over the vector, and commits to the argmax
//! label only when the top probability clears the confidence threshold.
//! Anything less confident escalates as [`UNCLASSIFIED`].

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::encoder::Encoder;
use crate::traits::{MessageClassifier, UNCLASSIFIED};

/// Minimum top-class probability required before the classifier commits to
/// a label. Exactly at the threshold commits; strictly below defers.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Pretrained linear classification head over embedding vectors.
///
/// Loaded from a JSON artifact produced offline (training is out of
/// scope): label vocabulary, one weight row per label, one bias per label.
#[derive(Debug, Deserialize)]
pub struct LinearHead {
    labels: Vec<String>,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LinearHead {
    /// Load and shape-validate a head artifact.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read classifier head: {}", path.display()))?;
        let head: LinearHead = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse classifier head: {}", path.display()))?;
        head.validate()?;
        Ok(head)
    }

    pub fn new(labels: Vec<String>, weights: Vec<Vec<f32>>, bias: Vec<f32>) -> anyhow::Result<Self> {
        let head = Self {
            labels,
            weights,
            bias,
        };
        head.validate()?;
        Ok(head)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.labels.is_empty(), "classifier head has no labels");
        anyhow::ensure!(
            self.weights.len() == self.labels.len() && self.bias.len() == self.labels.len(),
            "classifier head shape mismatch: {} labels, {} weight rows, {} biases",
            self.labels.len(),
            self.weights.len(),
            self.bias.len()
        );
        let dim = self.weights[0].len();
        anyhow::ensure!(dim > 0, "classifier head has zero-width weight rows");
        anyhow::ensure!(
            self.weights.iter().all(|row| row.len() == dim),
            "classifier head weight rows have inconsistent widths"
        );
        Ok(())
    }

    /// Input dimensionality expected by the head.
    pub fn dim(&self) -> usize {
        self.weights[0].len()
    }

    /// Closed label vocabulary of the head.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Probability distribution over the label vocabulary (softmax of the
    /// linear logits).
    pub fn predict_proba(&self, embedding: &[f32]) -> Vec<f32> {
        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(embedding).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect();
        softmax(&logits)
    }

    /// Resolve a probability distribution to a label.
    ///
    /// Returns the argmax label when its probability is at or above
    /// [`CONFIDENCE_THRESHOLD`], otherwise the sentinel.
    pub fn decide(&self, probabilities: &[f32]) -> String {
        // First maximum wins on ties, matching argmax over the vocabulary.
        let mut best_idx = 0;
        let mut best_p = f32::NEG_INFINITY;
        for (idx, &p) in probabilities.iter().enumerate() {
            if p > best_p {
                best_p = p;
                best_idx = idx;
            }
        }

        if probabilities.is_empty() || best_p < CONFIDENCE_THRESHOLD {
            UNCLASSIFIED.to_string()
        } else {
            self.labels[best_idx].clone()
        }
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Embedding encoder plus linear head.
///
/// Both artifacts load once at startup; a load failure is fatal to the
/// process (the caller exits). Inference never mutates model state, but
/// the ONNX session's scratch buffers need `&mut`, hence the mutex.
pub struct EmbeddingClassifier {
    encoder: Mutex<Encoder>,
    head: LinearHead,
}

impl EmbeddingClassifier {
    pub fn load(model_dir: &Path, head_path: &Path) -> anyhow::Result<Self> {
        let encoder = Encoder::load(model_dir)?;
        let head = LinearHead::load(head_path)?;

        anyhow::ensure!(
            encoder.dim() == head.dim(),
            "embedding dim {} does not match classifier head dim {}",
            encoder.dim(),
            head.dim()
        );

        tracing::info!(
            labels = head.labels().len(),
            dim = head.dim(),
            "loaded embedding classifier"
        );

        Ok(Self {
            encoder: Mutex::new(encoder),
            head,
        })
    }

    /// Closed label vocabulary of the underlying head.
    pub fn labels(&self) -> &[String] {
        self.head.labels()
    }
}

#[async_trait]
impl MessageClassifier for EmbeddingClassifier {
    async fn classify(&self, message: &str) -> String {
        // An encode failure is classifier degradation, not an error the
        // pipeline surfaces: resolve to the sentinel and keep going.
        let embedding = {
            let mut encoder = match self.encoder.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match encoder.encode(message) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Embedding encode failed: {}", e);
                    return UNCLASSIFIED.to_string();
                }
            }
        };

        let probabilities = self.head.predict_proba(&embedding);
        self.head.decide(&probabilities)
    }

    fn name(&self) -> &str {
        "embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_with_labels(labels: &[&str]) -> LinearHead {
        let n = labels.len();
        LinearHead::new(
            labels.iter().map(|s| s.to_string()).collect(),
            vec![vec![0.0; 4]; n],
            vec![0.0; n],
        )
        .unwrap()
    }

    #[test]
    fn test_decide_below_threshold_is_unclassified() {
        let head = head_with_labels(&["Critical Error", "Security Alert", "Error"]);
        assert_eq!(head.decide(&[0.499, 0.300, 0.201]), UNCLASSIFIED);
    }

    #[test]
    fn test_decide_at_threshold_commits() {
        // Exactly 0.5 commits to the argmax label.
        let head = head_with_labels(&["Critical Error", "Security Alert"]);
        assert_eq!(head.decide(&[0.5, 0.5]), "Critical Error");
    }

    #[test]
    fn test_decide_above_threshold_returns_argmax() {
        let head = head_with_labels(&["Critical Error", "Security Alert", "Error"]);
        assert_eq!(head.decide(&[0.1, 0.8, 0.1]), "Security Alert");
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_predict_proba_prefers_aligned_weights() {
        // One weight row aligned with the input, one orthogonal.
        let head = LinearHead::new(
            vec!["aligned".to_string(), "orthogonal".to_string()],
            vec![vec![5.0, 0.0, 0.0, 0.0], vec![0.0, 5.0, 0.0, 0.0]],
            vec![0.0, 0.0],
        )
        .unwrap();

        let probs = head.predict_proba(&[1.0, 0.0, 0.0, 0.0]);
        assert!(probs[0] > CONFIDENCE_THRESHOLD);
        assert_eq!(head.decide(&probs), "aligned");
    }

    #[test]
    fn test_head_shape_validation() {
        assert!(LinearHead::new(vec![], vec![], vec![]).is_err());
        assert!(LinearHead::new(
            vec!["a".to_string()],
            vec![vec![0.0; 4], vec![0.0; 4]],
            vec![0.0]
        )
        .is_err());
        assert!(LinearHead::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![0.0; 4], vec![0.0; 3]],
            vec![0.0, 0.0]
        )
        .is_err());
    }

    #[test]
    fn test_head_artifact_parse() {
        let raw = r#"{
            "labels": ["Critical Error", "Security Alert"],
            "weights": [[0.1, 0.2], [0.3, 0.4]],
            "bias": [0.0, 0.1]
        }"#;
        let head: LinearHead = serde_json::from_str(raw).unwrap();
        head.validate().unwrap();
        assert_eq!(head.dim(), 2);
        assert_eq!(head.labels().len(), 2);
    }
}
