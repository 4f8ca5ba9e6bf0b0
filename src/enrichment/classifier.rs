//! Attack category classifier.
//!
//! The model artifact is a TF-IDF vectorizer followed by a linear classifier, exported as JSON:
//!
//! ```json
//! {
//!   "classes": ["benign", "recon", "persistence"],
//!   "vocabulary": { "cat": 0, "cat etc/passwd": 1, "etc/passwd": 2 },
//!   "idf": [1.2, 2.3, 2.0],
//!   "coef": [[0.1, -0.2, 0.0], [0.4, 1.3, 0.9], [-0.3, 0.0, 0.2]],
//!   "intercept": [0.0, -0.1, 0.05],
//!   "ngram_range": [1, 2],
//!   "sublinear_tf": true
//! }
//! ```
//!
//! A binary model carries a single `coef` row and a single `intercept`, the positive side
//! selecting `classes[1]`.

use crate::error_handling::types::ClassifierError;
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Maps raw command text to an attack category label.
///
/// Implementations are read-only after construction and called concurrently from every handler.
pub trait Classifier: Send + Sync {
    fn classify(&self, command: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct ModelArtifact {
    classes: Vec<String>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
    #[serde(default = "default_ngram_range")]
    ngram_range: (usize, usize),
    #[serde(default = "default_sublinear")]
    sublinear_tf: bool,
}

fn default_ngram_range() -> (usize, usize) {
    (1, 2)
}

fn default_sublinear() -> bool {
    true
}

struct LinearModel {
    artifact: ModelArtifact,
    whitespace: Regex,
    strip: Regex,
    token: Regex,
}

impl LinearModel {
    fn new(artifact: ModelArtifact) -> Result<Self, ClassifierError> {
        let features = artifact.idf.len();
        let rows = if artifact.classes.len() == 2 {
            1
        } else {
            artifact.classes.len()
        };

        if artifact.classes.is_empty() {
            return Err(ClassifierError::ModelFormat(String::from("no classes")));
        }
        let (min_n, max_n) = artifact.ngram_range;
        if min_n == 0 || min_n > max_n {
            return Err(ClassifierError::ModelFormat(format!(
                "bad ngram_range ({}, {})",
                min_n, max_n
            )));
        }
        if let Some((term, idx)) = artifact.vocabulary.iter().find(|(_, i)| **i >= features) {
            return Err(ClassifierError::DimensionMismatch(format!(
                "term {:?} indexes feature {} of {}",
                term, idx, features
            )));
        }
        if artifact.coef.len() != rows || artifact.intercept.len() != rows {
            return Err(ClassifierError::DimensionMismatch(format!(
                "expected {} coefficient rows for {} classes, got {} rows and {} intercepts",
                rows,
                artifact.classes.len(),
                artifact.coef.len(),
                artifact.intercept.len()
            )));
        }
        if artifact.coef.iter().any(|row| row.len() != features) {
            return Err(ClassifierError::DimensionMismatch(format!(
                "coefficient rows must have {} columns",
                features
            )));
        }

        let pattern = |p: &str| Regex::new(p).map_err(|e| ClassifierError::ModelFormat(e.to_string()));
        Ok(Self {
            artifact,
            whitespace: pattern(r"\s+")?,
            strip: pattern(r"[^\w\s\-/.:;|&$`]")?,
            token: pattern(r"\b[\w/.\-]+\b")?,
        })
    }

    fn preprocess(&self, command: &str) -> String {
        let lowered = command.to_lowercase();
        let collapsed = self.whitespace.replace_all(lowered.trim(), " ");
        let cleaned = self.strip.replace_all(&collapsed, "").into_owned();
        if cleaned.is_empty() {
            String::from(UNKNOWN_CATEGORY)
        } else {
            cleaned
        }
    }

    /// L2-normalised TF-IDF vector as sparse (feature, weight) pairs.
    fn vectorize(&self, text: &str) -> Vec<(usize, f64)> {
        let tokens: Vec<&str> = self.token.find_iter(text).map(|m| m.as_str()).collect();
        let (min_n, max_n) = self.artifact.ngram_range;

        let mut counts: HashMap<usize, f64> = HashMap::new();
        for n in min_n..=max_n {
            if n > tokens.len() {
                break;
            }
            for window in tokens.windows(n) {
                if let Some(idx) = self.artifact.vocabulary.get(&window.join(" ")) {
                    *counts.entry(*idx).or_insert(0.0) += 1.0;
                }
            }
        }

        let mut features: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(idx, tf)| {
                let tf = if self.artifact.sublinear_tf {
                    1.0 + tf.ln()
                } else {
                    tf
                };
                (idx, tf * self.artifact.idf[idx])
            })
            .collect();

        let norm = features.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            features.iter_mut().for_each(|(_, w)| *w /= norm);
        }
        features
    }

    fn predict(&self, command: &str) -> &str {
        let features = self.vectorize(&self.preprocess(command));
        let scores: Vec<f64> = self
            .artifact
            .coef
            .iter()
            .zip(&self.artifact.intercept)
            .map(|(row, b)| features.iter().map(|(i, w)| row[*i] * w).sum::<f64>() + b)
            .collect();

        let classes = &self.artifact.classes;
        if classes.len() == 2 {
            return if scores[0] > 0.0 {
                &classes[1]
            } else {
                &classes[0]
            };
        }

        let mut best = 0;
        for (k, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = k;
            }
        }
        &classes[best]
    }
}

/// Classifier backed by an optional linear model.
///
/// Without a model every command is labelled [`UNKNOWN_CATEGORY`].
pub struct AttackClassifier {
    model: Option<LinearModel>,
}

impl AttackClassifier {
    pub fn unloaded() -> Self {
        Self { model: None }
    }

    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ClassifierError> {
        let artifact: ModelArtifact = serde_json::from_str(content)
            .map_err(|e| ClassifierError::ModelFormat(e.to_string()))?;
        Ok(Self {
            model: Some(LinearModel::new(artifact)?),
        })
    }

    /// Loads the configured model, falling back to an unloaded classifier on any error.
    pub fn from_path(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p,
            None => {
                info!("No classifier model configured, commands will be labelled unknown");
                return Self::unloaded();
            }
        };
        match Self::load(path) {
            Ok(classifier) => {
                info!("Loaded attack classifier from {}", path.display());
                classifier
            }
            Err(e) => {
                warn!("Unable to load classifier model {}: {}", path.display(), e);
                Self::unloaded()
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }
}

impl Classifier for AttackClassifier {
    fn classify(&self, command: &str) -> String {
        let label = match &self.model {
            Some(model) => model.predict(command).to_string(),
            None => String::from(UNKNOWN_CATEGORY),
        };
        debug!("classified {:?} as {}", command, label);
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MULTI: &str = r#"{
        "classes": ["benign", "recon", "malware"],
        "vocabulary": {"ls": 0, "cat": 1, "etc/passwd": 2, "wget": 3, "cat etc/passwd": 4, "uname": 5},
        "idf": [1.0, 1.5, 2.0, 2.5, 2.2, 1.8],
        "coef": [
            [2.0, 0.0, 0.0, -1.0, 0.0, 0.0],
            [0.0, 0.5, 1.5, 0.0, 1.5, 2.0],
            [0.0, 0.0, 0.0, 3.0, 0.0, 0.0]
        ],
        "intercept": [0.1, 0.0, 0.0],
        "ngram_range": [1, 2],
        "sublinear_tf": true
    }"#;

    #[test]
    fn test_unloaded_returns_unknown() {
        let classifier = AttackClassifier::unloaded();
        assert!(!classifier.is_loaded());
        assert_eq!(classifier.classify("rm -rf /"), UNKNOWN_CATEGORY);
    }

    #[test]
    fn test_multiclass_prediction() {
        let classifier = AttackClassifier::from_json(MULTI).unwrap();
        assert_eq!(classifier.classify("ls"), "benign");
        assert_eq!(classifier.classify("CAT   /etc/passwd"), "recon");
        assert_eq!(classifier.classify("uname -a"), "recon");
        assert_eq!(classifier.classify("wget http://x/y.sh"), "malware");
        // no known term: intercepts decide
        assert_eq!(classifier.classify("!!!"), "benign");
    }

    #[test]
    fn test_binary_prediction() {
        let classifier = AttackClassifier::from_json(
            r#"{"classes": ["benign", "attack"], "vocabulary": {"wget": 0, "ls": 1},
                "idf": [1.0, 1.0], "coef": [[3.0, -3.0]], "intercept": [-0.5]}"#,
        )
        .unwrap();
        assert_eq!(classifier.classify("wget evil"), "attack");
        assert_eq!(classifier.classify("ls"), "benign");
        assert_eq!(classifier.classify("echo"), "benign");
    }

    #[test]
    fn test_preprocessing_strips_symbols() {
        let classifier = AttackClassifier::from_json(MULTI).unwrap();
        let model = classifier.model.as_ref().unwrap();
        assert_eq!(
            model.preprocess("  Echo  'hi'\t>> /tmp/x; id "),
            "echo hi  /tmp/x; id"
        );
        assert_eq!(model.preprocess("'''"), "unknown");
    }

    #[test]
    fn test_bad_models_are_rejected() {
        assert!(matches!(
            AttackClassifier::from_json("not json"),
            Err(ClassifierError::ModelFormat(_))
        ));
        assert!(matches!(
            AttackClassifier::from_json(
                r#"{"classes": ["a", "b", "c"], "vocabulary": {"x": 0}, "idf": [1.0],
                    "coef": [[1.0]], "intercept": [0.0]}"#
            ),
            Err(ClassifierError::DimensionMismatch(_))
        ));
        assert!(matches!(
            AttackClassifier::from_json(
                r#"{"classes": ["a", "b"], "vocabulary": {"x": 3}, "idf": [1.0],
                    "coef": [[1.0]], "intercept": [0.0]}"#
            ),
            Err(ClassifierError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_from_path_degrades() {
        let classifier = AttackClassifier::from_path(Some(Path::new("/nonexistent/model.json")));
        assert!(!classifier.is_loaded());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MULTI.as_bytes()).unwrap();
        let classifier = AttackClassifier::from_path(Some(file.path()));
        assert!(classifier.is_loaded());
    }
}
