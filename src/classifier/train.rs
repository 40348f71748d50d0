//! Training protocol for the priority classifier
//!
//! 1. Stratified, seeded split of the original examples into train/validation
//! 2. Fit on the training split (synthetic copies follow their origin)
//! 3. Evaluate on the validation split for the metric snapshot
//! 4. Refit on the whole corpus for the shipped parameters

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::backend::{ClassifierBackend, FittedModel};
use super::corpus::{Corpus, CorpusStats, LabeledExample};
use super::features::FeatureSchema;
use crate::config::TrainingConfig;
use crate::error::{PredictorError, Result};
use crate::models::Priority;

/// Validation metrics for one priority class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: Priority,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Validation examples with this label
    pub support: usize,
}

/// Evaluation snapshot stored with each artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub accuracy: f64,
    /// Mean F1 over classes present in the corpus
    pub macro_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub training_size: usize,
    pub validation_size: usize,
    /// False when no example could be held out and metrics were computed on
    /// the training data
    pub holdout: bool,
}

impl MetricSnapshot {
    pub fn class(&self, label: Priority) -> Option<&ClassMetrics> {
        self.per_class.iter().find(|m| m.label == label)
    }
}

/// Output of a successful training run, not yet registered
#[derive(Debug)]
pub struct TrainedModel {
    pub model: FittedModel,
    pub schema: FeatureSchema,
    pub metrics: MetricSnapshot,
    pub corpus: CorpusStats,
    pub backend: String,
    pub seed: u64,
    pub trained_at: DateTime<Utc>,
}

/// Fits a backend over a corpus following the protocol above
pub struct ModelTrainer<'a> {
    backend: &'a dyn ClassifierBackend,
    config: &'a TrainingConfig,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(backend: &'a dyn ClassifierBackend, config: &'a TrainingConfig) -> Self {
        Self { backend, config }
    }

    pub fn train(&self, corpus: &Corpus, schema: &FeatureSchema) -> Result<TrainedModel> {
        if corpus.is_empty() {
            return Err(PredictorError::TrainingFailed("corpus is empty".into()));
        }
        if let Some(stray) = corpus
            .examples
            .iter()
            .find(|e| e.features.fingerprint != schema.fingerprint)
        {
            return Err(PredictorError::SchemaMismatch {
                expected: schema.fingerprint.clone(),
                found: stray.features.fingerprint.clone(),
            });
        }

        let start = Instant::now();
        let feature_count = schema.len();

        let validation = self.validation_origins(corpus);
        let (held_out, fit_set): (Vec<&LabeledExample>, Vec<&LabeledExample>) = corpus
            .examples
            .iter()
            .partition(|e| validation.contains(&e.origin));
        // Synthetic copies of held-out examples are neither fitted nor scored.
        let held_out: Vec<&LabeledExample> = held_out.into_iter().filter(|e| !e.synthetic).collect();

        tracing::info!(
            "Training {} backend: {} examples, {} validation",
            self.backend.name(),
            fit_set.len(),
            held_out.len()
        );

        let all: Vec<&LabeledExample> = corpus.examples.iter().collect();
        let (model, metrics) = if held_out.is_empty() {
            tracing::warn!("No validation examples could be held out; metrics use training data");
            let model = self.fit(&all, feature_count)?;
            let originals: Vec<&LabeledExample> = corpus.originals().collect();
            let metrics = evaluate(&model, &originals, &corpus.stats, all.len(), false);
            (model, metrics)
        } else {
            let probe = self.fit(&fit_set, feature_count)?;
            let metrics = evaluate(&probe, &held_out, &corpus.stats, fit_set.len(), true);
            (self.fit(&all, feature_count)?, metrics)
        };

        tracing::info!(
            "Trained {} model in {:.2?}: accuracy {:.3}, macro-F1 {:.3}",
            self.backend.name(),
            start.elapsed(),
            metrics.accuracy,
            metrics.macro_f1
        );

        Ok(TrainedModel {
            model,
            schema: schema.clone(),
            metrics,
            corpus: corpus.stats.clone(),
            backend: self.backend.name().to_string(),
            seed: self.config.seed,
            trained_at: Utc::now(),
        })
    }

    fn fit(&self, examples: &[&LabeledExample], feature_count: usize) -> Result<FittedModel> {
        self.backend
            .fit(examples, feature_count)
            .map_err(PredictorError::TrainingFailed)
    }

    /// Origins held out for validation. Classes with a single original keep it
    /// for training; every other class contributes at least one example.
    fn validation_origins(&self, corpus: &Corpus) -> HashSet<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut held_out = HashSet::new();

        for class in Priority::ALL {
            let mut members: Vec<usize> = corpus
                .originals()
                .filter(|e| e.label == class)
                .map(|e| e.origin)
                .collect();
            if members.len() < 2 || self.config.val_fraction <= 0.0 {
                continue;
            }
            members.shuffle(&mut rng);

            let wanted = (members.len() as f64 * self.config.val_fraction).round() as usize;
            let take = wanted.clamp(1, members.len() - 1);
            held_out.extend(members.into_iter().take(take));
        }

        held_out
    }
}

fn evaluate(
    model: &FittedModel,
    examples: &[&LabeledExample],
    stats: &CorpusStats,
    training_size: usize,
    holdout: bool,
) -> MetricSnapshot {
    // confusion[actual][predicted]
    let mut confusion = [[0usize; Priority::COUNT]; Priority::COUNT];
    for example in examples {
        let (predicted, _) = model.predict_proba(&example.features.values).argmax();
        confusion[example.label.index()][predicted.index()] += 1;
    }

    let correct: usize = (0..Priority::COUNT).map(|i| confusion[i][i]).sum();
    let accuracy = ratio(correct, examples.len());

    let per_class: Vec<ClassMetrics> = Priority::ALL
        .iter()
        .map(|&label| {
            let i = label.index();
            let tp = confusion[i][i];
            let predicted: usize = (0..Priority::COUNT).map(|a| confusion[a][i]).sum();
            let support: usize = confusion[i].iter().sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                label,
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let present = stats.coverage();
    let macro_f1 = if present.is_empty() {
        0.0
    } else {
        present.iter().map(|&p| per_class[p.index()].f1).sum::<f64>() / present.len() as f64
    };

    MetricSnapshot {
        accuracy,
        macro_f1,
        per_class,
        training_size,
        validation_size: examples.len(),
        holdout,
    }
}

#[inline]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
