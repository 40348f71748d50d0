//! One-vs-rest GBDT backend for priority classification
//!
//! Wraps the `gbdt` crate. The crate trains binary models only (the
//! `LogLikelyhood` loss, labels +1.0 / -1.0), so each priority class gets
//! its own ensemble and the per-class probabilities are normalized into a
//! distribution at prediction time.
//!
//! A class with no positive examples gets no ensemble and always scores 0;
//! `LogLikelyhood` cannot initialise from an all-negative label set.
//!
//! Note: the gbdt crate internally uses `f32` (`ValueType`), while feature
//! vectors store `f64`. Conversions happen at the crate boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};

use gbdt::config::Config;
use gbdt::decision_tree::Data;
use gbdt::gradient_boost::GBDT;
use serde::{Deserialize, Serialize};

use super::backend::{ClassDistribution, ClassifierBackend, FittedModel};
use super::corpus::LabeledExample;
use crate::config::GbdtParams;
use crate::models::Priority;

// ---------------------------------------------------------------------------
// f64 <-> f32 helpers
// ---------------------------------------------------------------------------

#[inline]
fn features_to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&v| v as f32).collect()
}

// ---------------------------------------------------------------------------
// Fitted model
// ---------------------------------------------------------------------------

/// One binary ensemble per priority class, indexed by `Priority::index`.
#[derive(Serialize, Deserialize)]
pub struct GbdtEnsemble {
    models: Vec<Option<GBDT>>,
    feature_count: usize,
}

impl std::fmt::Debug for GbdtEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present: Vec<bool> = self.models.iter().map(Option::is_some).collect();
        f.debug_struct("GbdtEnsemble")
            .field("classes_fitted", &present)
            .field("feature_count", &self.feature_count)
            .finish()
    }
}

impl GbdtEnsemble {
    /// Raw per-class probability from one binary ensemble.
    fn class_score(model: &GBDT, features: &[f64]) -> f64 {
        let data = vec![Data::new_test_data(features_to_f32(features), None)];
        let preds = model.predict(&data);
        preds.first().copied().unwrap_or(0.0_f32) as f64
    }

    pub fn predict_proba(&self, features: &[f64]) -> ClassDistribution {
        let mut scores = [0.0_f64; Priority::COUNT];
        for (score, model) in scores.iter_mut().zip(&self.models) {
            if let Some(model) = model {
                *score = Self::class_score(model, features).clamp(0.0, 1.0);
            }
        }
        ClassDistribution::from_scores(scores)
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }
}

// ---------------------------------------------------------------------------
// Training helper
// ---------------------------------------------------------------------------

/// Train one binary GBDT model.
///
/// - `features`: feature vectors for each sample
/// - `labels`: 1.0 for the positive class, -1.0 otherwise (LogLikelyhood convention)
pub fn train_gbdt(features: &[&[f64]], labels: &[f64], params: &GbdtParams) -> Result<GBDT, String> {
    if features.is_empty() {
        return Err("no training samples provided".into());
    }
    if features.len() != labels.len() {
        return Err(format!(
            "feature count ({}) does not match label count ({})",
            features.len(),
            labels.len()
        ));
    }

    let feature_size = features[0].len();

    let mut cfg = Config::new();
    cfg.set_feature_size(feature_size);
    cfg.set_max_depth(params.max_depth);
    cfg.set_iterations(params.trees);
    cfg.set_shrinkage(params.learning_rate as f32);
    cfg.set_loss("LogLikelyhood");
    cfg.set_debug(false);
    cfg.set_training_optimization_level(2);
    cfg.set_min_leaf_size(params.min_leaf_size);

    let mut gbdt = GBDT::new(&cfg);

    let mut training_data: Vec<Data> = features
        .iter()
        .zip(labels.iter())
        .map(|(f, &label)| Data::new_training_data(features_to_f32(f), 1.0_f32, label as f32, None))
        .collect();

    catch_unwind(AssertUnwindSafe(|| gbdt.fit(&mut training_data)))
        .map_err(|_| "gbdt fit panicked".to_string())?;

    Ok(gbdt)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Gradient boosted trees, one-vs-rest
pub struct GbdtBackend {
    params: GbdtParams,
}

impl GbdtBackend {
    pub const NAME: &'static str = "gbdt";

    pub fn new(params: GbdtParams) -> Self {
        Self { params }
    }
}

impl ClassifierBackend for GbdtBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&self, examples: &[&LabeledExample], feature_count: usize) -> Result<FittedModel, String> {
        if let Some(bad) = examples.iter().find(|e| e.features.len() != feature_count) {
            return Err(format!(
                "example has {} features, expected {}",
                bad.features.len(),
                feature_count
            ));
        }

        let features: Vec<&[f64]> = examples.iter().map(|e| e.features.values.as_slice()).collect();
        let mut models = Vec::with_capacity(Priority::COUNT);

        for class in Priority::ALL {
            let labels: Vec<f64> = examples
                .iter()
                .map(|e| if e.label == class { 1.0 } else { -1.0 })
                .collect();
            let positives = labels.iter().filter(|&&l| l > 0.0).count();

            if positives == 0 || positives == labels.len() {
                tracing::debug!("gbdt: no one-vs-rest split for {}, skipping", class);
                models.push(None);
                continue;
            }

            let model = train_gbdt(&features, &labels, &self.params)
                .map_err(|e| format!("class {}: {}", class, e))?;
            models.push(Some(model));
        }

        let ensemble = GbdtEnsemble {
            models,
            feature_count,
        };

        // Reject numerically broken fits before they reach the registry.
        if let Some(first) = features.first() {
            let raw: Vec<f64> = ensemble
                .models
                .iter()
                .flatten()
                .map(|m| GbdtEnsemble::class_score(m, first))
                .collect();
            if raw.iter().any(|p| !p.is_finite()) {
                return Err("gbdt produced non-finite probabilities".into());
            }
        }

        Ok(FittedModel::Gbdt(ensemble))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
