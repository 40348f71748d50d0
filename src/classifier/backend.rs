//! Classifier capability interface
//!
//! The trainer only needs `fit` and the predictor only needs
//! `predict_proba`, so the learning algorithm can be swapped without
//! touching either. Fitted parameters are a serializable enum so the
//! registry can persist them next to the schema.

use serde::{Deserialize, Serialize};

use super::centroid::{CentroidBackend, CentroidModel};
use super::corpus::LabeledExample;
use super::gbdt_model::{GbdtBackend, GbdtEnsemble};
use crate::config::{BackendKind, TrainingConfig};
use crate::models::Priority;

/// Probability distribution over the four priority classes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassDistribution(pub [f64; Priority::COUNT]);

impl ClassDistribution {
    /// Normalize raw non-negative scores. Non-finite or negative scores count
    /// as zero; an all-zero input becomes uniform.
    pub fn from_scores(scores: [f64; Priority::COUNT]) -> Self {
        let cleaned = scores.map(|s| if s.is_finite() && s > 0.0 { s } else { 0.0 });
        let sum: f64 = cleaned.iter().sum();
        if sum <= 0.0 {
            return Self([1.0 / Priority::COUNT as f64; Priority::COUNT]);
        }
        Self(cleaned.map(|s| s / sum))
    }

    /// Most probable class and its probability. Ties go to the higher priority.
    pub fn argmax(&self) -> (Priority, f64) {
        let mut best = 0;
        for i in 1..Priority::COUNT {
            if self.0[i] >= self.0[best] {
                best = i;
            }
        }
        (Priority::ALL[best], self.0[best])
    }

    pub fn probability(&self, priority: Priority) -> f64 {
        self.0[priority.index()]
    }
}

/// Fitted classifier parameters
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum FittedModel {
    Gbdt(GbdtEnsemble),
    Centroid(CentroidModel),
}

impl FittedModel {
    pub fn predict_proba(&self, features: &[f64]) -> ClassDistribution {
        match self {
            FittedModel::Gbdt(model) => model.predict_proba(features),
            FittedModel::Centroid(model) => model.predict_proba(features),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            FittedModel::Gbdt(_) => GbdtBackend::NAME,
            FittedModel::Centroid(_) => CentroidBackend::NAME,
        }
    }
}

/// A learning algorithm that can be fitted to labeled examples
pub trait ClassifierBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fit on `examples`, each with exactly `feature_count` values.
    /// Errors carry the underlying library/numerical failure.
    fn fit(&self, examples: &[&LabeledExample], feature_count: usize) -> Result<FittedModel, String>;
}

/// Backend selected by configuration
pub fn backend_for(config: &TrainingConfig) -> Box<dyn ClassifierBackend> {
    match config.backend {
        BackendKind::Gbdt => Box::new(GbdtBackend::new(config.gbdt.clone())),
        BackendKind::Centroid => Box::new(CentroidBackend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scores_normalizes() {
        let d = ClassDistribution::from_scores([1.0, 1.0, 2.0, 0.0]);
        assert_eq!(d.0, [0.25, 0.25, 0.5, 0.0]);
        assert_eq!(d.argmax(), (Priority::High, 0.5));
    }

    #[test]
    fn test_degenerate_scores_become_uniform() {
        let d = ClassDistribution::from_scores([f64::NAN, -1.0, 0.0, 0.0]);
        assert_eq!(d.0, [0.25; 4]);
        // Ties resolve toward the more urgent class
        assert_eq!(d.argmax().0, Priority::Critical);
    }

    #[test]
    fn test_backend_for_config() {
        let mut config = TrainingConfig::default();
        assert_eq!(backend_for(&config).name(), "gbdt");
        config.backend = BackendKind::Centroid;
        assert_eq!(backend_for(&config).name(), "centroid");
    }
}
