//! Nearest-centroid backend
//!
//! Mean feature vector per class, distances measured after per-slot
//! standardization. Scores are a softmax over negative squared distances.
//! Cheap and fully deterministic; useful as a baseline and for tiny corpora
//! where boosted trees overfit.

use serde::{Deserialize, Serialize};

use super::backend::{ClassDistribution, ClassifierBackend, FittedModel};
use super::corpus::LabeledExample;
use crate::models::Priority;

/// Slot spread below this is treated as constant.
const MIN_SCALE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidModel {
    /// Per-class mean vector; `None` for classes absent from training
    centroids: Vec<Option<Vec<f64>>>,
    /// Per-slot standard deviation (1.0 for constant slots)
    scale: Vec<f64>,
}

impl CentroidModel {
    pub fn predict_proba(&self, features: &[f64]) -> ClassDistribution {
        let distances: Vec<Option<f64>> = self
            .centroids
            .iter()
            .map(|c| c.as_ref().map(|c| self.squared_distance(c, features)))
            .collect();

        // Shift by the minimum distance so exp() cannot underflow to all-zero.
        let min = distances
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min);

        let mut scores = [0.0_f64; Priority::COUNT];
        for (score, distance) in scores.iter_mut().zip(&distances) {
            if let Some(d) = distance {
                *score = (-(d - min)).exp();
            }
        }
        ClassDistribution::from_scores(scores)
    }

    fn squared_distance(&self, centroid: &[f64], features: &[f64]) -> f64 {
        centroid
            .iter()
            .zip(features)
            .zip(&self.scale)
            .map(|((c, x), s)| {
                let z = (x - c) / s;
                z * z
            })
            .sum()
    }
}

/// Nearest class mean under standardized Euclidean distance
pub struct CentroidBackend;

impl CentroidBackend {
    pub const NAME: &'static str = "centroid";
}

impl ClassifierBackend for CentroidBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&self, examples: &[&LabeledExample], feature_count: usize) -> Result<FittedModel, String> {
        if examples.is_empty() {
            return Err("no training samples provided".into());
        }
        if let Some(bad) = examples.iter().find(|e| e.features.len() != feature_count) {
            return Err(format!(
                "example has {} features, expected {}",
                bad.features.len(),
                feature_count
            ));
        }

        let n = examples.len() as f64;
        let mut mean = vec![0.0_f64; feature_count];
        for example in examples {
            for (m, v) in mean.iter_mut().zip(&example.features.values) {
                *m += v / n;
            }
        }

        let mut scale = vec![0.0_f64; feature_count];
        for example in examples {
            for ((s, v), m) in scale.iter_mut().zip(&example.features.values).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = s.sqrt();
            if !s.is_finite() || *s < MIN_SCALE {
                *s = 1.0;
            }
        }

        let mut sums = vec![vec![0.0_f64; feature_count]; Priority::COUNT];
        let mut counts = [0usize; Priority::COUNT];
        for example in examples {
            let idx = example.label.index();
            counts[idx] += 1;
            for (acc, v) in sums[idx].iter_mut().zip(&example.features.values) {
                *acc += v;
            }
        }

        let centroids: Vec<Option<Vec<f64>>> = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| {
                (count > 0).then(|| sum.into_iter().map(|s| s / count as f64).collect())
            })
            .collect();

        if centroids.iter().flatten().flatten().any(|v| !v.is_finite()) {
            return Err("centroid computation produced non-finite values".into());
        }

        Ok(FittedModel::Centroid(CentroidModel { centroids, scale }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::features::FeatureVector;

    fn example(values: Vec<f64>, label: Priority) -> LabeledExample {
        LabeledExample {
            features: FeatureVector {
                fingerprint: "test".into(),
                values,
            },
            label,
            origin: 0,
            synthetic: false,
        }
    }

    #[test]
    fn test_nearest_class_wins() {
        let examples = vec![
            example(vec![0.0, 0.0], Priority::Low),
            example(vec![0.1, 0.0], Priority::Low),
            example(vec![5.0, 5.0], Priority::Critical),
            example(vec![5.1, 4.9], Priority::Critical),
        ];
        let refs: Vec<&LabeledExample> = examples.iter().collect();
        let fitted = CentroidBackend.fit(&refs, 2).unwrap();
        assert_eq!(fitted.backend_name(), "centroid");

        let (p, conf) = fitted.predict_proba(&[0.05, 0.0]).argmax();
        assert_eq!(p, Priority::Low);
        assert!(conf > 0.9);
        assert_eq!(fitted.predict_proba(&[4.8, 5.2]).argmax().0, Priority::Critical);
    }

    #[test]
    fn test_absent_classes_get_zero_probability() {
        let examples = vec![
            example(vec![0.0], Priority::Low),
            example(vec![1.0], Priority::High),
        ];
        let refs: Vec<&LabeledExample> = examples.iter().collect();
        let dist = CentroidBackend.fit(&refs, 1).unwrap().predict_proba(&[0.5]);
        assert_eq!(dist.probability(Priority::Medium), 0.0);
        assert_eq!(dist.probability(Priority::Critical), 0.0);
        assert!((dist.probability(Priority::Low) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_far_away_input_still_normalizes() {
        let examples = vec![
            example(vec![0.0], Priority::Low),
            example(vec![1.0], Priority::Medium),
        ];
        let refs: Vec<&LabeledExample> = examples.iter().collect();
        let dist = CentroidBackend.fit(&refs, 1).unwrap().predict_proba(&[1e6]);
        let sum: f64 = dist.0.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(dist.argmax().0, Priority::Medium);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(CentroidBackend.fit(&[], 3).is_err());
    }
}
