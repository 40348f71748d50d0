//! Training corpus assembly
//!
//! Turns raw report history into labeled feature vectors: drops unlabeled,
//! inconsistent and invalid reports, then oversamples minority priority
//! classes instead of discarding majority examples.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::features::{encode, FeatureSchema, FeatureVector, SlotKind};
use crate::config::CorpusConfig;
use crate::error::{PredictorError, Result};
use crate::models::{Priority, RecordIssue, ReportRecord};

/// One training example
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: Priority,
    /// Index of the original example this one derives from
    pub origin: usize,
    /// True for oversampled copies
    pub synthetic: bool,
}

/// Bookkeeping for a corpus build, stored in the model artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub input_reports: usize,
    pub labeled: usize,
    pub dropped_unlabeled: usize,
    pub dropped_inconsistent: usize,
    pub dropped_invalid: usize,
    /// Per-class counts before balancing, indexed by `Priority::index`
    pub class_counts_before: [usize; Priority::COUNT],
    /// Per-class counts after balancing
    pub class_counts: [usize; Priority::COUNT],
    pub synthetic: usize,
}

impl CorpusStats {
    /// Total examples after balancing
    pub fn total(&self) -> usize {
        self.class_counts.iter().sum()
    }

    /// Classes with at least one real example
    pub fn coverage(&self) -> Vec<Priority> {
        Priority::ALL
            .iter()
            .copied()
            .filter(|p| self.class_counts_before[p.index()] > 0)
            .collect()
    }
}

/// Labeled, balanced training set
#[derive(Debug, Clone)]
pub struct Corpus {
    pub examples: Vec<LabeledExample>,
    pub stats: CorpusStats,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn originals(&self) -> impl Iterator<Item = &LabeledExample> {
        self.examples.iter().filter(|e| !e.synthetic)
    }
}

/// Why a report was left out of the corpus
enum Rejection {
    Unlabeled,
    Inconsistent,
    Invalid(RecordIssue),
}

/// Builds a `Corpus` from report history
pub struct CorpusBuilder<'a> {
    config: &'a CorpusConfig,
    seed: u64,
    now: DateTime<Utc>,
}

impl<'a> CorpusBuilder<'a> {
    pub fn new(config: &'a CorpusConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            now: Utc::now(),
        }
    }

    /// Override the reference time used to reject future-dated reports.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Reports `build` would keep, in history order. `categories` is the
    /// encoder's category list.
    pub fn trainable<'r>(&self, history: &'r [ReportRecord], categories: &[String]) -> Vec<&'r ReportRecord> {
        history
            .iter()
            .filter(|report| self.admit(report, categories).is_ok())
            .collect()
    }

    fn admit(&self, report: &ReportRecord, categories: &[String]) -> std::result::Result<Priority, Rejection> {
        let label = report.priority.ok_or(Rejection::Unlabeled)?;
        if !report.has_consistent_history() {
            return Err(Rejection::Inconsistent);
        }
        report.validate(categories, self.now).map_err(Rejection::Invalid)?;
        Ok(label)
    }

    pub fn build(&self, history: &[ReportRecord], schema: &FeatureSchema) -> Result<Corpus> {
        let mut stats = CorpusStats {
            input_reports: history.len(),
            ..Default::default()
        };

        let mut examples = Vec::new();
        for report in history {
            let label = match self.admit(report, &schema.categories) {
                Ok(label) => label,
                Err(Rejection::Unlabeled) => {
                    stats.dropped_unlabeled += 1;
                    continue;
                }
                Err(Rejection::Inconsistent) => {
                    debug!("Dropping report '{}': contradictory status history", report.id);
                    stats.dropped_inconsistent += 1;
                    continue;
                }
                Err(Rejection::Invalid(issue)) => {
                    debug!("Dropping report '{}': {}", report.id, issue);
                    stats.dropped_invalid += 1;
                    continue;
                }
            };

            let origin = examples.len();
            stats.class_counts_before[label.index()] += 1;
            examples.push(LabeledExample {
                features: encode(report, schema),
                label,
                origin,
                synthetic: false,
            });
        }
        stats.labeled = examples.len();

        let classes = stats.coverage().len();
        if stats.labeled < self.config.min_examples || classes < 2 {
            return Err(PredictorError::InsufficientData {
                labeled: stats.labeled,
                classes,
                required: self.config.min_examples,
            });
        }

        stats.synthetic = self.oversample(&mut examples, schema);
        for example in &examples {
            stats.class_counts[example.label.index()] += 1;
        }

        info!(
            "Built corpus: {} labeled of {} reports, {} synthetic, classes {:?}",
            stats.labeled, stats.input_reports, stats.synthetic, stats.class_counts
        );

        Ok(Corpus { examples, stats })
    }

    /// Duplicate minority examples (with jitter on continuous slots) until each
    /// present class reaches `min_class_fraction` of the original total.
    /// Returns the number of copies added.
    fn oversample(&self, examples: &mut Vec<LabeledExample>, schema: &FeatureSchema) -> usize {
        let total = examples.len();
        let target = (self.config.min_class_fraction * total as f64).ceil() as usize;
        let jitter = self.config.jitter;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut added = 0;

        for class in Priority::ALL {
            let members: Vec<usize> = (0..total).filter(|&i| examples[i].label == class).collect();
            if members.is_empty() || members.len() >= target {
                continue;
            }

            for _ in members.len()..target {
                let source = &examples[members[rng.random_range(0..members.len())]];
                let mut copy = source.clone();
                copy.synthetic = true;
                if jitter.is_finite() && jitter > 0.0 {
                    for (value, slot) in copy.features.values.iter_mut().zip(&schema.slots) {
                        if slot.kind == SlotKind::Continuous {
                            *value += rng.random_range(-jitter..=jitter);
                        }
                    }
                }
                examples.push(copy);
                added += 1;
            }
            debug!("Oversampled {} from {} to {}", class, members.len(), target);
        }

        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::models::ReportStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn labeled(i: usize, priority: Priority) -> ReportRecord {
        ReportRecord::new("Theft", now() - chrono::Duration::hours(i as i64 + 1))
            .with_id(format!("r{i}"))
            .with_description("bicycle taken from the rack")
            .labeled(priority)
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::new(&EncoderConfig::default(), Vec::new())
    }

    fn config(min_examples: usize, fraction: f64) -> CorpusConfig {
        CorpusConfig {
            min_examples,
            min_class_fraction: fraction,
            jitter: 0.01,
        }
    }

    #[test]
    fn test_filters_unlabeled_inconsistent_and_invalid() {
        let mut history: Vec<ReportRecord> = (0..6)
            .map(|i| labeled(i, if i % 2 == 0 { Priority::Low } else { Priority::High }))
            .collect();
        history.push(ReportRecord::new("Theft", now() - chrono::Duration::hours(2)));

        let mut backwards = labeled(7, Priority::Low);
        backwards.status_history = vec![ReportStatus::Closed, ReportStatus::Pending];
        backwards.status = ReportStatus::Pending;
        history.push(backwards);

        history.push(ReportRecord::new("Piracy", now()).labeled(Priority::Low));
        history.push(ReportRecord::new("Theft", now() + chrono::Duration::days(1)).labeled(Priority::Low));

        let cfg = config(4, 0.0);
        let corpus = CorpusBuilder::new(&cfg, 1)
            .with_now(now())
            .build(&history, &schema())
            .unwrap();

        assert_eq!(corpus.stats.input_reports, 10);
        assert_eq!(corpus.stats.labeled, 6);
        assert_eq!(corpus.stats.dropped_unlabeled, 1);
        assert_eq!(corpus.stats.dropped_inconsistent, 1);
        assert_eq!(corpus.stats.dropped_invalid, 2);
        assert_eq!(corpus.len(), 6);
    }

    #[test]
    fn test_trainable_matches_build() {
        let mut history: Vec<ReportRecord> = (0..4).map(|i| labeled(i, Priority::ALL[i])).collect();
        history.push(ReportRecord::new("Theft", now() - chrono::Duration::hours(2)));
        history.push(ReportRecord::new("Piracy", now()).labeled(Priority::Low));
        history.push(ReportRecord::new("Theft", now() + chrono::Duration::days(1)).labeled(Priority::Low));

        let schema = schema();
        let cfg = config(4, 0.0);
        let builder = CorpusBuilder::new(&cfg, 1).with_now(now());
        let kept = builder.trainable(&history, &schema.categories);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept.len(), builder.build(&history, &schema).unwrap().stats.labeled);
    }

    #[test]
    fn test_too_few_examples_is_insufficient() {
        let history: Vec<_> = (0..3).map(|i| labeled(i, Priority::ALL[i])).collect();
        let cfg = config(20, 0.1);
        let err = CorpusBuilder::new(&cfg, 1)
            .with_now(now())
            .build(&history, &schema())
            .unwrap_err();
        match err {
            PredictorError::InsufficientData { labeled, required, .. } => {
                assert_eq!(labeled, 3);
                assert_eq!(required, 20);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_single_class_is_insufficient() {
        let history: Vec<_> = (0..30).map(|i| labeled(i, Priority::Medium)).collect();
        let cfg = config(20, 0.1);
        let result = CorpusBuilder::new(&cfg, 1).with_now(now()).build(&history, &schema());
        assert!(matches!(
            result,
            Err(PredictorError::InsufficientData { classes: 1, .. })
        ));
    }

    #[test]
    fn test_oversampling_never_reduces_class_counts() {
        // 30 Low, 6 Medium, 2 High, 2 Critical
        let mut history = Vec::new();
        let plan = [(Priority::Low, 30), (Priority::Medium, 6), (Priority::High, 2), (Priority::Critical, 2)];
        for (priority, n) in plan {
            for _ in 0..n {
                history.push(labeled(history.len(), priority));
            }
        }

        let cfg = config(20, 0.15);
        let corpus = CorpusBuilder::new(&cfg, 9)
            .with_now(now())
            .build(&history, &schema())
            .unwrap();

        let target = (0.15_f64 * 40.0).ceil() as usize;
        for p in Priority::ALL {
            let before = corpus.stats.class_counts_before[p.index()];
            let after = corpus.stats.class_counts[p.index()];
            assert!(after >= before, "{p} shrank from {before} to {after}");
        }
        assert_eq!(corpus.stats.class_counts[Priority::Low.index()], 30);
        assert_eq!(corpus.stats.class_counts[Priority::Medium.index()], target);
        assert_eq!(corpus.stats.class_counts[Priority::High.index()], target);
        assert_eq!(corpus.stats.synthetic, 3 * target - 6 - 2 - 2);
        assert_eq!(corpus.originals().count(), 40);
    }

    #[test]
    fn test_synthetic_copies_jitter_only_continuous_slots() {
        let mut history: Vec<_> = (0..20).map(|i| labeled(i, Priority::Low)).collect();
        history.push(labeled(20, Priority::Critical));

        let schema = schema();
        let cfg = config(10, 0.2);
        let corpus = CorpusBuilder::new(&cfg, 3)
            .with_now(now())
            .build(&history, &schema)
            .unwrap();

        let original = &corpus.examples[20];
        for copy in corpus.examples.iter().filter(|e| e.synthetic) {
            assert_eq!(copy.origin, original.origin);
            assert_eq!(copy.label, Priority::Critical);
            for ((a, b), slot) in copy.features.values.iter().zip(&original.features.values).zip(&schema.slots) {
                match slot.kind {
                    SlotKind::Indicator => assert_eq!(a, b),
                    SlotKind::Continuous => assert!((a - b).abs() <= 0.01 + 1e-12),
                }
            }
        }
    }

    #[test]
    fn test_non_finite_jitter_copies_without_noise() {
        let mut history: Vec<_> = (0..20).map(|i| labeled(i, Priority::Low)).collect();
        history.push(labeled(20, Priority::High));

        let mut cfg = config(10, 0.2);
        cfg.jitter = f64::INFINITY;
        let corpus = CorpusBuilder::new(&cfg, 3)
            .with_now(now())
            .build(&history, &schema())
            .unwrap();

        let original = &corpus.examples[20];
        let copies: Vec<_> = corpus.examples.iter().filter(|e| e.synthetic).collect();
        assert!(!copies.is_empty());
        for copy in copies {
            assert_eq!(copy.features.values, original.features.values);
        }
    }

    #[test]
    fn test_balancing_is_seeded() {
        let mut history: Vec<_> = (0..20).map(|i| labeled(i, Priority::Low)).collect();
        history.push(labeled(20, Priority::High));
        history.push(labeled(21, Priority::High));

        let schema = schema();
        let cfg = config(10, 0.25);
        let a = CorpusBuilder::new(&cfg, 5).with_now(now()).build(&history, &schema).unwrap();
        let b = CorpusBuilder::new(&cfg, 5).with_now(now()).build(&history, &schema).unwrap();
        assert_eq!(a.examples, b.examples);
    }
}
