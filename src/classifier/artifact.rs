//! Immutable, versioned model artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::{ClassDistribution, FittedModel};
use super::corpus::CorpusStats;
use super::features::{encode, FeatureSchema, FeatureVector};
use super::train::{MetricSnapshot, TrainedModel};
use crate::error::{PredictorError, Result};
use crate::models::{Priority, ReportRecord, VersionId};

/// A registered model: fitted parameters plus everything needed to use and
/// audit them. Never mutated after registration.
#[derive(Debug)]
pub struct ModelArtifact {
    pub version: VersionId,
    pub trained_at: DateTime<Utc>,
    pub backend: String,
    pub seed: u64,
    pub schema: FeatureSchema,
    pub model: FittedModel,
    pub corpus: CorpusStats,
    pub metrics: MetricSnapshot,
}

impl ModelArtifact {
    pub fn from_trained(version: VersionId, trained: TrainedModel) -> Self {
        Self {
            version,
            trained_at: trained.trained_at,
            backend: trained.backend,
            seed: trained.seed,
            schema: trained.schema,
            model: trained.model,
            corpus: trained.corpus,
            metrics: trained.metrics,
        }
    }

    /// Encode `report` with this artifact's own schema.
    pub fn encode(&self, report: &ReportRecord) -> FeatureVector {
        encode(report, &self.schema)
    }

    /// Class distribution for a vector built under this artifact's schema.
    pub fn predict_vector(&self, vector: &FeatureVector) -> Result<ClassDistribution> {
        if vector.fingerprint != self.schema.fingerprint || vector.len() != self.schema.len() {
            return Err(PredictorError::SchemaMismatch {
                expected: self.schema.fingerprint.clone(),
                found: vector.fingerprint.clone(),
            });
        }
        Ok(self.model.predict_proba(&vector.values))
    }

    pub fn metadata(&self, active: bool) -> ModelMetadata {
        ModelMetadata {
            version: self.version,
            trained_at: self.trained_at,
            backend: self.backend.clone(),
            seed: self.seed,
            corpus_size: self.corpus.total(),
            labeled: self.corpus.labeled,
            synthetic: self.corpus.synthetic,
            class_counts: self.corpus.class_counts_before,
            coverage: self.corpus.coverage(),
            schema_fingerprint: self.schema.fingerprint.clone(),
            feature_count: self.schema.len(),
            metrics: self.metrics.clone(),
            active,
        }
    }
}

/// Summary of an artifact for callers and operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: VersionId,
    pub trained_at: DateTime<Utc>,
    pub backend: String,
    pub seed: u64,
    /// Examples after class balancing
    pub corpus_size: usize,
    /// Real labeled reports behind the corpus
    pub labeled: usize,
    pub synthetic: usize,
    /// Real examples per class, indexed by `Priority::index`
    pub class_counts: [usize; Priority::COUNT],
    /// Classes with at least one real example
    pub coverage: Vec<Priority>,
    pub schema_fingerprint: String,
    pub feature_count: usize,
    pub metrics: MetricSnapshot,
    pub active: bool,
}

/// `artifact.json`: fitted parameters and provenance. Schema and metrics live
/// in sibling files.
#[derive(Deserialize)]
pub(crate) struct ArtifactFile {
    pub version: VersionId,
    pub trained_at: DateTime<Utc>,
    pub backend: String,
    pub seed: u64,
    pub corpus: CorpusStats,
    pub model: FittedModel,
}

/// Borrowed form of `ArtifactFile` for writing
#[derive(Serialize)]
pub(crate) struct ArtifactFileRef<'a> {
    version: VersionId,
    trained_at: DateTime<Utc>,
    backend: &'a str,
    seed: u64,
    corpus: &'a CorpusStats,
    model: &'a FittedModel,
}

impl ModelArtifact {
    pub(crate) fn file_ref(&self) -> ArtifactFileRef<'_> {
        ArtifactFileRef {
            version: self.version,
            trained_at: self.trained_at,
            backend: &self.backend,
            seed: self.seed,
            corpus: &self.corpus,
            model: &self.model,
        }
    }

    pub(crate) fn from_parts(file: ArtifactFile, schema: FeatureSchema, metrics: MetricSnapshot) -> Self {
        Self {
            version: file.version,
            trained_at: file.trained_at,
            backend: file.backend,
            seed: file.seed,
            schema,
            model: file.model,
            corpus: file.corpus,
            metrics,
        }
    }
}
