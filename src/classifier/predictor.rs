//! Inference service
//!
//! Holds a cached handle to the registry's active artifact and refreshes it
//! on a fixed cadence or after `invalidate()`. Predictions never take a lock
//! that training or activation holds for longer than a pointer swap.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::artifact::ModelArtifact;
use super::features::FeatureVector;
use super::registry::ModelRegistry;
use crate::config::InferenceConfig;
use crate::error::{PredictorError, Result};
use crate::models::{HotspotCluster, ReportRecord, Verdict};

#[derive(Default)]
struct CachedModel {
    artifact: Option<Arc<ModelArtifact>>,
    checked_at: Option<Instant>,
}

pub struct Predictor {
    registry: Arc<ModelRegistry>,
    low_confidence_threshold: f64,
    recheck_interval: Duration,
    cache: RwLock<CachedModel>,
    hotspots: RwLock<Option<Arc<Vec<HotspotCluster>>>>,
}

impl Predictor {
    pub fn new(registry: Arc<ModelRegistry>, config: &InferenceConfig) -> Self {
        Self {
            registry,
            low_confidence_threshold: config.low_confidence_threshold,
            recheck_interval: Duration::from_secs(config.recheck_interval_secs),
            cache: RwLock::new(CachedModel::default()),
            hotspots: RwLock::new(None),
        }
    }

    /// Force the next prediction to re-read the registry's active pointer.
    pub fn invalidate(&self) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).checked_at = None;
    }

    /// Artifact currently used for predictions.
    pub fn current(&self) -> Result<Arc<ModelArtifact>> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let (Some(artifact), Some(checked_at)) = (&cache.artifact, cache.checked_at) {
                if checked_at.elapsed() < self.recheck_interval {
                    return Ok(Arc::clone(artifact));
                }
            }
        }

        let fresh = self.registry.get_active();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        match fresh {
            Ok(artifact) => {
                if cache.artifact.as_ref().map(|a| a.version) != Some(artifact.version) {
                    tracing::info!("Predictor now serving model {}", artifact.version);
                }
                cache.artifact = Some(Arc::clone(&artifact));
                cache.checked_at = Some(Instant::now());
                Ok(artifact)
            }
            Err(e) => {
                cache.artifact = None;
                cache.checked_at = None;
                Err(e)
            }
        }
    }

    /// Replace the hotspot snapshot used for verdict hotspot flags.
    pub fn publish_hotspots(&self, clusters: Vec<HotspotCluster>) {
        *self.hotspots.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(clusters));
    }

    pub fn hotspot_snapshot(&self) -> Option<Arc<Vec<HotspotCluster>>> {
        self.hotspots.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn predict(&self, report: &ReportRecord) -> Result<Verdict> {
        let artifact = self.current()?;
        let hotspots = self.hotspot_snapshot();
        self.verdict(&artifact, report, &artifact.encode(report), hotspots.as_deref())
    }

    /// Predict for an already encoded report. The vector must come from the
    /// active artifact's schema.
    pub fn predict_encoded(&self, report: &ReportRecord, vector: &FeatureVector) -> Result<Verdict> {
        let artifact = self.current()?;
        let hotspots = self.hotspot_snapshot();
        self.verdict(&artifact, report, vector, hotspots.as_deref())
    }

    /// Predict many reports in parallel against one artifact.
    pub fn predict_batch(&self, reports: &[ReportRecord]) -> Result<Vec<Result<Verdict>>> {
        let artifact = self.current()?;
        let hotspots = self.hotspot_snapshot();
        Ok(reports
            .par_iter()
            .map(|report| self.verdict(&artifact, report, &artifact.encode(report), hotspots.as_deref()))
            .collect())
    }

    fn verdict(
        &self,
        artifact: &ModelArtifact,
        report: &ReportRecord,
        vector: &FeatureVector,
        hotspots: Option<&Vec<HotspotCluster>>,
    ) -> Result<Verdict> {
        let distribution = artifact.predict_vector(vector).inspect_err(|e| {
            if let PredictorError::SchemaMismatch { .. } = e {
                tracing::warn!("Rejected report '{}': {}", report.id, e);
            }
        })?;
        let (priority, confidence) = distribution.argmax();

        let in_hotspot = hotspots.and_then(|clusters| {
            artifact
                .schema
                .resolve_point(report.location.as_ref())
                .map(|point| clusters.iter().any(|c| c.contains(&point)))
        });

        Ok(Verdict {
            priority,
            confidence: confidence.clamp(0.0, 1.0),
            probabilities: distribution.0,
            model_version: artifact.version,
            low_confidence: confidence < self.low_confidence_threshold,
            in_hotspot,
        })
    }
}
