//! In-process boundary used by the web layer
//!
//! `PredictionEngine` wires the registry, predictor, trainer and hotspot
//! aggregator together. Every operation is safe to call from many threads;
//! training runs are serialized among themselves but never block `predict`.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::classifier::{
    backend_for, ClassifierBackend, CorpusBuilder, FeatureSchema, HistoryProvider, ModelMetadata,
    ModelRegistry, ModelTrainer, Predictor, TrainedModel,
};
use crate::config::PredictorConfig;
use crate::error::{PredictorError, Result};
use crate::hotspots::HotspotAggregator;
use crate::models::{HotspotCluster, ReportRecord, Verdict, VersionId};

pub struct PredictionEngine {
    config: PredictorConfig,
    registry: Arc<ModelRegistry>,
    predictor: Predictor,
    aggregator: HotspotAggregator,
    backend: Box<dyn ClassifierBackend>,
    training: Mutex<()>,
}

impl PredictionEngine {
    /// Build an engine from config, opening the on-disk registry when a
    /// path is configured.
    pub fn new(config: PredictorConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PredictorError::Config(format!("{:#}", e)))?;

        let registry = match &config.registry.path {
            Some(path) => ModelRegistry::open(path)?,
            None => ModelRegistry::in_memory(),
        };
        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    /// Build an engine around an existing registry.
    pub fn with_registry(config: PredictorConfig, registry: Arc<ModelRegistry>) -> Self {
        let predictor = Predictor::new(Arc::clone(&registry), &config.inference);
        let aggregator = HotspotAggregator::new(config.hotspots.clone(), config.encoder.zone_points());
        let backend = backend_for(&config.training);
        Self {
            config,
            registry,
            predictor,
            aggregator,
            backend,
            training: Mutex::new(()),
        }
    }

    /// Replace the learning algorithm used by subsequent training runs.
    pub fn with_backend(mut self, backend: Box<dyn ClassifierBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Priority verdict for a new report. Fails only with `NoActiveModel`
    /// (or `SchemaMismatch` for pre-encoded input).
    pub fn predict(&self, report: &ReportRecord) -> Result<Verdict> {
        self.predictor.predict(report)
    }

    pub fn predict_batch(&self, reports: &[ReportRecord]) -> Result<Vec<Result<Verdict>>> {
        self.predictor.predict_batch(reports)
    }

    /// Train on everything `history` supplies, register the result and make
    /// it active.
    pub fn train_from_history(&self, history: &dyn HistoryProvider) -> Result<VersionId> {
        self.train(history, true)
    }

    /// Train and register. With `activate` false the new version is stored
    /// but the current active model keeps serving.
    pub fn train(&self, history: &dyn HistoryProvider, activate: bool) -> Result<VersionId> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);

        let reports = history.reports()?;
        let trained = self.fit(&reports, Utc::now())?;
        let version = self.registry.register(trained)?;

        if activate {
            self.registry.activate(version)?;
            self.predictor.invalidate();
        } else {
            info!("Registered {} without activating it", version);
        }
        Ok(version)
    }

    /// Run the full training pipeline without touching the registry.
    pub fn fit(&self, reports: &[ReportRecord], now: DateTime<Utc>) -> Result<TrainedModel> {
        let builder = CorpusBuilder::new(&self.config.corpus, self.config.training.seed).with_now(now);
        // Zone vocabulary comes only from reports that will be trained on
        let categories = FeatureSchema::new(&self.config.encoder, Vec::new()).categories;
        let schema = FeatureSchema::fit(&self.config.encoder, builder.trainable(reports, &categories));
        let corpus = builder
            .build(reports, &schema)
            .inspect_err(|e| warn!("Training skipped: {}", e))?;

        ModelTrainer::new(self.backend.as_ref(), &self.config.training)
            .train(&corpus, &schema)
            .inspect_err(|e| warn!("Training failed, active model unchanged: {}", e))
    }

    /// Metadata for `version`, or for the active model when `None`.
    pub fn model_metadata(&self, version: Option<VersionId>) -> Result<ModelMetadata> {
        let artifact = match version {
            Some(v) => self.registry.get(v)?,
            None => self.registry.get_active()?,
        };
        let active = self.registry.active_version() == Some(artifact.version);
        Ok(artifact.metadata(active))
    }

    /// Roll forward or back to a registered version.
    pub fn activate(&self, version: VersionId) -> Result<()> {
        self.registry.activate(version)?;
        self.predictor.invalidate();
        Ok(())
    }

    pub fn list_models(&self) -> Vec<ModelMetadata> {
        self.registry.list()
    }

    /// Cluster recent reports and publish the result for verdict hotspot
    /// flags.
    pub fn hotspots(&self, reports: &[ReportRecord], now: DateTime<Utc>) -> Vec<HotspotCluster> {
        let clusters = self.aggregator.aggregate(reports, now);
        info!("Computed {} hotspot clusters from {} reports", clusters.len(), reports.len());
        self.predictor.publish_hotspots(clusters.clone());
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::models::{Location, Priority};
    use chrono::{Duration, TimeZone};

    fn history() -> Vec<ReportRecord> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..40)
            .map(|i| {
                let priority = Priority::ALL[i % 4];
                let category = if priority >= Priority::High { "Assault" } else { "Theft" };
                ReportRecord::new(category, base + Duration::hours(i as i64 * 7))
                    .with_id(format!("r{i}"))
                    .labeled(priority)
            })
            .collect()
    }

    fn engine() -> PredictionEngine {
        let mut config = PredictorConfig::default();
        config.training.backend = BackendKind::Centroid;
        PredictionEngine::new(config).unwrap()
    }

    #[test]
    fn test_train_activates_and_predicts() {
        let engine = engine();
        let version = engine.train_from_history(&history()).unwrap();
        assert_eq!(engine.registry().active_version(), Some(version));

        let meta = engine.model_metadata(None).unwrap();
        assert_eq!(meta.version, version);
        assert_eq!(meta.corpus_size, 40);
        assert_eq!(meta.coverage.len(), 4);
        assert!(meta.active);

        let verdict = engine
            .predict(&ReportRecord::new("Assault", Utc::now()).with_location(Location::zone("nowhere")))
            .unwrap();
        assert_eq!(verdict.model_version, version);
    }

    #[test]
    fn test_train_without_activation() {
        let engine = engine();
        let v1 = engine.train_from_history(&history()).unwrap();
        let v2 = engine.train(&history(), false).unwrap();
        assert!(v2 > v1);
        assert_eq!(engine.registry().active_version(), Some(v1));

        engine.activate(v2).unwrap();
        assert_eq!(engine.predict(&history()[0]).unwrap().model_version, v2);
        assert!(!engine.model_metadata(Some(v1)).unwrap().active);
    }

    #[test]
    fn test_zone_vocabulary_ignores_dropped_reports() {
        let mut reports: Vec<ReportRecord> = history()
            .into_iter()
            .map(|r| r.with_location(Location::zone("Downtown")))
            .collect();
        let future = Utc::now() + Duration::days(30);
        for i in 0..10 {
            // Unlabeled, future-dated and unconfigured reports are all dropped
            reports.push(ReportRecord::new("Theft", Utc::now()).with_location(Location::zone("Harbor")));
            reports.push(ReportRecord::new("Theft", future).with_location(Location::zone("Airport")).labeled(Priority::Low));
            reports.push(
                ReportRecord::new("Piracy", Utc::now() - Duration::hours(i + 1))
                    .with_location(Location::zone("Docks"))
                    .labeled(Priority::High),
            );
        }

        let trained = engine().fit(&reports, Utc::now()).unwrap();
        assert_eq!(trained.schema.zones, vec!["zone:downtown".to_string()]);
        assert_eq!(trained.corpus.labeled, 40);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PredictorConfig::default();
        config.encoder.categories.clear();
        assert!(matches!(PredictionEngine::new(config), Err(PredictorError::Config(_))));
    }

    #[test]
    fn test_hotspots_publish_snapshot() {
        let engine = engine();
        let now = Utc::now();
        assert!(engine.hotspots(&[], now).is_empty());
        assert!(engine.predictor().hotspot_snapshot().is_some());
    }
}
