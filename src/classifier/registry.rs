//! Model registry
//!
//! Owns every registered artifact and the active pointer. Readers clone an
//! `Arc` out of the pointer and never hold a lock while predicting; the
//! write lock is taken only for the swap itself.
//!
//! On-disk layout (optional):
//!
//! ```text
//! <root>/versions/v000001/artifact.json
//! <root>/versions/v000001/schema.json
//! <root>/versions/v000001/metrics.json
//! <root>/ACTIVE
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artifact::{ArtifactFile, ModelArtifact, ModelMetadata};
use super::train::TrainedModel;
use crate::error::{PredictorError, Result};
use crate::models::VersionId;

const VERSIONS_DIR: &str = "versions";
const ACTIVE_FILE: &str = "ACTIVE";
const ARTIFACT_FILE: &str = "artifact.json";
const SCHEMA_FILE: &str = "schema.json";
const METRICS_FILE: &str = "metrics.json";

/// Contents of the `ACTIVE` pointer file
#[derive(Debug, Serialize, Deserialize)]
struct ActivePointer {
    version: VersionId,
}

pub struct ModelRegistry {
    root: Option<PathBuf>,
    versions: RwLock<BTreeMap<VersionId, Arc<ModelArtifact>>>,
    active: RwLock<Option<Arc<ModelArtifact>>>,
    /// Serializes registration and activation; holds the last id handed out
    writer: Mutex<VersionId>,
}

impl ModelRegistry {
    /// Registry that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            root: None,
            versions: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            writer: Mutex::new(VersionId::default()),
        }
    }

    /// Open (or create) a registry directory, restoring all versions and the
    /// active pointer.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let versions_dir = root.join(VERSIONS_DIR);
        fs::create_dir_all(&versions_dir)?;

        let mut versions = BTreeMap::new();
        // Highest id on disk, readable or not, so new versions never collide
        let mut last_on_disk = VersionId::default();
        for entry in fs::read_dir(&versions_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(version) = VersionId::parse(&name) else {
                debug!("Ignoring unexpected entry {} in registry", name);
                continue;
            };
            last_on_disk = last_on_disk.max(version);
            match load_version(&entry.path()) {
                Ok(artifact) if artifact.version == version => {
                    versions.insert(version, Arc::new(artifact));
                }
                Ok(artifact) => warn!(
                    "Skipping {}: directory name does not match stored version {}",
                    name, artifact.version
                ),
                Err(e) => warn!("Skipping unreadable model version {}: {}", name, e),
            }
        }

        let active = match read_active_pointer(&root)? {
            Some(version) => match versions.get(&version) {
                Some(artifact) => Some(Arc::clone(artifact)),
                None => {
                    warn!("Active pointer references missing version {}; no model is active", version);
                    None
                }
            },
            None => None,
        };

        info!(
            "Opened model registry at {} ({} versions, active {})",
            root.display(),
            versions.len(),
            active
                .as_ref()
                .map(|a: &Arc<ModelArtifact>| a.version.to_string())
                .unwrap_or_else(|| "none".into())
        );

        Ok(Self {
            root: Some(root),
            versions: RwLock::new(versions),
            active: RwLock::new(active),
            writer: Mutex::new(last_on_disk),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Store a trained model under the next unused version id. Does not
    /// activate it.
    pub fn register(&self, trained: TrainedModel) -> Result<VersionId> {
        let mut last = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let version = last.next();
        // Consumed even if the write fails, so a collision is not retried forever
        *last = version;

        let artifact = ModelArtifact::from_trained(version, trained);
        if let Some(root) = &self.root {
            write_version(root, &artifact)?;
        }

        self.versions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version, Arc::new(artifact));

        info!("Registered model {}", version);
        Ok(version)
    }

    /// Make `version` the active model. Atomic for concurrent readers.
    pub fn activate(&self, version: VersionId) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let artifact = self.get(version)?;
        if let Some(root) = &self.root {
            write_active_pointer(root, version)?;
        }

        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(artifact)
            .map(|a| a.version);

        match previous {
            Some(prev) if prev != version => info!("Activated model {} (retired {})", version, prev),
            _ => info!("Activated model {}", version),
        }
        Ok(())
    }

    pub fn get_active(&self) -> Result<Arc<ModelArtifact>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PredictorError::NoActiveModel)
    }

    pub fn active_version(&self) -> Option<VersionId> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.version)
    }

    pub fn get(&self, version: VersionId) -> Result<Arc<ModelArtifact>> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&version)
            .cloned()
            .ok_or(PredictorError::UnknownVersion(version))
    }

    /// Summaries of all versions, oldest first
    pub fn list(&self) -> Vec<ModelMetadata> {
        let active = self.active_version();
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|a| a.metadata(Some(a.version) == active))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.versions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write a version into a hidden staging directory, then rename it into
/// place. An existing version directory is never overwritten.
fn write_version(root: &Path, artifact: &ModelArtifact) -> Result<()> {
    let versions_dir = root.join(VERSIONS_DIR);
    fs::create_dir_all(&versions_dir)?;

    let target = versions_dir.join(artifact.version.dir_name());
    if target.exists() {
        return Err(PredictorError::Storage(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("model version directory {} already exists", target.display()),
        )));
    }

    let staging = versions_dir.join(format!(".{}.tmp-{}", artifact.version.dir_name(), std::process::id()));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir(&staging)?;

    let written = write_json(&staging.join(ARTIFACT_FILE), &artifact.file_ref())
        .and_then(|_| write_json(&staging.join(SCHEMA_FILE), &artifact.schema))
        .and_then(|_| write_json(&staging.join(METRICS_FILE), &artifact.metrics))
        .and_then(|_| fs::rename(&staging, &target).map_err(PredictorError::from));

    if let Err(e) = written {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    debug!("Wrote model {} to {}", artifact.version, target.display());
    Ok(())
}

fn load_version(dir: &Path) -> Result<ModelArtifact> {
    let file: ArtifactFile = read_json(&dir.join(ARTIFACT_FILE))?;
    let schema = read_json(&dir.join(SCHEMA_FILE))?;
    let metrics = read_json(&dir.join(METRICS_FILE))?;
    Ok(ModelArtifact::from_parts(file, schema, metrics))
}

fn write_active_pointer(root: &Path, version: VersionId) -> Result<()> {
    let path = root.join(ACTIVE_FILE);
    let tmp = path.with_extension("tmp");
    write_json(&tmp, &ActivePointer { version })?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

fn read_active_pointer(root: &Path) -> Result<Option<VersionId>> {
    let path = root.join(ACTIVE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let pointer: ActivePointer = read_json(&path)?;
    Ok(Some(pointer.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::backend::ClassifierBackend;
    use crate::classifier::centroid::CentroidBackend;
    use crate::classifier::corpus::{CorpusStats, LabeledExample};
    use crate::classifier::features::{FeatureSchema, FeatureVector};
    use crate::classifier::train::MetricSnapshot;
    use crate::config::EncoderConfig;
    use crate::models::Priority;
    use chrono::Utc;
    use tempfile::TempDir;

    fn trained(marker: f64) -> TrainedModel {
        let schema = FeatureSchema::new(&EncoderConfig::default(), Vec::new());
        let examples: Vec<LabeledExample> = [Priority::Low, Priority::High]
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let mut values = vec![0.0; schema.len()];
                values[0] = i as f64 + marker;
                LabeledExample {
                    features: FeatureVector {
                        fingerprint: schema.fingerprint.clone(),
                        values,
                    },
                    label,
                    origin: i,
                    synthetic: false,
                }
            })
            .collect();
        let refs: Vec<&LabeledExample> = examples.iter().collect();
        let model = CentroidBackend.fit(&refs, schema.len()).unwrap();

        let mut corpus = CorpusStats {
            labeled: 2,
            input_reports: 2,
            ..Default::default()
        };
        corpus.class_counts_before[Priority::Low.index()] = 1;
        corpus.class_counts_before[Priority::High.index()] = 1;
        corpus.class_counts = corpus.class_counts_before;

        TrainedModel {
            model,
            schema,
            metrics: MetricSnapshot {
                accuracy: marker,
                macro_f1: marker,
                per_class: Vec::new(),
                training_size: 2,
                validation_size: 0,
                holdout: false,
            },
            corpus,
            backend: "centroid".into(),
            seed: 42,
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_active_before_activation() {
        let registry = ModelRegistry::in_memory();
        let v = registry.register(trained(0.5)).unwrap();
        assert_eq!(v, VersionId(1));
        assert!(matches!(registry.get_active(), Err(PredictorError::NoActiveModel)));
        assert_eq!(registry.active_version(), None);
    }

    #[test]
    fn test_versions_are_monotonic_and_retained() {
        let registry = ModelRegistry::in_memory();
        let v1 = registry.register(trained(0.1)).unwrap();
        let v2 = registry.register(trained(0.2)).unwrap();
        assert!(v2 > v1);

        registry.activate(v1).unwrap();
        registry.activate(v2).unwrap();
        assert_eq!(registry.get_active().unwrap().version, v2);
        // Retired, not deleted
        assert_eq!(registry.get(v1).unwrap().metrics.accuracy, 0.1);

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert!(!listed[0].active);
        assert!(listed[1].active);
    }

    #[test]
    fn test_unknown_version() {
        let registry = ModelRegistry::in_memory();
        assert!(matches!(
            registry.activate(VersionId(9)),
            Err(PredictorError::UnknownVersion(VersionId(9)))
        ));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (v1, v2) = {
            let registry = ModelRegistry::open(dir.path()).unwrap();
            let v1 = registry.register(trained(0.1)).unwrap();
            let v2 = registry.register(trained(0.2)).unwrap();
            registry.activate(v1).unwrap();
            (v1, v2)
        };

        assert!(dir.path().join("versions/v000001/artifact.json").exists());
        assert!(dir.path().join("versions/v000002/schema.json").exists());
        assert!(dir.path().join("versions/v000002/metrics.json").exists());
        assert!(dir.path().join("ACTIVE").exists());

        let reopened = ModelRegistry::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.active_version(), Some(v1));
        assert_eq!(reopened.get(v2).unwrap().metrics.accuracy, 0.2);

        // Numbering continues after restart
        assert_eq!(reopened.register(trained(0.3)).unwrap(), VersionId(3));
    }

    #[test]
    fn test_reloaded_model_predicts_identically() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let v = registry.register(trained(0.0)).unwrap();
        let before = registry.get(v).unwrap();

        let reopened = ModelRegistry::open(dir.path()).unwrap();
        let after = reopened.get(v).unwrap();

        let mut probe = vec![0.0; before.schema.len()];
        probe[0] = 0.3;
        assert_eq!(before.model.predict_proba(&probe), after.model.predict_proba(&probe));
        assert_eq!(before.schema, after.schema);
    }

    #[test]
    fn test_unreadable_version_dir_is_skipped_not_reused() {
        let dir = TempDir::new().unwrap();
        let stray = dir.path().join("versions/v000001");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join("notes.txt"), "left by hand").unwrap();

        let registry = ModelRegistry::open(dir.path()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.register(trained(0.1)).unwrap(), VersionId(2));
        assert_eq!(registry.register(trained(0.2)).unwrap(), VersionId(3));

        // The stray directory is left as it was
        assert!(stray.join("notes.txt").exists());
        assert!(!stray.join("artifact.json").exists());

        let reopened = ModelRegistry::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.register(trained(0.3)).unwrap(), VersionId(4));
    }

    #[test]
    fn test_version_dir_appearing_later_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("versions/v000001")).unwrap();

        assert!(matches!(registry.register(trained(0.1)), Err(PredictorError::Storage(_))));
        // The next attempt moves past the taken id
        assert_eq!(registry.register(trained(0.2)).unwrap(), VersionId(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_whole_artifacts() {
        let registry = Arc::new(ModelRegistry::in_memory());
        let v1 = registry.register(trained(0.1)).unwrap();
        let v2 = registry.register(trained(0.2)).unwrap();
        registry.activate(v1).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let active = registry.get_active().unwrap();
                        let expected = if active.version == v1 { 0.1 } else { 0.2 };
                        assert_eq!(active.metrics.accuracy, expected);
                    }
                })
            })
            .collect();

        for i in 0..200 {
            registry.activate(if i % 2 == 0 { v2 } else { v1 }).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
