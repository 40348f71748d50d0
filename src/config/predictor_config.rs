//! Engine configuration
//!
//! Loaded from (first match wins):
//! 1. An explicit `--config` path
//! 2. `./predictor.toml`
//! 3. `~/.config/crime-predictor/config.toml`
//!
//! Environment variables override file values:
//! `CRIME_PREDICTOR_REGISTRY`, `CRIME_PREDICTOR_SEED`,
//! `CRIME_PREDICTOR_LOW_CONFIDENCE`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::geo::GeoPoint;

pub const CONFIG_FILE_NAME: &str = "predictor.toml";

/// Longest accepted hotspot window (about a century)
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Categories offered by the reporting form.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Theft",
    "Assault",
    "Burglary",
    "Vandalism",
    "Robbery",
    "Fraud",
    "Cybercrime",
    "Drug Offense",
    "Domestic Violence",
    "Vehicle Theft",
    "Other",
];

/// Words in a description that correlate with violent or urgent incidents.
pub const DEFAULT_URGENT_KEYWORDS: &[&str] = &[
    "weapon", "gun", "knife", "shot", "shooting", "stab", "stabbed", "blood", "bleeding",
    "injured", "hostage", "fire", "attack", "attacked", "threat", "kill", "child", "emergency",
    "unconscious", "armed",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub hotspots: HotspotConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Feature encoder vocabularies and scaling caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Configured category set (one-hot slots, in this order)
    pub categories: Vec<String>,
    pub urgent_keywords: Vec<String>,
    /// Grid cell edge for location bucketing, in degrees
    pub grid_cell_deg: f64,
    /// Most frequent location buckets kept as one-hot slots
    pub max_zones: usize,
    /// Known centroids for named zones (`name -> [lat, lon]`)
    pub zone_centroids: BTreeMap<String, [f64; 2]>,
    pub max_text_chars: usize,
    pub max_keyword_hits: usize,
    pub max_prior_reports: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            urgent_keywords: DEFAULT_URGENT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            grid_cell_deg: 0.01,
            max_zones: 16,
            zone_centroids: BTreeMap::new(),
            max_text_chars: 1000,
            max_keyword_hits: 5,
            max_prior_reports: 50,
        }
    }
}

impl EncoderConfig {
    /// Zone centroids keyed by lowercased zone name.
    pub fn zone_points(&self) -> BTreeMap<String, GeoPoint> {
        self.zone_centroids
            .iter()
            .map(|(name, [lat, lon])| (name.trim().to_lowercase(), GeoPoint::new(*lat, *lon)))
            .collect()
    }
}

/// Training corpus filtering and balancing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Minimum labeled reports required to train
    pub min_examples: usize,
    /// Classes below this share of the corpus are oversampled up to it
    pub min_class_fraction: f64,
    /// Uniform jitter applied to continuous features of oversampled copies
    pub jitter: f64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            min_examples: 20,
            min_class_fraction: 0.1,
            jitter: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One-vs-rest gradient boosted trees
    #[default]
    Gbdt,
    /// Nearest class centroid over standardized features
    Centroid,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Gbdt => write!(f, "gbdt"),
            BackendKind::Centroid => write!(f, "centroid"),
        }
    }
}

/// Gradient boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub trees: usize,
    pub max_depth: u32,
    pub learning_rate: f64,
    pub min_leaf_size: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            trees: 60,
            max_depth: 4,
            learning_rate: 0.1,
            min_leaf_size: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    /// Share of original examples held out for the metric snapshot
    pub val_fraction: f64,
    pub backend: BackendKind,
    pub gbdt: GbdtParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            val_fraction: 0.25,
            backend: BackendKind::Gbdt,
            gbdt: GbdtParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Verdicts below this confidence are flagged for human review
    pub low_confidence_threshold: f64,
    /// How often the predictor re-reads the registry's active pointer
    pub recheck_interval_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.5,
            recheck_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    /// Trailing window, in days, counted back from `now`
    pub window_days: i64,
    pub cell_size_deg: f64,
    /// Reports a cell needs before it can seed or join a cluster
    pub min_cell_reports: usize,
    /// Reports a merged cluster needs to qualify as a hotspot
    pub min_reports: usize,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            window_days: 14,
            cell_size_deg: 0.01,
            min_cell_reports: 2,
            min_reports: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry root; `None` keeps models in memory only
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub retrain_interval_secs: Option<u64>,
    pub hotspot_interval_secs: Option<u64>,
    /// JSON-lines report history used by scheduled jobs
    pub history_path: Option<PathBuf>,
}

impl PredictorConfig {
    /// Load config from all sources, then apply environment overrides.
    ///
    /// An explicit path must exist and parse. Implicit locations fall back
    /// to defaults with a warning when unreadable.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::discover(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Self {
        let candidates = [Some(PathBuf::from(CONFIG_FILE_NAME)), Self::user_config_path()];
        for path in candidates.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    debug!("Loaded predictor config from {}", path.display());
                    return config;
                }
                Err(e) => warn!("Failed to load {}: {:#}", path.display(), e),
            }
        }
        debug!("No predictor config found, using defaults");
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Path of the user-level config file
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("crime-predictor").join("config.toml"))
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("CRIME_PREDICTOR_REGISTRY") {
            self.registry.path = Some(PathBuf::from(path));
        }
        if let Some(seed) = std::env::var("CRIME_PREDICTOR_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.training.seed = seed;
        }
        if let Some(threshold) = std::env::var("CRIME_PREDICTOR_LOW_CONFIDENCE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.inference.low_confidence_threshold = threshold;
        }
    }

    /// Reject values that would make training or inference meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.encoder.categories.is_empty() {
            anyhow::bail!("encoder.categories must not be empty");
        }
        if !(self.encoder.grid_cell_deg.is_finite() && self.encoder.grid_cell_deg > 0.0) {
            anyhow::bail!("encoder.grid_cell_deg must be positive and finite");
        }
        if !(self.hotspots.cell_size_deg.is_finite() && self.hotspots.cell_size_deg > 0.0) {
            anyhow::bail!("hotspots.cell_size_deg must be positive and finite");
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.hotspots.window_days) {
            anyhow::bail!("hotspots.window_days must be between 1 and {}", MAX_WINDOW_DAYS);
        }
        if !(0.0..0.5).contains(&self.corpus.min_class_fraction) {
            anyhow::bail!("corpus.min_class_fraction must be in [0, 0.5)");
        }
        if !(self.corpus.jitter.is_finite() && self.corpus.jitter >= 0.0) {
            anyhow::bail!("corpus.jitter must be non-negative and finite");
        }
        if !(0.0..1.0).contains(&self.training.val_fraction) {
            anyhow::bail!("training.val_fraction must be in [0, 1)");
        }
        if !(0.0..=1.0).contains(&self.inference.low_confidence_threshold) {
            anyhow::bail!("inference.low_confidence_threshold must be in [0, 1]");
        }
        if self.training.gbdt.trees == 0 || self.training.gbdt.max_depth == 0 {
            anyhow::bail!("training.gbdt needs at least one tree of depth >= 1");
        }
        for (zone, [lat, lon]) in &self.encoder.zone_centroids {
            if !GeoPoint::new(*lat, *lon).is_valid() {
                anyhow::bail!("encoder.zone_centroids.{} is not a valid coordinate", zone);
            }
        }
        Ok(())
    }

    /// Write a commented example config to `path` unless one exists.
    pub fn init_config(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let example = r#"# Crime priority predictor configuration

[registry]
# Where trained model versions are stored (omit to keep them in memory)
path = "models"

[training]
seed = 42
val_fraction = 0.25
backend = "gbdt"          # or "centroid"

[training.gbdt]
trees = 60
max_depth = 4
learning_rate = 0.1

[corpus]
min_examples = 20
min_class_fraction = 0.1

[inference]
low_confidence_threshold = 0.5
recheck_interval_secs = 30

[hotspots]
window_days = 14
cell_size_deg = 0.01
min_reports = 5

[encoder]
grid_cell_deg = 0.01
max_zones = 16
# zone_centroids = { "Downtown" = [40.7128, -74.0060] }
"#;
        std::fs::write(path, example)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }
}
