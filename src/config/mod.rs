//! Configuration module for the prediction engine
//!
//! This module handles:
//! - Encoder vocabularies and scaling caps
//! - Corpus balancing and training hyperparameters
//! - Inference thresholds and registry location
//! - Hotspot and scheduling cadence

mod predictor_config;

pub use predictor_config::{
    BackendKind,
    CorpusConfig,
    EncoderConfig,
    GbdtParams,
    HotspotConfig,
    InferenceConfig,
    PredictorConfig,
    RegistryConfig,
    ScheduleConfig,
    TrainingConfig,
    CONFIG_FILE_NAME,
    DEFAULT_CATEGORIES,
    DEFAULT_URGENT_KEYWORDS,
};
