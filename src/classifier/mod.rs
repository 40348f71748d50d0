//! Priority classification pipeline
//!
//! history -> corpus builder -> encoder -> trainer -> registry -> predictor
//!
//! The encoder's schema is frozen at training time and travels inside every
//! artifact, so a model is always fed vectors shaped the way it was trained.
//! The learning algorithm sits behind `ClassifierBackend`; gradient boosted
//! trees are the default and a nearest-centroid baseline is available.

pub mod artifact;
pub mod backend;
pub mod centroid;
pub mod corpus;
pub mod features;
pub mod gbdt_model;
pub mod history;
pub mod predictor;
pub mod registry;
pub mod train;

pub use artifact::{ModelArtifact, ModelMetadata};
pub use backend::{backend_for, ClassDistribution, ClassifierBackend, FittedModel};
pub use centroid::{CentroidBackend, CentroidModel};
pub use corpus::{Corpus, CorpusBuilder, CorpusStats, LabeledExample};
pub use features::{encode, FeatureSchema, FeatureSlot, FeatureVector, SlotKind, LAYOUT_REVISION};
pub use gbdt_model::{GbdtBackend, GbdtEnsemble};
pub use history::{HistoryProvider, HistoryStats, JsonlHistory};
pub use predictor::Predictor;
pub use registry::ModelRegistry;
pub use train::{ClassMetrics, MetricSnapshot, ModelTrainer, TrainedModel};
