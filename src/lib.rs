//! Crime report priority prediction engine
//!
//! Turns resolved, labeled crime reports into a versioned priority
//! classifier and serves `Verdict`s for new reports. The web layer talks to
//! [`engine::PredictionEngine`]; the `crime-predictor` binary exposes the
//! same operations for operators.
//!
//! ```ignore
//! let engine = PredictionEngine::new(PredictorConfig::load(None)?)?;
//! engine.train_from_history(&JsonlHistory::new("reports.jsonl"))?;
//! let verdict = engine.predict(&report)?;
//! if verdict.needs_review() { /* route to a human */ }
//! ```

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod hotspots;
pub mod models;
pub mod scheduler;

pub use engine::PredictionEngine;
pub use error::{PredictorError, Result};
