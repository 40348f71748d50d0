//! Models command - list, inspect and activate registered versions

use anyhow::{Context, Result};
use console::style;

use crime_predictor::engine::PredictionEngine;
use crime_predictor::models::VersionId;

fn parse_version(s: &str) -> Result<VersionId> {
    VersionId::parse(s).with_context(|| format!("'{}' is not a model version (expected e.g. v3)", s))
}

pub fn list(engine: &PredictionEngine) -> Result<()> {
    let models = engine.list_models();
    if models.is_empty() {
        println!(
            "No models registered. Run {}",
            style("crime-predictor train --history <file>").cyan()
        );
        return Ok(());
    }

    println!(
        "  {:<8} {:<20} {:<9} {:>7} {:>9} {:>9}",
        "Version", "Trained", "Backend", "Corpus", "Accuracy", "Macro-F1"
    );
    for m in models {
        let marker = if m.active { style("*").green().bold().to_string() } else { " ".into() };
        println!(
            "{} {:<8} {:<20} {:<9} {:>7} {:>8.1}% {:>9.3}",
            marker,
            m.version.to_string(),
            m.trained_at.format("%Y-%m-%d %H:%M:%S"),
            m.backend,
            m.corpus_size,
            m.metrics.accuracy * 100.0,
            m.metrics.macro_f1
        );
    }
    Ok(())
}

pub fn show(engine: &PredictionEngine, version: Option<&str>) -> Result<()> {
    let version = version.map(parse_version).transpose()?;
    let meta = engine.model_metadata(version)?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

pub fn activate(engine: &PredictionEngine, version: &str) -> Result<()> {
    let version = parse_version(version)?;
    let previous = engine.registry().active_version();
    engine.activate(version)?;
    match previous {
        Some(prev) if prev != version => println!(
            "{} Activated {} (was {})",
            style("✓").green(),
            style(version).cyan(),
            prev
        ),
        _ => println!("{} Activated {}", style("✓").green(), style(version).cyan()),
    }
    Ok(())
}
