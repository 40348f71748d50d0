//! Train command

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crime_predictor::classifier::JsonlHistory;
use crime_predictor::engine::PredictionEngine;
use crime_predictor::error::PredictorError;
use crime_predictor::models::Priority;

fn create_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn run_stats(history: &Path) -> Result<()> {
    let stats = JsonlHistory::new(history).stats()?;
    println!("{}", stats);
    Ok(())
}

pub fn run(engine: &PredictionEngine, history: &Path, activate: bool) -> Result<()> {
    if !history.exists() {
        anyhow::bail!("History file not found: {}", history.display());
    }
    let provider = JsonlHistory::new(history);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(create_spinner_style());
    spinner.set_message(format!("Training {} model...", engine.config().training.backend));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = engine.train(&provider, activate);
    spinner.finish_and_clear();

    let version = match result {
        Ok(version) => version,
        Err(e @ PredictorError::InsufficientData { .. }) => {
            println!("{} {}", style("✗").red(), e);
            println!("  Label more resolved reports, then train again.");
            if let Some(active) = engine.registry().active_version() {
                println!("  Model {} remains active.", style(active).cyan());
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let meta = engine.model_metadata(Some(version))?;
    println!(
        "{} Trained model {}{}",
        style("✓").green(),
        style(version).cyan().bold(),
        if meta.active { " (active)" } else { "" }
    );
    println!(
        "  Corpus:     {} examples ({} labeled, {} synthetic)",
        meta.corpus_size, meta.labeled, meta.synthetic
    );
    println!("  Backend:    {} (seed {})", meta.backend, meta.seed);
    println!(
        "  Accuracy:   {:.1}%{}",
        meta.metrics.accuracy * 100.0,
        if meta.metrics.holdout { "" } else { " (training data)" }
    );
    println!("  Macro-F1:   {:.3}", meta.metrics.macro_f1);
    println!();
    println!("  {:<10} {:>9} {:>7} {:>7} {:>8}", "Priority", "Precision", "Recall", "F1", "Support");
    for m in &meta.metrics.per_class {
        let line = format!(
            "  {:<10} {:>9.3} {:>7.3} {:>7.3} {:>8}",
            m.label.to_string(),
            m.precision,
            m.recall,
            m.f1,
            m.support
        );
        if meta.class_counts[m.label.index()] == 0 {
            println!("{}", style(line).dim());
        } else {
            println!("{}", line);
        }
    }

    let missing: Vec<String> = Priority::ALL
        .iter()
        .filter(|p| !meta.coverage.contains(p))
        .map(|p| p.to_string())
        .collect();
    if !missing.is_empty() {
        println!(
            "\n  {} No training examples for: {}",
            style("!").yellow(),
            missing.join(", ")
        );
    }
    Ok(())
}
