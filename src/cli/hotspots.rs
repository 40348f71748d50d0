//! Hotspots command

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use std::path::Path;

use crime_predictor::classifier::JsonlHistory;
use crime_predictor::engine::PredictionEngine;

pub fn run(engine: &PredictionEngine, reports: &Path, now: Option<&str>, format: &str) -> Result<()> {
    let now = match now {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid --now timestamp '{}'", s))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let (reports, _) = JsonlHistory::new(reports)
        .load()
        .with_context(|| format!("Failed to read {}", reports.display()))?;
    let clusters = engine.hotspots(&reports, now);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&clusters)?);
        return Ok(());
    }

    let window = engine.config().hotspots.window_days;
    if clusters.is_empty() {
        println!("No hotspots in the {} days before {}", window, now.format("%Y-%m-%d %H:%M"));
        return Ok(());
    }

    println!(
        "{} hotspots in the {} days before {}\n",
        style(clusters.len()).bold(),
        window,
        now.format("%Y-%m-%d %H:%M")
    );
    for (i, c) in clusters.iter().enumerate() {
        let categories: Vec<String> = c
            .top_categories
            .iter()
            .map(|(name, n)| format!("{} ({})", name, n))
            .collect();
        println!(
            "  {}. {} reports at ({:.5}, {:.5}), radius {:.0} m",
            i + 1,
            style(c.report_count).red().bold(),
            c.centroid.lat,
            c.centroid.lon,
            c.radius_m
        );
        println!(
            "     {} to {}  {}",
            c.window_start.format("%Y-%m-%d"),
            c.window_end.format("%Y-%m-%d"),
            style(categories.join(", ")).dim()
        );
    }
    Ok(())
}
