//! Predict command

use anyhow::{Context, Result};
use console::style;

use crime_predictor::engine::PredictionEngine;
use crime_predictor::error::PredictorError;
use crime_predictor::models::{Priority, ReportRecord, Verdict};

pub fn run(engine: &PredictionEngine, source: &str, format: &str) -> Result<()> {
    let input = super::read_input(source)?;
    let trimmed = input.trim_start();

    let reports: Vec<ReportRecord> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("Invalid report array")?
    } else {
        vec![serde_json::from_str(trimmed).context("Invalid report JSON")?]
    };

    let verdicts = match engine.predict_batch(&reports) {
        Ok(v) => v,
        Err(PredictorError::NoActiveModel) => {
            eprintln!(
                "{} No active model. Route reports to manual triage, or run {}",
                style("!").yellow(),
                style("crime-predictor train").cyan()
            );
            return Err(PredictorError::NoActiveModel.into());
        }
        Err(e) => return Err(e.into()),
    };

    if format == "json" {
        let out: Vec<serde_json::Value> = reports
            .iter()
            .zip(&verdicts)
            .map(|(r, v)| match v {
                Ok(verdict) => serde_json::json!({ "id": r.id, "verdict": verdict }),
                Err(e) => serde_json::json!({ "id": r.id, "error": e.to_string() }),
            })
            .collect();
        if out.len() == 1 {
            println!("{}", serde_json::to_string_pretty(&out[0])?);
        } else {
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        return Ok(());
    }

    for (report, verdict) in reports.iter().zip(verdicts) {
        let label = if report.id.is_empty() { report.category.as_str() } else { report.id.as_str() };
        match verdict {
            Ok(v) => print_verdict(label, &v),
            Err(e) => println!("{} {}: {}", style("✗").red(), label, e),
        }
    }
    Ok(())
}

fn styled_priority(p: Priority) -> console::StyledObject<String> {
    let s = style(p.to_string()).bold();
    match p {
        Priority::Critical => s.red(),
        Priority::High => s.yellow(),
        Priority::Medium => s.cyan(),
        Priority::Low => s.dim(),
    }
}

fn print_verdict(label: &str, v: &Verdict) {
    println!(
        "{}  {}  confidence {:.0}%  model {}",
        style(label).bold(),
        styled_priority(v.priority),
        v.confidence * 100.0,
        v.model_version
    );
    let dist: Vec<String> = Priority::ALL
        .iter()
        .map(|p| format!("{} {:.2}", p, v.probabilities[p.index()]))
        .collect();
    println!("  {}", style(dist.join("  ")).dim());
    if v.needs_review() {
        println!("  {} Low confidence, needs human review", style("!").yellow());
    }
    if v.in_hotspot == Some(true) {
        println!("  {} Inside an active hotspot", style("●").red());
    }
}
