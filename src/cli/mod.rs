//! CLI command definitions and handlers

mod hotspots;
mod init;
mod models;
mod predict;
mod train;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crime_predictor::config::PredictorConfig;
use crime_predictor::engine::PredictionEngine;

/// Crime report priority predictor
///
/// Trains priority classifiers from resolved report history, serves
/// priority verdicts for new reports and flags emerging hotspots.
#[derive(Parser, Debug)]
#[command(name = "crime-predictor")]
#[command(
    version,
    about = "Train and serve priority predictions for citizen crime reports",
    after_help = "\
Examples:
  crime-predictor train --history reports.jsonl       Train and activate a new model
  crime-predictor train --history reports.jsonl --stats   Summarize the history only
  crime-predictor predict --report new.json          Predict one report
  cat new.json | crime-predictor predict             Read the report from stdin
  crime-predictor models list                         Show registered versions
  crime-predictor models activate v3                  Roll back to version 3
  crime-predictor hotspots --reports recent.jsonl     Cluster recent locations"
)]
pub struct Cli {
    /// Config file (default: ./predictor.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Model registry directory (overrides config)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model from labeled report history (JSON lines)
    Train {
        /// History file, one report per line
        #[arg(long)]
        history: PathBuf,

        /// Register the new version without making it active
        #[arg(long)]
        no_activate: bool,

        /// Show history statistics only
        #[arg(long)]
        stats: bool,
    },

    /// Predict the priority of a report
    Predict {
        /// Report JSON file, or '-' for stdin. A JSON array predicts a batch.
        #[arg(long, default_value = "-")]
        report: String,

        /// Output format
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Inspect and activate registered model versions
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Cluster recent report locations into hotspots
    Hotspots {
        /// Reports file, one report per line
        #[arg(long)]
        reports: PathBuf,

        /// End of the window (RFC 3339, default: now)
        #[arg(long)]
        now: Option<String>,

        /// Output format
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List registered versions
    List,
    /// Show metadata and metrics (default: active version)
    Show {
        version: Option<String>,
    },
    /// Make a version active
    Activate {
        version: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example config file
    Init {
        #[arg(long, default_value = crime_predictor::config::CONFIG_FILE_NAME)]
        path: PathBuf,
    },
    /// Show the effective config and where it came from
    Show,
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init { path } => init::run_init(path),
            ConfigAction::Show => init::run_show(&load_config(&cli)?),
        },

        Commands::Train {
            history,
            no_activate,
            stats,
        } => {
            if *stats {
                return train::run_stats(history);
            }
            let engine = open_engine(&cli)?;
            train::run(&engine, history, !*no_activate)
        }

        Commands::Predict { report, format } => {
            let engine = open_engine(&cli)?;
            predict::run(&engine, report, format)
        }

        Commands::Models { action } => {
            let engine = open_engine(&cli)?;
            match action {
                ModelsAction::List => models::list(&engine),
                ModelsAction::Show { version } => models::show(&engine, version.as_deref()),
                ModelsAction::Activate { version } => models::activate(&engine, version),
            }
        }

        Commands::Hotspots {
            reports,
            now,
            format,
        } => {
            let engine = open_engine(&cli)?;
            hotspots::run(&engine, reports, now.as_deref(), format)
        }
    }
}

fn load_config(cli: &Cli) -> Result<PredictorConfig> {
    let mut config = PredictorConfig::load(cli.config.as_deref())?;
    if let Some(registry) = &cli.registry {
        config.registry.path = Some(registry.clone());
    }
    if config.registry.path.is_none() {
        config.registry.path = Some(default_registry_dir());
    }
    Ok(config)
}

/// Registry used by the CLI when none is configured
fn default_registry_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crime-predictor")
        .join("models")
}

fn open_engine(cli: &Cli) -> Result<PredictionEngine> {
    let config = load_config(cli)?;
    let registry = config
        .registry
        .path
        .clone()
        .unwrap_or_else(default_registry_dir);
    PredictionEngine::new(config)
        .with_context(|| format!("Failed to open model registry at {}", registry.display()))
}

/// Read a file, or stdin for "-"
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).context("Failed to read stdin")?;
        Ok(buf)
    } else {
        let path = Path::new(source);
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}
