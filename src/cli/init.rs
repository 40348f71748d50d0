//! Config command - write an example config, show the effective one

use anyhow::Result;
use console::style;
use std::path::Path;

use crime_predictor::config::{PredictorConfig, CONFIG_FILE_NAME};

pub fn run_init(path: &Path) -> Result<()> {
    if PredictorConfig::init_config(path)? {
        println!("{} Created {}", style("✓").green(), style(path.display()).cyan());
        println!("\nEdit it to set the registry path, categories and thresholds.");
    } else {
        println!(
            "{} Config already exists at {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    }
    Ok(())
}

pub fn run_show(config: &PredictorConfig) -> Result<()> {
    println!("Config paths:");
    let local = Path::new(CONFIG_FILE_NAME);
    let status = |p: &Path| if p.exists() { "✓" } else { "(not found)" };
    println!("  Project: ./{} {}", CONFIG_FILE_NAME, status(local));
    if let Some(user_path) = PredictorConfig::user_config_path() {
        println!("  User:    {} {}", user_path.display(), status(&user_path));
    }
    if let Some(registry) = &config.registry.path {
        println!("  Models:  {}", registry.display());
    }
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
