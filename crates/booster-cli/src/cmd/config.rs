use std::path::Path;

use anyhow::Context;
use booster_core::config::{Config, WarnLevel};
use clap::Subcommand;

use crate::output::{print_json, print_yaml};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration, defaults filled in
    Show,

    /// Validate the configuration for common mistakes
    Check,
}

pub fn run(path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load_or_default(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    match subcmd {
        ConfigSubcommand::Show => show(&config, json),
        ConfigSubcommand::Check => check(&config, json),
    }
}

fn show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(config)
    } else {
        print_yaml(config)
    }
}

fn check(config: &Config, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

/// Log validation findings and refuse to start on errors.
pub fn ensure_valid(config: &Config) -> anyhow::Result<()> {
    let mut errors = 0;
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => {
                tracing::error!("config: {}", w.message);
                errors += 1;
            }
        }
    }
    if errors > 0 {
        anyhow::bail!("config has {errors} error(s), run `booster config check`");
    }
    Ok(())
}
