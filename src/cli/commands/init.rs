//! Workspace initialization.

use std::path::Path;

use anyhow::Context;
use console::style;

use crate::config::Settings;

pub fn cmd_init(settings: &Settings, config_path: Option<&Path>) -> anyhow::Result<()> {
    let data_dir = settings.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    println!(
        "{} Data directory ready: {}",
        style("✓").green(),
        data_dir.display()
    );

    let target = config_path.unwrap_or_else(|| Path::new("abusewatch.toml"));
    if target.exists() {
        println!(
            "{} Config file already exists: {}",
            style("·").dim(),
            target.display()
        );
        return Ok(());
    }

    let content =
        toml::to_string_pretty(&Settings::default()).context("failed to serialize defaults")?;
    std::fs::write(target, content)
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!(
        "{} Wrote default config: {}",
        style("✓").green(),
        target.display()
    );
    println!(
        "{} Set CLOUDFLARE_API_KEY and ABUSEIPDB_API_KEY in the environment (or .env) before running",
        style("!").yellow()
    );
    Ok(())
}
