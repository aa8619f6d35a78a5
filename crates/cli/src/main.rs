//! `feedflow`: runs a scripted shift against an in-memory site and prints
//! the resulting report as JSON.
//!
//! Usage: `feedflow [shift|config]` (default `shift`).

mod shift;

use anyhow::{bail, Context};
use feedflow_core::EngineConfig;

fn main() -> anyhow::Result<()> {
    feedflow_observability::init();

    let config = EngineConfig::from_env();
    let mode = std::env::args().nth(1).unwrap_or_else(|| "shift".to_string());

    let output = match mode.as_str() {
        "shift" => {
            let report = shift::run(config).context("demo shift failed")?;
            serde_json::to_string_pretty(&report)?
        }
        "config" => serde_json::to_string_pretty(&config)?,
        other => bail!("unknown command '{other}' (expected 'shift' or 'config')"),
    };

    println!("{output}");
    Ok(())
}
