//! `pulse config`: show the effective configuration.

use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::config::{ConfigFormat, ConfigLoader, Configurable};

use crate::config::{ENV_PREFIX, PulseConfig};

/// Arguments for `pulse config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Output format (yaml, toml, json)
    #[arg(short, long, default_value = "yaml")]
    pub format: String,

    /// List the environment variables that override settings
    #[arg(long)]
    pub env: bool,
}

fn parse_format(format: &str) -> Result<ConfigFormat> {
    match format {
        "yaml" | "yml" => Ok(ConfigFormat::Yaml),
        "toml" => Ok(ConfigFormat::Toml),
        "json" => Ok(ConfigFormat::Json),
        other => anyhow::bail!("Unknown format: {other}. Use 'yaml', 'toml' or 'json'"),
    }
}

/// Prints the loaded (already validated) configuration.
pub fn run(args: &ConfigArgs, config: &PulseConfig) -> Result<()> {
    if args.env {
        for name in PulseConfig::env_var_names(ENV_PREFIX) {
            println!("{name}");
        }
        return Ok(());
    }

    let format = parse_format(&args.format)?;
    let rendered =
        ConfigLoader::serialize(config, format).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("yml").unwrap(), ConfigFormat::Yaml);
        assert_eq!(parse_format("json").unwrap(), ConfigFormat::Json);
        assert!(parse_format("xml").is_err());
    }
}
