//! Config subcommand handlers.

use anyhow::Context;
use jarvis_config::{Config, ConfigValidator};

use crate::cli::ConfigAction;

pub(crate) fn handle_config_command(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Check => config_check(config),
        ConfigAction::Show => {
            let rendered = toml::to_string_pretty(config).context("rendering config")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

fn config_check(config: &Config) -> anyhow::Result<()> {
    let result = ConfigValidator::validate(config)?;
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error:   {}: {}", error.path, error.message);
    }
    let warnings = result.into_result()?;
    println!("Configuration OK ({} warnings)", warnings.len());
    Ok(())
}
