//! Configuration view and validation commands: `issue2pr config`.

use anyhow::{Context, Result};

use issue2pr::config::Config;

use super::super::ConfigCommands;

const REDACTED: &str = "********";

fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    let hide = |v: &mut Option<String>| {
        if v.is_some() {
            *v = Some(REDACTED.to_string());
        }
    };
    hide(&mut config.github.token);
    hide(&mut config.webhook.secret);
    hide(&mut config.generator.openai_api_key);
    config
}

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered =
                toml::to_string_pretty(&redacted(config)).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            config.validate()?;
            if config.webhook.secret.is_none() {
                println!("warning: WEBHOOK_SECRET is not set; webhook signatures will not be verified");
            }
            println!("Configuration is valid.");
        }
    }
    Ok(())
}
