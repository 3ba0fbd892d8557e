use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use issue2pr::config::{Config, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "issue2pr")]
#[command(version, about = "Turn GitHub issues into pull requests")]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (defaults to ./issue2pr.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the webhook server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Process a single issue end to end
    Process {
        /// Repository as owner/repo (defaults to REPOSITORY)
        #[arg(long)]
        repo: Option<String>,

        /// Issue number
        #[arg(long)]
        issue: u64,

        /// Generate and parse only; print the pull request that would be opened
        #[arg(long)]
        dry_run: bool,
    },
    /// Parse a model response and print the change set as JSON
    Parse {
        /// Response file, or '-' for stdin
        input: PathBuf,

        /// Force a dialect: marker or section
        #[arg(long)]
        dialect: Option<String>,

        /// Also run change-set validation and fail on rejection
        #[arg(long)]
        validate: bool,
    },
    /// Print the X-Hub-Signature-256 header value for a payload
    Sign {
        /// Webhook secret
        #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Payload file, or '-' for stdin
        input: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration (secrets redacted)
    Show,
    /// Validate configuration
    Validate,
}

fn init_tracing(level: &str, format: LogFormat, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let cli_format = cli.log_json.then_some(LogFormat::Json);

    // Offline commands do not need a configuration.
    match &cli.command {
        Commands::Parse {
            input,
            dialect,
            validate,
        } => {
            init_tracing("warn", cli_format.unwrap_or_default(), cli.verbose);
            return cmd::cmd_parse(input, dialect.as_deref(), *validate);
        }
        Commands::Sign { secret, input } => {
            init_tracing("warn", cli_format.unwrap_or_default(), cli.verbose);
            return cmd::cmd_sign(secret, input);
        }
        _ => {}
    }

    let config = Config::load_layered(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(
        &config.logging.level,
        cli_format.unwrap_or(config.logging.format),
        cli.verbose,
    );

    match &cli.command {
        Commands::Serve { host, port } => {
            cmd::cmd_serve(config, host.clone(), *port).await?;
        }
        Commands::Process {
            repo,
            issue,
            dry_run,
        } => {
            cmd::cmd_process(&config, repo.as_deref(), *issue, *dry_run).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Parse { .. } | Commands::Sign { .. } => unreachable!("handled above"),
    }

    Ok(())
}
