#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::too_many_lines)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gemrelay::{channels, config, Config};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// `gemrelay` - relay Telegram chats to Google Gemini.
#[derive(Parser, Debug)]
#[command(name = "gemrelay")]
#[command(version)]
#[command(about = "Relay Telegram chats to Google Gemini with per-chat history.", long_about = None)]
struct Cli {
    /// Path to config.toml (overrides GEMRELAY_CONFIG and ~/.gemrelay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay (default when no subcommand is given)
    #[command(long_about = "\
Start the Telegram long-poll listener and relay messages to Gemini.

Credentials come from the environment, a .env file in the working \
directory, or config.toml. Press Ctrl-C to stop; in-flight messages \
are finished before exit.

Examples:
  gemrelay
  gemrelay start --config ./config.toml
  RUST_LOG=gemrelay=debug gemrelay start")]
    Start,

    /// Check credentials and connectivity to Telegram and Gemini
    Doctor,

    /// Manage configuration
    #[command(long_about = "\
Manage gemrelay configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  gemrelay config schema              # print JSON Schema to stdout
  gemrelay config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

fn init_tracing() -> Result<()> {
    // Respects RUST_LOG, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Start);

    // Schema output must stay stdout-only, so it skips .env, config and logging.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = command
    {
        println!("{}", config::schema_json()?);
        return Ok(());
    }

    if let Some(path) = &cli.config {
        if path.as_os_str().is_empty() {
            bail!("--config cannot be empty");
        }
    }

    // A missing .env file is fine; the environment may already be populated.
    let dotenv = dotenvy::dotenv();

    init_tracing()?;

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to load .env: {e}"),
    }

    let config = Config::load(cli.config.as_deref()).await?;

    match command {
        Commands::Start => {
            let missing = config.missing_credentials();
            if !missing.is_empty() {
                eprintln!("Missing required environment variables:");
                for name in &missing {
                    eprintln!("  - {name}");
                }
                bail!("cannot start without {}", missing.join(", "));
            }
            channels::start_channels(config).await
        }
        Commands::Doctor => channels::doctor_channels(config).await,
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_defaults_to_start() {
        let cli = Cli::try_parse_from(["gemrelay"]).expect("bare invocation should parse");
        assert!(cli.command.is_none());
        assert!(matches!(
            cli.command.unwrap_or(Commands::Start),
            Commands::Start
        ));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["gemrelay", "doctor", "--config", "/tmp/relay.toml"])
            .expect("doctor with --config should parse");
        assert!(matches!(cli.command, Some(Commands::Doctor)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/relay.toml")));
    }

    #[test]
    fn config_schema_subcommand_parses() {
        let cli = Cli::try_parse_from(["gemrelay", "config", "schema"])
            .expect("config schema should parse");
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                config_command: ConfigCommands::Schema
            })
        ));
    }
}
