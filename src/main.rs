//! `ldap-resilience` command line.
//!
//! Checks resilience configuration files before they are deployed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ldap_resilience::config::{load_config, ConfigError, ResilienceConfig};
use ldap_resilience::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "ldap-resilience")]
#[command(about = "Configuration tool for the LDAP connection resilience layer", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file, then print the resolved settings
    Check {
        /// Path to the TOML configuration file.
        config: PathBuf,

        /// Print the resolved settings as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the default configuration as TOML
    Defaults,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Check { config, json } => match load_config(&config) {
            Ok(resolved) => {
                tracing::debug!(path = %config.display(), "Configuration valid");
                print_config(&resolved, json)
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("{}: invalid configuration", config.display());
                for error in errors {
                    eprintln!("  - {}", error);
                }
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("{}: {}", config.display(), e);
                ExitCode::FAILURE
            }
        },
        Commands::Defaults => print_config(&ResilienceConfig::default(), false),
    }
}

fn print_config(config: &ResilienceConfig, json: bool) -> ExitCode {
    let rendered = if json {
        serde_json::to_string_pretty(config).map_err(|e| e.to_string())
    } else {
        toml::to_string_pretty(config).map_err(|e| e.to_string())
    };

    match rendered {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: failed to render configuration: {}", e);
            ExitCode::FAILURE
        }
    }
}
