//! # Provkernel CLI Module
//!
//! ## Available Commands
//!
//! - `start` - Run the kernel and its servers (default)
//! - `control` - Send one control command to a running kernel
//! - `query` - Send one query to a running kernel
//! - `check-config` - Print the effective configuration

mod commands;

use clap::{Parser, Subcommand};
use provkernel::{KernelConfig, ServerError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Provkernel - provenance collection kernel
///
/// Buffers provenance from reporters, filters it, commits it to storages
/// and answers queries over mutually authenticated TLS.
#[derive(Parser, Debug)]
#[command(name = "provkernel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: <root>/cfg/provkernel.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Installation root; overrides `root` in the configuration file
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Serve and connect over plain TCP
    #[arg(long, global = true)]
    pub no_tls: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn is_start(&self) -> bool {
        matches!(self.command, None | Some(Commands::Start))
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the kernel until SIGINT or SIGTERM
    Start,

    /// Send one control command, e.g. `control list all`
    Control {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Send one query, e.g. `query getLineage(<hash>, 2, ancestors)`
    Query {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },

    /// Print the effective configuration as JSON
    CheckConfig,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and loaded configuration.
pub async fn execute(cli: Cli, mut config: KernelConfig) -> Result<(), ServerError> {
    if cli.no_tls {
        config.tls.enabled = false;
    }

    match cli.command {
        Some(Commands::Start) | None => cmd_start(config).await,
        Some(Commands::Control { command }) => cmd_control(&config, &command.join(" ")).await,
        Some(Commands::Query { query }) => cmd_query(&config, &query.join(" ")).await,
        Some(Commands::CheckConfig) => cmd_check_config(&config),
    }
}
