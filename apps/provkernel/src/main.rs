//! # Provkernel - Provenance Collection Daemon
//!
//! The main binary around the provkernel-core kernel.
//!
//! This application provides:
//! - Control, query, remote query and remote sketch servers (tokio)
//! - Mutually authenticated TLS on every listener (rustls)
//! - One-shot control and query clients
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    apps/provkernel (THE BINARY)                 │
//! │                                                                 │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌──────────────┐   │
//! │  │   CLI       │    │  4 TLS listeners │    │  Lifecycle   │   │
//! │  │  (clap)     │    │  (tokio-rustls)  │    │ (PID, signal)│   │
//! │  └──────┬──────┘    └────────┬─────────┘    └──────┬───────┘   │
//! │         │                    │                     │           │
//! │         └────────────────────┼─────────────────────┘           │
//! │                              ▼                                 │
//! │                    ┌──────────────────┐                        │
//! │                    │ provkernel-core  │                        │
//! │                    │ (dispatch thread)│                        │
//! │                    └──────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the kernel
//! provkernel --root /opt/provkernel start
//!
//! # Talk to a running kernel
//! provkernel control add storage Memory
//! provkernel query 'getVertices(type=Process)'
//! ```

mod cli;

use clap::Parser;
use provkernel::KernelConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let config = match KernelConfig::load(cli.config.as_deref(), cli.root.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // PROVKERNEL_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("PROVKERNEL_LOG_FORMAT")
        .ok()
        .or_else(|| config.log.format.clone())
        .unwrap_or_else(|| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_directives().into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && cli.is_start() {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ┌─┐┬─┐┌─┐┬  ┬┬┌─┌─┐┬─┐┌┐┌┌─┐┬
  ├─┘├┬┘│ │└┐┌┘├┴┐├┤ ├┬┘│││├┤ │
  ┴  ┴└─└─┘ └┘ ┴ ┴└─┘┴└─┘└┘└─┘┴─┘

  Provenance Kernel v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
