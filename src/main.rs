//! patchctl CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "patchctl")]
#[command(about = "Remote control server for live patch graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "7400")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory for checkpoints and other server state
        #[arg(long, default_value = ".")]
        state_dir: PathBuf,

        /// Require this token on every command
        #[arg(long)]
        token: Option<String>,
    },
    /// Load a snapshot file and report signal-safety findings
    Check {
        /// Path to a snapshot JSON file
        snapshot: PathBuf,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("patchctl={}", log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { port, host, state_dir, token } => {
            commands::serve(host, port, state_dir, token).await
        }
        Commands::Check { snapshot } => {
            commands::check(snapshot)
        }
        Commands::Version => {
            println!("patchctl v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
