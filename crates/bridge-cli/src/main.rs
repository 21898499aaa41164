//! Process entry point for the approval bridge.
//!
//! Parses `--config`, loads the YAML document, and hands off to
//! `bridge_server::run`. All policy, HTTP, and supervision logic lives in
//! `bridge-server` — this binary only owns argument parsing and the exit
//! code.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use bridge_server::Config;

#[derive(Parser)]
#[command(
    name = "approval-bridge",
    version,
    about = "Bridges forge deployment-protection webhooks to an access-request review flow"
)]
struct Cli {
    /// Path to the YAML configuration document.
    #[arg(short, long, env = "PAS_CONFIG_FILE", default_value = bridge_server::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bridge_server::run(config).await {
        error!(error = %e, "approval bridge exited with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
