//! Attendance Capture - face enrollment for the attendance platform.
//!
//! This is the library crate behind the `attendance-capture` binary. It owns
//! the camera, records fixed-length enrollment clips, validates uploaded
//! files and submits the result to the enrollment service.

pub mod acquisition;
pub mod api;
pub mod artifact;
pub mod capture;
pub mod commands;
pub mod config;
pub mod recorder;
pub mod session;
pub mod submission;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::Context;
use clap::Parser;
use commands::{Cli, CommandContext};
use config::PipelineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::error::ErrorResponse;

/// Run the command-line application
pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_capture=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting Attendance Capture v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(base_url) = cli.base_url.clone() {
        config.api.base_url = base_url;
    }

    let ctx = CommandContext::new(config, cli.token.clone()).context("Failed to set up the enrollment client")?;

    if let Err(error) = commands::dispatch(&ctx, cli.command).await {
        let response = ErrorResponse::from(error);
        eprintln!("{}", serde_json::to_string(&response)?);
        anyhow::bail!("{}: {}", response.code, response.message);
    }

    Ok(())
}
