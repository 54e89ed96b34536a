//! Logging initialization

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::{Args, LogFormat};

/// Initialize logging based on CLI arguments
pub fn init(args: &Args) -> Result<()> {
    let level = if args.quiet {
        Level::ERROR
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // RUST_LOG still wins for individual targets
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let file = match &args.log_file {
        Some(path) => Some(Arc::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?,
        )),
        None => None,
    };

    match args.log_format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(args.debug));

            if let Some(file) = file {
                subscriber
                    .with(fmt::layer().with_ansi(false).with_writer(file))
                    .init();
            } else {
                subscriber.init();
            }
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json());

            if let Some(file) = file {
                subscriber
                    .with(fmt::layer().json().with_writer(file))
                    .init();
            } else {
                subscriber.init();
            }
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact());

            if let Some(file) = file {
                subscriber
                    .with(fmt::layer().compact().with_ansi(false).with_writer(file))
                    .init();
            } else {
                subscriber.init();
            }
        }
    }

    Ok(())
}
