//! Cradle CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cradle::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();
    let debug = cli.debug;

    if let Err(report) = init(debug) {
        eprintln!("error: {report:#}");
        return ExitCode::FAILURE;
    }

    // Execute command
    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            if debug {
                eprintln!("error: {report:?}");
            } else {
                eprintln!("error: {report:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init(debug: bool) -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize tracing; stdout is reserved for `state` output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(env_filter(debug))
        .init();
    Ok(())
}

/// `RUST_LOG` when set, else `cradle` at info or debug level.
fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "cradle=debug" } else { "cradle=info" })
    })
}
