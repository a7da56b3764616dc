//! apt-s3 -- APT transport method for `s3://` repositories.
//!
//! Install as `/usr/lib/apt/methods/s3`. APT writes requests to stdin and
//! reads responses from stdout, so all logging goes to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use apt_s3::config::{self, Config, LoggingConfig};
use apt_s3::storage::aws::AwsBackendProvider;
use apt_s3::Method;

/// Command-line arguments for the S3 method.
#[derive(Parser, Debug)]
#[command(
    name = "apt-s3",
    version,
    about = "APT transport method for Amazon S3"
)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&config.logging, cli.log_level.as_deref());

    let backend = Arc::new(AwsBackendProvider::new(&config.storage));
    let method = Method::new(backend, tokio::io::stdout());

    if let Err(err) = method.run(tokio::io::stdin()).await {
        // A non-zero exit fails every item APT still has queued.
        error!("Exiting after fatal error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
