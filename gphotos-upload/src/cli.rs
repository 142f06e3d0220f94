/// # gphotos-upload CLI Interface (Module)
///
/// Command parsing and the glue between flags, config, credentials and the
/// pipeline in [`gphotos_upload_core`]. No pipeline logic lives here.
///
/// - [`Cli`] defines the user-facing options.
/// - [`run`] is the async entrypoint used by `main()` and by integration tests.
use crate::credentials::Credentials;
use crate::load_config::{load_config, CliConfig};
use crate::upload::PhotosClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gphotos_upload_core::{CancellationToken, StdoutReporter, UploadPipeline};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for gphotos-upload: upload local photos into a Google Photos library.
#[derive(Parser)]
#[clap(
    name = "gphotos-upload",
    version,
    about = "Upload photos to a Google Photos library in concurrent, batched passes"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload the given files and add them to the library
    Upload {
        /// Path to an optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// JSON file holding an OAuth access token (defaults to GPHOTOS_ACCESS_TOKEN)
        #[clap(long)]
        token_file: Option<PathBuf>,
        /// Number of files uploaded concurrently (overrides the config file)
        #[clap(long)]
        upload_concurrency: Option<usize>,
        /// Files to upload
        files: Vec<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Upload {
            config,
            token_file,
            upload_concurrency,
            files,
        } => {
            if upload_concurrency == Some(0) {
                anyhow::bail!("upload-concurrency must be greater than 0");
            }

            let mut config = match config {
                Some(path) => load_config(path)?,
                None => CliConfig::from_env(),
            };
            if let Some(concurrency) = upload_concurrency {
                config.pipeline.concurrency = concurrency;
            }

            let token_file = token_file.or_else(|| config.api.token_file.clone());
            let credentials =
                Credentials::resolve(token_file.as_deref()).context("failed to load credentials")?;
            let client = Arc::new(
                PhotosClient::new(config.api.base_url.clone(), credentials)
                    .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?,
            );

            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            tracing::info!(command = "upload", files = files.len(), "Starting upload");
            let pipeline = UploadPipeline::new(client.clone(), client, config.pipeline)
                .with_cancellation(cancel);

            let summary = pipeline
                .run(files, StdoutReporter)
                .await
                .context("failed to upload photos")?;

            tracing::info!(command = "upload", ?summary, "Upload complete");
            Ok(())
        }
    }
}

/// Cancel `cancel` on Ctrl-C so in-flight uploads stop promptly.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(message = "Signal received.", signal = "SIGINT");
            cancel.cancel();
        }
    });
}
