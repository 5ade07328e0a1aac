//! Chunkdrop command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chunkdrop::{AppConfig, LocalTransport};
use chunkdrop_client::{UploadEvent, UploadSource, Uploader};
use chunkdrop_protocol::NetworkClass;
use chunkdrop_server::ChunkReceiver;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunkdrop")]
#[command(about = "Resumable chunked uploads into per-user storage")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "CHUNKDROP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files into a user's storage
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination folder relative to the user's root
        #[arg(long, default_value = "")]
        dest: String,

        /// Storage owner
        #[arg(long, env = "CHUNKDROP_USER", default_value = "default")]
        user: String,

        /// Link quality used to size chunks (overrides the config file)
        #[arg(long)]
        network: Option<NetworkClass>,
    },
    /// Print the bytes stored for a user
    Size {
        #[arg(long, env = "CHUNKDROP_USER", default_value = "default")]
        user: String,

        /// Measure only this folder
        #[arg(long)]
        folder: Option<String>,
    },
    /// Remove orphaned chunk parts older than the configured TTL
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkdrop=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(
        storage_root = %config.storage.storage_root.display(),
        "configuration ready"
    );

    match cli.command {
        Commands::Upload {
            files,
            dest,
            user,
            network,
        } => upload(config, files, &dest, &user, network).await,
        Commands::Size { user, folder } => size(config, &user, folder.as_deref()).await,
        Commands::Sweep => sweep(config).await,
    }
}

async fn upload(
    config: AppConfig,
    files: Vec<PathBuf>,
    dest: &str,
    user: &str,
    network: Option<NetworkClass>,
) -> Result<()> {
    let sources = files
        .iter()
        .map(|path| {
            UploadSource::from_path(path).with_context(|| format!("cannot read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let limits = config.batch_limits(network, &sources);

    let receiver = Arc::new(ChunkReceiver::new(config.storage.clone()));
    let transport = Arc::new(LocalTransport::new(receiver, user));
    let mut uploader = Uploader::new(transport, limits, config.upload.retry_policy());
    let mut events = uploader
        .take_events()
        .context("upload event stream already taken")?;

    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::Completed {
                    job_id,
                    destination,
                } => tracing::info!(job = %job_id, %destination, "uploaded"),
                UploadEvent::Failed {
                    job_id,
                    reason,
                    message,
                } => tracing::error!(job = %job_id, %reason, "upload failed: {message}"),
                UploadEvent::TotalSize { bytes } => tracing::info!(bytes, "storage used"),
                other => tracing::trace!(event = ?other, "upload event"),
            }
        }
    });

    let started = Instant::now();
    let ids = uploader.enqueue_all(sources, dest)?;
    tokio::select! {
        _ = uploader.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, canceling uploads");
            for id in &ids {
                let _ = uploader.cancel(id);
            }
            uploader.wait_idle().await;
        }
    }
    let elapsed = started.elapsed();

    let reports = uploader.reports();
    let snapshot = uploader.snapshot();
    drop(uploader);
    let _ = reporter.await;

    tracing::info!(
        files = ids.len(),
        done = snapshot.done,
        failed = snapshot.error,
        canceled = snapshot.canceled,
        elapsed_ms = elapsed.as_millis() as u64,
        "batch finished"
    );
    for report in &reports {
        match &report.failure {
            Some(failure) => println!(
                "{}\t{}\t{} ({})",
                report.status, report.destination, failure.message, failure.reason
            ),
            None => println!(
                "{}\t{}\t{} bytes",
                report.status, report.destination, report.bytes_done
            ),
        }
    }

    if snapshot.error > 0 || snapshot.canceled > 0 {
        bail!(
            "{} of {} uploads did not complete",
            snapshot.error + snapshot.canceled,
            ids.len()
        );
    }
    Ok(())
}

async fn size(config: AppConfig, user: &str, folder: Option<&str>) -> Result<()> {
    let receiver = ChunkReceiver::new(config.storage);
    let bytes = match folder {
        Some(folder) => receiver.folder_size(user, folder).await,
        None => receiver.total_size(user).await,
    }
    .context("size query failed")?;
    println!("{bytes}");
    Ok(())
}

async fn sweep(config: AppConfig) -> Result<()> {
    let receiver = ChunkReceiver::new(config.storage);
    let removed = receiver
        .sweep_stale_parts()
        .await
        .context("stale part sweep failed")?;
    println!("{removed} stale part(s) removed");
    Ok(())
}
