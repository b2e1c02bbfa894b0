use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipstore::{
    AspectClassifier, AssetRepository, Config, FfmpegTools, InMemoryAssetRepository, Locator,
    MediaAsset, ObjectStore, RetryingObjectStore, S3ObjectStore, UploadRequest, UrlSigner,
    VideoPipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "Video upload processing and storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a local file through the full upload pipeline
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "video/mp4")]
        content_type: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Issue a presigned URL for a stored `bucket,key` locator
    Sign {
        locator: String,
        /// Defaults to s3.presigned_url_expiry_secs
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Print the aspect classification of a local file
    Probe { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting clipstore");

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Upload {
            file,
            content_type,
            title,
        } => upload(&config, file, content_type, title, &cancel).await,
        Commands::Sign { locator, ttl_secs } => sign(&config, &locator, ttl_secs).await,
        Commands::Probe { file } => probe(&config, file, &cancel).await,
    }
}

async fn upload(
    config: &Config,
    file: PathBuf,
    content_type: String,
    title: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let store = object_store(config).await;
    let assets = Arc::new(InMemoryAssetRepository::new());

    let user_id = Uuid::new_v4();
    let title = title.unwrap_or_else(|| {
        file.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string())
    });
    let asset = assets
        .create_asset(MediaAsset::new(user_id, title))
        .await
        .context("Failed to register asset")?;

    let reader = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let pipeline = VideoPipeline::new(config, media_tools(config), store, assets);
    let stored = pipeline
        .upload_video(
            UploadRequest {
                asset_id: asset.id,
                user_id,
                content_type,
                reader,
            },
            cancel,
        )
        .await
        .context("Upload failed")?;

    info!(asset_id = %stored.id, "Upload complete");
    println!("{}", serde_json::to_string_pretty(&stored)?);
    Ok(())
}

async fn sign(config: &Config, raw: &str, ttl_secs: Option<u64>) -> Result<()> {
    let locator = Locator::decode(raw).context("Invalid locator")?;
    let ttl = ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.presigned_url_expiry());

    let signer = UrlSigner::new(object_store(config).await, ttl);
    let signed = signer
        .sign(&locator, ttl)
        .await
        .context("Failed to presign locator")?;

    println!("{}", serde_json::to_string_pretty(&signed)?);
    Ok(())
}

async fn probe(config: &Config, file: PathBuf, cancel: &CancellationToken) -> Result<()> {
    let classifier = AspectClassifier::new(media_tools(config), config.classification);
    let classification = classifier
        .classify(&file, cancel)
        .await
        .with_context(|| format!("Failed to classify {}", file.display()))?;

    println!("{classification}");
    Ok(())
}

async fn object_store(config: &Config) -> Arc<dyn ObjectStore> {
    let s3 = S3ObjectStore::new(&config.s3).await;
    Arc::new(RetryingObjectStore::new(s3, config.retry.clone()))
}

fn media_tools(config: &Config) -> Arc<FfmpegTools> {
    Arc::new(FfmpegTools::new(
        config.media.ffprobe_path.clone(),
        config.media.ffmpeg_path.clone(),
        config.tool_timeout(),
    ))
}

/// Initialize tracing/logging. Logs go to stderr so command output stays parseable.
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Cancel in-flight tool invocations on Ctrl+C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}
