//! sonic-infer - Audio inference microservice
//!
//! Accepts audio in common consumer formats over HTTP, converts it to a
//! log-mel spectrogram and scores it with a resident model.
//!
//! Subcommands:
//! - `serve` (default): load the model, then listen
//! - `check`: load and validate configuration and model, then exit
//! - `probe <FILE>`: decode a local file and print what was found

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sonic_common::config::{resolve_config_path, ServiceConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sonic_infer::decoder::{build_decoder, decode_limit, ContainerHint, RawAudioPayload};
use sonic_infer::{AppState, InferencePipeline};

/// Command-line arguments for sonic-infer
#[derive(Parser, Debug)]
#[command(name = "sonic-infer")]
#[command(about = "Audio inference service")]
#[command(version)]
struct Args {
    /// Configuration file (overrides SONIC_CONFIG and the platform default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "SONIC_BIND", global = true)]
    bind: Option<SocketAddr>,

    /// Model artifact path
    #[arg(long, env = "SONIC_MODEL_PATH", global = true)]
    model: Option<PathBuf>,

    /// ffmpeg executable used for formats the built-in decoder lacks
    #[arg(long, env = "SONIC_FFMPEG", global = true)]
    ffmpeg: Option<PathBuf>,

    /// Disable the ffmpeg fallback entirely
    #[arg(long, global = true, conflicts_with = "ffmpeg")]
    no_ffmpeg: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Load and validate configuration and model, then exit
    Check,
    /// Decode a local audio file and print its properties
    Probe {
        /// Audio file to decode
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sonic_infer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        revision = env!("SONIC_GIT_REVISION"),
        profile,
        "Starting sonic-infer"
    );

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check => check(&config),
        Command::Probe { file } => probe(&config, file).await,
    }
}

/// Resolve the file, apply CLI/env overrides, validate
fn load_config(args: &Args) -> Result<ServiceConfig> {
    info!("Configuration source: {:?}", resolve_config_path(args.config.as_deref()));

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(model) = &args.model {
        config.model.path = model.clone();
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        config.decoder.ffmpeg_path = Some(ffmpeg.clone());
    }
    if args.no_ffmpeg {
        config.decoder.ffmpeg_path = None;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn serve(config: ServiceConfig) -> Result<()> {
    // The model must be resident before the listener exists
    let pipeline = InferencePipeline::from_config(&config).with_context(|| {
        format!("Failed to load model from {}", config.model.path.display())
    })?;
    info!(
        model = pipeline.model().name(),
        input_shape = ?pipeline.model().input_shape(),
        labels = pipeline.model().labels().len(),
        "Inference pipeline ready"
    );

    let state = AppState::new(Arc::new(pipeline));
    let app = sonic_infer::build_router(state, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn check(config: &ServiceConfig) -> Result<()> {
    let pipeline = InferencePipeline::from_config(config).with_context(|| {
        format!("Model check failed for {}", config.model.path.display())
    })?;
    let model = pipeline.model();

    println!("model:        {}", model.name());
    if let Some(description) = model.description() {
        println!("description:  {}", description);
    }
    println!("task:         {:?}", model.task());
    println!("input shape:  {:?}", model.input_shape());
    println!("labels:       {}", model.labels().len());
    println!("parameters:   {}", model.parameter_count());
    println!("sample rate:  {} Hz", pipeline.extractor().sample_rate());
    println!("decoder:      {}", pipeline.decoder().name());
    println!("OK");
    Ok(())
}

async fn probe(config: &ServiceConfig, file: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let hint = ContainerHint::from_filename(file.to_string_lossy());
    let payload = RawAudioPayload::new(bytes, hint);

    let decoder = build_decoder(
        &config.audio,
        &config.decoder,
        decode_limit(config.features.chunk_seconds),
    );
    let decoded = decoder
        .decode(&payload)
        .await
        .with_context(|| format!("Failed to decode {}", file.display()))?;

    let source = &decoded.source;
    let unknown = || "unknown".to_string();
    println!("file:             {}", file.display());
    println!("backend:          {}", source.backend);
    println!("container:        {}", source.container.clone().unwrap_or_else(unknown));
    println!("codec:            {}", source.codec.clone().unwrap_or_else(unknown));
    println!(
        "native rate:      {}",
        source.native_sample_rate.map(|r| format!("{} Hz", r)).unwrap_or_else(unknown)
    );
    println!(
        "native channels:  {}",
        source.native_channels.map(|c| c.to_string()).unwrap_or_else(unknown)
    );
    println!(
        "decoded:          {} Hz {}, {} frames",
        decoded.waveform.sample_rate(),
        decoded.waveform.layout(),
        decoded.waveform.frames()
    );
    println!(
        "duration:         {:.3} s{}",
        decoded.waveform.duration_seconds(),
        if source.truncated { " (stopped at decode limit)" } else { "" }
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
