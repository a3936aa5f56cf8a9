use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use blobs::FileStore;
use clap::{Parser, Subcommand};
use reelconf::TabreelConfig;
use reelproto::SessionId;
use tokio_util::sync::CancellationToken;

use tabreel::recorder::Recorder;
use tabreel::router::Router;
use tabreel::settings::RecordingSettings;
use tabreel::sync::SystemClock;
use tabreel::{archive, telemetry, web};

/// Browser tab recording session service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./tabreel.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the session router and the HTTP/WebSocket server
    Serve {
        /// Override bind.http_addr
        #[arg(long)]
        http_addr: Option<String>,
    },

    /// Print a recorded session as one JSON document
    Export {
        #[arg(long)]
        session: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = TabreelConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Config => {
            for file in &sources.files {
                println!("# loaded {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# override {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Command::Export { session } => export(&config, SessionId::from(session)).await,
        Command::Serve { http_addr } => {
            telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;
            let result = serve(&config, http_addr).await;
            telemetry::shutdown();
            result
        }
    }
}

async fn export(config: &TabreelConfig, session_id: SessionId) -> Result<()> {
    let store = FileStore::read_only_at(config.paths.store_path())
        .context("Failed to open blob store")?;
    let export = archive::export(&store, &session_id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&export).context("Failed to encode export")?
    );
    Ok(())
}

async fn serve(config: &TabreelConfig, http_addr: Option<String>) -> Result<()> {
    let store_path = config.paths.store_path();
    let store = FileStore::at_path(&store_path).context("Failed to open blob store")?;
    tracing::info!(path = %store_path.display(), "blob store ready");

    let recorder = Recorder::new(
        Arc::new(store),
        Arc::new(SystemClock),
        RecordingSettings::from(&config.recording),
        config.recording.broadcast_capacity,
    );

    let shutdown = CancellationToken::new();
    let (router, router_handle) = Router::new(recorder.clone(), config.recording.broadcast_capacity);
    let router_task = tokio::spawn(router.run(shutdown.clone()));

    let app = web::router(web::WebState {
        recorder: recorder.clone(),
        router: router_handle,
        started: Instant::now(),
    });

    let addr = http_addr.unwrap_or_else(|| config.bind.http_addr.clone());
    let bind_addr: std::net::SocketAddr = addr.parse().context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("listening on http://{}", bind_addr);
    tracing::info!("   WebSocket: ws://{}/ws", bind_addr);
    tracing::info!("   Health: GET http://{}/health", bind_addr);

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down gracefully...");
    shutdown.cancel();

    let _ = server_task.await;
    let _ = router_task.await;
    recorder.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
