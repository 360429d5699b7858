mod cli;

use segmenter::{
    config, playlist::PlaylistBuilder, scheduler, server, storage::BackendRegistry,
    store::{MemorySessionStore, SessionLocks, SessionStore},
    transcoder::TranscoderManager,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use std::time::Duration;

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting segmenter server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let locks = Arc::new(SessionLocks::new());

    let registry = Arc::new(BackendRegistry::from_config(&config)?);
    if registry.is_empty() {
        anyhow::bail!("No storage backend is enabled");
    }

    let transcoder = Arc::new(TranscoderManager::new(
        config.transcoder.ffmpeg.clone(),
        config.stream.segment_duration_secs,
        store.clone(),
    ));

    let playlist = Arc::new(PlaylistBuilder::new(
        store.clone(),
        registry.clone(),
        locks.clone(),
        config.stream.segment_duration_secs,
        config.stream.max_segments_in_playlist,
    ));

    let orchestrator = segmenter::orchestrator::StreamOrchestrator::new(
        config.stream.clone(),
        store.clone(),
        registry,
        transcoder,
        playlist.clone(),
        locks,
    );

    let scheduler_handle = if config.scheduler.enabled {
        Some(scheduler::start_scheduler_task(
            orchestrator.clone(),
            store.clone(),
            Duration::from_secs(config.scheduler.poll_interval_secs),
        ))
    } else {
        None
    };

    let ctx = server::AppContext {
        orchestrator: orchestrator.clone(),
        playlist,
        config: Arc::new(config),
    };
    let server_result = server::start_server(ctx).await;

    // Cleanup: stop accepting work, drain briefly, then let the runtime
    // cancel stragglers.
    tracing::info!("Shutting down...");
    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    orchestrator.shutdown(Duration::from_secs(10)).await;

    server_result
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let mut all_found = true;
    for (name, configured) in [
        ("ffmpeg", &config.transcoder.ffmpeg),
        ("ffprobe", &config.transcoder.ffprobe),
    ] {
        match which::which(configured) {
            Ok(resolved) => println!("{name}: {}", resolved.display()),
            Err(_) => {
                println!("{name}: NOT FOUND ({configured})");
                all_found = false;
            }
        }
    }

    if !all_found {
        anyhow::bail!("Missing required external tools");
    }
    Ok(())
}

fn validate_config(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    config::validate_config(&config)?;
    println!("Configuration is valid");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on the
    // verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "segmenter=trace,tower_http=debug".to_string()
        } else {
            "segmenter=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("segmenter {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
