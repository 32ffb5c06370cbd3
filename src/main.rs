//! blocktimer - block-based timers served over HTTP
//!
//! This is the main entry point for the blocktimer application.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use blocktimer::{
    api::create_router,
    config::Config,
    runner::TimerRunner,
    services::{AudioBackend, AudioChannel, CommandPlayer, DesktopNotifier, Notifier, NullNotifier, NullPlayer},
    state::AppState,
    store::JsonFileStore,
    tasks::progress_log_task,
    utils::shutdown_signal,
};

/// Pick the audio backend, degrading to silence when the player is missing
async fn audio_backend(config: &Config) -> Arc<dyn AudioBackend> {
    if config.no_audio {
        info!("Audio disabled");
        return Arc::new(NullPlayer);
    }
    let Some(player) = CommandPlayer::from_command_line(&config.player) else {
        warn!("Empty player command, audio disabled");
        return Arc::new(NullPlayer);
    };
    match player.check_available().await {
        Ok(()) => Arc::new(player),
        Err(e) => {
            warn!("{}; sounds will be skipped", e);
            Arc::new(NullPlayer)
        }
    }
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    if config.no_notifications {
        info!("Notifications disabled");
        Arc::new(NullNotifier)
    } else {
        Arc::new(DesktopNotifier::new("blocktimer"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!("blocktimer={},tower_http=info", config.log_level()))
        .init();

    info!("Starting blocktimer server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: host={}, port={}, timers_file={}",
        config.host,
        config.port,
        config.timers_file.display()
    );

    let store = JsonFileStore::new(&config.timers_file);
    let timers = store.load_or_quarantine().await?;

    let audio = Arc::new(AudioChannel::new(audio_backend(&config).await));
    let runner = TimerRunner::new(audio, notifier(&config), config.default_sound.as_str());

    // Log run transitions in the background
    tokio::spawn(progress_log_task(runner.subscribe()));

    let state = Arc::new(AppState::new(
        config.port,
        config.host.clone(),
        runner,
        Some(store),
        timers,
    ));

    // Create HTTP router with all endpoints
    let app = create_router(Arc::clone(&state));

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  GET|POST          /timers");
    info!("  GET|PATCH|DELETE  /timers/:id");
    info!("  POST              /timers/:id/steps");
    info!("  PUT|DELETE        /timers/:id/steps/:step_id");
    info!("  POST              /timers/:id/steps/:step_id/{{move,duplicate}}");
    info!("  POST              /timers/:id/{{start,pause,restart,stop}}");
    info!("  GET               /timers/:id/run");
    info!("  POST              /timers/:id/{{mark,reset}}");
    info!("  PATCH|DELETE      /timers/:id/logs/:log_id");
    info!("  GET               /status, /health");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    state.runner.stop_all();
    if let Err(e) = state.persist().await {
        warn!("Timers were not saved on shutdown: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}
