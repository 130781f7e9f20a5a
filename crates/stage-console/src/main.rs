mod app;
mod connection;
mod http;
mod theme;
mod toast;

use std::time::Duration;

use stage_core::{CoreBroadcast, CoreEvent, CoreSettings, SessionCore};
use stage_proto::config::{Config, SetlistConfig};
use stage_proto::protocol::ClientCommand;
use stage_proto::setlist::load_setlist;
use tokio::sync::{broadcast, mpsc};

use crate::connection::Backoff;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = stage_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = stage_proto::platform::log_path();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,stage_core=debug,stage_console=debug,hyper_util=warn,reqwest=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("stagehand log: {}", log_path.display());

    tracing::info!("stagehand starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    // ── Broadcast channel (SessionCore → UI) ────────────────────────────────
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<CoreBroadcast>(1024);

    // ── CoreEvent channel (connection/UI/HTTP → SessionCore) ────────────────
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(1024);

    // ── Outbound commands (SessionCore → connection) ────────────────────────
    let (command_tx, command_rx) = mpsc::channel::<ClientCommand>(256);

    // ── Build SessionCore ────────────────────────────────────────────────────
    let settings = CoreSettings::from_config(&config);
    let event_id = settings.event_id.clone();
    let session_core = SessionCore::new(settings, command_tx, broadcast_tx.clone());
    let view_store = session_core.view_store();

    // ── Session server link ──────────────────────────────────────────────────
    let link_handle = connection::start_connection(
        config.connection.address.clone(),
        Backoff::new(
            Duration::from_millis(config.connection.reconnect_min_ms),
            Duration::from_millis(config.connection.reconnect_max_ms),
        ),
        event_tx.clone(),
        command_rx,
    );

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            view_store.clone(),
            event_tx.clone(),
        );
    }

    // ── Fallback setlist, reloaded whenever another event is selected ───────
    spawn_setlist_loader(
        config.setlist.clone(),
        event_id,
        broadcast_tx.subscribe(),
        event_tx.clone(),
    );

    // ── Spawn SessionCore event loop ─────────────────────────────────────────
    let core_handle = tokio::spawn(async move {
        if let Err(e) = session_core.run(event_rx).await {
            tracing::error!("SessionCore exited with error: {}", e);
        }
    });

    // ── Run UI ───────────────────────────────────────────────────────────────
    let app = app::App::new(view_store, event_tx.clone());
    let result = app.run(broadcast_rx).await;

    // The session keeps running on the server; only pending edits go out.
    let _ = event_tx.send(CoreEvent::Shutdown).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        let _ = core_handle.await;
        let _ = link_handle.await;
    })
    .await;

    result
}

fn spawn_setlist_loader(
    config: SetlistConfig,
    initial: Option<String>,
    mut broadcast_rx: broadcast::Receiver<CoreBroadcast>,
    event_tx: mpsc::Sender<CoreEvent>,
) {
    tokio::spawn(async move {
        if let Some(event_id) = initial {
            load_fallback(&config, event_id, &event_tx).await;
        }
        loop {
            match broadcast_rx.recv().await {
                Ok(CoreBroadcast::SetlistWanted(event_id)) => {
                    load_fallback(&config, event_id, &event_tx).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("setlist loader lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn load_fallback(config: &SetlistConfig, event_id: String, event_tx: &mpsc::Sender<CoreEvent>) {
    let source = config.source_for(&event_id);
    match load_setlist(&source).await {
        Ok(snapshot) => {
            tracing::info!("Loaded {} setlist item(s) from {}", snapshot.len(), source);
            let _ = event_tx
                .send(CoreEvent::SetlistLoaded { event_id, snapshot })
                .await;
        }
        Err(e) => tracing::warn!("No fallback setlist for {} from {}: {}", event_id, source, e),
    }
}
