// Guildhall server entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config (writing defaults on first run)
// 3. Open database
// 4. Spawn WebSocket server task
// 5. Spawn session cleanup task
// 6. Serve HTTP until Ctrl+C or SIGTERM

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use guildhall_core::config;
use guildhall_core::db::{blocking, Database};
use guildhall_core::ws_server::{self, WsContext};
use guildhall_server::{build_router, shutdown_signal, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Guildhall starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: http={}:{}, ws port {}, public url {}",
        config.server.host, config.server.http_port, config.server.ws_port, config.server.public_url
    );

    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    let ws_ctx = WsContext {
        db: Arc::clone(&db),
        max_message_length: config.chat.max_message_length,
    };
    let ws_host = config.server.host.clone();
    let ws_port = config.server.ws_port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(&ws_host, ws_port, ws_ctx).await {
            error!("WebSocket server error: {e:#}");
        }
    });

    let purge_db = Arc::clone(&db);
    let purge_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match blocking(&purge_db, |db| db.purge_expired_sessions()).await {
                Ok(0) => {}
                Ok(n) => info!("Purged {n} expired sessions"),
                Err(e) => error!("Session purge failed: {e}"),
            }
        }
    });

    let address = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("HTTP server listening on {address}");

    let app = build_router(AppState::new(db, config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    ws_handle.abort();
    purge_handle.abort();
    info!("Guildhall shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("guildhall=info,guildhall_core=info,guildhall_server=info,tower_http=info,warn")),
        )
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
