use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;

use rollcall_server::clock::{Clock, SystemClock};
use rollcall_server::config::Config;
use rollcall_server::store::{MemoryStore, PgStore, Store};
use rollcall_server::{app, spawn_session_purger, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::load()?;
    log::debug!("Loaded {:?}", config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("Could not connect to the database")?;
            store.migrate().await.context("Could not prepare the schema")?;
            prepare(Arc::new(store), clock, &config).await?
        }
        None => {
            log::warn!("DATABASE_URL not set, attendance data will only live in memory");
            prepare(Arc::new(MemoryStore::new()), clock, &config).await?
        }
    };

    if config.purge_minutes > 0 {
        spawn_session_purger(
            state.sessions.clone(),
            Duration::from_secs(config.purge_minutes * 60),
        );
    }

    log::info!("Starting Rollcall HTTP Server on http://{}", config.addr);
    axum::Server::bind(&config.addr)
        .serve(app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Server stopped");
    Ok(())
}

async fn prepare<S>(store: Arc<S>, clock: Arc<dyn Clock>, config: &Config) -> anyhow::Result<AppState>
where
    S: Store + 'static,
{
    let state = AppState::new(store, clock, config);
    if state.credentials.ensure_admin(&config.admin_password).await? {
        log::info!("Seeded default admin account");
    }
    Ok(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    log::info!("Received Ctrl+C, shutting down");
}
