//! Synchronization engine entrypoint wiring the store client, push link, and
//! console logging together.

use std::{env, sync::Arc};

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use screener_sync::{
    config::SyncConfig,
    link::sse::SseLink,
    services::screener::ScreenerEngine,
    state::{
        hub::ChangeEvent,
        studio::{ClientScope, StudioId},
    },
    store::http::{HttpStateStore, StoreConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::load();
    let scope = scope_from_env()?;
    info!(?scope, "starting synchronization engine");

    let store_config = StoreConfig::from_env().context("reading store configuration")?;
    let store = HttpStateStore::new(store_config.clone()).context("building store client")?;
    let link = SseLink::new(store_config).context("building push link")?;

    let engine = ScreenerEngine::start(config, scope, Arc::new(store), Arc::new(link));

    let mut changes = engine.subscribe_changes();
    let mut degraded = engine.degraded_watcher();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = degraded.changed() => {
                if changed.is_err() {
                    break;
                }
                if *degraded.borrow() {
                    warn!("push channel down, running on polling only");
                } else {
                    info!("push channel up");
                }
            }
            event = changes.recv() => match event {
                Ok(ChangeEvent::Buzzer { studio, direction, active }) => {
                    info!(%studio, ?direction, active, "buzzer");
                }
                Ok(ChangeEvent::Line { snapshot, kind }) => {
                    info!(
                        studio = %snapshot.studio,
                        line = snapshot.line,
                        status = ?snapshot.status,
                        ?kind,
                        "line"
                    );
                }
                Ok(ChangeEvent::ChatMessage { message }) => {
                    info!(studio = %message.studio, role = ?message.sender_role, "chat message");
                }
                Ok(ChangeEvent::ChatCleared { studio }) => {
                    info!(%studio, "chat cleared");
                }
                Ok(ChangeEvent::ChatReplaced { studio }) => {
                    info!(%studio, "chat history replaced");
                }
                Err(err) => {
                    warn!(error = %err, "change stream lagged");
                }
            },
        }
    }

    info!("shutting down");
    engine.shutdown();
    Ok(())
}

/// Resolve the client scope from `ROLE` (and `TALENT_STUDIO` for talent).
fn scope_from_env() -> anyhow::Result<ClientScope> {
    match env::var("ROLE").as_deref() {
        Err(_) | Ok("producer") => Ok(ClientScope::Producer),
        Ok("talent") => {
            let studio = env::var("TALENT_STUDIO")
                .context("TALENT_STUDIO is required when ROLE=talent")?;
            Ok(ClientScope::Talent(StudioId::from(studio.as_str())))
        }
        Ok(other) => anyhow::bail!("unknown ROLE `{other}` (expected producer or talent)"),
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
