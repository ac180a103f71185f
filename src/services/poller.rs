//! Fixed-interval polling fallback against the State Store.

use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;

use crate::{
    services::reconciler::{Reconciler, SyncEvent},
    state::{SharedState, epoch_ms, studio::BuzzerDirection},
    store::StateStore,
};

/// Handle to the background poll loop.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the loop.
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Spawn the poll loop for the session.
///
/// The poller runs for the whole session regardless of push-channel health:
/// it is the safety net that bounds staleness to one interval when push
/// delivery silently fails, and the reconciler makes the resulting duplicate
/// observations free.
pub fn spawn(
    state: SharedState,
    reconciler: Arc<Reconciler>,
    store: Arc<dyn StateStore>,
) -> PollerHandle {
    let task = tokio::spawn(run_poll_loop(state, reconciler, store));
    PollerHandle { task }
}

async fn run_poll_loop(
    state: SharedState,
    reconciler: Arc<Reconciler>,
    store: Arc<dyn StateStore>,
) {
    let mut ticker = interval(state.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        for studio in state.scoped_studios() {
            let chat_only = state
                .config()
                .studio(&studio)
                .map(|cfg| cfg.chat_only)
                .unwrap_or(true);
            if chat_only {
                continue;
            }

            for direction in BuzzerDirection::ALL {
                match store.fetch_buzzer(studio.clone(), direction).await {
                    Ok(signal) => {
                        // A stale active record (its owner vanished before
                        // deactivating) reads as inactive.
                        let active = signal.active && !signal.is_expired(epoch_ms());
                        reconciler
                            .apply(SyncEvent::Buzzer {
                                studio: studio.clone(),
                                direction,
                                active,
                            })
                            .await;
                    }
                    Err(err) => {
                        debug!(%studio, ?direction, error = %err, "buzzer poll failed");
                    }
                }
            }

            match store.fetch_lines(studio.clone()).await {
                Ok(lines) => {
                    for line in lines {
                        reconciler.apply(SyncEvent::Line(line)).await;
                    }
                }
                Err(err) => {
                    debug!(%studio, error = %err, "line poll failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SyncConfig,
        services::expiry::ExpiryScheduler,
        state::{
            AppState,
            call_line::{CallLine, LineStatus},
            hub::ChangeEvent,
            studio::{ClientScope, StudioId},
        },
        store::memory::MemoryStateStore,
    };
    use std::time::Duration;

    fn engine_parts() -> (SharedState, Arc<Reconciler>, MemoryStateStore) {
        let state = AppState::new(SyncConfig::default(), ClientScope::Producer);
        let store = MemoryStateStore::new();
        let expiry = Arc::new(ExpiryScheduler::new(
            state.clone(),
            Arc::new(store.clone()),
        ));
        let reconciler = Arc::new(Reconciler::new(state.clone(), expiry));
        (state, reconciler, store)
    }

    #[tokio::test(start_paused = true)]
    async fn poll_converges_on_remote_line_write() {
        let (state, reconciler, store) = engine_parts();
        let studio = StudioId::from("studio-1");

        // Another client wrote this snapshot directly to the store.
        let mut remote = CallLine::inactive(studio.clone(), 2);
        remote.status = LineStatus::Active;
        remote.phone_number = "+15550123".into();
        remote.caller_name = "Alex".into();
        remote.start_time = Some(1_000);
        remote.updated_at = epoch_ms() + 1;
        store.seed_line(remote.clone());

        let mut changes = state.hub().subscribe();
        let poller = spawn(state.clone(), reconciler, Arc::new(store));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        poller.stop();

        let local = state.line_snapshot(&studio, 2).await.unwrap();
        assert_eq!(local.status, LineStatus::Active);
        assert_eq!(local.caller_name, "Alex");

        // Exactly one notification despite several elapsed ticks.
        let mut line_events = 0;
        while let Ok(event) = changes.try_recv() {
            if matches!(event, ChangeEvent::Line { .. }) {
                line_events += 1;
            }
        }
        assert_eq!(line_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_treats_expired_store_record_as_inactive() {
        let (state, reconciler, store) = engine_parts();
        let studio = StudioId::from("studio-1");
        let direction = BuzzerDirection::ProducerToTalent;

        // Locally active, but the store record expired long ago.
        state.apply_buzzer(&studio, direction, true, 10_000);
        store
            .write_buzzer(studio.clone(), direction, true)
            .await
            .unwrap();
        store.expire_buzzer(&studio, direction);

        let poller = spawn(state.clone(), reconciler, Arc::new(store));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        poller.stop();

        assert!(!state.buzzer(&studio, direction).unwrap().active);
    }
}
