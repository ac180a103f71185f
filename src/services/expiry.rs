//! Per-signal timers forcing buzzers back to their resting state.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::{
    state::{
        SharedState,
        hub::ChangeEvent,
        studio::{BuzzerDirection, StudioId},
    },
    store::StateStore,
};

/// Schedules a forced local deactivation for every buzzer activation,
/// independent of any server acknowledgment.
///
/// Whichever deactivation arrives first wins — a pushed `buzz` frame, a poll
/// result, or this local timer — and the others become no-ops through the
/// reconciler's idempotency rule.
pub struct ExpiryScheduler {
    state: SharedState,
    store: Arc<dyn StateStore>,
    timers: DashMap<(StudioId, BuzzerDirection), JoinHandle<()>>,
}

impl ExpiryScheduler {
    /// Build a scheduler bound to the session state and store handle.
    pub fn new(state: SharedState, store: Arc<dyn StateStore>) -> Self {
        Self {
            state,
            store,
            timers: DashMap::new(),
        }
    }

    /// Arm (or re-arm) the forced-deactivation timer for a signal.
    pub fn schedule(self: &Arc<Self>, studio: StudioId, direction: BuzzerDirection, after: Duration) {
        let key = (studio.clone(), direction);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(after).await;
            scheduler.expire(studio, direction).await;
        });

        if let Some(previous) = self.timers.insert(key, handle) {
            previous.abort();
        }
    }

    /// Drop the timer for a signal (a deactivation arrived on time).
    pub fn cancel(&self, studio: &StudioId, direction: BuzzerDirection) {
        if let Some((_, handle)) = self.timers.remove(&(studio.clone(), direction)) {
            handle.abort();
        }
    }

    /// Abort every outstanding timer (session shutdown).
    pub fn shutdown(&self) {
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    /// Force the signal inactive locally and best-effort tell the store.
    async fn expire(&self, studio: StudioId, direction: BuzzerDirection) {
        self.timers.remove(&(studio.clone(), direction));

        if !self.state.apply_buzzer(&studio, direction, false, 0) {
            // Already inactive; nothing to announce.
            return;
        }

        debug!(%studio, ?direction, "buzzer expired locally");
        self.state.hub().broadcast(ChangeEvent::Buzzer {
            studio: studio.clone(),
            direction,
            active: false,
        });

        // Fire-and-forget: local state is already correct for this client,
        // and every other client carries its own expiry timer.
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.write_buzzer(studio.clone(), direction, false).await {
                warn!(%studio, ?direction, error = %err, "buzzer expiry write failed");
            }
        });
    }
}
