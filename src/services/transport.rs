//! Push-channel supervisor: connect, forward, back off, reconnect.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{info, warn};

use crate::{
    config::BackoffConfig,
    dto::wire::WireFrame,
    link::BroadcastLink,
    services::reconciler::Reconciler,
    state::SharedState,
};

/// Handle to the supervised push channel.
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<WireFrame>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    /// Queue a frame for the broadcast service, best-effort.
    ///
    /// Frames queued while disconnected are flushed on reconnect; receivers
    /// treat every frame idempotently, so a late flush is harmless. Once the
    /// supervisor has given up for the session, frames are silently dropped
    /// and convergence rides on the store writes plus polling.
    pub fn send(&self, frame: WireFrame) {
        let _ = self.outbound.send(frame);
    }

    /// Tear the channel down.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Spawn the supervisor for a session.
pub fn spawn(
    state: SharedState,
    reconciler: Arc<Reconciler>,
    link: Arc<dyn BroadcastLink>,
) -> TransportHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_supervisor(state, reconciler, link, outbound_rx));
    TransportHandle {
        outbound: outbound_tx,
        task,
    }
}

async fn run_supervisor(
    state: SharedState,
    reconciler: Arc<Reconciler>,
    link: Arc<dyn BroadcastLink>,
    mut outbound: mpsc::UnboundedReceiver<WireFrame>,
) {
    let backoff = state.config().backoff().clone();
    let mut attempts: u32 = 0;

    loop {
        // Re-sent on every (re)connect: the scope never changes, but the
        // cleared watermarks may have moved while we were offline.
        let auth = auth_frame(&state);

        match link.connect(auth).await {
            Ok(mut session) => {
                info!("push channel connected");
                attempts = 0;
                state.set_degraded(false);

                loop {
                    tokio::select! {
                        frame = session.next_frame() => match frame {
                            Some(frame) => {
                                reconciler.apply_frame(frame).await;
                            }
                            None => break,
                        },
                        queued = outbound.recv() => match queued {
                            Some(frame) => {
                                let _ = session.send(frame);
                            }
                            // Engine dropped the handle; session over.
                            None => return,
                        },
                    }
                }

                state.set_degraded(true);
                attempts += 1;
                if attempts >= backoff.max_attempts {
                    warn!(
                        attempts,
                        "giving up on push channel for this session, polling fallback stays active"
                    );
                    break;
                }

                let delay = backoff_delay(&backoff, attempts);
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    "push channel dropped, reconnecting"
                );
                sleep(delay).await;
            }
            Err(err) => {
                state.set_degraded(true);
                attempts += 1;

                if attempts >= backoff.max_attempts {
                    warn!(
                        attempts,
                        "giving up on push channel for this session, polling fallback stays active"
                    );
                    break;
                }

                let delay = backoff_delay(&backoff, attempts);
                warn!(
                    error = %err,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "push connect failed, backing off"
                );
                sleep(delay).await;
            }
        }
    }

    // Parked for the rest of the session: drain the queue so senders keep
    // their fire-and-forget semantics.
    while outbound.recv().await.is_some() {}
}

fn auth_frame(state: &SharedState) -> WireFrame {
    WireFrame::Auth {
        role: state.scope().role(),
        studio_access: state.scoped_studios(),
        cleared_watermarks: state.chat_watermarks(),
    }
}

/// Exponential backoff with jitter. Jitter is applied downward so the
/// configured cap is a hard upper bound.
fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = config
        .initial
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(config.max);
    base.mul_f64(rand::rng().random_range(0.8..=1.0))
}
