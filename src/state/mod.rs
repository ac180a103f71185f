//! Local cache of synchronized state shared across the engine's tasks.

pub mod buzzer;
pub mod call_line;
pub mod chat;
pub mod hub;
pub mod studio;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use indexmap::IndexMap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::warn;

use crate::{config::SyncConfig, error::EngineError};

pub use self::call_line::{AbortError, ApplyError, LinePlan, PlanError, PlanId};
use self::{
    buzzer::BuzzerSignal,
    call_line::{CallLine, CallLineMachine, LineEvent},
    chat::{AppendOutcome, ChatChannel, ChatMessage},
    hub::{ChangeEvent, ChangeHub, LineChangeKind},
    studio::{BuzzerDirection, ClientScope, StudioId},
};

/// Shared handle to the engine state.
pub type SharedState = Arc<AppState>;

/// Upper bound on how long a line transition may hold its plan open.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Central state for one client session: per-line machines, buzzer slots,
/// chat channels, and the change-notification hub.
pub struct AppState {
    config: SyncConfig,
    scope: ClientScope,
    lines: RwLock<IndexMap<(StudioId, u8), CallLineMachine>>,
    buzzers: DashMap<(StudioId, BuzzerDirection), BuzzerSignal>,
    chats: DashMap<StudioId, ChatChannel>,
    hub: ChangeHub,
    degraded: watch::Sender<bool>,
    transition_gates: DashMap<(StudioId, u8), Arc<Mutex<()>>>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Provision the state for every in-scope studio and wrap it in an [`Arc`].
    ///
    /// The session starts degraded until the push transport reports a live
    /// connection.
    pub fn new(config: SyncConfig, scope: ClientScope) -> SharedState {
        let mut lines = IndexMap::new();
        let buzzers = DashMap::new();
        let chats = DashMap::new();

        for (studio, studio_config) in config.studios() {
            if !scope.allows(studio) {
                continue;
            }
            for index in 0..studio_config.lines {
                lines.insert(
                    (studio.clone(), index),
                    CallLineMachine::new(studio.clone(), index),
                );
            }
            if !studio_config.chat_only {
                for direction in BuzzerDirection::ALL {
                    buzzers.insert(
                        (studio.clone(), direction),
                        BuzzerSignal::inactive(studio.clone(), direction),
                    );
                }
            }
            chats.insert(studio.clone(), ChatChannel::default());
        }

        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            scope,
            lines: RwLock::new(lines),
            buzzers,
            chats,
            hub: ChangeHub::new(64),
            degraded: degraded_tx,
            transition_gates: DashMap::new(),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// Runtime configuration for this session.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Studio-access scope of this client.
    pub fn scope(&self) -> &ClientScope {
        &self.scope
    }

    /// Studios visible to this client, in configuration order.
    pub fn scoped_studios(&self) -> Vec<StudioId> {
        self.config
            .studios()
            .keys()
            .filter(|studio| self.scope.allows(studio))
            .cloned()
            .collect()
    }

    /// Change-notification hub for the presentation layer.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    /// Subscribe to degraded-indicator updates (push path down or not yet up).
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only on actual change.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Snapshot of one line, if provisioned.
    pub async fn line_snapshot(&self, studio: &StudioId, line: u8) -> Option<CallLine> {
        let guard = self.lines.read().await;
        guard
            .get(&(studio.clone(), line))
            .map(|machine| machine.current().clone())
    }

    /// Snapshots of every line provisioned for a studio.
    pub async fn lines_for(&self, studio: &StudioId) -> Vec<CallLine> {
        let guard = self.lines.read().await;
        guard
            .iter()
            .filter(|((owner, _), _)| owner == studio)
            .map(|(_, machine)| machine.current().clone())
            .collect()
    }

    /// Plan a transition on a line.
    async fn plan_line(
        &self,
        studio: &StudioId,
        line: u8,
        event: LineEvent,
    ) -> Result<LinePlan, EngineError> {
        let mut guard = self.lines.write().await;
        let machine = guard
            .get_mut(&(studio.clone(), line))
            .ok_or_else(|| EngineError::NotFound(format!("line {line} in studio `{studio}`")))?;
        machine.plan(event, epoch_ms()).map_err(Into::into)
    }

    /// Commit a planned line transition.
    async fn apply_planned_line(
        &self,
        studio: &StudioId,
        line: u8,
        plan_id: PlanId,
    ) -> Result<CallLine, EngineError> {
        let mut guard = self.lines.write().await;
        let machine = guard
            .get_mut(&(studio.clone(), line))
            .ok_or_else(|| EngineError::NotFound(format!("line {line} in studio `{studio}`")))?;
        machine.apply(plan_id).map_err(Into::into)
    }

    /// Abort a planned line transition.
    async fn abort_line(
        &self,
        studio: &StudioId,
        line: u8,
        plan_id: PlanId,
    ) -> Result<(), EngineError> {
        let mut guard = self.lines.write().await;
        let machine = guard
            .get_mut(&(studio.clone(), line))
            .ok_or_else(|| EngineError::NotFound(format!("line {line} in studio `{studio}`")))?;
        machine.abort(plan_id).map_err(Into::into)
    }

    /// Run a gated two-phase line transition: plan, execute `work` (typically
    /// the store pre-write), then apply on success or abort on failure or
    /// timeout. The gate is keyed per line, so concurrent UI actions on one
    /// line serialize while every other line stays free to transition.
    pub async fn run_line_transition<F, Fut>(
        &self,
        studio: &StudioId,
        line: u8,
        event: LineEvent,
        work: F,
    ) -> Result<CallLine, EngineError>
    where
        F: FnOnce(CallLine) -> Fut,
        Fut: std::future::Future<Output = Result<(), EngineError>>,
    {
        let gate = Arc::clone(
            &self
                .transition_gates
                .entry((studio.clone(), line))
                .or_default(),
        );
        let gate = gate.lock().await;
        let plan = self.plan_line(studio, line, event.clone()).await?;
        let plan_id = plan.id;

        let work_future = work(plan.to.clone());
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_line(studio, line, plan_id).await {
                        warn!(
                            %studio,
                            line,
                            event = ?event,
                            error = ?abort_err,
                            "failed to abort line transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(EngineError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(()) => {
                let snapshot = self.apply_planned_line(studio, line, plan_id).await?;
                drop(gate);
                Ok(snapshot)
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_line(studio, line, plan_id).await {
                    warn!(
                        %studio,
                        line,
                        event = ?event,
                        error = ?abort_err,
                        "failed to abort line transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }

    /// Merge an authoritative line snapshot from either transport.
    ///
    /// Returns the new snapshot and the kind of change when anything became
    /// visible, `None` when the event was a duplicate or stale.
    pub async fn reconcile_line(&self, snapshot: CallLine) -> Option<(CallLine, LineChangeKind)> {
        let mut guard = self.lines.write().await;
        let machine = guard.get_mut(&(snapshot.studio.clone(), snapshot.line))?;

        let kind = if machine.current().differs_only_in_levels(&snapshot) {
            LineChangeKind::Levels
        } else {
            LineChangeKind::State
        };

        if machine.reconcile(snapshot) {
            Some((machine.current().clone(), kind))
        } else {
            None
        }
    }

    /// Current signal for a buzzer slot, if provisioned.
    pub fn buzzer(&self, studio: &StudioId, direction: BuzzerDirection) -> Option<BuzzerSignal> {
        self.buzzers
            .get(&(studio.clone(), direction))
            .map(|entry| entry.value().clone())
    }

    /// Flip a buzzer slot, idempotently.
    ///
    /// The buzzer is a binary signal: an event carrying the activation state
    /// the slot already holds is a no-op regardless of timestamps, which makes
    /// reconciliation commutative under duplicate delivery from both
    /// transports. Returns `true` when the slot actually flipped.
    pub fn apply_buzzer(
        &self,
        studio: &StudioId,
        direction: BuzzerDirection,
        active: bool,
        expiry_ms: i64,
    ) -> bool {
        let Some(mut entry) = self.buzzers.get_mut(&(studio.clone(), direction)) else {
            return false;
        };
        if entry.active == active {
            return false;
        }

        *entry = if active {
            BuzzerSignal::active_at(studio.clone(), direction, epoch_ms(), expiry_ms)
        } else {
            BuzzerSignal::inactive(studio.clone(), direction)
        };
        true
    }

    /// Run a closure against a studio's chat channel.
    pub fn with_chat<T>(&self, studio: &StudioId, f: impl FnOnce(&mut ChatChannel) -> T) -> T {
        let mut entry = self.chats.entry(studio.clone()).or_default();
        f(entry.value_mut())
    }

    /// Visible messages for a studio, ordered by `(timestamp, id)`.
    pub fn chat_messages(&self, studio: &StudioId) -> Vec<ChatMessage> {
        self.chats
            .get(studio)
            .map(|entry| entry.messages().to_vec())
            .unwrap_or_default()
    }

    /// Active cleared watermarks, sent with the auth handshake so the
    /// broadcast service can pre-filter replays.
    pub fn chat_watermarks(&self) -> IndexMap<StudioId, i64> {
        let mut watermarks: IndexMap<StudioId, i64> = self
            .chats
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .watermark()
                    .map(|mark| (entry.key().clone(), mark))
            })
            .collect();
        watermarks.sort_keys();
        watermarks
    }

    /// Append a chat message to its studio channel, broadcasting a change
    /// event when it becomes visible.
    pub fn apply_chat_message(&self, message: ChatMessage) -> AppendOutcome {
        let studio = message.studio.clone();
        let outcome = self.with_chat(&studio, |channel| channel.append(message.clone()));
        if outcome == AppendOutcome::Added {
            self.hub.broadcast(ChangeEvent::ChatMessage { message });
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::call_line::LineStatus;
    use crate::state::studio::Role;
    use uuid::Uuid;

    fn producer_state() -> SharedState {
        AppState::new(SyncConfig::default(), ClientScope::Producer)
    }

    #[test]
    fn talent_state_only_provisions_own_studio() {
        let state = AppState::new(
            SyncConfig::default(),
            ClientScope::Talent(StudioId::from("studio-2")),
        );
        assert_eq!(state.scoped_studios(), vec![StudioId::from("studio-2")]);
        assert!(
            state
                .buzzer(&StudioId::from("studio-1"), BuzzerDirection::ProducerToTalent)
                .is_none()
        );
    }

    #[tokio::test]
    async fn aux_channels_have_chat_but_no_lines() {
        let state = producer_state();
        assert!(state.lines_for(&StudioId::from("tech")).await.is_empty());
        assert!(state.chat_messages(&StudioId::from("tech")).is_empty());
        assert!(
            state
                .buzzer(&StudioId::from("tech"), BuzzerDirection::ProducerToTalent)
                .is_none()
        );
    }

    #[tokio::test]
    async fn run_line_transition_aborts_on_failed_prewrite() {
        let state = producer_state();
        let studio = StudioId::from("studio-1");

        let err = state
            .run_line_transition(
                &studio,
                0,
                LineEvent::Dial {
                    number: "5551234".into(),
                },
                |_| async { Err(EngineError::InvalidState("write rejected".into())) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let snapshot = state.line_snapshot(&studio, 0).await.unwrap();
        assert_eq!(snapshot.status, LineStatus::Inactive);
    }

    #[tokio::test]
    async fn run_line_transition_commits_on_success() {
        let state = producer_state();
        let studio = StudioId::from("studio-1");

        let snapshot = state
            .run_line_transition(
                &studio,
                4,
                LineEvent::Dial {
                    number: "5551234".into(),
                },
                |_| async { Ok(()) },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.status, LineStatus::Ringing);
        assert_eq!(snapshot.phone_number, "5551234");
    }

    #[test]
    fn duplicate_buzzer_activation_is_a_noop() {
        let state = producer_state();
        let studio = StudioId::from("studio-1");

        assert!(state.apply_buzzer(&studio, BuzzerDirection::ProducerToTalent, true, 10_000));
        assert!(!state.apply_buzzer(&studio, BuzzerDirection::ProducerToTalent, true, 10_000));
        assert!(state.apply_buzzer(&studio, BuzzerDirection::ProducerToTalent, false, 10_000));
    }

    #[test]
    fn chat_watermarks_collects_cleared_studios() {
        let state = producer_state();
        state.with_chat(&StudioId::from("studio-3"), |channel| channel.clear(1_234));
        let watermarks = state.chat_watermarks();
        assert_eq!(watermarks.get(&StudioId::from("studio-3")), Some(&1_234));
        assert_eq!(watermarks.len(), 1);
    }

    #[test]
    fn apply_chat_message_emits_once() {
        let state = producer_state();
        let mut changes = state.hub().subscribe();
        let message = ChatMessage {
            id: Uuid::new_v4(),
            studio: StudioId::from("studio-1"),
            sender_role: Role::Producer,
            content: "hello booth".into(),
            timestamp: epoch_ms(),
        };

        assert_eq!(
            state.apply_chat_message(message.clone()),
            AppendOutcome::Added
        );
        assert_eq!(state.apply_chat_message(message), AppendOutcome::Duplicate);

        assert!(matches!(
            changes.try_recv(),
            Ok(ChangeEvent::ChatMessage { .. })
        ));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_on_unrelated_lines_do_not_serialize() {
        let state = producer_state();
        let studio_a = StudioId::from("studio-1");
        let studio_b = StudioId::from("studio-4");

        // Slow pre-write holding studio-1 line 0's gate for 3 s.
        let slow_state = state.clone();
        let slow_studio = studio_a.clone();
        let slow = tokio::spawn(async move {
            slow_state
                .run_line_transition(
                    &slow_studio,
                    0,
                    LineEvent::Dial {
                        number: "5550001".into(),
                    },
                    |_| async {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        Ok::<(), EngineError>(())
                    },
                )
                .await
        });
        tokio::task::yield_now().await;

        // A different studio's line must not wait behind it.
        let started = tokio::time::Instant::now();
        state
            .run_line_transition(
                &studio_b,
                2,
                LineEvent::Dial {
                    number: "5550002".into(),
                },
                |_| async { Ok::<(), EngineError>(()) },
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        slow.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_on_the_same_line_serialize() {
        let state = producer_state();
        let studio = StudioId::from("studio-1");

        let slow_state = state.clone();
        let slow_studio = studio.clone();
        let slow = tokio::spawn(async move {
            slow_state
                .run_line_transition(
                    &slow_studio,
                    0,
                    LineEvent::Dial {
                        number: "5550003".into(),
                    },
                    |_| async {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        Ok::<(), EngineError>(())
                    },
                )
                .await
        });
        tokio::task::yield_now().await;

        // Same line: the follow-up waits for the dial to commit, then runs
        // against the committed state.
        let started = tokio::time::Instant::now();
        let snapshot = state
            .run_line_transition(&studio, 0, LineEvent::Connect, |_| async {
                Ok::<(), EngineError>(())
            })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(snapshot.status, LineStatus::Active);

        slow.await.unwrap().unwrap();
    }
}
