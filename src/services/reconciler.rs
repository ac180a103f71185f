//! Idempotent merge of remote events into the local replica.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    dto::wire::WireFrame,
    services::expiry::ExpiryScheduler,
    state::{
        SharedState,
        call_line::CallLine,
        chat::{AppendOutcome, ChatMessage},
        epoch_ms,
        hub::ChangeEvent,
        studio::{BuzzerDirection, StudioId},
    },
};

/// A remote observation, normalized from either transport.
///
/// Pushed frames and poll results funnel into the same representation so the
/// reconciler cannot tell them apart, which is what makes duplicate delivery
/// across the two transports safe.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Activation state of one buzzer slot.
    Buzzer {
        /// Owning studio.
        studio: StudioId,
        /// Signal direction.
        direction: BuzzerDirection,
        /// Observed activation state.
        active: bool,
    },
    /// Authoritative snapshot of one call line.
    Line(CallLine),
    /// A single chat message.
    Chat(ChatMessage),
    /// Full history replay for a studio's chat channel.
    ChatHistory {
        /// Studio whose history is being replayed.
        studio: StudioId,
        /// History as stored, unordered and unfiltered.
        messages: Vec<ChatMessage>,
    },
    /// A studio's chat log was cleared by some client.
    ChatCleared {
        /// Studio whose log was cleared.
        studio: StudioId,
    },
}

impl SyncEvent {
    /// Normalize a pushed frame. Auth frames carry no state and map to
    /// `None`.
    pub fn from_frame(frame: WireFrame) -> Option<Self> {
        match frame {
            WireFrame::Auth { .. } => None,
            WireFrame::Buzz {
                from,
                studio_id,
                active,
                ..
            } => Some(SyncEvent::Buzzer {
                studio: studio_id,
                direction: BuzzerDirection::from_sender(from),
                active,
            }),
            WireFrame::ChatMessage { message } => Some(SyncEvent::Chat(message)),
            WireFrame::ChatHistory {
                studio_id,
                messages,
            } => Some(SyncEvent::ChatHistory {
                studio: studio_id,
                messages,
            }),
            WireFrame::ClearChat { studio_id } => {
                Some(SyncEvent::ChatCleared { studio: studio_id })
            }
            WireFrame::CallInfoUpdate { line } => Some(SyncEvent::Line(line)),
        }
    }

    fn studio(&self) -> &StudioId {
        match self {
            SyncEvent::Buzzer { studio, .. }
            | SyncEvent::ChatHistory { studio, .. }
            | SyncEvent::ChatCleared { studio } => studio,
            SyncEvent::Line(line) => &line.studio,
            SyncEvent::Chat(message) => &message.studio,
        }
    }
}

/// What the reconciler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event changed local state; exactly one change notification went
    /// out on the hub.
    Applied,
    /// Duplicate, stale, or out of scope. No state change, no notification.
    Ignored,
}

/// Applies remote observations to the replica.
///
/// Every mutation is expressed as "converge on this state" rather than
/// "perform this action", so applying the same event twice is a no-op and
/// event order between the two transports does not matter.
pub struct Reconciler {
    state: SharedState,
    expiry: Arc<ExpiryScheduler>,
}

impl Reconciler {
    /// Build a reconciler over the session state.
    pub fn new(state: SharedState, expiry: Arc<ExpiryScheduler>) -> Self {
        Self { state, expiry }
    }

    /// Normalize and apply a pushed frame.
    pub async fn apply_frame(&self, frame: WireFrame) -> Outcome {
        match SyncEvent::from_frame(frame) {
            Some(event) => self.apply(event).await,
            None => Outcome::Ignored,
        }
    }

    /// Merge one observation into local state.
    pub async fn apply(&self, event: SyncEvent) -> Outcome {
        if !self.state.scope().allows(event.studio()) {
            trace!(studio = %event.studio(), "dropping out-of-scope event");
            return Outcome::Ignored;
        }

        match event {
            SyncEvent::Buzzer {
                studio,
                direction,
                active,
            } => self.apply_buzzer(studio, direction, active),
            SyncEvent::Line(snapshot) => self.apply_line(snapshot).await,
            SyncEvent::Chat(message) => match self.state.apply_chat_message(message) {
                AppendOutcome::Added => Outcome::Applied,
                AppendOutcome::Duplicate | AppendOutcome::Suppressed => Outcome::Ignored,
            },
            SyncEvent::ChatHistory { studio, messages } => {
                self.apply_history(studio, messages)
            }
            SyncEvent::ChatCleared { studio } => self.apply_cleared(studio),
        }
    }

    fn apply_buzzer(
        &self,
        studio: StudioId,
        direction: BuzzerDirection,
        active: bool,
    ) -> Outcome {
        let expiry_ms = self.state.config().buzzer_expiry_ms();
        if !self.state.apply_buzzer(&studio, direction, active, expiry_ms) {
            return Outcome::Ignored;
        }

        if active {
            // Remote activations get the same local failsafe as our own.
            self.expiry.schedule(
                studio.clone(),
                direction,
                self.state.config().buzzer_expiry(),
            );
        } else {
            self.expiry.cancel(&studio, direction);
        }

        debug!(%studio, ?direction, active, "buzzer reconciled");
        self.state.hub().broadcast(ChangeEvent::Buzzer {
            studio,
            direction,
            active,
        });
        Outcome::Applied
    }

    async fn apply_line(&self, snapshot: CallLine) -> Outcome {
        match self.state.reconcile_line(snapshot).await {
            Some((snapshot, kind)) => {
                debug!(
                    studio = %snapshot.studio,
                    line = snapshot.line,
                    status = ?snapshot.status,
                    ?kind,
                    "line reconciled"
                );
                self.state
                    .hub()
                    .broadcast(ChangeEvent::Line { snapshot, kind });
                Outcome::Applied
            }
            None => Outcome::Ignored,
        }
    }

    fn apply_history(&self, studio: StudioId, messages: Vec<ChatMessage>) -> Outcome {
        let changed = self
            .state
            .with_chat(&studio, |channel| channel.replay(messages));
        if !changed {
            return Outcome::Ignored;
        }

        debug!(%studio, "chat history replayed");
        self.state
            .hub()
            .broadcast(ChangeEvent::ChatReplaced { studio });
        Outcome::Applied
    }

    fn apply_cleared(&self, studio: StudioId) -> Outcome {
        let changed = self.state.with_chat(&studio, |channel| {
            // Echo of a clear we already performed: the channel is empty and
            // the watermark is in place.
            if channel.is_empty() && channel.watermark().is_some() {
                false
            } else {
                channel.clear(epoch_ms());
                true
            }
        });
        if !changed {
            return Outcome::Ignored;
        }

        debug!(%studio, "chat cleared remotely");
        self.state
            .hub()
            .broadcast(ChangeEvent::ChatCleared { studio });
        Outcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SyncConfig,
        state::{
            AppState,
            call_line::LineStatus,
            studio::{ClientScope, Role},
        },
        store::memory::MemoryStateStore,
    };
    use uuid::Uuid;

    fn reconciler_for(scope: ClientScope) -> (SharedState, Reconciler) {
        let state = AppState::new(SyncConfig::default(), scope);
        let expiry = Arc::new(ExpiryScheduler::new(
            state.clone(),
            Arc::new(MemoryStateStore::new()),
        ));
        (state.clone(), Reconciler::new(state, expiry))
    }

    fn message(studio: &str, timestamp: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            studio: StudioId::from(studio),
            sender_role: Role::Producer,
            content: content.into(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn duplicate_buzzer_delivery_notifies_exactly_once() {
        let (state, reconciler) = reconciler_for(ClientScope::Producer);
        let mut changes = state.hub().subscribe();
        let studio = StudioId::from("studio-1");

        // Pushed frame first, then the same observation via poll.
        let frame = WireFrame::buzz(studio.clone(), BuzzerDirection::TalentToProducer, true);
        assert_eq!(reconciler.apply_frame(frame).await, Outcome::Applied);
        assert_eq!(
            reconciler
                .apply(SyncEvent::Buzzer {
                    studio: studio.clone(),
                    direction: BuzzerDirection::TalentToProducer,
                    active: true,
                })
                .await,
            Outcome::Ignored
        );

        assert!(matches!(
            changes.try_recv(),
            Ok(ChangeEvent::Buzzer { active: true, .. })
        ));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_line_snapshot_is_ignored() {
        let (state, reconciler) = reconciler_for(ClientScope::Producer);
        let studio = StudioId::from("studio-1");

        let mut fresh = state.line_snapshot(&studio, 0).await.unwrap();
        fresh.status = LineStatus::Ringing;
        fresh.phone_number = "+15550100".into();
        fresh.updated_at = 2_000;

        let mut stale = fresh.clone();
        stale.status = LineStatus::Inactive;
        stale.updated_at = 1_000;

        assert_eq!(
            reconciler.apply(SyncEvent::Line(fresh.clone())).await,
            Outcome::Applied
        );
        assert_eq!(
            reconciler.apply(SyncEvent::Line(stale)).await,
            Outcome::Ignored
        );
        // Same snapshot again: idempotent.
        assert_eq!(
            reconciler.apply(SyncEvent::Line(fresh)).await,
            Outcome::Ignored
        );

        let current = state.line_snapshot(&studio, 0).await.unwrap();
        assert_eq!(current.status, LineStatus::Ringing);
    }

    #[tokio::test]
    async fn talent_scope_drops_other_studios() {
        let (state, reconciler) =
            reconciler_for(ClientScope::Talent(StudioId::from("studio-2")));

        assert_eq!(
            reconciler
                .apply(SyncEvent::Chat(message("studio-1", 100, "hi")))
                .await,
            Outcome::Ignored
        );
        assert_eq!(
            reconciler
                .apply(SyncEvent::Chat(message("studio-2", 100, "hi")))
                .await,
            Outcome::Applied
        );
        assert!(state.chat_messages(&StudioId::from("studio-1")).is_empty());
    }

    #[tokio::test]
    async fn history_replay_respects_cleared_watermark() {
        let (state, reconciler) = reconciler_for(ClientScope::Producer);
        let studio = StudioId::from("studio-1");
        let old = message("studio-1", 100, "before clear");
        let new = message("studio-1", 9_000, "after clear");

        state.with_chat(&studio, |channel| channel.clear(5_000));

        assert_eq!(
            reconciler
                .apply(SyncEvent::ChatHistory {
                    studio: studio.clone(),
                    messages: vec![old, new.clone()],
                })
                .await,
            Outcome::Applied
        );
        assert_eq!(state.chat_messages(&studio), vec![new]);
    }

    #[tokio::test]
    async fn clear_echo_is_idempotent() {
        let (state, reconciler) = reconciler_for(ClientScope::Producer);
        let studio = StudioId::from("studio-1");

        state.apply_chat_message(message("studio-1", 100, "hello"));

        assert_eq!(
            reconciler
                .apply(SyncEvent::ChatCleared {
                    studio: studio.clone(),
                })
                .await,
            Outcome::Applied
        );
        assert_eq!(
            reconciler
                .apply(SyncEvent::ChatCleared {
                    studio: studio.clone(),
                })
                .await,
            Outcome::Ignored
        );
        assert!(state.chat_messages(&studio).is_empty());
    }
}
