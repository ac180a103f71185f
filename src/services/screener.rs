//! Session facade tying state, store, link, and background services together.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::warn;
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    dto::wire::WireFrame,
    error::EngineError,
    link::BroadcastLink,
    services::{
        expiry::ExpiryScheduler,
        poller::{self, PollerHandle},
        reconciler::Reconciler,
        transport::{self, TransportHandle},
    },
    state::{
        AppState, SharedState, epoch_ms,
        call_line::{CallLine, LineEvent},
        chat::ChatMessage,
        hub::{ChangeEvent, LineChangeKind},
        studio::{BuzzerDirection, ClientScope, StudioId},
    },
    store::StateStore,
};

/// One client session of the synchronization engine.
///
/// All user-facing actions go through here. Every mutation is written to the
/// State Store and, best-effort, announced on the push channel; remote
/// mutations flow back in through the reconciler via both transports.
pub struct ScreenerEngine {
    state: SharedState,
    store: Arc<dyn StateStore>,
    expiry: Arc<ExpiryScheduler>,
    transport: TransportHandle,
    poller: PollerHandle,
}

impl ScreenerEngine {
    /// Provision state for the scope and start the background services.
    pub fn start(
        config: SyncConfig,
        scope: ClientScope,
        store: Arc<dyn StateStore>,
        link: Arc<dyn BroadcastLink>,
    ) -> Self {
        let state = AppState::new(config, scope);
        let expiry = Arc::new(ExpiryScheduler::new(state.clone(), Arc::clone(&store)));
        let reconciler = Arc::new(Reconciler::new(state.clone(), Arc::clone(&expiry)));
        let transport = transport::spawn(state.clone(), Arc::clone(&reconciler), link);
        let poller = poller::spawn(state.clone(), reconciler, Arc::clone(&store));

        Self {
            state,
            store,
            expiry,
            transport,
            poller,
        }
    }

    /// Shared session state, for read access from the presentation layer.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Subscribe to change notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.state.hub().subscribe()
    }

    /// Watch the degraded indicator (push channel down, polling only).
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.state.degraded_watcher()
    }

    /// Stop every background task. Local state stays readable.
    pub fn shutdown(&self) {
        self.poller.stop();
        self.transport.shutdown();
        self.expiry.shutdown();
    }

    // ---- call lines --------------------------------------------------------

    /// Start an outgoing call on a line.
    ///
    /// Dialing is the one transition that claims a shared resource, so the
    /// store write happens before the local state flips: if the write is
    /// refused the line stays inactive and no other client ever sees a
    /// phantom ringing state.
    pub async fn dial(
        &self,
        studio: &StudioId,
        line: u8,
        number: impl Into<String>,
    ) -> Result<CallLine, EngineError> {
        self.ensure_scope(studio)?;
        let store = Arc::clone(&self.store);
        let snapshot = self
            .state
            .run_line_transition(studio, line, LineEvent::Dial {
                number: number.into(),
            }, move |next| async move {
                store.write_line(next).await.map_err(Into::into)
            })
            .await?;
        self.announce_line(snapshot.clone());
        Ok(snapshot)
    }

    /// The remote party answered; the line goes active.
    pub async fn connect(&self, studio: &StudioId, line: u8) -> Result<CallLine, EngineError> {
        self.transition(studio, line, LineEvent::Connect).await
    }

    /// Put an active call on hold.
    pub async fn hold(&self, studio: &StudioId, line: u8) -> Result<CallLine, EngineError> {
        self.transition(studio, line, LineEvent::Hold).await
    }

    /// Resume a held call.
    pub async fn resume(&self, studio: &StudioId, line: u8) -> Result<CallLine, EngineError> {
        self.transition(studio, line, LineEvent::Resume).await
    }

    /// Route a call to the broadcast mix.
    pub async fn send_to_air(&self, studio: &StudioId, line: u8) -> Result<CallLine, EngineError> {
        self.transition(studio, line, LineEvent::SendToAir).await
    }

    /// Pull a call out of the broadcast mix.
    pub async fn take_off_air(
        &self,
        studio: &StudioId,
        line: u8,
    ) -> Result<CallLine, EngineError> {
        self.transition(studio, line, LineEvent::TakeOffAir).await
    }

    /// End the call and reset the line.
    pub async fn hangup(&self, studio: &StudioId, line: u8) -> Result<CallLine, EngineError> {
        self.transition(studio, line, LineEvent::Hangup).await
    }

    /// Apply a guarded transition locally, then propagate.
    ///
    /// These transitions describe facts about a call this client is already
    /// driving, so local state commits first and a refused store write
    /// surfaces as a retryable [`EngineError::WriteFailed`] without rolling
    /// anything back; convergence self-heals through the poller.
    async fn transition(
        &self,
        studio: &StudioId,
        line: u8,
        event: LineEvent,
    ) -> Result<CallLine, EngineError> {
        self.ensure_scope(studio)?;
        let snapshot = self
            .state
            .run_line_transition(studio, line, event, |_| async { Ok::<(), EngineError>(()) })
            .await?;
        self.announce_line(snapshot.clone());

        self.store
            .write_line(snapshot.clone())
            .await
            .map_err(EngineError::from)?;
        Ok(snapshot)
    }

    fn announce_line(&self, snapshot: CallLine) {
        self.state.hub().broadcast(ChangeEvent::Line {
            snapshot: snapshot.clone(),
            kind: LineChangeKind::State,
        });
        self.transport
            .send(WireFrame::CallInfoUpdate { line: snapshot });
    }

    // ---- buzzers -----------------------------------------------------------

    /// Press the buzzer towards the other role of a studio.
    ///
    /// Pressing while already active re-arms the expiry window. The signal
    /// clears on its own after the configured duration even if no
    /// deactivation ever arrives.
    pub async fn buzz(&self, studio: &StudioId) -> Result<(), EngineError> {
        self.set_buzzer(studio, BuzzerDirection::from_sender(self.state.scope().role()), true)
            .await
    }

    /// Release this client's own buzzer signal early.
    pub async fn silence(&self, studio: &StudioId) -> Result<(), EngineError> {
        self.set_buzzer(studio, BuzzerDirection::from_sender(self.state.scope().role()), false)
            .await
    }

    async fn set_buzzer(
        &self,
        studio: &StudioId,
        direction: BuzzerDirection,
        active: bool,
    ) -> Result<(), EngineError> {
        self.ensure_scope(studio)?;
        if self.state.buzzer(studio, direction).is_none() {
            return Err(EngineError::InvalidState(format!(
                "studio `{studio}` has no buzzer"
            )));
        }

        let expiry_ms = self.state.config().buzzer_expiry_ms();
        if self.state.apply_buzzer(studio, direction, active, expiry_ms) {
            self.state.hub().broadcast(ChangeEvent::Buzzer {
                studio: studio.clone(),
                direction,
                active,
            });
        }
        if active {
            self.expiry.schedule(
                studio.clone(),
                direction,
                self.state.config().buzzer_expiry(),
            );
        } else {
            self.expiry.cancel(studio, direction);
        }

        self.transport
            .send(WireFrame::buzz(studio.clone(), direction, active));
        self.store
            .write_buzzer(studio.clone(), direction, active)
            .await
            .map_err(EngineError::from)
    }

    // ---- chat --------------------------------------------------------------

    /// Author a chat message in a studio channel.
    pub async fn send_chat(
        &self,
        studio: &StudioId,
        content: impl Into<String>,
    ) -> Result<ChatMessage, EngineError> {
        self.ensure_scope(studio)?;
        let message = ChatMessage {
            id: Uuid::new_v4(),
            studio: studio.clone(),
            sender_role: self.state.scope().role(),
            content: content.into(),
            timestamp: epoch_ms(),
        };

        self.state.apply_chat_message(message.clone());
        self.transport.send(WireFrame::ChatMessage {
            message: message.clone(),
        });
        self.store
            .append_chat(message.clone())
            .await
            .map_err(EngineError::from)?;
        Ok(message)
    }

    /// Clear a studio's chat log everywhere.
    ///
    /// The local watermark is authoritative for this client; the store delete
    /// is best-effort, because a lingering history replay is suppressed by
    /// the watermark anyway.
    pub async fn clear_chat(&self, studio: &StudioId) -> Result<(), EngineError> {
        self.ensure_scope(studio)?;
        self.state
            .with_chat(studio, |channel| channel.clear(epoch_ms()));
        self.state.hub().broadcast(ChangeEvent::ChatCleared {
            studio: studio.clone(),
        });
        self.transport.send(WireFrame::ClearChat {
            studio_id: studio.clone(),
        });

        if let Err(err) = self.store.clear_chat(studio.clone()).await {
            warn!(%studio, error = %err, "chat delete failed, local watermark still guards history");
        }
        Ok(())
    }

    fn ensure_scope(&self, studio: &StudioId) -> Result<(), EngineError> {
        if self.state.scope().allows(studio) {
            Ok(())
        } else {
            Err(EngineError::OutOfScope(studio.clone()))
        }
    }
}

impl Drop for ScreenerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
