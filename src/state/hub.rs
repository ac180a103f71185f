use tokio::sync::broadcast;

use crate::state::{
    call_line::CallLine,
    chat::ChatMessage,
    studio::{BuzzerDirection, StudioId},
};

/// What kind of delta a line change carries.
///
/// Level-only deltas still repaint meters but must not re-trigger
/// notification side effects (sounds, toasts) in the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChangeKind {
    /// Status or caller metadata changed.
    State,
    /// Only the audio meter levels moved.
    Levels,
}

/// Change notification emitted to the presentation layer.
///
/// The reconciler guarantees exactly one of these per user-visible state
/// change, regardless of how many transports delivered the underlying event.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A buzzer signal flipped.
    Buzzer {
        /// Owning studio.
        studio: StudioId,
        /// Signal direction.
        direction: BuzzerDirection,
        /// New activation state.
        active: bool,
    },
    /// A call line changed.
    Line {
        /// New authoritative snapshot.
        snapshot: CallLine,
        /// Whether anything beyond meter levels moved.
        kind: LineChangeKind,
    },
    /// A chat message became visible.
    ChatMessage {
        /// The inserted message.
        message: ChatMessage,
    },
    /// A studio's chat log was cleared.
    ChatCleared {
        /// Studio whose log was emptied.
        studio: StudioId,
    },
    /// A studio's chat log was replaced by a history replay.
    ChatReplaced {
        /// Studio whose log was replaced.
        studio: StudioId,
    },
}

/// Broadcast hub fanning change notifications out to every subscribed view.
pub struct ChangeHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }
}
