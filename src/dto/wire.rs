use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::{
    call_line::CallLine,
    chat::ChatMessage,
    studio::{BuzzerDirection, Role, StudioId},
};

/// Frames carried over the push channel, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireFrame {
    /// Authentication handshake identifying the caller's role and scope.
    #[serde(rename_all = "camelCase")]
    Auth {
        /// Role of the connecting client.
        role: Role,
        /// Studios this client may observe.
        studio_access: Vec<StudioId>,
        /// Per-studio cleared watermarks so the service can pre-filter
        /// history replays.
        #[serde(default)]
        cleared_watermarks: IndexMap<StudioId, i64>,
    },
    /// Buzzer activation or deactivation between the two roles of a studio.
    #[serde(rename_all = "camelCase")]
    Buzz {
        /// Sending role.
        from: Role,
        /// Receiving role.
        to: Role,
        /// Owning studio.
        studio_id: StudioId,
        /// New activation state.
        active: bool,
    },
    /// A single chat message.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        /// The message payload.
        message: ChatMessage,
    },
    /// Full chat history replay for a studio, delivered on (re)connect.
    #[serde(rename_all = "camelCase")]
    ChatHistory {
        /// Studio whose history is being replayed.
        studio_id: StudioId,
        /// Messages as stored; ordering and watermark filtering are the
        /// receiver's job.
        messages: Vec<ChatMessage>,
    },
    /// A studio's chat log was cleared.
    #[serde(rename_all = "camelCase")]
    ClearChat {
        /// Studio whose log was cleared.
        studio_id: StudioId,
    },
    /// Updated snapshot of a call line.
    #[serde(rename_all = "camelCase")]
    CallInfoUpdate {
        /// The new line snapshot.
        line: CallLine,
    },
}

impl WireFrame {
    /// Build a buzz frame from a signal direction.
    pub fn buzz(studio: StudioId, direction: BuzzerDirection, active: bool) -> Self {
        WireFrame::Buzz {
            from: direction.sender(),
            to: direction.receiver(),
            studio_id: studio,
            active,
        }
    }

    /// Studio a frame concerns, if any (auth frames have none).
    pub fn studio(&self) -> Option<&StudioId> {
        match self {
            WireFrame::Auth { .. } => None,
            WireFrame::Buzz { studio_id, .. }
            | WireFrame::ChatHistory { studio_id, .. }
            | WireFrame::ClearChat { studio_id } => Some(studio_id),
            WireFrame::ChatMessage { message } => Some(&message.studio),
            WireFrame::CallInfoUpdate { line } => Some(&line.studio),
        }
    }
}
