use serde::{Deserialize, Serialize};

use crate::state::studio::{BuzzerDirection, StudioId};

/// One half of a studio's buzzer pair.
///
/// Invariant: `active == true` implies `expires_at > now` at the moment the
/// signal was last touched; the expiry scheduler forces the signal back to
/// inactive once the deadline passes, whether or not a deactivation event ever
/// arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerSignal {
    /// Owning studio.
    pub studio: StudioId,
    /// Which role is signalling which.
    pub direction: BuzzerDirection,
    /// Whether the buzzer light is on.
    pub active: bool,
    /// Epoch-ms timestamp of the activation, if active.
    #[serde(default)]
    pub activated_at: Option<i64>,
    /// Epoch-ms deadline after which the signal self-expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl BuzzerSignal {
    /// The resting (inactive) signal for a slot.
    pub fn inactive(studio: StudioId, direction: BuzzerDirection) -> Self {
        Self {
            studio,
            direction,
            active: false,
            activated_at: None,
            expires_at: None,
        }
    }

    /// An active signal stamped at `now_ms` with the configured expiry window.
    pub fn active_at(
        studio: StudioId,
        direction: BuzzerDirection,
        now_ms: i64,
        expiry_ms: i64,
    ) -> Self {
        Self {
            studio,
            direction,
            active: true,
            activated_at: Some(now_ms),
            expires_at: Some(now_ms + expiry_ms),
        }
    }

    /// Whether the activation window has lapsed.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.expires_at {
            Some(deadline) => self.active && now_ms >= deadline,
            None => false,
        }
    }

    /// Map key identifying this signal slot.
    pub fn key(&self) -> (StudioId, BuzzerDirection) {
        (self.studio.clone(), self.direction)
    }
}
