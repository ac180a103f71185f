use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::studio::{Role, StudioId};

/// A single immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Stable message identifier, the tie-breaker when timestamps collide.
    pub id: Uuid,
    /// Studio channel the message belongs to.
    pub studio: StudioId,
    /// Role that authored the message.
    pub sender_role: Role,
    /// Message body.
    pub content: String,
    /// Authoring timestamp (epoch ms); the primary ordering key.
    pub timestamp: i64,
}

impl ChatMessage {
    /// Ordering key: `(timestamp, id)`, never arrival order.
    fn sort_key(&self) -> (i64, Uuid) {
        (self.timestamp, self.id)
    }
}

/// Outcome of offering a message to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Message was inserted and should be surfaced.
    Added,
    /// Message is already present; no effect.
    Duplicate,
    /// Message fell at or below the cleared watermark and stays hidden.
    Suppressed,
}

/// Per-studio ordered message log with soft "cleared" semantics.
///
/// Clearing does not trust the Store's hard delete: a local watermark
/// suppresses any history replay at or below the clear time, and is forgotten
/// as soon as newer activity arrives for the studio.
#[derive(Debug, Clone, Default)]
pub struct ChatChannel {
    messages: Vec<ChatMessage>,
    cleared_watermark: Option<i64>,
}

impl ChatChannel {
    /// Messages currently visible, ordered by `(timestamp, id)`.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether the visible log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The active cleared watermark, if any.
    pub fn watermark(&self) -> Option<i64> {
        self.cleared_watermark
    }

    /// Offer a message to the channel.
    ///
    /// A message at or above the watermark "un-clears" the channel: the
    /// watermark is dropped so subsequent replays may show history again.
    /// The boundary is inclusive because a message authored within the same
    /// millisecond as a clear is new activity, not resurrected history; only
    /// strictly older messages are suppressed.
    pub fn append(&mut self, message: ChatMessage) -> AppendOutcome {
        if let Some(watermark) = self.cleared_watermark {
            if message.timestamp >= watermark {
                self.cleared_watermark = None;
            } else {
                return AppendOutcome::Suppressed;
            }
        }

        if self.messages.iter().any(|m| m.id == message.id) {
            return AppendOutcome::Duplicate;
        }

        let position = self
            .messages
            .partition_point(|m| m.sort_key() <= message.sort_key());
        self.messages.insert(position, message);
        AppendOutcome::Added
    }

    /// Empty the log and raise the watermark to `now_ms`.
    pub fn clear(&mut self, now_ms: i64) {
        self.messages.clear();
        self.cleared_watermark = Some(now_ms);
    }

    /// Replace the log with a history replay from the Store.
    ///
    /// Messages at or below the watermark are dropped; everything else
    /// replaces the current log. Returns `true` when the visible log changed.
    pub fn replay(&mut self, history: Vec<ChatMessage>) -> bool {
        let mut survivors: Vec<ChatMessage> = match self.cleared_watermark {
            Some(watermark) => history
                .into_iter()
                .filter(|m| m.timestamp > watermark)
                .collect(),
            None => history,
        };
        survivors.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        survivors.dedup_by(|a, b| a.id == b.id);

        if survivors == self.messages {
            return false;
        }

        self.messages = survivors;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ts: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            studio: StudioId::from("studio-a"),
            sender_role: Role::Producer,
            content: content.into(),
            timestamp: ts,
        }
    }

    #[test]
    fn messages_ordered_by_timestamp_not_arrival() {
        let mut channel = ChatChannel::default();
        channel.append(message(30, "late"));
        channel.append(message(10, "early"));
        channel.append(message(20, "middle"));

        let contents: Vec<_> = channel.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["early", "middle", "late"]);
    }

    #[test]
    fn duplicate_ids_are_absorbed() {
        let mut channel = ChatChannel::default();
        let msg = message(10, "once");
        assert_eq!(channel.append(msg.clone()), AppendOutcome::Added);
        assert_eq!(channel.append(msg), AppendOutcome::Duplicate);
        assert_eq!(channel.messages().len(), 1);
    }

    #[test]
    fn watermark_suppresses_stale_replay_then_new_activity_unclears() {
        let mut channel = ChatChannel::default();
        let old = message(50, "before clear");
        channel.append(old.clone());

        // Clear at T0 = 100.
        channel.clear(100);
        assert!(channel.is_empty());

        // Replay at T1 > T0 containing only pre-clear traffic stays empty.
        assert!(!channel.replay(vec![old.clone()]));
        assert!(channel.is_empty());

        // New message at T2 > T0 shows up and forgets the watermark.
        let fresh = message(150, "after clear");
        assert_eq!(channel.append(fresh.clone()), AppendOutcome::Added);
        assert_eq!(channel.watermark(), None);

        // A later replay carrying messages between T0 and T2 now shows them.
        let mid = message(120, "mid-range");
        assert!(channel.replay(vec![old.clone(), mid.clone(), fresh.clone()]));
        let contents: Vec<_> = channel.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["before clear", "mid-range", "after clear"]);
    }

    #[test]
    fn append_below_watermark_is_suppressed() {
        let mut channel = ChatChannel::default();
        channel.clear(100);
        assert_eq!(channel.append(message(99, "stale")), AppendOutcome::Suppressed);
        assert_eq!(channel.append(message(40, "staler")), AppendOutcome::Suppressed);
        assert!(channel.is_empty());
        assert_eq!(channel.watermark(), Some(100));
    }

    #[test]
    fn append_in_the_clear_millisecond_is_new_activity() {
        // Clear and type within the same millisecond: the author must see
        // their own message.
        let mut channel = ChatChannel::default();
        channel.append(message(50, "before clear"));
        channel.clear(100);

        assert_eq!(channel.append(message(100, "right after")), AppendOutcome::Added);
        assert_eq!(channel.messages().len(), 1);
        assert_eq!(channel.watermark(), None);
    }

    #[test]
    fn identical_replay_reports_no_change() {
        let mut channel = ChatChannel::default();
        let a = message(10, "a");
        let b = message(20, "b");
        channel.append(a.clone());
        channel.append(b.clone());
        assert!(!channel.replay(vec![a, b]));
    }
}
