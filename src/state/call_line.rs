use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::state::studio::StudioId;

/// Lifecycle status of a single call line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineStatus {
    /// Slot is free; no caller information is meaningful.
    Inactive,
    /// An outbound dial is in progress, waiting for pickup.
    Ringing,
    /// Call is connected and the producer can talk to the caller.
    Active,
    /// Caller parked on hold.
    Holding,
    /// Caller is live on the broadcast mix.
    OnAir,
}

/// Input/output meter levels reported by the audio collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioLevels {
    /// Caller-to-studio level.
    pub input: f32,
    /// Studio-to-caller level.
    pub output: f32,
}

/// Snapshot of one call line within a studio.
///
/// `updated_at` carries the State Store's last-write-wins timestamp (epoch
/// milliseconds); the reconciler never replaces a snapshot with an older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLine {
    /// Owning studio.
    pub studio: StudioId,
    /// Line index within the studio (zero-based).
    pub line: u8,
    /// Current lifecycle status.
    pub status: LineStatus,
    /// Dialled number; empty while inactive.
    #[serde(default)]
    pub phone_number: String,
    /// Caller name entered by the screener; empty while inactive.
    #[serde(default)]
    pub caller_name: String,
    /// Free-form screener notes; cleared on hangup.
    #[serde(default)]
    pub notes: String,
    /// Epoch-ms timestamp set when the line left `Inactive`.
    #[serde(default)]
    pub start_time: Option<i64>,
    /// Live meter levels; meaningful only while the line is not inactive.
    #[serde(default)]
    pub audio_levels: AudioLevels,
    /// Store write timestamp (epoch ms) used for monotonic reconciliation.
    #[serde(default)]
    pub updated_at: i64,
}

impl CallLine {
    /// A reset, inactive line for the given slot.
    pub fn inactive(studio: StudioId, line: u8) -> Self {
        Self {
            studio,
            line,
            status: LineStatus::Inactive,
            phone_number: String::new(),
            caller_name: String::new(),
            notes: String::new(),
            start_time: None,
            audio_levels: AudioLevels::default(),
            updated_at: 0,
        }
    }

    /// Milliseconds elapsed since the call left `Inactive`, for duration
    /// displays in the presentation layer.
    pub fn elapsed_ms(&self, now_ms: i64) -> Option<i64> {
        self.start_time.map(|start| (now_ms - start).max(0))
    }

    /// Whether two snapshots differ only in their audio meter levels (and the
    /// store timestamp that came with them).
    pub fn differs_only_in_levels(&self, other: &CallLine) -> bool {
        let mut normalized = other.clone();
        normalized.audio_levels = self.audio_levels;
        normalized.updated_at = self.updated_at;
        normalized == *self && self.audio_levels != other.audio_levels
    }
}

/// Events that can be applied to a call line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Start an outbound call on a free line.
    Dial {
        /// Number handed to the telephony collaborator.
        number: String,
    },
    /// Telephony collaborator reported pickup.
    Connect,
    /// Park the connected caller on hold.
    Hold,
    /// Bring a held caller back to the producer.
    Resume,
    /// Put the caller on the broadcast mix.
    SendToAir,
    /// Pull the caller off the broadcast mix.
    TakeOffAir,
    /// Tear the call down and reset the slot.
    Hangup,
}

/// Error returned when attempting an invalid line transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while line is {from:?}")]
pub struct InvalidTransition {
    /// Status the line was in when the event was received.
    pub from: LineStatus,
    /// The rejected event.
    pub event: LineEvent,
}

/// Errors that can occur when planning a line transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current status.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned line transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// The line changed under the plan (a remote snapshot was reconciled in).
    StateMismatch {
        /// Snapshot the plan was computed from.
        expected: CallLine,
        /// Current snapshot.
        actual: CallLine,
    },
    /// Line version changed since the plan was created.
    VersionMismatch {
        /// Version expected after applying this plan.
        expected: usize,
        /// Version the apply would actually produce.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned line transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned line transition.
pub type PlanId = Uuid;

/// A validated transition that has not been committed yet.
///
/// The store pre-write runs between `plan` and `apply`; if the write fails
/// the plan is aborted and the line keeps its previous state.
#[derive(Debug, Clone)]
pub struct LinePlan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Snapshot the plan was computed from.
    pub from: CallLine,
    /// Snapshot the line will hold after the transition.
    pub to: CallLine,
    /// Event that triggered this transition.
    pub event: LineEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// State machine guarding the lifecycle of one call line.
#[derive(Debug, Clone)]
pub struct CallLineMachine {
    line: CallLine,
    version: usize,
    pending: Option<LinePlan>,
}

impl CallLineMachine {
    /// Create a machine for a freshly provisioned (inactive) line.
    pub fn new(studio: StudioId, line: u8) -> Self {
        Self {
            line: CallLine::inactive(studio, line),
            version: 0,
            pending: None,
        }
    }

    /// Current snapshot of the line.
    pub fn current(&self) -> &CallLine {
        &self.line
    }

    /// Whether a planned transition is waiting to be applied or aborted.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Plan a transition by validating the event against the current status.
    ///
    /// `now_ms` stamps `start_time` and `updated_at` on the resulting
    /// snapshot.
    pub fn plan(&mut self, event: LineEvent, now_ms: i64) -> Result<LinePlan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let to = compute_transition(&self.line, event.clone(), now_ms)
            .map_err(PlanError::InvalidTransition)?;

        let plan = LinePlan {
            id: Uuid::new_v4(),
            from: self.line.clone(),
            to,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Commit a planned transition, returning the new snapshot.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<CallLine, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.line != plan.from {
            return Err(ApplyError::StateMismatch {
                expected: plan.from,
                actual: self.line.clone(),
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.line = plan.to;
        self.version = plan.version_next;
        Ok(self.line.clone())
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Overwrite the local snapshot with an authoritative one from the Store.
    ///
    /// Returns `true` when the snapshot actually changed. Snapshots whose
    /// `updated_at` is older than the held one are ignored, which keeps
    /// reconciliation monotonic under duplicate/out-of-order delivery.
    pub fn reconcile(&mut self, snapshot: CallLine) -> bool {
        if snapshot.updated_at < self.line.updated_at {
            return false;
        }
        if snapshot == self.line {
            return false;
        }

        self.line = snapshot;
        self.version += 1;
        true
    }
}

/// Compute the snapshot resulting from applying `event`, if the transition is
/// valid from the line's current status.
fn compute_transition(
    line: &CallLine,
    event: LineEvent,
    now_ms: i64,
) -> Result<CallLine, InvalidTransition> {
    use LineStatus::*;

    let mut next = line.clone();
    match (line.status, event) {
        (Inactive, LineEvent::Dial { number }) => {
            next.status = Ringing;
            next.phone_number = number;
            next.start_time = Some(now_ms);
        }
        (Ringing, LineEvent::Connect) => next.status = Active,
        (Active, LineEvent::Hold) => next.status = Holding,
        (Holding, LineEvent::Resume) => next.status = Active,
        (Active | Holding, LineEvent::SendToAir) => next.status = OnAir,
        (OnAir, LineEvent::TakeOffAir) => next.status = Active,
        (Ringing | Active | Holding | OnAir, LineEvent::Hangup) => {
            next.status = Inactive;
            next.phone_number.clear();
            next.caller_name.clear();
            next.notes.clear();
            next.start_time = None;
            next.audio_levels = AudioLevels::default();
        }
        (from, event) => return Err(InvalidTransition { from, event }),
    }

    next.updated_at = now_ms;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(machine: &mut CallLineMachine, event: LineEvent, now_ms: i64) -> CallLine {
        let plan = machine.plan(event, now_ms).unwrap();
        machine.apply(plan.id).unwrap()
    }

    #[test]
    fn provisioned_line_starts_inactive() {
        let machine = CallLineMachine::new(StudioId::from("studio-b"), 5);
        assert_eq!(machine.current().status, LineStatus::Inactive);
        assert_eq!(machine.current().start_time, None);
    }

    #[test]
    fn full_call_lifecycle() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-b"), 5);

        let ringing = apply(
            &mut machine,
            LineEvent::Dial {
                number: "5551234".into(),
            },
            100,
        );
        assert_eq!(ringing.status, LineStatus::Ringing);
        assert_eq!(ringing.phone_number, "5551234");
        assert_eq!(ringing.start_time, Some(100));

        assert_eq!(
            apply(&mut machine, LineEvent::Connect, 200).status,
            LineStatus::Active
        );
        assert_eq!(
            apply(&mut machine, LineEvent::Hold, 300).status,
            LineStatus::Holding
        );
        assert_eq!(
            apply(&mut machine, LineEvent::SendToAir, 400).status,
            LineStatus::OnAir
        );

        let reset = apply(&mut machine, LineEvent::Hangup, 500);
        assert_eq!(reset.status, LineStatus::Inactive);
        assert_eq!(reset.phone_number, "");
        assert_eq!(reset.caller_name, "");
        assert_eq!(reset.start_time, None);
    }

    #[test]
    fn air_toggles_back_to_active() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        apply(&mut machine, LineEvent::Dial { number: "1".into() }, 1);
        apply(&mut machine, LineEvent::Connect, 2);
        apply(&mut machine, LineEvent::SendToAir, 3);
        assert_eq!(
            apply(&mut machine, LineEvent::TakeOffAir, 4).status,
            LineStatus::Active
        );
    }

    #[test]
    fn send_to_air_rejected_while_inactive() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 2);
        let err = machine.plan(LineEvent::SendToAir, 10).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, LineStatus::Inactive);
                assert_eq!(invalid.event, LineEvent::SendToAir);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(machine.current().status, LineStatus::Inactive);
    }

    #[test]
    fn dial_rejected_on_busy_line() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        apply(&mut machine, LineEvent::Dial { number: "1".into() }, 1);

        let err = machine
            .plan(LineEvent::Dial { number: "2".into() }, 2)
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
        assert_eq!(machine.current().phone_number, "1");
    }

    #[test]
    fn hold_rejected_while_ringing() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        apply(&mut machine, LineEvent::Dial { number: "1".into() }, 1);
        assert!(matches!(
            machine.plan(LineEvent::Hold, 2),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn abort_keeps_previous_state() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        let plan = machine
            .plan(LineEvent::Dial { number: "5".into() }, 1)
            .unwrap();
        machine.abort(plan.id).unwrap();
        assert_eq!(machine.current().status, LineStatus::Inactive);
        assert!(!machine.has_pending());
    }

    #[test]
    fn apply_fails_after_remote_reconcile() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        let plan = machine
            .plan(LineEvent::Dial { number: "5".into() }, 1)
            .unwrap();

        let mut remote = CallLine::inactive(StudioId::from("studio-1"), 0);
        remote.status = LineStatus::Ringing;
        remote.phone_number = "999".into();
        remote.updated_at = 50;
        assert!(machine.reconcile(remote));

        assert!(matches!(
            machine.apply(plan.id),
            Err(ApplyError::StateMismatch { .. })
        ));
    }

    #[test]
    fn reconcile_ignores_older_snapshots() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        apply(&mut machine, LineEvent::Dial { number: "5".into() }, 100);

        let stale = CallLine::inactive(StudioId::from("studio-1"), 0);
        assert!(!machine.reconcile(stale));
        assert_eq!(machine.current().status, LineStatus::Ringing);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut machine = CallLineMachine::new(StudioId::from("studio-1"), 0);
        let snapshot = apply(&mut machine, LineEvent::Dial { number: "5".into() }, 100);
        assert!(!machine.reconcile(snapshot));
    }

    #[test]
    fn level_only_delta_detected() {
        let a = CallLine::inactive(StudioId::from("studio-1"), 0);
        let mut b = a.clone();
        b.audio_levels.input = 0.7;
        b.updated_at = 10;
        assert!(a.differs_only_in_levels(&b));

        let mut c = b.clone();
        c.status = LineStatus::Ringing;
        assert!(!a.differs_only_in_levels(&c));
    }
}
