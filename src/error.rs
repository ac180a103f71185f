use thiserror::Error;

use crate::{
    state::{
        AbortError, ApplyError, PlanError,
        call_line::InvalidTransition,
        studio::StudioId,
    },
    store::error::StoreError,
};

/// Errors surfaced by engine operations.
///
/// Transport-level failures never appear here: the push channel recovers on
/// its own (backoff, then the polling fallback) and only flips the degraded
/// indicator. Stale history replays are silently dropped, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A State Store write was rejected or timed out. The local optimistic
    /// state is kept (except for gated pre-writes); the action can be retried.
    #[error("state store write failed: {0}")]
    WriteFailed(#[source] StoreError),
    /// A state-machine guard rejected the transition; no network call was
    /// issued.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
    /// The operation conflicts with an in-flight or reconciled state change.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The referenced studio or line is not provisioned for this session.
    #[error("not found: {0}")]
    NotFound(String),
    /// The studio is outside this client's access scope.
    #[error("studio `{0}` is outside this session's scope")]
    OutOfScope(StudioId),
    /// The operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl EngineError {
    /// Whether the caller should offer a retry for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WriteFailed(_) | EngineError::Timeout)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::WriteFailed(err)
    }
}

impl From<PlanError> for EngineError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                EngineError::InvalidState("line transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => EngineError::InvalidTransition(invalid),
        }
    }
}

impl From<ApplyError> for EngineError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => EngineError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                EngineError::InvalidState("pending transition does not match".into())
            }
            ApplyError::StateMismatch { expected, actual } => EngineError::InvalidState(format!(
                "line changed during transition (expected {:?}, got {:?})",
                expected.status, actual.status
            )),
            ApplyError::VersionMismatch { expected, actual } => EngineError::InvalidState(format!(
                "line version mismatch during transition (expected {expected}, got {actual})"
            )),
        }
    }
}

impl From<AbortError> for EngineError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => EngineError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                EngineError::InvalidState("transition plan does not match".into())
            }
        }
    }
}
