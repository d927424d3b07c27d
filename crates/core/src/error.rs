use thiserror::Error;

use crate::records::InterruptReasonKind;

/// Errors that can terminate a single `drive()` invocation. A closed
/// variant instead of a generic throwable: callers match on it directly
/// instead of catching and re-classifying.
#[derive(Debug, Error)]
pub enum DriveError {
    /// The drive was interrupted: user/emergency/system stop, or an LLM
    /// rejection that was converted to a system stop.
    #[error("dialog interrupted: {0:?}")]
    Interrupted(InterruptReasonKind),

    /// A data-path persistence operation failed (pending/response queues,
    /// Q4H registration) — these propagate, unlike metadata-only failures
    /// which are warn-logged and swallowed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Missing/invalid provider, model, or generator configuration. Always
    /// fatal and immediate.
    #[error("configuration error: {0}")]
    Config(String),

    /// A policy invariant that should be structurally unreachable was
    /// violated — e.g. an FBR-toolless dialog building a policy with tools
    /// still attached. Distinguished from `Config` because it indicates a
    /// bug in drive-policy construction, not bad user input.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// The dialog was already being driven and the caller passed
    /// `wait_in_queue = false`.
    #[error("dialog is busy")]
    Busy,
}

impl DriveError {
    pub fn as_interrupt(&self) -> Option<&InterruptReasonKind> {
        match self {
            DriveError::Interrupted(reason) => Some(reason),
            _ => None,
        }
    }
}

pub type DriveResult<T> = Result<T, DriveError>;
