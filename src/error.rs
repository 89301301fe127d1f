//! Error taxonomy for the call-state engine.
//!
//! Five kinds, matching the engine's error handling design: a transport
//! failure halts the correlator outright, an action failure is surfaced to
//! the caller of a supervisor operation, a parse warning is logged and
//! otherwise swallowed, a sink failure is logged but does not unwind the
//! at-most-once marker, and an invariant violation is logged but the
//! offending handler still runs its cleanup.

use thiserror::Error;

/// Errors produced anywhere in the engine.
#[derive(Debug, Error)]
pub enum CallCenterError {
    /// The AMI connection closed, the login was refused, or a read/write
    /// failed in a way that cannot be recovered from inside the engine.
    #[error("AMI transport failed: {0}")]
    Transport(String),

    /// An AMI action returned `Response: Error`.
    #[error("AMI action failed: {0}")]
    ActionFailure(String),

    /// A frame was malformed or missing fields the handler needed.
    #[error("event parse warning: {0}")]
    EventParseWarning(String),

    /// A sink (CRM publisher or notification recorder) failed to accept
    /// or deliver a record.
    #[error("sink failed: {0}")]
    SinkFailure(String),

    /// The correlator observed state that should be impossible (e.g. a
    /// hangup for a channel it never saw created).
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Configuration could not be loaded or was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CallCenterError>;

impl From<std::io::Error> for CallCenterError {
    fn from(e: std::io::Error) -> Self {
        CallCenterError::Transport(e.to_string())
    }
}
