//! Domain-specific error types for the display pipeline.
//!
//! All fallible operations return `Result<T, LcdError>`.
//! The end of a finite source is not an error: it is reported as
//! [`SourceEvent::EndOfCycle`](crate::source::SourceEvent::EndOfCycle).

use std::time::Duration;
use thiserror::Error;

use crate::profile::{DeviceId, Resolution};

/// The canonical error type for the display pipeline.
#[derive(Debug, Error)]
pub enum LcdError {
    // ── Source Errors ────────────────────────────────────────────
    /// The backing file, directory or window could not be opened or decoded.
    #[error("source unavailable ({locator}): {reason}")]
    SourceUnavailable { locator: String, reason: String },

    // ── Pipeline Errors ──────────────────────────────────────────
    /// A frame reached the encoder at the wrong size. Indicates broken wiring
    /// upstream; the transform stage must never let this happen.
    #[error("resolution mismatch: expected {expected}, got {actual}")]
    ResolutionMismatch {
        expected: Resolution,
        actual: Resolution,
    },

    /// An encoded frame was produced for a different device than the one
    /// the link is connected to.
    #[error("encoded frame belongs to {actual}, link is connected to {expected}")]
    ProfileMismatch { expected: DeviceId, actual: DeviceId },

    /// A display or service setting is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The USB link failed mid-stream; the scheduler reconnects.
    #[error("link lost: {0}")]
    LinkLost(String),

    /// No attached device matched the registry and selector.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but its interface is claimed by another process.
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// A state machine was asked for a transition it does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The filesystem or OS layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl LcdError {
    /// Shorthand for [`LcdError::SourceUnavailable`].
    pub fn source_unavailable(locator: impl Into<String>, reason: impl ToString) -> Self {
        LcdError::SourceUnavailable {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the scheduler should back off and reconnect rather than
    /// give up on the current pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LcdError::LinkLost(_)
                | LcdError::DeviceNotFound(_)
                | LcdError::DeviceBusy(_)
                | LcdError::Timeout(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for LcdError {
    fn from(s: String) -> Self {
        LcdError::Other(s)
    }
}

impl From<&str> for LcdError {
    fn from(s: &str) -> Self {
        LcdError::Other(s.to_string())
    }
}
