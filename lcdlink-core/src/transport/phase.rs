//! Link state machine.
//!
//! Models the lifecycle of one USB link, with validated transitions that
//! return `Result` instead of panicking.

use std::time::{Duration, Instant};

use crate::error::LcdError;

/// The current phase of a [`TransportLink`](super::TransportLink).
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲                │              │
///       └────────────────┴──────────────┘   (failure / disconnect)
///
///  any ──► Closed                           (explicit shutdown, terminal)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// No device open. Initial state, and the state after a failure.
    #[default]
    Disconnected,

    /// Enumerating and opening a device.
    Connecting,

    /// Device open and interface claimed.
    Connected {
        /// When the link entered the `Connected` state.
        since: Instant,
    },

    /// Shut down for good.
    Closed,
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl LinkPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the link has been `Connected`; `None` in any other phase.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), LcdError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            Self::Closed => Err(LcdError::InvalidTransition(
                "cannot connect: link is closed",
            )),
            _ => Err(LcdError::InvalidTransition(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), LcdError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(LcdError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Back to `Disconnected` after a failed connect, a failed write or
    /// a deliberate device switch.
    ///
    /// Valid from: `Connecting`, `Connected`.
    pub fn disconnect(&mut self) -> Result<(), LcdError> {
        match self {
            Self::Connecting | Self::Connected { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(LcdError::InvalidTransition(
                "cannot disconnect: not in Connecting or Connected state",
            )),
        }
    }

    /// Terminal. Valid from any state.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut p = LinkPhase::default();
        p.begin_connect().unwrap();
        assert_eq!(p, LinkPhase::Connecting);
        p.complete_connect().unwrap();
        assert!(p.is_connected());
        assert!(p.connected_duration().is_some());
        p.disconnect().unwrap();
        assert_eq!(p, LinkPhase::Disconnected);
    }

    #[test]
    fn failed_connect_returns_to_disconnected() {
        let mut p = LinkPhase::default();
        p.begin_connect().unwrap();
        p.disconnect().unwrap();
        assert!(p.begin_connect().is_ok());
    }

    #[test]
    fn invalid_transitions() {
        let mut p = LinkPhase::default();
        assert!(p.complete_connect().is_err());
        assert!(p.disconnect().is_err());

        p.begin_connect().unwrap();
        assert!(matches!(
            p.begin_connect(),
            Err(LcdError::InvalidTransition(_))
        ));
    }

    #[test]
    fn closed_is_terminal() {
        let mut p = LinkPhase::default();
        p.close();
        assert!(p.is_closed());
        assert!(p.begin_connect().is_err());
        assert!(p.disconnect().is_err());
        assert_eq!(p.to_string(), "Closed");
    }
}
