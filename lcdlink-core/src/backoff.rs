//! Bounded exponential backoff between reconnect attempts.

use std::time::Duration;

use crate::config::LinkSettings;

/// Doubles the delay after every attempt, up to `max`.
///
/// Attempts are never capped: the scheduler keeps retrying for as long as
/// it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
            attempts: 0,
        }
    }

    pub fn from_settings(link: &LinkSettings) -> Self {
        Self::new(link.backoff_initial(), link.backoff_max())
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn peek(&self) -> Duration {
        self.next
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&LinkSettings::default())
    }
}
