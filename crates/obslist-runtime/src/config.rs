#![forbid(unsafe_code)]

//! Batching configuration.

use web_time::Duration;

/// Throttling parameters of a [`BatchUpdater`](crate::BatchUpdater).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BatchConfig {
    /// Minimum time between two flushes.
    /// Default: 250ms.
    pub period: Duration,

    /// Minimum time between the first request and the first flush.
    /// Default: zero.
    pub initial_delay: Duration,
}

impl BatchConfig {
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(250);

    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}
