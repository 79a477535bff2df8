//! Configuration loading and representation.

use std::time::Duration;

/// Tunables for the negotiation core.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// How long a counter-offer stays actionable after submission.
    pub offer_window: chrono::Duration,
    /// Fixed interval between background expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            offer_window: chrono::Duration::hours(24),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl NegotiationConfig {
    /// Read overrides from the environment, falling back to defaults.
    ///
    /// - `COUNTER_OFFER_WINDOW_HOURS`
    /// - `EXPIRY_SWEEP_INTERVAL_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let offer_window = std::env::var("COUNTER_OFFER_WINDOW_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|h| *h > 0)
            .map(chrono::Duration::hours)
            .unwrap_or(defaults.offer_window);

        let sweep_interval = std::env::var("EXPIRY_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        Self {
            offer_window,
            sweep_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_24h_window_and_60s_sweep() {
        let config = NegotiationConfig::default();
        assert_eq!(config.offer_window, chrono::Duration::hours(24));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
