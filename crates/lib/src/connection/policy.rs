//! Reconnect policy: how long to wait before the next attempt, and whether to try at all.

use crate::config::ReconnectConfig;
use crate::connection::state::DisconnectCause;
use std::time::Duration;

/// Pure backoff calculator. Jitter is an explicit input, never hidden state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    base: Duration,
    growth: f64,
    max_exponent: u32,
    ceiling: Duration,
    pairing_expired_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(3),
            1.5,
            5,
            Duration::from_secs(30),
            Duration::from_secs(3),
        )
    }
}

fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

impl ReconnectPolicy {
    pub fn new(
        base: Duration,
        growth: f64,
        max_exponent: u32,
        ceiling: Duration,
        pairing_expired_delay: Duration,
    ) -> Self {
        Self {
            base,
            growth: if growth.is_finite() { growth.max(1.0) } else { 1.0 },
            max_exponent,
            ceiling,
            pairing_expired_delay,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        let defaults = Self::default();
        Self::new(
            secs(config.base_seconds, defaults.base),
            config.growth,
            config.max_exponent,
            secs(config.ceiling_seconds, defaults.ceiling),
            secs(
                config.pairing_expired_delay_seconds,
                defaults.pairing_expired_delay,
            ),
        )
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Every cause except `LoggedOut` is worth another attempt.
    pub fn should_retry(&self, cause: DisconnectCause) -> bool {
        cause != DisconnectCause::LoggedOut
    }

    /// Delay before reconnecting after `attempt` failed attempts ended by `cause`.
    ///
    /// Pairing expiry gets the short fixed delay; everything else backs off exponentially up to
    /// `max_exponent` and never exceeds the ceiling, jitter included.
    pub fn delay(&self, attempt: u32, cause: DisconnectCause, jitter: Option<Duration>) -> Duration {
        let delay = match cause {
            DisconnectCause::PairingExpired => self.pairing_expired_delay,
            _ => {
                let exponent = attempt.min(self.max_exponent) as i32;
                let scaled = self.base.as_secs_f64() * self.growth.powi(exponent);
                secs(scaled, self.ceiling)
            }
        };
        delay
            .saturating_add(jitter.unwrap_or_default())
            .min(self.ceiling)
    }
}
