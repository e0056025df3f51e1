//! Pairing manager: the single outstanding QR challenge and its expiry.
//!
//! Pure bookkeeping. The connection manager owns the actual timer; each accepted challenge gets
//! a fresh epoch so a late timer for an older challenge can be recognised and dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingChallenge {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PairingChallenge {
    /// Whole seconds of validity left, never negative.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }
}

/// Read-only projection for status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingView {
    pub present: bool,
    pub seconds_remaining: u64,
}

impl PairingView {
    pub fn of(challenge: Option<&PairingChallenge>, now: DateTime<Utc>) -> Self {
        match challenge {
            Some(c) => Self {
                present: true,
                seconds_remaining: c.seconds_remaining(now),
            },
            None => Self {
                present: false,
                seconds_remaining: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Stored; arm a timer for `expires_in` tagged with `epoch`.
    Accepted { epoch: u64, expires_in: Duration },
    /// A challenge is already outstanding and stays in place.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct PairingManager {
    current: Option<PairingChallenge>,
    epoch: u64,
    expiry: Duration,
}

impl Default for PairingManager {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl PairingManager {
    pub fn new(expiry: Duration) -> Self {
        Self {
            current: None,
            epoch: 0,
            expiry,
        }
    }

    /// Accept `token` unless a challenge is already outstanding (first challenge wins).
    pub fn offer(&mut self, token: impl Into<String>, now: DateTime<Utc>) -> Offer {
        if self.current.is_some() {
            return Offer::Rejected;
        }
        let ttl = chrono::Duration::from_std(self.expiry).unwrap_or(chrono::Duration::seconds(60));
        self.epoch += 1;
        self.current = Some(PairingChallenge {
            token: token.into(),
            issued_at: now,
            expires_at: now + ttl,
        });
        Offer::Accepted {
            epoch: self.epoch,
            expires_in: self.expiry,
        }
    }

    /// Clear the outstanding challenge and invalidate its timer. Returns whether one was present.
    /// Safe to call when nothing is outstanding.
    pub fn consume(&mut self) -> bool {
        self.epoch += 1;
        self.current.take().is_some()
    }

    /// True while `epoch` still names the outstanding challenge.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.current.is_some() && self.epoch == epoch
    }

    pub fn current(&self) -> Option<&PairingChallenge> {
        self.current.as_ref()
    }

    pub fn view(&self, now: DateTime<Utc>) -> PairingView {
        PairingView::of(self.current.as_ref(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn second_offer_keeps_first_challenge() {
        let mut pm = PairingManager::default();
        let first = pm.offer("ABC", t0());
        assert!(matches!(first, Offer::Accepted { expires_in, .. } if expires_in == DEFAULT_EXPIRY));
        let second = pm.offer("XYZ", t0() + chrono::Duration::seconds(20));
        assert_eq!(second, Offer::Rejected);
        let current = pm.current().expect("challenge");
        assert_eq!(current.token, "ABC");
        assert_eq!(current.issued_at, t0());
    }

    #[test]
    fn consume_is_idempotent_and_reopens_offers() {
        let mut pm = PairingManager::default();
        assert!(!pm.consume());
        pm.offer("ABC", t0());
        assert!(pm.consume());
        assert!(!pm.consume());
        assert!(matches!(pm.offer("XYZ", t0()), Offer::Accepted { .. }));
        assert_eq!(pm.current().map(|c| c.token.as_str()), Some("XYZ"));
    }

    #[test]
    fn stale_epoch_is_not_current() {
        let mut pm = PairingManager::default();
        let Offer::Accepted { epoch: first, .. } = pm.offer("ABC", t0()) else {
            panic!("first offer must be accepted");
        };
        assert!(pm.is_current(first));
        pm.consume();
        let Offer::Accepted { epoch: second, .. } = pm.offer("XYZ", t0()) else {
            panic!("offer after consume must be accepted");
        };
        assert!(!pm.is_current(first));
        assert!(pm.is_current(second));
    }

    #[test]
    fn view_counts_down_and_clamps_at_zero() {
        let mut pm = PairingManager::new(Duration::from_secs(60));
        assert_eq!(
            pm.view(t0()),
            PairingView {
                present: false,
                seconds_remaining: 0
            }
        );
        pm.offer("ABC", t0());
        assert_eq!(pm.view(t0() + chrono::Duration::seconds(15)).seconds_remaining, 45);
        let late = pm.view(t0() + chrono::Duration::seconds(90));
        assert!(late.present);
        assert_eq!(late.seconds_remaining, 0);
    }
}
