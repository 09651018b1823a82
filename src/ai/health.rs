//! Transport Health
//!
//! Circuit-breaker style tracking of the model transport across all workers
//! of a run. Rate limits and timeouts are ordinary weather; only calls that
//! exhaust their retries on `Unavailable` count toward losing the transport.
//!
//! ```text
//! Healthy --[unavailable exhaustion]--> Degraded
//! Degraded --[success]--> Healthy
//! Degraded --[threshold reached]--> Lost (terminal for the run)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::constants::transport as transport_constants;
use crate::types::TransportErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Lost,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Lost => write!(f, "LOST"),
        }
    }
}

#[derive(Debug)]
pub struct TransportHealth {
    loss_threshold: u32,
    consecutive_unavailable: AtomicU32,
    lost: AtomicBool,
}

impl Default for TransportHealth {
    fn default() -> Self {
        Self::new(transport_constants::LOSS_THRESHOLD)
    }
}

impl TransportHealth {
    pub fn new(loss_threshold: u32) -> Self {
        Self {
            loss_threshold: loss_threshold.max(1),
            consecutive_unavailable: AtomicU32::new(0),
            lost: AtomicBool::new(false),
        }
    }

    pub fn record_success(&self) {
        if !self.is_lost() {
            self.consecutive_unavailable.store(0, Ordering::SeqCst);
        }
    }

    /// Record a call that gave up with `kind`; returns true once the transport is lost
    pub fn record_exhausted(&self, kind: TransportErrorKind) -> bool {
        if kind != TransportErrorKind::Unavailable {
            return self.is_lost();
        }
        let failures = self.consecutive_unavailable.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.loss_threshold {
            self.lost.store(true, Ordering::SeqCst);
        }
        self.is_lost()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_unavailable.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> HealthState {
        if self.is_lost() {
            HealthState::Lost
        } else if self.consecutive_failures() > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let h = TransportHealth::new(3);
        assert_eq!(h.state(), HealthState::Healthy);
        assert!(!h.is_lost());
    }

    #[test]
    fn test_rate_limits_do_not_count() {
        let h = TransportHealth::new(2);
        for _ in 0..10 {
            assert!(!h.record_exhausted(TransportErrorKind::RateLimited));
            assert!(!h.record_exhausted(TransportErrorKind::Timeout));
        }
        assert_eq!(h.state(), HealthState::Healthy);
    }

    #[test]
    fn test_unavailable_reaches_lost() {
        let h = TransportHealth::new(2);
        assert!(!h.record_exhausted(TransportErrorKind::Unavailable));
        assert_eq!(h.state(), HealthState::Degraded);
        assert!(h.record_exhausted(TransportErrorKind::Unavailable));
        assert_eq!(h.state(), HealthState::Lost);
        // Lost is terminal
        h.record_success();
        assert!(h.is_lost());
    }

    #[test]
    fn test_success_resets_streak() {
        let h = TransportHealth::new(2);
        h.record_exhausted(TransportErrorKind::Unavailable);
        h.record_success();
        assert_eq!(h.consecutive_failures(), 0);
        assert!(!h.record_exhausted(TransportErrorKind::Unavailable));
    }
}
