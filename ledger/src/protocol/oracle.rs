//! Admission oracle: the stand-in for an external identity check that
//! decides validator admission requests.
//!
//! The node asks the oracle how long to wait before answering and whether
//! to accept. A zero delay makes the node answer inline, which is what
//! tests rely on.

use std::time::Duration;

use rand::Rng;

use crate::types::Address;

/// Parameters for admitting new validators.
#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    /// Reputation granted to newly admitted validators. Must be positive for
    /// them to countersign.
    pub initial_reputation: f64,
    /// Upper bound of the random approval delay.
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the granted energy capacity.
    pub max_capacity: f64,
    /// Upper bound (exclusive) of the granted energy rate.
    pub max_rate: f64,
    /// Probability that a request is accepted.
    pub accept_probability: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            initial_reputation: 1.0,
            max_delay: Duration::from_millis(1000),
            max_capacity: 20.0,
            max_rate: 10.0,
            accept_probability: 0.5,
        }
    }
}

/// Terms an approved validator is admitted with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Grant {
    pub energy_capacity: f64,
    pub energy_rate: f64,
}

/// Decides validator admission requests.
pub trait ApprovalOracle: Send + Sync {
    /// How long to wait before answering a request.
    fn delay(&self) -> Duration;

    /// `Some` admits `candidate` on the returned terms, `None` rejects it.
    fn decide(&self, candidate: &Address) -> Option<Grant>;
}

/// Coin-flip oracle with a random delay and random terms.
#[derive(Clone, Debug)]
pub struct RandomApprovalOracle {
    cfg: AdmissionConfig,
}

impl RandomApprovalOracle {
    pub fn new(cfg: AdmissionConfig) -> Self {
        Self { cfg }
    }
}

impl ApprovalOracle for RandomApprovalOracle {
    fn delay(&self) -> Duration {
        let max = u64::try_from(self.cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max))
    }

    fn decide(&self, _candidate: &Address) -> Option<Grant> {
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.cfg.accept_probability.clamp(0.0, 1.0)) {
            return None;
        }
        Some(Grant {
            energy_capacity: two_decimals(rng.gen_range(0.0..self.cfg.max_capacity.max(f64::EPSILON))),
            energy_rate: two_decimals(rng.gen_range(0.0..self.cfg.max_rate.max(f64::EPSILON))),
        })
    }
}

/// Deterministic oracle with a fixed decision, answering immediately unless
/// given a delay.
#[derive(Clone, Copy, Debug)]
pub struct StaticApprovalOracle {
    pub grant: Option<Grant>,
    pub delay: Duration,
}

impl StaticApprovalOracle {
    pub fn accepting(energy_capacity: f64, energy_rate: f64) -> Self {
        Self {
            grant: Some(Grant {
                energy_capacity,
                energy_rate,
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            grant: None,
            delay: Duration::ZERO,
        }
    }

    /// Same decision, given only after `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

impl ApprovalOracle for StaticApprovalOracle {
    fn delay(&self) -> Duration {
        self.delay
    }

    fn decide(&self, _candidate: &Address) -> Option<Grant> {
        self.grant
    }
}

fn two_decimals(x: f64) -> f64 {
    (x * 100.0).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_terms_stay_in_range() {
        let oracle = RandomApprovalOracle::new(AdmissionConfig {
            accept_probability: 1.0,
            ..AdmissionConfig::default()
        });
        for _ in 0..50 {
            let grant = oracle.decide(&Address::new("x")).expect("always accepts");
            assert!((0.0..20.0).contains(&grant.energy_capacity));
            assert!((0.0..10.0).contains(&grant.energy_rate));
            assert!(oracle.delay() < Duration::from_millis(1000));
        }
    }

    #[test]
    fn zero_probability_always_rejects() {
        let oracle = RandomApprovalOracle::new(AdmissionConfig {
            accept_probability: 0.0,
            max_delay: Duration::ZERO,
            ..AdmissionConfig::default()
        });
        assert!(oracle.decide(&Address::new("x")).is_none());
        assert_eq!(oracle.delay(), Duration::ZERO);
    }

    #[test]
    fn static_oracle_is_immediate() {
        let oracle = StaticApprovalOracle::accepting(12.0, 3.0);
        assert_eq!(oracle.delay(), Duration::ZERO);
        assert_eq!(
            oracle.decide(&Address::new("x")),
            Some(Grant {
                energy_capacity: 12.0,
                energy_rate: 3.0
            })
        );
        assert!(StaticApprovalOracle::rejecting().decide(&Address::new("x")).is_none());

        let slow = StaticApprovalOracle::rejecting().with_delay(Duration::from_millis(300));
        assert_eq!(slow.delay(), Duration::from_millis(300));
        assert!(slow.decide(&Address::new("x")).is_none());
    }
}
