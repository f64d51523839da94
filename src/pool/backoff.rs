//! Backoff curves for rate-limited credentials.
//!
//! A credential that keeps hitting rate limits or server faults is parked
//! until `now + delay_for_attempt(retry_count)`. Four curves are supported,
//! all capped at a configurable maximum:
//!
//! - `exponential` (default): `base^attempt` seconds
//! - `linear`: `base * attempt`
//! - `fixed`: `base`
//! - `jittered`: exponential plus a deterministic pseudo-jitter spread

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Linear,
    Fixed,
    Jittered,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackoffKind::Exponential => "exponential",
            BackoffKind::Linear => "linear",
            BackoffKind::Fixed => "fixed",
            BackoffKind::Jittered => "jittered",
        };
        write!(f, "{s}")
    }
}

/// Configuration for credential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub kind: BackoffKind,
    /// Curve base in seconds.
    pub base_secs: f64,
    /// Cap applied to every curve, in seconds.
    pub max_secs: f64,
    /// Jitter spread as a fraction of the capped delay (jittered kind only).
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_secs: 2.0,
            max_secs: 300.0,
            jitter_fraction: 0.25,
        }
    }
}

// ── Computation ──────────────────────────────────────────────────────────────

/// Delay before a credential's next retry, for `attempt` (1-indexed: the
/// first failure computes `delay_for_attempt(1)`).
///
/// Non-jittered curves are non-decreasing in `attempt` and never exceed
/// `max_secs`; the jittered curve stays within `±jitter_fraction/2` of the
/// capped exponential value.
pub fn delay_for_attempt(attempt: u32, config: &BackoffConfig) -> Duration {
    let base = config.base_secs;
    let raw = match config.kind {
        BackoffKind::Fixed => base,
        BackoffKind::Linear => base * attempt as f64,
        BackoffKind::Exponential | BackoffKind::Jittered => base.powi(attempt as i32),
    };
    let capped = raw.min(config.max_secs).max(0.0);

    let secs = match config.kind {
        BackoffKind::Jittered => {
            let spread = capped * config.jitter_fraction;
            (capped + pseudo_rand(attempt) * spread).max(0.0)
        }
        _ => capped,
    };

    Duration::from_secs_f64(secs)
}

// ── Pseudo-random helper (no external dependency) ────────────────────────────

/// Produce a float in [-0.5, 0.5) using a simple LCG seeded by `attempt`.
/// This avoids adding a `rand` dependency for a small jitter spread.
pub(crate) fn pseudo_rand(attempt: u32) -> f64 {
    // LCG parameters (Numerical Recipes)
    const A: u64 = 1_664_525;
    const C: u64 = 1_013_904_223;
    const M: u64 = 1u64 << 32;
    let state = A.wrapping_mul(attempt as u64).wrapping_add(C) % M;
    // Map to [-0.5, 0.5)
    (state as f64 / M as f64) - 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg(kind: BackoffKind) -> BackoffConfig {
        BackoffConfig {
            kind,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn exponential_follows_power_curve() {
        let c = cfg(BackoffKind::Exponential);
        assert_eq!(delay_for_attempt(1, &c), Duration::from_secs_f64(2.0));
        assert_eq!(delay_for_attempt(2, &c), Duration::from_secs_f64(4.0));
        assert_eq!(delay_for_attempt(3, &c), Duration::from_secs_f64(8.0));
    }

    #[test]
    fn linear_and_fixed_curves() {
        let lin = cfg(BackoffKind::Linear);
        assert_eq!(delay_for_attempt(3, &lin), Duration::from_secs_f64(6.0));
        let fix = cfg(BackoffKind::Fixed);
        assert_eq!(delay_for_attempt(1, &fix), delay_for_attempt(9, &fix));
    }

    #[test]
    fn capped_at_max() {
        let c = cfg(BackoffKind::Exponential);
        // 2^20 seconds would be days; the cap holds it to max_secs.
        let d = delay_for_attempt(20, &c);
        assert_eq!(d, Duration::from_secs_f64(c.max_secs));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let c = cfg(BackoffKind::Jittered);
        for attempt in 1..12 {
            let plain = delay_for_attempt(attempt, &cfg(BackoffKind::Exponential)).as_secs_f64();
            let jittered = delay_for_attempt(attempt, &c).as_secs_f64();
            let spread = plain * c.jitter_fraction / 2.0 + f64::EPSILON;
            assert!(
                (jittered - plain).abs() <= spread + 1e-9,
                "attempt {attempt}: {jittered}s outside {plain}s ± {spread}s"
            );
        }
    }

    proptest! {
        /// Exponential and linear delays never decrease as attempts grow,
        /// and never exceed the cap.
        #[test]
        fn monotonic_and_capped(
            base in 1.0f64..8.0,
            max in 10.0f64..600.0,
            kind in prop::sample::select(vec![BackoffKind::Exponential, BackoffKind::Linear]),
        ) {
            let c = BackoffConfig { kind, base_secs: base, max_secs: max, jitter_fraction: 0.25 };
            let mut prev = Duration::ZERO;
            for attempt in 1..16u32 {
                let d = delay_for_attempt(attempt, &c);
                prop_assert!(d >= prev, "delay decreased at attempt {}", attempt);
                prop_assert!(d.as_secs_f64() <= max + 1e-9, "delay exceeded cap");
                prev = d;
            }
        }
    }
}
