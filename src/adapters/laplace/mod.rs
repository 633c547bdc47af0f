//! Laplace adapter: Implementation of CountObfuscation.
//!
//! Provides the Laplace mechanism for obfuscating raw counts before they
//! leave the privacy boundary.
//!
//! # Mutex Behavior
//!
//! This adapter uses `Mutex` for thread-safe RNG access. A poisoned mutex
//! (from a panic in another thread) fails closed by returning an error.
//! The pipeline treats this as a privacy-critical failure.

use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::ports::{CountObfuscation, ObfuscationError};

/// Configuration for the privacy transform.
#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    /// Epsilon assigned to checks that declare none.
    pub default_epsilon: f64,

    /// Raw counts in `1..low_count_threshold` are released as 0 without a
    /// noise draw, so repeated queries cannot reliably leak small
    /// populations. 0 disables suppression.
    pub low_count_threshold: u64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            default_epsilon: 1.0,
            low_count_threshold: 5,
        }
    }
}

impl PrivacyConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - FHIRPROBE_DP_DEFAULT_EPSILON
    /// - FHIRPROBE_DP_LOW_COUNT_THRESHOLD
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FHIRPROBE_DP_DEFAULT_EPSILON") {
            if let Ok(x) = v.trim().parse::<f64>() {
                if x.is_finite() && x > 0.0 {
                    cfg.default_epsilon = x;
                }
            }
        }

        if let Ok(v) = std::env::var("FHIRPROBE_DP_LOW_COUNT_THRESHOLD") {
            if let Ok(x) = v.trim().parse::<u64>() {
                cfg.low_count_threshold = x;
            }
        }

        cfg
    }

    /// Whether a raw count falls into the suppressed band.
    ///
    /// 0 is not suppressed here; the mechanism already releases it as 0
    /// without a draw.
    #[must_use]
    pub fn suppresses(&self, raw_count: u64) -> bool {
        raw_count > 0 && raw_count < self.low_count_threshold
    }
}

/// Laplace mechanism over an injected CSPRNG.
///
/// The randomness source is passed in rather than taken from a process
/// global, so statistical tests are reproducible and concurrent reports do
/// not interfere with each other's draws.
pub struct LaplaceMechanism {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl LaplaceMechanism {
    /// Create a mechanism seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(ChaCha20Rng::from_entropy())
    }

    /// Create a mechanism over an explicit generator.
    #[must_use]
    pub fn with_rng(rng: ChaCha20Rng) -> Self {
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_test_seed(seed: [u8; 32]) -> Self {
        Self::with_rng(ChaCha20Rng::from_seed(seed))
    }

    /// Sample from Laplace(0, scale).
    fn sample_laplace(&self, scale: f64) -> Result<f64, ObfuscationError> {
        let mut rng = self.rng.lock().map_err(|_| ObfuscationError::RngUnavailable)?;

        // Laplace distribution via inverse CDF.
        // IMPORTANT: avoid exact endpoints that would yield ln(0) => +/-inf.
        let mut u01: f64 = rng.gen(); // [0, 1)
        if u01 == 0.0 {
            u01 = f64::MIN_POSITIVE;
        }
        let u: f64 = u01 - 0.5; // (-0.5, 0.5)

        let inner: f64 = 1.0 - 2.0 * u.abs();
        Ok(-scale * u.signum() * inner.ln())
    }
}

impl Default for LaplaceMechanism {
    fn default() -> Self {
        Self::new()
    }
}

impl CountObfuscation for LaplaceMechanism {
    fn obfuscate(
        &self,
        raw_count: u64,
        epsilon: f64,
        sensitivity: f64,
    ) -> Result<f64, ObfuscationError> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            tracing::error!("Invalid epsilon: {epsilon}. Refusing to release count.");
            return Err(ObfuscationError::InvalidEpsilon(epsilon));
        }

        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            tracing::error!("Invalid sensitivity: {sensitivity}. Refusing to release count.");
            return Err(ObfuscationError::InvalidSensitivity(sensitivity));
        }

        // An empty population has nothing to protect, and noise around zero
        // would itself leak that the count was zero-ish.
        if raw_count == 0 {
            return Ok(0.0);
        }

        let scale = sensitivity / epsilon;
        let noise = self.sample_laplace(scale)?;

        Ok((raw_count as f64 + noise).round().max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> LaplaceMechanism {
        LaplaceMechanism::with_test_seed([7u8; 32])
    }

    #[test]
    fn test_zero_count_releases_zero_without_noise() {
        let mechanism = seeded();
        for epsilon in [0.1, 0.5, 1.0, 2.0, 5.0] {
            assert_eq!(mechanism.obfuscate(0, epsilon, 1.0).expect("valid"), 0.0);
        }
    }

    #[test]
    fn test_invalid_epsilon_fails() {
        let mechanism = seeded();
        assert!(matches!(
            mechanism.obfuscate(10, 0.0, 1.0),
            Err(ObfuscationError::InvalidEpsilon(_))
        ));
        assert!(matches!(
            mechanism.obfuscate(10, -1.0, 1.0),
            Err(ObfuscationError::InvalidEpsilon(_))
        ));
        assert!(matches!(
            mechanism.obfuscate(10, f64::NAN, 1.0),
            Err(ObfuscationError::InvalidEpsilon(_))
        ));
    }

    #[test]
    fn test_invalid_sensitivity_fails() {
        let mechanism = seeded();
        assert!(matches!(
            mechanism.obfuscate(10, 1.0, 0.0),
            Err(ObfuscationError::InvalidSensitivity(_))
        ));
        assert!(matches!(
            mechanism.obfuscate(10, 1.0, f64::INFINITY),
            Err(ObfuscationError::InvalidSensitivity(_))
        ));
    }

    #[test]
    fn test_results_are_non_negative() {
        let mechanism = seeded();
        for _ in 0..500 {
            let value = mechanism.obfuscate(1, 0.1, 1.0).expect("valid");
            assert!(value >= 0.0);
        }
    }

    #[test]
    fn test_sample_mean_converges_to_raw_count() {
        let mechanism = seeded();
        let n = 1000;
        let raw = 1000u64;

        let sum: f64 = (0..n)
            .map(|_| mechanism.obfuscate(raw, 1.0, 1.0).expect("valid"))
            .sum();
        let mean = sum / f64::from(n);

        // Within 10% of the true count.
        assert!((mean - raw as f64).abs() < raw as f64 * 0.1, "mean {mean}");
    }

    #[test]
    fn test_sample_variance_matches_mechanism() {
        let mechanism = seeded();
        let n = 1000usize;
        let raw = 1000u64;

        let draws: Vec<f64> = (0..n)
            .map(|_| mechanism.obfuscate(raw, 1.0, 1.0).expect("valid"))
            .collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let variance =
            draws.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1) as f64;

        // Laplace variance is 2 * (sensitivity / epsilon)^2 = 2. Rounding to
        // integers adds a little; allow a wide band.
        let expected = 2.0;
        assert!(
            (variance - expected).abs() < expected * 0.8,
            "variance {variance}"
        );
    }

    #[test]
    fn test_smaller_epsilon_means_more_noise() {
        let mechanism = seeded();
        let n = 1000usize;
        let raw = 100_000u64; // large enough that max(0, _) never clips

        let variance_for = |epsilon: f64| {
            let draws: Vec<f64> = (0..n)
                .map(|_| mechanism.obfuscate(raw, epsilon, 1.0).expect("valid"))
                .collect();
            let mean = draws.iter().sum::<f64>() / n as f64;
            draws.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1) as f64
        };

        let variances: Vec<f64> = [5.0, 2.0, 1.0, 0.5, 0.1]
            .iter()
            .map(|&e| variance_for(e))
            .collect();

        // Monotonically increasing as epsilon shrinks.
        for window in variances.windows(2) {
            assert!(window[0] < window[1], "variances {variances:?}");
        }
    }

    #[test]
    fn test_suppression_band() {
        let cfg = PrivacyConfig::default();
        assert!(!cfg.suppresses(0));
        assert!(cfg.suppresses(1));
        assert!(cfg.suppresses(4));
        assert!(!cfg.suppresses(5));
        assert!(!cfg.suppresses(100));

        let off = PrivacyConfig {
            low_count_threshold: 0,
            ..PrivacyConfig::default()
        };
        assert!(!off.suppresses(1));
    }
}
