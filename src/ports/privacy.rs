//! Privacy transform port: Trait for count obfuscation.
//!
//! This trait abstracts the noise mechanism from the aggregation pipeline.

/// Errors that can occur while obfuscating a count.
///
/// Invalid parameters are configuration errors and fail fast; they are never
/// silently recovered into a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObfuscationError {
    #[error("Invalid epsilon: {0}")]
    InvalidEpsilon(f64),

    #[error("Invalid sensitivity: {0}")]
    InvalidSensitivity(f64),

    #[error("Noise RNG unavailable")]
    RngUnavailable,
}

/// Trait for the privacy transform applied to raw counts at the reporting
/// boundary.
///
/// Implementations add calibrated noise so that the released value does not
/// reliably identify individual records.
pub trait CountObfuscation: Send + Sync {
    /// Obfuscate a true count.
    ///
    /// # Arguments
    /// * `raw_count` - The true value to protect
    /// * `epsilon` - Privacy budget for this release; smaller adds more noise
    /// * `sensitivity` - Maximum change one record can cause (1 for counts)
    ///
    /// # Returns
    /// A non-negative noised value. A raw count of 0 is returned as 0
    /// without drawing noise.
    ///
    /// # Errors
    /// Returns an error if epsilon or sensitivity are non-positive or
    /// non-finite.
    fn obfuscate(
        &self,
        raw_count: u64,
        epsilon: f64,
        sensitivity: f64,
    ) -> Result<f64, ObfuscationError>;
}
