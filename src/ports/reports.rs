//! Report persistence port.
//!
//! The pipeline persists after every append so a crash mid-run loses at most
//! the in-flight result; the append itself is keyed by (check id, stratum)
//! and must be idempotent.

use crate::domain::{PerCheckResult, Report};

/// Trait for report persistence.
pub trait ReportStore: Send + Sync {
    /// Error type for persistence operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a freshly created report.
    ///
    /// # Errors
    /// Returns error if the report cannot be stored.
    fn create(&self, report: &Report) -> Result<(), Self::Error>;

    /// Persist one per-check result row.
    ///
    /// Must be idempotent on (report id, check id, stratum): replaying an
    /// already-persisted row is a no-op, not a duplicate.
    ///
    /// # Errors
    /// Returns error if the row cannot be stored. Losing a row would break
    /// the one-row-per-triggered-check invariant, so callers surface this
    /// instead of swallowing it.
    fn append_result(&self, report_id: &str, result: &PerCheckResult) -> Result<(), Self::Error>;

    /// Record the denominator and flip the report to `Generated`.
    ///
    /// # Errors
    /// Returns error if the update cannot be stored.
    fn finalize(&self, report_id: &str, number_of_entities: u64) -> Result<(), Self::Error>;

    /// Load a report with its result rows.
    ///
    /// # Returns
    /// `None` if no report with that id exists.
    ///
    /// # Errors
    /// Returns error if the read fails.
    fn load(&self, report_id: &str) -> Result<Option<Report>, Self::Error>;
}
