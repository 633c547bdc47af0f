//! Report aggregate and per-check result rows.
//!
//! A report collects one `PerCheckResult` per triggered (check, stratum)
//! pair. It is mutated only by the aggregation pipeline (appends) and by
//! finalization (status flip + denominator), and is immutable once
//! `Generated`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{CheckId, CheckOutcome};

/// Lifecycle status of a report.
///
/// Transitions `Generating -> Generated` exactly once; `Generated` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    /// Checks are still running or results are still being aggregated.
    Generating,
    /// All triggered checks have contributed a result and the denominator is
    /// set.
    Generated,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generating => write!(f, "GENERATING"),
            Self::Generated => write!(f, "GENERATED"),
        }
    }
}

/// Raw value of a per-check result.
///
/// The error case is an explicit variant rather than a sentinel integer; the
/// sqlite adapter maps it to `-1` on disk for numeric consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawValue {
    /// The true, un-noised count. Never exported.
    Count(u64),
    /// The check failed; see the row's error text.
    Error,
}

impl RawValue {
    /// Conventional numeric encoding: the count, or `-1` for errors.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Count(count) => *count as i64,
            Self::Error => -1,
        }
    }

    /// Decode from the conventional numeric encoding.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        if value < 0 {
            Self::Error
        } else {
            Self::Count(value as u64)
        }
    }
}

/// One row of a report: the aggregated result of one (check, stratum) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerCheckResult {
    /// Identity of the originating check.
    pub check_id: CheckId,

    /// Check name, suffixed with the stratum label when stratified.
    pub check_name: String,

    /// External identity hash of the originating check (query text or fixed
    /// id). The stratum suffix is applied at export time.
    pub fingerprint: String,

    /// True count or error marker. Kept internally, never exported.
    pub raw: RawValue,

    /// Laplace-noised value. The only number derived from this row that may
    /// leave the system.
    pub obfuscated: f64,

    /// Warning threshold copied from the check (percent).
    pub warning_threshold: f64,

    /// Error threshold copied from the check (percent).
    pub error_threshold: f64,

    /// Privacy budget consumed by this row. A fraction of the check's budget
    /// when stratified.
    pub epsilon: f64,

    /// Failure text, truncated to a bounded length.
    pub error: Option<String>,

    /// Stratum label for rows produced by a stratified check.
    pub stratum: Option<String>,

    /// Matched subject identifiers. Audit-only; excluded from external DTOs.
    pub subject_ids: BTreeSet<String>,
}

/// A data-quality report over one audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Unique report id.
    pub id: String,

    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Lifecycle status.
    pub status: ReportStatus,

    /// Overall privacy budget declared for this run.
    pub epsilon: f64,

    /// Denominator: total population size used to convert counts into
    /// proportions. Set at finalization.
    pub number_of_entities: u64,

    /// Ordered per-check results.
    pub results: Vec<PerCheckResult>,
}

impl Report {
    /// Create a fresh report in `Generating` state.
    #[must_use]
    pub fn new(epsilon: f64) -> Self {
        Self {
            id: uuid_v4(),
            created_at: chrono::Utc::now(),
            status: ReportStatus::Generating,
            epsilon,
            number_of_entities: 0,
            results: Vec::new(),
        }
    }

    /// Whether a result for the given (check, stratum) pair is already
    /// recorded.
    #[must_use]
    pub fn contains(&self, check_id: &CheckId, stratum: Option<&str>) -> bool {
        self.results
            .iter()
            .any(|r| &r.check_id == check_id && r.stratum.as_deref() == stratum)
    }

    /// Append a result row.
    ///
    /// Idempotent on (check id, stratum): a duplicate append and any append
    /// against a `Generated` report are no-ops. Returns whether the row was
    /// actually appended.
    pub fn append(&mut self, result: PerCheckResult) -> bool {
        if self.status == ReportStatus::Generated {
            tracing::warn!(
                report = %self.id,
                check = %result.check_id,
                "Ignoring result for already generated report"
            );
            return false;
        }
        if self.contains(&result.check_id, result.stratum.as_deref()) {
            tracing::debug!(
                report = %self.id,
                check = %result.check_id,
                "Ignoring duplicate result"
            );
            return false;
        }
        self.results.push(result);
        true
    }

    /// Flip the report to `Generated` with the given denominator.
    ///
    /// Returns whether the transition happened; a `Generated` report is never
    /// re-finalized.
    pub fn finalize(&mut self, number_of_entities: u64) -> bool {
        if self.status == ReportStatus::Generated {
            return false;
        }
        self.number_of_entities = number_of_entities;
        self.status = ReportStatus::Generated;
        true
    }

    /// Build a result row from a check outcome.
    ///
    /// The obfuscated value is supplied by the caller because the privacy
    /// transform lives behind a port; error text is truncated to
    /// `max_error_len` bytes on a char boundary.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn result_row(
        check_id: CheckId,
        check_name: String,
        fingerprint: String,
        outcome: &CheckOutcome,
        obfuscated: f64,
        warning_threshold: f64,
        error_threshold: f64,
        epsilon: f64,
        stratum: Option<String>,
        max_error_len: usize,
    ) -> PerCheckResult {
        let (raw, error, subject_ids) = match outcome {
            CheckOutcome::Count {
                count, subject_ids, ..
            } => (RawValue::Count(*count), None, subject_ids.clone()),
            CheckOutcome::Failed { message } => (
                RawValue::Error,
                Some(truncate_to_char_boundary(message, max_error_len).to_string()),
                BTreeSet::new(),
            ),
        };

        PerCheckResult {
            check_id,
            check_name,
            fingerprint,
            raw,
            obfuscated,
            warning_threshold,
            error_threshold,
            epsilon,
            error,
            stratum,
            subject_ids,
        }
    }
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 char.
#[must_use]
pub(crate) fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

/// Generate a simple UUID v4 (random) using a CSPRNG.
///
/// ChaCha20 seeded from OS entropy, so report ids are unpredictable on all
/// platforms.
#[must_use]
pub(crate) fn uuid_v4() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let bytes: [u8; 16] = rng.gen();

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        (bytes[6] & 0x0f) | 0x40, bytes[7],
        (bytes[8] & 0x3f) | 0x80, bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
