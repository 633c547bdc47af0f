//! Raw check outcomes.
//!
//! A `CheckOutcome` is the internal result of executing one check (or one
//! stratum of a stratified check). It never crosses the privacy boundary:
//! the raw count and matched subject ids stay inside the crate and only the
//! obfuscated derivative is exported.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Outcome of executing a single check against the data store.
///
/// Failures are values, not exceptions: every execution path of a check
/// produces exactly one outcome, so a failing check still contributes a row
/// to the report instead of silently vanishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckOutcome {
    /// The check ran and counted matching entities.
    Count {
        /// Number of matched entities.
        count: u64,

        /// The kind of entity counted (e.g. `Patient`).
        entity_type: String,

        /// Identifiers of the matched subjects. Audit-only; must never leave
        /// the system in raw form.
        subject_ids: BTreeSet<String>,
    },

    /// The check could not produce a count.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl CheckOutcome {
    /// Successful outcome over the given subject set.
    #[must_use]
    pub fn subjects(entity_type: impl Into<String>, subject_ids: BTreeSet<String>) -> Self {
        Self::Count {
            count: subject_ids.len() as u64,
            entity_type: entity_type.into(),
            subject_ids,
        }
    }

    /// Successful outcome where the count and the resolved subject set may
    /// diverge (e.g. a measure evaluation whose list could not be resolved).
    #[must_use]
    pub fn counted(
        count: u64,
        entity_type: impl Into<String>,
        subject_ids: BTreeSet<String>,
    ) -> Self {
        Self::Count {
            count,
            entity_type: entity_type.into(),
            subject_ids,
        }
    }

    /// Failed outcome carrying the error text.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// The raw count, if the check succeeded.
    #[must_use]
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Count { count, .. } => Some(*count),
            Self::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
