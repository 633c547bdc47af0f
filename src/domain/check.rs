//! Check definition types.
//!
//! A check is a single data-quality rule. Declarative checks carry CQL text
//! that the remote store compiles and evaluates; hand-coded checks have no
//! query and run in-process. Both share the same definition record.

use serde::{Deserialize, Serialize};

/// Stable identifier of a check.
///
/// Declarative checks get their id from the catalog; hand-coded checks use a
/// fixed, human-readable id chosen at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckId(String);

impl CheckId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Definition of a data-quality check.
///
/// Immutable after creation except for the thresholds, which the catalog
/// layer may edit. Thresholds are percentages used downstream to classify
/// the reported proportion; they never influence execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Stable identity.
    pub id: CheckId,

    /// Human-readable name.
    pub name: String,

    /// What the check looks for.
    pub description: String,

    /// CQL text for declarative checks; `None` for hand-coded checks.
    pub query: Option<String>,

    /// Percentage above which the result is flagged as a warning.
    pub warning_threshold: f64,

    /// Percentage above which the result is flagged as an error.
    pub error_threshold: f64,

    /// Privacy budget consumed by one run of this check.
    pub epsilon: f64,
}

impl CheckDefinition {
    /// Create a declarative check backed by CQL text.
    #[must_use]
    pub fn declarative(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        query: impl Into<String>,
        warning_threshold: f64,
        error_threshold: f64,
        epsilon: f64,
    ) -> Self {
        Self {
            id: CheckId::new(id),
            name: name.into(),
            description: description.into(),
            query: Some(query.into()),
            warning_threshold,
            error_threshold,
            epsilon,
        }
    }

    /// Create a hand-coded check definition with fixed identity.
    ///
    /// Hand-coded checks are never persisted through the catalog; they are
    /// constructed in-process and participate as first-class checks at run
    /// time.
    #[must_use]
    pub fn builtin(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        warning_threshold: f64,
        error_threshold: f64,
        epsilon: f64,
    ) -> Self {
        Self {
            id: CheckId::new(id),
            name: name.into(),
            description: description.into(),
            query: None,
            warning_threshold,
            error_threshold,
            epsilon,
        }
    }

    /// The identity source the external hash is derived from.
    ///
    /// Declarative checks hash their query text so the central aggregator can
    /// correlate semantically identical checks across sites without learning
    /// the check's content. Hand-coded checks hash their fixed id.
    #[must_use]
    pub fn identity_source(&self) -> &str {
        self.query.as_deref().unwrap_or_else(|| self.id.as_str())
    }

    /// Stable external fingerprint: lowercase hex SHA-256 of the identity
    /// source.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.identity_source().as_bytes());
        let digest = hasher.finalize();

        digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
    }
}
