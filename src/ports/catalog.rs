//! Check catalog port: read access to persisted check definitions.
//!
//! Creation and editing of checks belongs to the excluded CRUD layer; the
//! pipeline only ever lists the catalog at the start of a run.

use crate::domain::CheckDefinition;

/// Trait for the persisted check catalog.
pub trait CheckCatalog: Send + Sync {
    /// Error type for catalog operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// All persisted check definitions.
    ///
    /// # Errors
    /// Returns error if the catalog cannot be read.
    fn list_all(&self) -> Result<Vec<CheckDefinition>, Self::Error>;
}
