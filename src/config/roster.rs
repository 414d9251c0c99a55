//! Identity roster configuration and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rotator::{Identity, IdentityId};

/// Errors that can occur loading or validating the roster.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Roster entry at index {index} has an empty id")]
    EmptyId { index: usize },

    #[error("Duplicate identity id found: {id}")]
    DuplicateId { id: String },

    #[error("No identities configured")]
    NoIdentities,

    #[error("Failed to read roster file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse roster file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// One configured identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    /// Unique identity id (account label, phone alias, etc.).
    pub id: String,

    /// Whether the identity participates in rotation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RosterEntry {
    /// Creates an enabled roster entry.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
        }
    }
}

/// The full identity roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRoster {
    /// Identities available for rotation.
    pub identities: Vec<RosterEntry>,
}

impl IdentityRoster {
    /// Loads the roster from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let content = std::fs::read_to_string(path)?;
        let roster: Self = serde_json::from_str(&content)?;
        Ok(roster)
    }

    /// Saves the roster to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), RosterError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the roster.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), RosterError> {
        if self.identities.is_empty() {
            return Err(RosterError::NoIdentities);
        }

        let mut seen = std::collections::HashSet::new();
        for (index, entry) in self.identities.iter().enumerate() {
            if entry.id.is_empty() {
                return Err(RosterError::EmptyId { index });
            }
            if !seen.insert(&entry.id) {
                return Err(RosterError::DuplicateId {
                    id: entry.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Number of configured identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether no identities are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Builds the rotation pool from this roster.
    #[must_use]
    pub fn to_pool(&self) -> Vec<Identity> {
        self.identities
            .iter()
            .map(|e| Identity::new(IdentityId::new(e.id.clone()), e.enabled))
            .collect()
    }

    /// Creates an example roster for users to reference.
    #[must_use]
    pub fn example() -> Self {
        Self {
            identities: vec![
                RosterEntry::new("account_main"),
                RosterEntry::new("account_backup"),
                RosterEntry {
                    id: "account_spare".to_owned(),
                    enabled: false,
                },
            ],
        }
    }
}
