use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;
use zeroize::Zeroizing;

use super::identity::{Fingerprint, Fingerprinter, IdentityNumber};

/// Errors loading a registry snapshot.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read registry snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid identity number on line {line} of registry snapshot")]
    InvalidEntry { line: usize },
}

/// The set of identities authorised to vote, held as fingerprints only.
///
/// Immutable once built; lookups fail closed.
#[derive(Debug, Default)]
pub struct EligibilityRegistry {
    eligible: HashSet<Fingerprint>,
}

impl EligibilityRegistry {
    /// Build a registry from already-validated identity numbers.
    pub fn new<'a>(
        identities: impl IntoIterator<Item = &'a IdentityNumber>,
        fingerprinter: &Fingerprinter,
    ) -> Self {
        let eligible = identities
            .into_iter()
            .map(|identity| fingerprinter.fingerprint(identity))
            .collect();
        Self { eligible }
    }

    /// Parse a snapshot with one identity number per line.
    /// Blank lines and lines starting with `#` are ignored.
    pub fn parse(snapshot: &str, fingerprinter: &Fingerprinter) -> Result<Self, RegistryError> {
        let mut eligible = HashSet::new();
        for (index, line) in snapshot.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let identity = line
                .parse::<IdentityNumber>()
                .map_err(|_| RegistryError::InvalidEntry { line: index + 1 })?;
            eligible.insert(fingerprinter.fingerprint(&identity));
        }
        Ok(Self { eligible })
    }

    /// Load a snapshot file, see [`EligibilityRegistry::parse`].
    pub fn load(path: &Path, fingerprinter: &Fingerprinter) -> Result<Self, RegistryError> {
        let snapshot = Zeroizing::new(fs::read_to_string(path)?);
        Self::parse(&snapshot, fingerprinter)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.eligible.contains(fingerprint)
    }

    pub fn is_eligible(&self, identity: &IdentityNumber, fingerprinter: &Fingerprinter) -> bool {
        self.contains(&fingerprinter.fingerprint(identity))
    }

    /// Size of the eligible population.
    pub fn len(&self) -> usize {
        self.eligible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}
