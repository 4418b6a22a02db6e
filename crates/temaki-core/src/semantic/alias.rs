//! Alias resolution
//!
//! `Alias: NAME = url` lines map short names to full URLs. Collection is the
//! first pass of the importer; resolution of every name-position token is the
//! second. Aliases are global across one compilation, matching the way
//! authors split alias files from content files.

use crate::diagnostics::Location;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AliasError {
    #[error("Alias '{name}' is already defined as '{existing}'")]
    DuplicateAlias { name: String, existing: String },
}

/// Alias lookup table with O(1) resolution
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, (String, Location)>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias. Re-registering the same name with the same URL is
    /// a no-op; a different URL is an error.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        location: Location,
    ) -> Result<(), AliasError> {
        let name = name.into();
        let url = url.into();
        if let Some((existing, _)) = self.aliases.get(&name) {
            if *existing == url {
                return Ok(());
            }
            return Err(AliasError::DuplicateAlias {
                name,
                existing: existing.clone(),
            });
        }
        self.aliases.insert(name, (url, location));
        Ok(())
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|(url, _)| url.as_str())
    }

    /// Resolve a name if it is an alias, otherwise return it unchanged
    pub fn resolve_or_keep<'n>(&'n self, name: &'n str) -> &'n str {
        self.resolve(name).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_alias() {
        let mut table = AliasTable::new();
        table
            .add("SCT", "http://snomed.info/sct", Location::default())
            .unwrap();
        assert!(table.is_alias("SCT"));
        assert_eq!(table.resolve("SCT"), Some("http://snomed.info/sct"));
        assert_eq!(table.resolve_or_keep("Observation"), "Observation");
    }

    #[test]
    fn duplicate_same_url_is_tolerated() {
        let mut table = AliasTable::new();
        table
            .add("SCT", "http://snomed.info/sct", Location::default())
            .unwrap();
        assert!(
            table
                .add("SCT", "http://snomed.info/sct", Location::default())
                .is_ok()
        );
    }

    #[test]
    fn duplicate_different_url_is_rejected() {
        let mut table = AliasTable::new();
        table
            .add("SCT", "http://snomed.info/sct", Location::default())
            .unwrap();
        let err = table
            .add("SCT", "http://example.org/other", Location::default())
            .unwrap_err();
        assert!(matches!(err, AliasError::DuplicateAlias { .. }));
    }
}
