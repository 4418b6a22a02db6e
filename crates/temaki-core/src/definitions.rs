//! External FHIR definitions cache
//!
//! A read-only store of core FHIR definitions (StructureDefinitions,
//! ValueSets, CodeSystems) loaded once per compilation from an unpacked
//! package directory. Lookups go through HashMap indexes keyed by canonical
//! URL, id, and name, so fishing is O(1) regardless of package size.

use crate::error::TemakiError;
use crate::fish::{FishKind, FishMetadata, Fishable};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Read-only definitions cache with id/name/url indexes
#[derive(Debug, Default)]
pub struct FhirDefs {
    resources: Vec<Arc<JsonValue>>,
    by_url: HashMap<String, usize>,
    by_id: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
}

impl FhirDefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` resource under `dir` (an unpacked FHIR package)
    pub fn load(dir: &Path) -> Result<Self, TemakiError> {
        let mut defs = Self::new();
        let mut count = 0usize;
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())
                .map_err(|e| TemakiError::io_error(entry.path(), e))?;
            let Ok(json) = serde_json::from_str::<JsonValue>(&text) else {
                trace!("Skipping non-JSON file {}", entry.path().display());
                continue;
            };
            if json.get("resourceType").and_then(|v| v.as_str()).is_some() {
                defs.add_definition(json);
                count += 1;
            }
        }
        if count == 0 {
            return Err(TemakiError::package_load(format!(
                "no FHIR definitions found under {}",
                dir.display()
            )));
        }
        debug!("Loaded {} definitions from {}", count, dir.display());
        Ok(defs)
    }

    /// Register one definition (also the seam tests use to build fixtures)
    pub fn add_definition(&mut self, json: JsonValue) {
        let index = self.resources.len();
        if let Some(url) = json.get("url").and_then(|v| v.as_str()) {
            self.by_url.entry(url.to_string()).or_insert(index);
        }
        if let Some(id) = json.get("id").and_then(|v| v.as_str()) {
            self.by_id.entry(id.to_string()).or_default().push(index);
        }
        if let Some(name) = json.get("name").and_then(|v| v.as_str()) {
            self.by_name.entry(name.to_string()).or_default().push(index);
        }
        self.resources.push(Arc::new(json));
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn candidate_indexes(&self, item: &str) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(&i) = self.by_url.get(item) {
            out.push(i);
        }
        if let Some(ids) = self.by_id.get(item) {
            out.extend(ids.iter().copied());
        }
        if let Some(names) = self.by_name.get(item) {
            out.extend(names.iter().copied());
        }
        out
    }
}

impl Fishable for FhirDefs {
    fn fish_for_fhir(&self, item: &str, kinds: &[FishKind]) -> Option<Arc<JsonValue>> {
        let candidates = self.candidate_indexes(item);
        // Preference: first kind that matches anything, in the caller's order
        let kind_order: &[FishKind] = if kinds.is_empty() { &[FishKind::Any] } else { kinds };
        for kind in kind_order {
            for &index in &candidates {
                let resource = &self.resources[index];
                let meta = FishMetadata::from_json(resource);
                if meta.matches_kinds(std::slice::from_ref(kind)) {
                    return Some(resource.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs_with_patient() -> FhirDefs {
        let mut defs = FhirDefs::new();
        defs.add_definition(json!({
            "resourceType": "StructureDefinition",
            "id": "Patient",
            "name": "Patient",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "type": "Patient",
            "kind": "resource",
        }));
        defs.add_definition(json!({
            "resourceType": "ValueSet",
            "id": "marital-status",
            "name": "MaritalStatus",
            "url": "http://hl7.org/fhir/ValueSet/marital-status",
        }));
        defs
    }

    #[test]
    fn fishes_by_url_id_and_name() {
        let defs = defs_with_patient();
        for item in [
            "Patient",
            "http://hl7.org/fhir/StructureDefinition/Patient",
        ] {
            let found = defs.fish_for_fhir(item, &[FishKind::Resource]);
            assert!(found.is_some(), "lookup failed for {item}");
        }
    }

    #[test]
    fn kind_filter_excludes_mismatches() {
        let defs = defs_with_patient();
        assert!(defs.fish_for_fhir("Patient", &[FishKind::ValueSet]).is_none());
        assert!(
            defs.fish_for_fhir("MaritalStatus", &[FishKind::ValueSet])
                .is_some()
        );
    }

    #[test]
    fn kind_order_expresses_preference() {
        let mut defs = defs_with_patient();
        // a profile that shares the name "Patient"
        defs.add_definition(json!({
            "resourceType": "StructureDefinition",
            "id": "my-patient",
            "name": "Patient",
            "url": "http://example.org/StructureDefinition/my-patient",
            "type": "Patient",
            "kind": "resource",
            "derivation": "constraint",
            "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Patient",
        }));

        let fished = defs
            .fish_for_fhir("Patient", &[FishKind::Profile, FishKind::Resource])
            .unwrap();
        assert_eq!(
            fished.get("id").and_then(|v| v.as_str()),
            Some("my-patient")
        );
    }

    #[test]
    fn metadata_carries_sd_type() {
        let defs = defs_with_patient();
        let meta = defs.fish_for_metadata("Patient", &[]).unwrap();
        assert_eq!(meta.sd_type.as_deref(), Some("Patient"));
    }
}
