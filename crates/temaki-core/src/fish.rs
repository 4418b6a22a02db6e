//! The Fishable lookup port
//!
//! Exporters resolve names through a narrow "fishing" interface: give it a
//! name, id, or canonical URL plus the kinds you will accept, get back the
//! FHIR JSON (or just its metadata). The same trait is implemented by the
//! external definitions cache and by the in-flight [`Package`], and a
//! [`FishingContext`] cascades over several sources preferring the first
//! match.
//!
//! [`Package`]: crate::export::Package

use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Kind filter for fishing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FishKind {
    /// StructureDefinition with kind=resource, derivation!=constraint
    Resource,
    /// StructureDefinition for a datatype (primitive or complex)
    Type,
    /// StructureDefinition with derivation=constraint
    Profile,
    /// StructureDefinition deriving from Extension
    Extension,
    ValueSet,
    CodeSystem,
    /// A concrete resource instance
    Instance,
    Any,
}

impl FishKind {
    /// Check a resource's identity fields against this filter
    pub fn matches(
        &self,
        resource_type: &str,
        kind: Option<&str>,
        derivation: Option<&str>,
        base_definition: Option<&str>,
    ) -> bool {
        match self {
            FishKind::Any => true,
            FishKind::Resource => {
                resource_type == "StructureDefinition"
                    && kind == Some("resource")
                    && derivation != Some("constraint")
            }
            FishKind::Type => {
                resource_type == "StructureDefinition"
                    && matches!(kind, Some("primitive-type") | Some("complex-type"))
                    && derivation != Some("constraint")
            }
            FishKind::Profile => {
                resource_type == "StructureDefinition"
                    && derivation == Some("constraint")
                    && !base_definition
                        .map(|b| b.ends_with("/Extension"))
                        .unwrap_or(false)
            }
            FishKind::Extension => {
                resource_type == "StructureDefinition"
                    && base_definition
                        .map(|b| b.ends_with("/Extension"))
                        .unwrap_or(false)
            }
            FishKind::ValueSet => resource_type == "ValueSet",
            FishKind::CodeSystem => resource_type == "CodeSystem",
            FishKind::Instance => !matches!(
                resource_type,
                "StructureDefinition" | "ValueSet" | "CodeSystem" | "SearchParameter"
            ),
        }
    }
}

/// Lightweight identity of a fished definition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FishMetadata {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    /// `StructureDefinition.type` — the resource type the definition
    /// constrains or defines
    pub sd_type: Option<String>,
    pub parent: Option<String>,
    pub resource_type: String,
    pub kind: Option<String>,
    pub derivation: Option<String>,
}

impl FishMetadata {
    pub fn from_json(content: &JsonValue) -> Self {
        let get = |field: &str| {
            content
                .get(field)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        Self {
            id: get("id"),
            name: get("name"),
            url: get("url"),
            sd_type: get("type"),
            parent: get("baseDefinition"),
            resource_type: get("resourceType").unwrap_or_default(),
            kind: get("kind"),
            derivation: get("derivation"),
        }
    }

    pub fn matches_kinds(&self, kinds: &[FishKind]) -> bool {
        if kinds.is_empty() {
            return true;
        }
        kinds.iter().any(|k| {
            k.matches(
                &self.resource_type,
                self.kind.as_deref(),
                self.derivation.as_deref(),
                self.parent.as_deref(),
            )
        })
    }
}

/// Unified lookup interface over FHIR definition sources
pub trait Fishable {
    /// Find a definition by canonical URL, id, or name, in that preference
    /// order, restricted to the given kinds (empty means any)
    fn fish_for_fhir(&self, item: &str, kinds: &[FishKind]) -> Option<Arc<JsonValue>>;

    /// Metadata-only variant of [`Self::fish_for_fhir`]
    fn fish_for_metadata(&self, item: &str, kinds: &[FishKind]) -> Option<FishMetadata> {
        self.fish_for_fhir(item, kinds)
            .map(|json| FishMetadata::from_json(&json))
    }
}

/// Cascading fisher: tries each source in order, first match wins
pub struct FishingContext<'a> {
    sources: Vec<&'a dyn Fishable>,
}

impl<'a> FishingContext<'a> {
    pub fn new(sources: Vec<&'a dyn Fishable>) -> Self {
        Self { sources }
    }
}

impl Fishable for FishingContext<'_> {
    fn fish_for_fhir(&self, item: &str, kinds: &[FishKind]) -> Option<Arc<JsonValue>> {
        self.sources
            .iter()
            .find_map(|source| source.fish_for_fhir(item, kinds))
    }

    fn fish_for_metadata(&self, item: &str, kinds: &[FishKind]) -> Option<FishMetadata> {
        self.sources
            .iter()
            .find_map(|source| source.fish_for_metadata(item, kinds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_matching_distinguishes_profiles_from_bases() {
        assert!(FishKind::Resource.matches("StructureDefinition", Some("resource"), None, None));
        assert!(!FishKind::Resource.matches(
            "StructureDefinition",
            Some("resource"),
            Some("constraint"),
            None
        ));
        assert!(FishKind::Profile.matches(
            "StructureDefinition",
            Some("resource"),
            Some("constraint"),
            Some("http://hl7.org/fhir/StructureDefinition/Patient")
        ));
        assert!(FishKind::Extension.matches(
            "StructureDefinition",
            Some("complex-type"),
            Some("constraint"),
            Some("http://hl7.org/fhir/StructureDefinition/Extension")
        ));
    }

    #[test]
    fn metadata_extraction() {
        let sd = json!({
            "resourceType": "StructureDefinition",
            "id": "Patient",
            "name": "Patient",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "type": "Patient",
            "kind": "resource",
            "baseDefinition": "http://hl7.org/fhir/StructureDefinition/DomainResource"
        });
        let meta = FishMetadata::from_json(&sd);
        assert_eq!(meta.sd_type.as_deref(), Some("Patient"));
        assert_eq!(
            meta.parent.as_deref(),
            Some("http://hl7.org/fhir/StructureDefinition/DomainResource")
        );
        assert!(meta.matches_kinds(&[FishKind::Resource]));
        assert!(!meta.matches_kinds(&[FishKind::ValueSet]));
    }
}
