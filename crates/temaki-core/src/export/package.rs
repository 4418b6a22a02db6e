//! Package assembler
//!
//! Accumulates every artifact one compilation produces, in export order, and
//! detects cross-entity conflicts (duplicate non-inline instance ids). The
//! package is itself [`Fishable`] so exporters can resolve names against
//! already-exported artifacts before falling back to the external
//! definitions cache.

use super::fhir_types::{CodeSystemResource, StructureDefinition, ValueSetResource};
use super::instance_exporter::InstanceDefinition;
use super::ExportError;
use crate::fish::{FishKind, FishMetadata, Fishable};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::sync::Arc;

/// All artifacts emitted by one compilation
#[derive(Debug, Default)]
pub struct Package {
    pub profiles: IndexMap<String, StructureDefinition>,
    pub extensions: IndexMap<String, StructureDefinition>,
    pub instances: Vec<InstanceDefinition>,
    pub value_sets: IndexMap<String, ValueSetResource>,
    pub code_systems: IndexMap<String, CodeSystemResource>,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&mut self, sd: StructureDefinition) {
        self.profiles.insert(sd.name.clone(), sd);
    }

    pub fn add_extension(&mut self, sd: StructureDefinition) {
        self.extensions.insert(sd.name.clone(), sd);
    }

    pub fn add_value_set(&mut self, vs: ValueSetResource) {
        self.value_sets.insert(vs.name.clone(), vs);
    }

    pub fn add_code_system(&mut self, cs: CodeSystemResource) {
        self.code_systems.insert(cs.name.clone(), cs);
    }

    /// Add an instance. A duplicate `(resourceType, id)` among non-inline
    /// instances is an error, but the instance is still kept and emitted.
    pub fn add_instance(&mut self, instance: InstanceDefinition) -> Result<(), ExportError> {
        let conflict = !instance.is_inline()
            && instance.id.is_some()
            && self.instances.iter().any(|existing| {
                !existing.is_inline()
                    && existing.resource_type == instance.resource_type
                    && existing.id == instance.id
            });
        let result = if conflict {
            Err(ExportError::DuplicateInstanceId {
                resource_type: instance.resource_type.clone(),
                id: instance.id.clone().unwrap_or_default(),
            })
        } else {
            Ok(())
        };
        self.instances.push(instance);
        result
    }

    /// A typed clone of an exported StructureDefinition, matched by name,
    /// id, or url
    pub fn structure_definition(&self, item: &str) -> Option<StructureDefinition> {
        self.profiles
            .values()
            .chain(self.extensions.values())
            .find(|sd| {
                sd.name == item || sd.id.as_deref() == Some(item) || sd.url == item
            })
            .cloned()
    }

    pub fn find_instance(&self, item: &str) -> Option<&InstanceDefinition> {
        self.instances
            .iter()
            .find(|i| i.meta.name == item || i.id.as_deref() == Some(item))
    }

    /// Every artifact as `(type, id, json)` in export order, for writing
    pub fn artifacts(&self) -> Vec<(String, String, JsonValue)> {
        let mut out = Vec::new();
        for sd in self.profiles.values().chain(self.extensions.values()) {
            out.push((
                "StructureDefinition".to_string(),
                sd.id.clone().unwrap_or_else(|| sd.name.clone()),
                serde_json::to_value(sd).expect("structure definition serializes"),
            ));
        }
        for vs in self.value_sets.values() {
            out.push((
                "ValueSet".to_string(),
                vs.id.clone().unwrap_or_else(|| vs.name.clone()),
                serde_json::to_value(vs).expect("value set serializes"),
            ));
        }
        for cs in self.code_systems.values() {
            out.push((
                "CodeSystem".to_string(),
                cs.id.clone().unwrap_or_else(|| cs.name.clone()),
                serde_json::to_value(cs).expect("code system serializes"),
            ));
        }
        for instance in self.instances.iter().filter(|i| !i.is_inline()) {
            out.push((
                instance.resource_type.clone(),
                instance.id.clone().unwrap_or_else(|| instance.meta.name.clone()),
                instance.to_json(),
            ));
        }
        out
    }
}

impl Fishable for Package {
    fn fish_for_fhir(&self, item: &str, kinds: &[FishKind]) -> Option<Arc<JsonValue>> {
        let kinds = if kinds.is_empty() { &[FishKind::Any][..] } else { kinds };
        for kind in kinds {
            match kind {
                FishKind::Profile | FishKind::Extension | FishKind::Resource | FishKind::Type => {
                    if let Some(sd) = self.structure_definition(item) {
                        let json = serde_json::to_value(&sd).ok()?;
                        let meta = FishMetadata::from_json(&json);
                        if meta.matches_kinds(std::slice::from_ref(kind)) {
                            return Some(Arc::new(json));
                        }
                    }
                }
                FishKind::ValueSet => {
                    if let Some(vs) = self.value_sets.values().find(|v| {
                        v.name == item || v.id.as_deref() == Some(item) || v.url == item
                    }) {
                        return serde_json::to_value(vs).ok().map(Arc::new);
                    }
                }
                FishKind::CodeSystem => {
                    if let Some(cs) = self.code_systems.values().find(|c| {
                        c.name == item || c.id.as_deref() == Some(item) || c.url == item
                    }) {
                        return serde_json::to_value(cs).ok().map(Arc::new);
                    }
                }
                FishKind::Instance => {
                    if let Some(instance) = self.find_instance(item) {
                        return Some(Arc::new(instance.to_json()));
                    }
                }
                FishKind::Any => {
                    for k in [
                        FishKind::Profile,
                        FishKind::Extension,
                        FishKind::ValueSet,
                        FishKind::CodeSystem,
                        FishKind::Instance,
                    ] {
                        if let Some(found) = self.fish_for_fhir(item, &[k]) {
                            return Some(found);
                        }
                    }
                }
            }
        }
        None
    }
}

/// The exporters share the package through a `RefCell`; fishing borrows it
/// only for the duration of one lookup, so a re-entrant export can still
/// append mid-rule
impl Fishable for RefCell<Package> {
    fn fish_for_fhir(&self, item: &str, kinds: &[FishKind]) -> Option<Arc<JsonValue>> {
        self.borrow().fish_for_fhir(item, kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::InstanceUsage;
    use crate::export::fhir_types::StructureDefinitionKind;
    use crate::export::instance_exporter::InstanceMeta;

    fn instance(resource_type: &str, id: &str, usage: InstanceUsage) -> InstanceDefinition {
        InstanceDefinition {
            resource_type: resource_type.to_string(),
            id: Some(id.to_string()),
            content: serde_json::Map::new(),
            meta: InstanceMeta {
                name: id.to_string(),
                usage,
                instance_of: resource_type.to_string(),
                title: None,
                description: None,
            },
        }
    }

    #[test]
    fn duplicate_non_inline_instance_id_is_an_error_but_both_are_kept() {
        let mut package = Package::new();
        assert!(
            package
                .add_instance(instance("Patient", "repeated-id", InstanceUsage::Example))
                .is_ok()
        );
        let err = package
            .add_instance(instance("Patient", "repeated-id", InstanceUsage::Example))
            .unwrap_err();
        assert!(matches!(err, ExportError::DuplicateInstanceId { .. }));
        assert_eq!(package.instances.len(), 2);
    }

    #[test]
    fn inline_instances_do_not_conflict() {
        let mut package = Package::new();
        package
            .add_instance(instance("Organization", "org-1", InstanceUsage::Inline))
            .unwrap();
        assert!(
            package
                .add_instance(instance("Organization", "org-1", InstanceUsage::Inline))
                .is_ok()
        );
    }

    #[test]
    fn fishes_profiles_by_name_id_and_url() {
        let mut package = Package::new();
        let mut sd = StructureDefinition::new(
            "http://example.org/StructureDefinition/my-obs".to_string(),
            "MyObs".to_string(),
            "Observation".to_string(),
            StructureDefinitionKind::Resource,
        );
        sd.id = Some("my-obs".to_string());
        package.add_profile(sd);

        for item in [
            "MyObs",
            "my-obs",
            "http://example.org/StructureDefinition/my-obs",
        ] {
            assert!(
                package.fish_for_fhir(item, &[FishKind::Any]).is_some(),
                "lookup failed for {item}"
            );
        }
    }

    #[test]
    fn inline_instances_are_excluded_from_artifacts() {
        let mut package = Package::new();
        package
            .add_instance(instance("Patient", "ex-1", InstanceUsage::Example))
            .unwrap();
        package
            .add_instance(instance("Organization", "inline-1", InstanceUsage::Inline))
            .unwrap();
        let artifacts = package.artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].0, "Patient");
    }
}
