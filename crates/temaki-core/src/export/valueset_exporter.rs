//! ValueSet exporter
//!
//! Translates FSH ValueSet entities into FHIR ValueSet resources. Concept
//! components group into one compose include/exclude entry per code system;
//! filter components validate their operator against the FHIR filter-op set
//! before emission.

use super::fhir_types::*;
use super::package::Package;
use super::value::{convert_value_loose, set_json_path};
use super::ExportError;
use crate::ast::{self, FshValue, ValueSetComponentContent};
use crate::config::ProjectConfiguration;
use crate::diagnostics::DiagnosticCollector;
use crate::fish::{FishKind, Fishable};
use crate::semantic::FshTank;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use tracing::debug;

const FILTER_OPERATORS: &[&str] = &[
    "=",
    "is-a",
    "descendent-of",
    "is-not-a",
    "regex",
    "in",
    "not-in",
    "exists",
];

/// Exports FSH value sets to FHIR ValueSet resources
pub struct ValueSetExporter<'a> {
    tank: &'a FshTank,
    defs: &'a dyn Fishable,
    package: &'a RefCell<Package>,
    collector: &'a DiagnosticCollector,
    config: &'a ProjectConfiguration,
}

impl<'a> ValueSetExporter<'a> {
    pub fn new(
        tank: &'a FshTank,
        defs: &'a dyn Fishable,
        package: &'a RefCell<Package>,
        collector: &'a DiagnosticCollector,
        config: &'a ProjectConfiguration,
    ) -> Self {
        Self {
            tank,
            defs,
            package,
            collector,
            config,
        }
    }

    pub fn export_all(&self) {
        let value_sets: Vec<ast::FshValueSet> = self.tank.value_sets().cloned().collect();
        for vs in value_sets {
            let exported = self.export_value_set(&vs);
            self.package.borrow_mut().add_value_set(exported);
        }
    }

    pub fn export_value_set(&self, vs: &ast::FshValueSet) -> ValueSetResource {
        debug!("Exporting value set {}", vs.name);
        let id = vs.id.clone().unwrap_or_else(|| vs.name.clone());
        let url = format!("{}/ValueSet/{id}", self.config.canonical);

        let mut resource = ValueSetResource::new(url, vs.name.clone(), self.config.status_or_default());
        resource.id = Some(id);
        resource.title = vs.title.clone();
        resource.description = vs.description.clone();
        resource.version = self.config.version.clone();
        resource.publisher = self.config.publisher.clone();

        let mut compose = ValueSetCompose::default();
        for component in &vs.components {
            match self.build_include(component) {
                Ok(include) => {
                    if component.include {
                        push_merged(&mut compose.include, include);
                    } else {
                        push_merged(&mut compose.exclude, include);
                    }
                }
                Err(err) => {
                    self.collector
                        .error_at(err.to_string(), component.location.clone());
                }
            }
        }
        if !compose.include.is_empty() || !compose.exclude.is_empty() {
            resource.compose = Some(compose);
        }

        for caret in &vs.caret_rules {
            if let Err(err) = apply_resource_caret(&mut resource, &caret.caret_path, &caret.value) {
                self.collector
                    .error_at(err.to_string(), caret.location.clone());
            }
        }
        resource
    }

    fn build_include(
        &self,
        component: &ast::ValueSetComponent,
    ) -> Result<ValueSetInclude, ExportError> {
        match &component.content {
            ValueSetComponentContent::Concept(code) => {
                let system = code.system.clone().ok_or_else(|| {
                    ExportError::ValueSetCompose(format!(
                        "concept '#{}' has no code system",
                        code.code
                    ))
                })?;
                let system = self.resolve_system(&system)?;
                Ok(ValueSetInclude {
                    system: Some(system),
                    concept: Some(vec![ValueSetConcept {
                        code: code.code.clone(),
                        display: code.display.clone(),
                    }]),
                    ..Default::default()
                })
            }
            ValueSetComponentContent::System { system, filters } => {
                let system = self.resolve_system(system)?;
                let mut converted = Vec::new();
                for filter in filters {
                    converted.push(build_filter(filter)?);
                }
                Ok(ValueSetInclude {
                    system: Some(system),
                    filter: if converted.is_empty() {
                        None
                    } else {
                        Some(converted)
                    },
                    ..Default::default()
                })
            }
            ValueSetComponentContent::ValueSet { value_set } => {
                let url = self.resolve_value_set(value_set)?;
                Ok(ValueSetInclude {
                    value_set: Some(vec![url]),
                    ..Default::default()
                })
            }
        }
    }

    fn resolve_system(&self, system: &str) -> Result<String, ExportError> {
        if system.starts_with("http://") || system.starts_with("https://") || system.starts_with("urn:")
        {
            return Ok(system.to_string());
        }
        if let Some(cs) = self.tank.find_code_system(system) {
            let id = cs.id.clone().unwrap_or_else(|| cs.name.clone());
            return Ok(format!("{}/CodeSystem/{id}", self.config.canonical));
        }
        self.defs
            .fish_for_metadata(system, &[FishKind::CodeSystem])
            .and_then(|meta| meta.url)
            .ok_or_else(|| ExportError::CannotResolveCanonical(system.to_string()))
    }

    fn resolve_value_set(&self, value_set: &str) -> Result<String, ExportError> {
        if value_set.starts_with("http://") || value_set.starts_with("https://") {
            return Ok(value_set.to_string());
        }
        if let Some(vs) = self.tank.find_value_set(value_set) {
            let id = vs.id.clone().unwrap_or_else(|| vs.name.clone());
            return Ok(format!("{}/ValueSet/{id}", self.config.canonical));
        }
        self.defs
            .fish_for_metadata(value_set, &[FishKind::ValueSet])
            .and_then(|meta| meta.url)
            .ok_or_else(|| ExportError::CannotResolveCanonical(value_set.to_string()))
    }
}

/// Merge same-system concept entries so each system appears once
fn push_merged(entries: &mut Vec<ValueSetInclude>, include: ValueSetInclude) {
    if let (Some(system), Some(concepts)) = (&include.system, &include.concept)
        && include.filter.is_none()
        && let Some(existing) = entries
            .iter_mut()
            .find(|e| e.system.as_deref() == Some(system) && e.filter.is_none() && e.concept.is_some())
    {
        existing
            .concept
            .get_or_insert_with(Vec::new)
            .extend(concepts.iter().cloned());
        return;
    }
    entries.push(include);
}

fn build_filter(filter: &ast::ValueSetFilterSpec) -> Result<ValueSetFilter, ExportError> {
    if !FILTER_OPERATORS.contains(&filter.op.as_str()) {
        return Err(ExportError::ValueSetFilterOperator(filter.op.clone()));
    }
    let value = match (&filter.op[..], &filter.value) {
        ("exists", FshValue::Boolean(b)) => b.to_string(),
        ("exists", _) => {
            return Err(ExportError::ValueSetFilterValue {
                op: filter.op.clone(),
                reason: "exists requires a boolean".to_string(),
            });
        }
        ("regex", FshValue::String(s)) => s.clone(),
        ("regex", _) => {
            return Err(ExportError::ValueSetFilterValue {
                op: filter.op.clone(),
                reason: "regex requires a string".to_string(),
            });
        }
        (_, FshValue::Code(code)) => code.code.clone(),
        (_, FshValue::String(s)) => s.clone(),
        (_, other) => {
            return Err(ExportError::ValueSetFilterValue {
                op: filter.op.clone(),
                reason: format!("unsupported {} value", other.kind_name()),
            });
        }
    };
    Ok(ValueSetFilter {
        property: filter.property.clone(),
        op: filter.op.clone(),
        value,
    })
}

/// Apply a `^path = value` rule to a serialized resource
pub(crate) fn apply_resource_caret<T>(
    resource: &mut T,
    caret_path: &str,
    value: &FshValue,
) -> Result<(), ExportError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut map = match serde_json::to_value(&*resource)? {
        JsonValue::Object(map) => map,
        _ => unreachable!("resources serialize to objects"),
    };
    set_json_path(&mut map, caret_path, convert_value_loose(value))?;
    *resource = serde_json::from_value(JsonValue::Object(map))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FshCode;

    #[test]
    fn filter_operator_is_validated() {
        let bad = ast::ValueSetFilterSpec {
            property: "concept".to_string(),
            op: "resembles".to_string(),
            value: FshValue::String("x".to_string()),
        };
        assert!(matches!(
            build_filter(&bad),
            Err(ExportError::ValueSetFilterOperator(_))
        ));
    }

    #[test]
    fn exists_filter_requires_boolean() {
        let bad = ast::ValueSetFilterSpec {
            property: "inactive".to_string(),
            op: "exists".to_string(),
            value: FshValue::String("yes".to_string()),
        };
        assert!(matches!(
            build_filter(&bad),
            Err(ExportError::ValueSetFilterValue { .. })
        ));

        let good = ast::ValueSetFilterSpec {
            property: "inactive".to_string(),
            op: "exists".to_string(),
            value: FshValue::Boolean(true),
        };
        assert_eq!(build_filter(&good).unwrap().value, "true");
    }

    #[test]
    fn concepts_merge_by_system() {
        let mut entries = Vec::new();
        for code in ["a", "b"] {
            push_merged(
                &mut entries,
                ValueSetInclude {
                    system: Some("http://loinc.org".to_string()),
                    concept: Some(vec![ValueSetConcept {
                        code: code.to_string(),
                        display: None,
                    }]),
                    ..Default::default()
                },
            );
        }
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].concept.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn is_a_filter_takes_code_value() {
        let filter = ast::ValueSetFilterSpec {
            property: "concept".to_string(),
            op: "is-a".to_string(),
            value: FshValue::Code(FshCode {
                system: None,
                code: "85353-1".to_string(),
                display: None,
            }),
        };
        assert_eq!(build_filter(&filter).unwrap().value, "85353-1");
    }
}
