//! CodeSystem exporter
//!
//! Translates FSH CodeSystem entities into FHIR CodeSystem resources. The
//! parser delivers a flat concept list where each concept carries its
//! ancestry (`* #produce #apple`); this exporter rebuilds the concept tree
//! and recounts it.

use super::fhir_types::{CodeSystemConcept, CodeSystemResource};
use super::package::Package;
use super::valueset_exporter::apply_resource_caret;
use super::ExportError;
use crate::ast;
use crate::config::ProjectConfiguration;
use crate::diagnostics::DiagnosticCollector;
use crate::semantic::FshTank;
use std::cell::RefCell;
use tracing::debug;

/// Exports FSH code systems to FHIR CodeSystem resources
pub struct CodeSystemExporter<'a> {
    tank: &'a FshTank,
    package: &'a RefCell<Package>,
    collector: &'a DiagnosticCollector,
    config: &'a ProjectConfiguration,
}

impl<'a> CodeSystemExporter<'a> {
    pub fn new(
        tank: &'a FshTank,
        package: &'a RefCell<Package>,
        collector: &'a DiagnosticCollector,
        config: &'a ProjectConfiguration,
    ) -> Self {
        Self {
            tank,
            package,
            collector,
            config,
        }
    }

    pub fn export_all(&self) {
        let code_systems: Vec<ast::FshCodeSystem> = self.tank.code_systems().cloned().collect();
        for cs in code_systems {
            let exported = self.export_code_system(&cs);
            self.package.borrow_mut().add_code_system(exported);
        }
    }

    pub fn export_code_system(&self, cs: &ast::FshCodeSystem) -> CodeSystemResource {
        debug!("Exporting code system {}", cs.name);
        let id = cs.id.clone().unwrap_or_else(|| cs.name.clone());
        let url = format!("{}/CodeSystem/{id}", self.config.canonical);

        let mut resource =
            CodeSystemResource::new(url, cs.name.clone(), self.config.status_or_default());
        resource.id = Some(id);
        resource.title = cs.title.clone();
        resource.description = cs.description.clone();
        resource.version = self.config.version.clone();
        resource.publisher = self.config.publisher.clone();

        let mut roots: Vec<CodeSystemConcept> = Vec::new();
        for concept in &cs.concepts {
            if let Err(err) = insert_concept(&mut roots, concept) {
                self.collector
                    .error_at(err.to_string(), concept.location.clone());
            }
        }
        if !roots.is_empty() {
            resource.concept = Some(roots);
        }
        resource.update_count();

        for caret in &cs.caret_rules {
            if let Err(err) = apply_resource_caret(&mut resource, &caret.caret_path, &caret.value) {
                self.collector
                    .error_at(err.to_string(), caret.location.clone());
            }
        }
        resource
    }
}

/// Place a concept under its declared ancestry
fn insert_concept(
    roots: &mut Vec<CodeSystemConcept>,
    def: &ast::ConceptDef,
) -> Result<(), ExportError> {
    let mut siblings = roots;
    for parent_code in &def.parents {
        let position = siblings
            .iter()
            .position(|c| c.code == *parent_code)
            .ok_or_else(|| {
                ExportError::ValueSetCompose(format!(
                    "parent concept '#{parent_code}' of '#{code}' is not defined",
                    code = def.code
                ))
            })?;
        siblings = siblings[position].concept.get_or_insert_with(Vec::new);
    }
    if siblings.iter().any(|c| c.code == def.code) {
        return Err(ExportError::ValueSetCompose(format!(
            "concept '#{}' is defined twice",
            def.code
        )));
    }
    siblings.push(CodeSystemConcept {
        code: def.code.clone(),
        display: def.display.clone(),
        definition: def.definition.clone(),
        concept: None,
    });
    Ok(())
}
