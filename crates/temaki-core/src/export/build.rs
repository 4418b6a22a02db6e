//! Build orchestration
//!
//! Wires one compilation end to end: import all sources into a tank, run
//! the exporters in dependency-safe order, and emit the ig.ini. Fatal
//! errors inside one entity are reported and that entity skipped; the rest
//! of the build continues.

use super::ig_ini::IgIniEmitter;
use super::instance_exporter::InstanceExporter;
use super::package::Package;
use super::sd_exporter::StructureDefinitionExporter;
use super::codesystem_exporter::CodeSystemExporter;
use super::valueset_exporter::ValueSetExporter;
use crate::config::ProjectConfiguration;
use crate::diagnostics::DiagnosticCollector;
use crate::fish::Fishable;
use crate::import::FshImporter;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything one compilation produces
#[derive(Debug)]
pub struct BuildResult {
    pub package: Package,
    pub ig_ini: Option<String>,
}

/// Compile FSH sources into a package of FHIR artifacts plus the ig.ini
///
/// `existing_ig_ini` is an author-maintained ig.ini found on disk, if any,
/// as `(path, content)`.
pub fn build(
    sources: &[(PathBuf, String)],
    config: &ProjectConfiguration,
    defs: &dyn Fishable,
    collector: &DiagnosticCollector,
    existing_ig_ini: Option<(&Path, &str)>,
) -> BuildResult {
    let mut importer = FshImporter::new();
    let (tank, _aliases) = importer.import(sources, collector);
    info!(
        "Imported {} documents ({} entities)",
        tank.documents.len(),
        tank.entities().count()
    );

    let package = RefCell::new(Package::new());

    // terminology first so bindings and canonicals can fish it, then
    // structures, then instances (which need the structures)
    ValueSetExporter::new(&tank, defs, &package, collector, config).export_all();
    CodeSystemExporter::new(&tank, &package, collector, config).export_all();

    let sd_exporter = StructureDefinitionExporter::new(&tank, defs, &package, collector, config);
    sd_exporter.export_all();

    InstanceExporter::new(&tank, defs, &package, collector, config, &sd_exporter).export_all();

    let ig_ini = IgIniEmitter::new(config, collector).emit(existing_ig_ini);

    BuildResult {
        package: package.into_inner(),
        ig_ini,
    }
}
