//! TEMAKI Core
//!
//! Core compilation engine for FHIR Shorthand (FSH) projects. This crate
//! parses FSH source into a typed AST, compiles Profiles and Extensions
//! into derived StructureDefinitions, builds concrete resource instances,
//! emits ValueSets and CodeSystems, and assembles everything into a
//! package alongside the IG publisher's ig.ini.

pub mod ast;
pub mod config;
pub mod definitions;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod fish;
pub mod import;
pub mod semantic;

// Re-export commonly used types
pub use ast::{Document, Entity, FshValue, Rule};
pub use config::{ConfigError, ProjectConfiguration};
pub use definitions::FhirDefs;
pub use diagnostics::{Diagnostic, DiagnosticCollector, Location, Severity};
pub use error::{ErrorKind, TemakiError};
pub use export::{
    BuildResult, ExportError, IgIniEmitter, InstanceDefinition, InstanceExporter, Package,
    StructureDefinition, StructureDefinitionExporter, build,
};
pub use fish::{FishKind, FishMetadata, Fishable, FishingContext};
pub use import::FshImporter;
pub use semantic::{AliasTable, FshTank};

/// Initialize the tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("temaki=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
