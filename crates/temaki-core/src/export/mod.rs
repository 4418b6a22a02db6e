//! FHIR exporters: profiles, extensions, instances, value sets, code
//! systems, the package assembler, and the ig.ini emitter

pub mod build;
pub mod codesystem_exporter;
pub mod fhir_types;
pub mod ig_ini;
pub mod instance_exporter;
pub mod package;
pub mod path_resolver;
pub mod sd_exporter;
pub mod value;
pub mod valueset_exporter;

pub use build::{BuildResult, build};
pub use codesystem_exporter::CodeSystemExporter;
pub use fhir_types::*;
pub use ig_ini::IgIniEmitter;
pub use instance_exporter::{InstanceDefinition, InstanceExporter};
pub use package::Package;
pub use path_resolver::{PathResolver, ResolvedElement};
pub use sd_exporter::StructureDefinitionExporter;
pub use valueset_exporter::ValueSetExporter;

use thiserror::Error;

/// Export errors. Each variant is a distinct diagnostic kind; all of them
/// are recoverable — the offending rule or entity is skipped and the
/// compilation continues.
#[derive(Debug, Error)]
pub enum ExportError {
    // Resolution
    #[error("Parent '{parent}' of '{name}' is not defined{note}")]
    ParentNotDefined {
        name: String,
        parent: String,
        note: String,
    },

    #[error("InstanceOf '{instance_of}' of instance '{name}' is not defined")]
    InstanceOfNotDefined { name: String, instance_of: String },

    #[error("Cannot resolve path '{path}' on '{target}'")]
    CannotResolvePath { path: String, target: String },

    #[error("Type '{0}' not found")]
    TypeNotFound(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Slicing is not defined on '{path}'")]
    SlicingNotDefined { path: String },

    #[error("Cannot resolve canonical for '{0}'")]
    CannotResolveCanonical(String),

    // Type / value
    #[error("Cannot assign {value_kind} value to element of type {type_code}")]
    MismatchedType {
        value_kind: &'static str,
        type_code: String,
    },

    #[error("Cannot assign value at '{path}': element does not have a single type")]
    NoSingleType { path: String },

    #[error("Code '{code}' does not belong to system '{system}'")]
    CodeAndSystemMismatch { code: String, system: String },

    #[error("Cannot relax fixed value at '{path}' to a pattern")]
    FixedToPattern { path: String },

    #[error("Value at '{path}' is already fixed to {existing}; cannot assign {requested}")]
    ValueAlreadyFixed {
        path: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid FHIR id: '{0}' (must match [A-Za-z0-9\\-.]{{1,64}})")]
    InvalidFHIRId(String),

    #[error("Invalid dateTime: {0}")]
    InvalidDateTime(String),

    #[error("Invalid period at '{path}': start {start} is after end {end}")]
    InvalidPeriod {
        path: String,
        start: String,
        end: String,
    },

    #[error("Invalid range at '{path}': low {low} is greater than high {high}")]
    InvalidRangeValue {
        path: String,
        low: String,
        high: String,
    },

    #[error("Invalid units: {0}")]
    InvalidUnits(String),

    #[error("Unit of '{actual}' does not match required unit '{expected}'")]
    UnitMismatch { expected: String, actual: String },

    // Cardinality / slicing
    #[error("Invalid cardinality: {0}")]
    InvalidCardinality(String),

    #[error("Cannot widen cardinality of '{path}' from {old} to {new}")]
    WideningCardinality {
        path: String,
        old: String,
        new: String,
    },

    #[error("Cannot narrow root cardinality of '{path}'")]
    NarrowingRootCardinality { path: String },

    #[error("Sum of slice minimums ({sum}) on '{path}' exceeds the element maximum ({max})")]
    InvalidSumOfSliceMins { path: String, sum: u32, max: String },

    #[error("Slice maximum ({slice_max}) on '{path}' exceeds the element maximum ({max})")]
    InvalidMaxOfSlice {
        path: String,
        slice_max: String,
        max: String,
    },

    #[error("Cannot remove types constrained by slices on '{path}'")]
    SliceTypeRemoval { path: String },

    #[error("Invalid slicing definition on '{path}': {reason}")]
    SlicingDefinitionError { path: String, reason: String },

    #[error("Cannot clear flag '{flag}' on '{path}': flags only accumulate")]
    CannotClearFlag { path: String, flag: String },

    // Binding
    #[error("Cannot weaken binding strength at '{path}' from {old} to {new}")]
    BindingStrength {
        path: String,
        old: String,
        new: String,
    },

    #[error("Cannot bind value set at '{path}': element has no codeable type")]
    CodedTypeNotFound { path: String },

    #[error("Invalid value set filter operator: {0}")]
    ValueSetFilterOperator(String),

    #[error("Invalid value set filter value for '{op}': {reason}")]
    ValueSetFilterValue { op: String, reason: String },

    #[error("Value set compose error: {0}")]
    ValueSetCompose(String),

    // Reference / instance
    #[error("Invalid resource type: {0}")]
    InvalidResourceType(String),

    #[error("Cannot assign non-resource '{0}' as an inline resource")]
    FixingNonResource(String),

    #[error("Extension parent '{0}' is not an Extension")]
    InvalidExtensionParent(String),

    #[error("Parent of '{name}' was declared with profile name '{parent}'; use its id or url")]
    ParentDeclaredAsProfileName { name: String, parent: String },

    #[error("Duplicate instance id: {resource_type}/{id}")]
    DuplicateInstanceId { resource_type: String, id: String },

    #[error("Instance '{instance}' is missing required element '{path}'")]
    RequiredElementMissing { instance: String, path: String },

    // Structure / package load
    #[error("StructureDefinition '{0}' has no snapshot")]
    MissingSnapshot(String),

    #[error("Cannot load the current FHIR build package: {message}")]
    CurrentPackageLoad { message: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
