//! Shared fixtures for exporter integration tests
//!
//! Builds an in-memory definitions cache with minimal R4 snapshots: enough
//! of Observation, Patient, and Organization plus the datatypes the path
//! resolver unfolds (CodeableConcept, Coding, Quantity, Reference,
//! HumanName) to exercise the pipeline without a package download.

use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use temaki_core::{DiagnosticCollector, FhirDefs, ProjectConfiguration, build};

pub const CORE: &str = "http://hl7.org/fhir/StructureDefinition";

fn sd(name: &str, kind: &str, elements: JsonValue) -> JsonValue {
    json!({
        "resourceType": "StructureDefinition",
        "id": name,
        "url": format!("{CORE}/{name}"),
        "name": name,
        "status": "active",
        "kind": kind,
        "abstract": false,
        "type": name,
        "snapshot": { "element": elements },
    })
}

fn element(id: &str, min: u32, max: &str, types: &[&str]) -> JsonValue {
    let mut e = json!({
        "id": id,
        "path": id,
        "min": min,
        "max": max,
    });
    if !types.is_empty() {
        e["type"] = json!(
            types
                .iter()
                .map(|t| json!({ "code": t }))
                .collect::<Vec<_>>()
        );
    }
    e
}

pub fn test_defs() -> FhirDefs {
    let mut defs = FhirDefs::new();

    let mut observation_elements = vec![
        element("Observation", 0, "*", &[]),
        element("Observation.id", 0, "1", &["id"]),
        element("Observation.status", 1, "1", &["code"]),
        element("Observation.category", 0, "*", &["CodeableConcept"]),
        element("Observation.code", 1, "1", &["CodeableConcept"]),
        element("Observation.subject", 0, "1", &["Reference"]),
        element(
            "Observation.value[x]",
            0,
            "1",
            &["Quantity", "CodeableConcept", "string", "Period", "Range"],
        ),
    ];
    observation_elements[2]["binding"] = json!({
        "strength": "required",
        "valueSet": "http://hl7.org/fhir/ValueSet/observation-status"
    });
    observation_elements[3]["binding"] = json!({
        "strength": "example",
        "valueSet": "http://hl7.org/fhir/ValueSet/observation-category"
    });
    observation_elements[5]["type"] = json!([{
        "code": "Reference",
        "targetProfile": [
            format!("{CORE}/Patient"),
            format!("{CORE}/Group")
        ]
    }]);
    defs.add_definition(sd("Observation", "resource", json!(observation_elements)));

    defs.add_definition(sd(
        "Patient",
        "resource",
        json!([
            element("Patient", 0, "*", &[]),
            element("Patient.id", 0, "1", &["id"]),
            element("Patient.contained", 0, "*", &["Resource"]),
            element("Patient.active", 0, "1", &["boolean"]),
            element("Patient.name", 0, "*", &["HumanName"]),
            element("Patient.maritalStatus", 0, "1", &["CodeableConcept"]),
            element("Patient.managingOrganization", 0, "1", &["Reference"]),
        ]),
    ));

    defs.add_definition(sd(
        "Organization",
        "resource",
        json!([
            element("Organization", 0, "*", &[]),
            element("Organization.id", 0, "1", &["id"]),
            element("Organization.active", 0, "1", &["boolean"]),
            element("Organization.name", 0, "1", &["string"]),
        ]),
    ));

    defs.add_definition(sd(
        "Group",
        "resource",
        json!([element("Group", 0, "*", &[]), element("Group.id", 0, "1", &["id"])]),
    ));

    defs.add_definition(sd(
        "CodeableConcept",
        "complex-type",
        json!([
            element("CodeableConcept", 0, "*", &[]),
            element("CodeableConcept.coding", 0, "*", &["Coding"]),
            element("CodeableConcept.text", 0, "1", &["string"]),
        ]),
    ));

    defs.add_definition(sd(
        "Coding",
        "complex-type",
        json!([
            element("Coding", 0, "*", &[]),
            element("Coding.system", 0, "1", &["uri"]),
            element("Coding.version", 0, "1", &["string"]),
            element("Coding.code", 0, "1", &["code"]),
            element("Coding.display", 0, "1", &["string"]),
        ]),
    ));

    defs.add_definition(sd(
        "Quantity",
        "complex-type",
        json!([
            element("Quantity", 0, "*", &[]),
            element("Quantity.value", 0, "1", &["decimal"]),
            element("Quantity.unit", 0, "1", &["string"]),
            element("Quantity.system", 0, "1", &["uri"]),
            element("Quantity.code", 0, "1", &["code"]),
        ]),
    ));

    defs.add_definition(sd(
        "Reference",
        "complex-type",
        json!([
            element("Reference", 0, "*", &[]),
            element("Reference.reference", 0, "1", &["string"]),
            element("Reference.display", 0, "1", &["string"]),
        ]),
    ));

    defs.add_definition(sd(
        "Period",
        "complex-type",
        json!([
            element("Period", 0, "*", &[]),
            element("Period.start", 0, "1", &["dateTime"]),
            element("Period.end", 0, "1", &["dateTime"]),
        ]),
    ));

    defs.add_definition(sd(
        "Range",
        "complex-type",
        json!([
            element("Range", 0, "*", &[]),
            element("Range.low", 0, "1", &["Quantity"]),
            element("Range.high", 0, "1", &["Quantity"]),
        ]),
    ));

    defs.add_definition(sd(
        "HumanName",
        "complex-type",
        json!([
            element("HumanName", 0, "*", &[]),
            element("HumanName.family", 0, "1", &["string"]),
            element("HumanName.given", 0, "*", &["string"]),
        ]),
    ));

    defs.add_definition(sd(
        "Extension",
        "complex-type",
        json!([
            element("Extension", 0, "*", &[]),
            element("Extension.url", 1, "1", &["uri"]),
            element("Extension.value[x]", 0, "1", &["Quantity", "string", "boolean"]),
        ]),
    ));

    defs
}

pub fn test_config() -> ProjectConfiguration {
    ProjectConfiguration {
        canonical: "http://example.org/fhir".to_string(),
        id: Some("example.fhir.test".to_string()),
        status: Some("draft".to_string()),
        ..Default::default()
    }
}

/// Compile FSH text through the full pipeline against the fixture defs
pub fn compile(sources: &[(&str, &str)]) -> (temaki_core::BuildResult, DiagnosticCollector) {
    let defs = test_defs();
    let config = test_config();
    let collector = DiagnosticCollector::new();
    let sources: Vec<(PathBuf, String)> = sources
        .iter()
        .map(|(path, text)| (PathBuf::from(path), text.to_string()))
        .collect();
    let result = build(&sources, &config, &defs, &collector, None);
    (result, collector)
}
