//! End-to-end build pipeline tests

mod common;

use common::{compile, test_defs};
use std::path::PathBuf;
use temaki_core::diagnostics::Severity;
use temaki_core::{DiagnosticCollector, ProjectConfiguration, build};

#[test]
fn ig_ini_is_generated_from_template_config() {
    let defs = test_defs();
    let config = ProjectConfiguration {
        canonical: "http://hl7.org/fhir/us/minimal".to_string(),
        id: Some("fhir.us.minimal".to_string()),
        template: Some("hl7.fhir.template#0.0.5".to_string()),
        ..Default::default()
    };
    let collector = DiagnosticCollector::new();
    let sources = vec![(
        PathBuf::from("minimal.fsh"),
        "Profile: Minimal\nParent: Patient\n* active 1..1\n".to_string(),
    )];

    let result = build(&sources, &config, &defs, &collector, None);

    let ig_ini = result.ig_ini.expect("ig.ini is generated");
    assert!(ig_ini.contains("[IG]"));
    assert!(ig_ini.contains("ig = input/ImplementationGuide-fhir.us.minimal.json"));
    assert!(ig_ini.contains("template = hl7.fhir.template#0.0.5"));

    let infos: Vec<_> = collector
        .records()
        .into_iter()
        .filter(|d| d.severity == Severity::Info)
        .collect();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].message, "Generated ig.ini.");
}

#[test]
fn no_template_and_no_file_emits_no_ig_ini() {
    let (result, _) = compile(&[("a.fsh", "Profile: P\nParent: Patient\n")]);
    assert!(result.ig_ini.is_none());
}

#[test]
fn value_sets_and_code_systems_flow_into_the_package() {
    let (result, collector) = compile(&[(
        "terminology.fsh",
        "CodeSystem: Foods\nId: foods\nTitle: \"Food Codes\"\n\
         * #produce \"Produce\"\n\
         * #produce #apple \"Apple\"\n\n\
         ValueSet: FruitVS\nId: fruit-vs\n\
         * include codes from system Foods\n\
         * http://loinc.org#8480-6 \"Systolic blood pressure\"\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let cs = result.package.code_systems.get("Foods").unwrap();
    assert_eq!(cs.url, "http://example.org/fhir/CodeSystem/foods");
    assert_eq!(cs.count, Some(2));

    let vs = result.package.value_sets.get("FruitVS").unwrap();
    assert_eq!(vs.url, "http://example.org/fhir/ValueSet/fruit-vs");
    let compose = vs.compose.as_ref().unwrap();
    assert_eq!(compose.include.len(), 2);
    // the FSH code system resolves to its canonical URL
    assert_eq!(
        compose.include[0].system.as_deref(),
        Some("http://example.org/fhir/CodeSystem/foods")
    );

    let artifacts = result.package.artifacts();
    assert!(artifacts.iter().any(|(t, id, _)| t == "ValueSet" && id == "fruit-vs"));
    assert!(artifacts.iter().any(|(t, id, _)| t == "CodeSystem" && id == "foods"));
}

#[test]
fn binding_to_tank_value_set_resolves_to_its_canonical() {
    let (result, collector) = compile(&[(
        "mix.fsh",
        "ValueSet: CatVS\nId: cat-vs\n* http://loinc.org#1234-5\n\n\
         Profile: Bound\nParent: Observation\n* category from CatVS (extensible)\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let sd = result.package.profiles.get("Bound").unwrap();
    let category = sd.find_element("Observation.category").unwrap();
    assert_eq!(
        category.binding.as_ref().unwrap().value_set.as_deref(),
        Some("http://example.org/fhir/ValueSet/cat-vs")
    );
}

#[test]
fn parse_errors_do_not_stop_sibling_entities() {
    let (result, collector) = compile(&[(
        "mixed.fsh",
        "Profile: Good\nParent: Observation\n* subject 1..1\n* nonsense rule here\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.starts_with("Unsupported rule:"))
    );
    assert!(result.package.profiles.get("Good").is_some());
}
