//! Instance exporter integration tests

mod common;

use common::compile;
use serde_json::json;

fn instance_json(result: &temaki_core::BuildResult, name: &str) -> serde_json::Value {
    result
        .package
        .find_instance(name)
        .unwrap_or_else(|| panic!("instance {name} was not exported"))
        .to_json()
}

#[test]
fn simple_assignments_build_the_resource() {
    let (result, collector) = compile(&[(
        "pat.fsh",
        "Instance: JanePatient\n\
         InstanceOf: Patient\n\
         Usage: #example\n\
         * active = true\n\
         * name[0].family = \"Doe\"\n\
         * name[0].given[0] = \"Jane\"\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let json = instance_json(&result, "JanePatient");
    assert_eq!(json["resourceType"], json!("Patient"));
    assert_eq!(json["id"], json!("JanePatient"));
    assert_eq!(json["active"], json!(true));
    assert_eq!(json["name"], json!([{"family": "Doe", "given": ["Jane"]}]));
}

#[test]
fn pattern_propagates_into_instance_assignments() {
    let (result, collector) = compile(&[(
        "pat.fsh",
        "Profile: MarriedPatient\n\
         Parent: Patient\n\
         * maritalStatus.coding = http://foo.com#foo\n\
         \n\
         Instance: Marge\n\
         InstanceOf: MarriedPatient\n\
         Usage: #example\n\
         * maritalStatus.coding[0].version = \"1.2.3\"\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let json = instance_json(&result, "Marge");
    assert_eq!(
        json["maritalStatus"],
        json!({"coding": [{"system": "http://foo.com", "code": "foo", "version": "1.2.3"}]})
    );
    // derived profiles stamp meta.profile
    assert_eq!(
        json["meta"]["profile"],
        json!(["http://example.org/fhir/StructureDefinition/MarriedPatient"])
    );
}

#[test]
fn duplicate_instance_ids_error_but_both_emit() {
    let (result, collector) = compile(&[(
        "dup.fsh",
        "Instance: First\nInstanceOf: Patient\nId: repeated-id\n* active = true\n\n\
         Instance: Second\nInstanceOf: Patient\nId: repeated-id\n* active = false\n",
    )]);
    let duplicates: Vec<_> = collector
        .records()
        .into_iter()
        .filter(|d| d.message.contains("Duplicate instance id"))
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert!(duplicates[0].message.contains("Patient/repeated-id"));
    assert_eq!(result.package.instances.len(), 2);
    assert_eq!(result.package.artifacts().len(), 2);
}

#[test]
fn contained_reference_rewrites_to_local_anchor() {
    let (result, collector) = compile(&[(
        "contained.fsh",
        "Instance: OrgInst\nInstanceOf: Organization\nId: org-id\nUsage: #inline\n* name = \"Acme\"\n\n\
         Instance: Pat\nInstanceOf: Patient\nUsage: #example\n\
         * contained[0] = OrgInst\n\
         * managingOrganization = Reference(OrgInst)\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let json = instance_json(&result, "Pat");
    assert_eq!(
        json["contained"],
        json!([{"resourceType": "Organization", "id": "org-id", "name": "Acme"}])
    );
    assert_eq!(json["managingOrganization"], json!({"reference": "#org-id"}));
}

#[test]
fn uncontained_reference_uses_type_and_id() {
    let (result, collector) = compile(&[(
        "refs.fsh",
        "Instance: OrgInst\nInstanceOf: Organization\nId: org-id\n* name = \"Acme\"\n\n\
         Instance: Pat\nInstanceOf: Patient\nUsage: #example\n\
         * managingOrganization = Reference(OrgInst)\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let json = instance_json(&result, "Pat");
    assert_eq!(
        json["managingOrganization"],
        json!({"reference": "Organization/org-id"})
    );
}

#[test]
fn required_elements_are_validated() {
    let (_, collector) = compile(&[(
        "obs.fsh",
        "Instance: NoStatus\nInstanceOf: Observation\nUsage: #example\n\
         * valueQuantity = 5.4 'mg'\n",
    )]);
    let missing: Vec<_> = collector
        .records()
        .into_iter()
        .filter(|d| d.message.contains("missing required element"))
        .collect();
    // Observation requires status and code
    assert_eq!(missing.len(), 2, "{missing:?}");
    assert!(missing.iter().any(|d| d.message.contains("Observation.status")));
    assert!(missing.iter().any(|d| d.message.contains("Observation.code")));
}

#[test]
fn choice_assignment_emits_type_qualified_key() {
    let (result, collector) = compile(&[(
        "obs.fsh",
        "Instance: Vitals\nInstanceOf: Observation\nUsage: #example\n\
         * status = #final\n\
         * code = http://loinc.org#8480-6 \"Systolic blood pressure\"\n\
         * valueQuantity = 5.4 'mg'\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let json = instance_json(&result, "Vitals");
    assert_eq!(json["status"], json!("final"));
    assert_eq!(
        json["code"],
        json!({"coding": [{
            "system": "http://loinc.org",
            "code": "8480-6",
            "display": "Systolic blood pressure"
        }]})
    );
    assert_eq!(
        json["valueQuantity"],
        json!({"value": 5.4, "system": "http://unitsofmeasure.org", "code": "mg"})
    );
}

#[test]
fn period_with_start_after_end_is_rejected() {
    let (_, collector) = compile(&[(
        "obs.fsh",
        "Instance: BadPeriod\nInstanceOf: Observation\nUsage: #example\n\
         * status = #final\n\
         * code = http://loinc.org#8480-6\n\
         * valuePeriod.start = \"2020-01-01\"\n\
         * valuePeriod.end = \"2019-01-01\"\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("start 2020-01-01 is after end 2019-01-01")),
        "{:?}",
        collector.records()
    );
}

#[test]
fn range_with_low_above_high_is_rejected() {
    let (_, collector) = compile(&[(
        "obs.fsh",
        "Instance: BadRange\nInstanceOf: Observation\nUsage: #example\n\
         * status = #final\n\
         * code = http://loinc.org#8480-6\n\
         * valueRange.low = 5 'mg'\n\
         * valueRange.high = 2 'mg'\n\n\
         Instance: MixedUnits\nInstanceOf: Observation\nUsage: #example\n\
         * status = #final\n\
         * code = http://loinc.org#8480-6\n\
         * valueRange.low = 1 'mg'\n\
         * valueRange.high = 2 'mL'\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("low 5 is greater than high 2")),
        "{:?}",
        collector.records()
    );
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("does not match required unit 'mg'")),
        "{:?}",
        collector.records()
    );
}

#[test]
fn instance_id_with_underscore_is_sanitized_with_warning() {
    let (result, collector) = compile(&[(
        "pat.fsh",
        "Instance: Odd_Name\nInstanceOf: Patient\nUsage: #example\n* active = true\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("sanitized to 'Odd-Name'"))
    );
    let json = instance_json(&result, "Odd_Name");
    assert_eq!(json["id"], json!("Odd-Name"));
}

#[test]
fn malformed_id_is_reported_but_emitted() {
    let (result, collector) = compile(&[(
        "pat.fsh",
        "Instance: Bad\nInstanceOf: Patient\nId: has!bang\nUsage: #example\n* active = true\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("Invalid FHIR id"))
    );
    let json = instance_json(&result, "Bad");
    assert_eq!(json["id"], json!("has!bang"));
}

#[test]
fn instance_of_unknown_type_is_skipped() {
    let (result, collector) = compile(&[(
        "pat.fsh",
        "Instance: Ghost\nInstanceOf: NotAThing\nUsage: #example\n* active = true\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("NotAThing") && d.message.contains("not defined"))
    );
    assert!(result.package.find_instance("Ghost").is_none());
}

#[test]
fn fixed_primitive_in_profile_rejects_contradicting_assignment() {
    let (result, collector) = compile(&[(
        "fixed.fsh",
        "Profile: AlwaysActive\nParent: Patient\n* active = true (exactly)\n\n\
         Instance: Inactive\nInstanceOf: AlwaysActive\nUsage: #example\n* active = false\n",
    )]);
    assert!(
        collector
            .records()
            .iter()
            .any(|d| d.message.contains("already fixed"))
    );
    // the profile's value is preserved
    let json = instance_json(&result, "Inactive");
    assert_eq!(json["active"], json!(true));
}

#[test]
fn superset_assignment_unions_with_pattern() {
    let (result, collector) = compile(&[(
        "pattern.fsh",
        "Profile: CodedPatient\nParent: Patient\n* maritalStatus = http://foo.com#foo\n\n\
         Instance: Pat\nInstanceOf: CodedPatient\nUsage: #example\n\
         * maritalStatus.text = \"married\"\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());

    let json = instance_json(&result, "Pat");
    assert_eq!(
        json["maritalStatus"],
        json!({
            "coding": [{"system": "http://foo.com", "code": "foo"}],
            "text": "married"
        })
    );
}

#[test]
fn later_assignment_overwrites_earlier_at_same_path() {
    let (result, collector) = compile(&[(
        "pat.fsh",
        "Instance: Flip\nInstanceOf: Patient\nUsage: #example\n\
         * active = true\n\
         * active = false\n",
    )]);
    assert_eq!(collector.error_count(), 0);
    let json = instance_json(&result, "Flip");
    assert_eq!(json["active"], json!(false));
}

#[test]
fn mixin_rules_apply_before_body_rules() {
    let (result, collector) = compile(&[(
        "mixin.fsh",
        "RuleSet: ActiveBits\n* active = true\n\n\
         Instance: Mixed\nInstanceOf: Patient\nUsage: #example\nMixins: ActiveBits\n\
         * name[0].family = \"Doe\"\n",
    )]);
    assert_eq!(collector.error_count(), 0, "{:?}", collector.records());
    let json = instance_json(&result, "Mixed");
    assert_eq!(json["active"], json!(true));
    assert_eq!(json["name"][0]["family"], json!("Doe"));
}
