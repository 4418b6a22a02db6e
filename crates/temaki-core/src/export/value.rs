//! FSH value conversion
//!
//! Converts parsed FSH values into the JSON shape a target FHIR type
//! expects. The same conversion backs fixed/pattern rules on profiles and
//! assignment rules on instances; caret rules use the type-agnostic variant
//! since the target is a field of the definition itself.

use super::ExportError;
use crate::ast::{FshCode, FshQuantity, FshValue};
use serde_json::{Value as JsonValue, json};

pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

const PRIMITIVE_STRING_TYPES: &[&str] = &[
    "string",
    "markdown",
    "id",
    "uri",
    "url",
    "canonical",
    "oid",
    "uuid",
    "base64Binary",
    "xhtml",
];

const DATE_TIME_TYPES: &[&str] = &["date", "dateTime", "instant", "time"];

const INTEGER_TYPES: &[&str] = &["integer", "integer64", "unsignedInt", "positiveInt"];

/// Types a value set may be bound to
pub fn is_codeable_type(type_code: &str) -> bool {
    matches!(
        type_code,
        "code" | "Coding" | "CodeableConcept" | "Quantity" | "string" | "uri"
    )
}

fn code_json(code: &FshCode) -> JsonValue {
    let mut map = serde_json::Map::new();
    if let Some(system) = &code.system {
        map.insert("system".to_string(), json!(system));
    }
    map.insert("code".to_string(), json!(code.code));
    if let Some(display) = &code.display {
        map.insert("display".to_string(), json!(display));
    }
    JsonValue::Object(map)
}

fn quantity_json(quantity: &FshQuantity) -> JsonValue {
    let mut map = serde_json::Map::new();
    map.insert("value".to_string(), JsonValue::Number(quantity.value.clone()));
    if let Some(unit) = &quantity.unit {
        map.insert("system".to_string(), json!(UCUM_SYSTEM));
        map.insert("code".to_string(), json!(unit));
    }
    JsonValue::Object(map)
}

/// Convert a value for assignment at an element of `type_code`.
///
/// A bare code is lifted to the shape of the coded target type: a
/// CodeableConcept grows a `coding` array, a Coding or Quantity takes the
/// system and code fields directly.
pub fn convert_value_for_type(
    value: &FshValue,
    type_code: &str,
) -> Result<JsonValue, ExportError> {
    let mismatch = || ExportError::MismatchedType {
        value_kind: value.kind_name(),
        type_code: type_code.to_string(),
    };

    match value {
        FshValue::String(s) => {
            if PRIMITIVE_STRING_TYPES.contains(&type_code)
                || DATE_TIME_TYPES.contains(&type_code)
                || type_code == "code"
            {
                Ok(json!(s))
            } else {
                Err(mismatch())
            }
        }
        FshValue::Boolean(b) => {
            if type_code == "boolean" {
                Ok(json!(b))
            } else {
                Err(mismatch())
            }
        }
        FshValue::Number(n) => {
            if type_code == "decimal" {
                Ok(JsonValue::Number(n.clone()))
            } else if INTEGER_TYPES.contains(&type_code) {
                if n.is_i64() || n.is_u64() {
                    Ok(JsonValue::Number(n.clone()))
                } else {
                    Err(mismatch())
                }
            } else if type_code == "Quantity" {
                Ok(json!({"value": n}))
            } else {
                Err(mismatch())
            }
        }
        FshValue::DateTime(text) => {
            if DATE_TIME_TYPES.contains(&type_code) || PRIMITIVE_STRING_TYPES.contains(&type_code)
            {
                Ok(json!(text))
            } else {
                Err(mismatch())
            }
        }
        FshValue::Code(code) => match type_code {
            "code" | "string" | "uri" | "id" => Ok(json!(code.code)),
            "Coding" => Ok(code_json(code)),
            "CodeableConcept" => Ok(json!({ "coding": [code_json(code)] })),
            "Quantity" => {
                // a bare code on a Quantity sets its coded unit
                let mut map = serde_json::Map::new();
                if let Some(system) = &code.system {
                    map.insert("system".to_string(), json!(system));
                }
                map.insert("code".to_string(), json!(code.code));
                if let Some(display) = &code.display {
                    map.insert("unit".to_string(), json!(display));
                }
                Ok(JsonValue::Object(map))
            }
            _ => Err(mismatch()),
        },
        FshValue::Quantity(quantity) => match type_code {
            "Quantity" | "Age" | "Duration" | "Distance" | "Count" | "MoneyQuantity"
            | "SimpleQuantity" => Ok(quantity_json(quantity)),
            "decimal" => Ok(JsonValue::Number(quantity.value.clone())),
            _ => Err(mismatch()),
        },
        FshValue::Ratio(ratio) => {
            if type_code == "Ratio" {
                Ok(json!({
                    "numerator": quantity_json(&ratio.numerator),
                    "denominator": quantity_json(&ratio.denominator),
                }))
            } else {
                Err(mismatch())
            }
        }
        // Reference and canonical targets carry names that need fishing;
        // exporters resolve them before conversion
        FshValue::Reference(_) | FshValue::Canonical(_) | FshValue::InstanceRef(_) => {
            Err(mismatch())
        }
    }
}

/// Type-agnostic conversion used by caret rules, where the target is a field
/// of the definition resource rather than instance data
pub fn convert_value_loose(value: &FshValue) -> JsonValue {
    match value {
        FshValue::String(s) => json!(s),
        FshValue::Number(n) => JsonValue::Number(n.clone()),
        FshValue::Boolean(b) => json!(b),
        FshValue::DateTime(s) => json!(s),
        FshValue::Code(code) => json!(code.code),
        FshValue::Quantity(q) => quantity_json(q),
        FshValue::Ratio(r) => json!({
            "numerator": quantity_json(&r.numerator),
            "denominator": quantity_json(&r.denominator),
        }),
        FshValue::Reference(name) => json!({ "reference": name }),
        FshValue::Canonical(name) => json!(name),
        FshValue::InstanceRef(name) => json!(name),
    }
}

/// Shape checks for composite values. The FSH grammar has no Period or
/// Range literal; these shapes assemble across several rules, so the check
/// runs on the assembled object: a Period's start must not follow its end,
/// a Range's low must not exceed its high, and both Range bounds must agree
/// on their coded unit.
pub fn validate_composite_value(
    type_code: &str,
    path: &str,
    value: &JsonValue,
) -> Result<(), ExportError> {
    match type_code {
        "Period" => {
            if let (Some(start), Some(end)) = (
                value.get("start").and_then(|v| v.as_str()),
                value.get("end").and_then(|v| v.as_str()),
            ) && start > end
            {
                return Err(ExportError::InvalidPeriod {
                    path: path.to_string(),
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
            Ok(())
        }
        "Range" => {
            let bound = |name: &str| value.get(name);
            if let (Some(low_unit), Some(high_unit)) = (
                bound("low").and_then(|v| v.get("code")).and_then(|v| v.as_str()),
                bound("high").and_then(|v| v.get("code")).and_then(|v| v.as_str()),
            ) && low_unit != high_unit
            {
                return Err(ExportError::UnitMismatch {
                    expected: low_unit.to_string(),
                    actual: high_unit.to_string(),
                });
            }
            if let (Some(low), Some(high)) = (
                bound("low").and_then(|v| v.get("value")).and_then(|v| v.as_f64()),
                bound("high").and_then(|v| v.get("value")).and_then(|v| v.as_f64()),
            ) && low > high
            {
                return Err(ExportError::InvalidRangeValue {
                    path: path.to_string(),
                    low: low.to_string(),
                    high: high.to_string(),
                });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Set a dotted path (with optional `[n]` indexes) inside a JSON object,
/// creating intermediate objects and arrays as needed
pub fn set_json_path(
    target: &mut serde_json::Map<String, JsonValue>,
    path: &str,
    value: JsonValue,
) -> Result<(), ExportError> {
    fn split_segment(segment: &str) -> Result<(&str, Option<usize>), ExportError> {
        match segment.find('[') {
            None => Ok((segment, None)),
            Some(open) => {
                let close = segment
                    .rfind(']')
                    .ok_or_else(|| ExportError::CannotResolvePath {
                        path: segment.to_string(),
                        target: "caret expression".to_string(),
                    })?;
                let index = segment[open + 1..close].parse::<usize>().map_err(|_| {
                    ExportError::CannotResolvePath {
                        path: segment.to_string(),
                        target: "caret expression".to_string(),
                    }
                })?;
                Ok((&segment[..open], Some(index)))
            }
        }
    }

    let segments: Vec<&str> = path.split('.').collect();
    let mut current: &mut JsonValue = {
        let (name, index) = split_segment(segments[0])?;
        let entry = target
            .entry(name.to_string())
            .or_insert_with(|| match index {
                Some(_) => JsonValue::Array(Vec::new()),
                None => JsonValue::Null,
            });
        match index {
            Some(i) => {
                let arr = entry.as_array_mut().ok_or_else(|| {
                    ExportError::CannotResolvePath {
                        path: path.to_string(),
                        target: "caret expression".to_string(),
                    }
                })?;
                while arr.len() <= i {
                    arr.push(JsonValue::Null);
                }
                &mut arr[i]
            }
            None => entry,
        }
    };

    for segment in &segments[1..] {
        let (name, index) = split_segment(segment)?;
        if !current.is_object() {
            *current = JsonValue::Object(serde_json::Map::new());
        }
        let entry = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(name.to_string())
            .or_insert_with(|| match index {
                Some(_) => JsonValue::Array(Vec::new()),
                None => JsonValue::Null,
            });
        current = match index {
            Some(i) => {
                if !entry.is_array() {
                    *entry = JsonValue::Array(Vec::new());
                }
                let arr = entry.as_array_mut().expect("just ensured array");
                while arr.len() <= i {
                    arr.push(JsonValue::Null);
                }
                &mut arr[i]
            }
            None => entry,
        };
    }
    *current = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code(system: Option<&str>, code_str: &str) -> FshValue {
        FshValue::Code(FshCode {
            system: system.map(String::from),
            code: code_str.to_string(),
            display: None,
        })
    }

    #[test]
    fn code_lifts_to_codeable_concept() {
        let converted =
            convert_value_for_type(&code(Some("http://foo.com"), "foo"), "CodeableConcept")
                .unwrap();
        assert_eq!(
            converted,
            json!({"coding": [{"system": "http://foo.com", "code": "foo"}]})
        );
    }

    #[test]
    fn code_lifts_to_quantity_unit() {
        let converted = convert_value_for_type(&code(Some("http://foo.com"), "foo"), "Quantity")
            .unwrap();
        assert_eq!(converted, json!({"system": "http://foo.com", "code": "foo"}));
    }

    #[test]
    fn quantity_gets_ucum_system() {
        let value = FshValue::Quantity(FshQuantity {
            value: serde_json::Number::from_f64(5.4).unwrap(),
            unit: Some("mg".to_string()),
        });
        let converted = convert_value_for_type(&value, "Quantity").unwrap();
        assert_eq!(
            converted,
            json!({"value": 5.4, "system": UCUM_SYSTEM, "code": "mg"})
        );
    }

    #[test]
    fn boolean_to_string_is_a_mismatch() {
        let err = convert_value_for_type(&FshValue::Boolean(true), "string").unwrap_err();
        assert!(matches!(err, ExportError::MismatchedType { .. }));
    }

    #[test]
    fn integer_types_reject_fractions() {
        let value = FshValue::Number(serde_json::Number::from_f64(1.5).unwrap());
        assert!(convert_value_for_type(&value, "integer").is_err());
        assert!(convert_value_for_type(&value, "decimal").is_ok());
    }

    #[test]
    fn period_start_must_not_follow_end() {
        let bad = json!({"start": "2020-01-01", "end": "2019-01-01"});
        assert!(matches!(
            validate_composite_value("Period", "effectivePeriod", &bad),
            Err(ExportError::InvalidPeriod { .. })
        ));

        let open_ended = json!({"start": "2020-01-01"});
        assert!(validate_composite_value("Period", "effectivePeriod", &open_ended).is_ok());
    }

    #[test]
    fn range_low_must_not_exceed_high() {
        let bad = json!({
            "low": {"value": 5.0, "code": "mg"},
            "high": {"value": 2.0, "code": "mg"}
        });
        assert!(matches!(
            validate_composite_value("Range", "valueRange", &bad),
            Err(ExportError::InvalidRangeValue { .. })
        ));
    }

    #[test]
    fn range_bounds_must_agree_on_units() {
        let bad = json!({
            "low": {"value": 1.0, "code": "mg"},
            "high": {"value": 2.0, "code": "mL"}
        });
        assert!(matches!(
            validate_composite_value("Range", "valueRange", &bad),
            Err(ExportError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn set_json_path_builds_nested_structures() {
        let mut map = serde_json::Map::new();
        set_json_path(&mut map, "slicing.discriminator[0].type", json!("value")).unwrap();
        set_json_path(&mut map, "slicing.rules", json!("open")).unwrap();
        assert_eq!(
            JsonValue::Object(map),
            json!({"slicing": {"discriminator": [{"type": "value"}], "rules": "open"}})
        );
    }
}
