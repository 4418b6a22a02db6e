//! FHIR type definitions for export
//!
//! Simplified serde models of the FHIR resources the compiler emits. Fields
//! the rule pipeline reads or writes are typed; everything else a parent
//! snapshot carries rides along in the flattened `extra` map, so cloning a
//! parent and re-serializing it loses nothing. `patternX` / `fixedX` fields
//! also live in `extra`, keyed by the type suffix, with accessors below.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// ============================================================================
// StructureDefinition
// ============================================================================

/// FHIR StructureDefinition resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    /// primitive-type | complex-type | resource | logical
    pub kind: StructureDefinitionKind,

    #[serde(rename = "abstract")]
    pub is_abstract: bool,

    /// Extension context (extensions only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<StructureDefinitionContext>>,

    /// Type defined or constrained by this structure
    #[serde(rename = "type")]
    pub type_field: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    /// specialization | constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ElementList>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<ElementList>,

    /// Everything else from the source definition, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl StructureDefinition {
    pub fn new(
        url: String,
        name: String,
        type_field: String,
        kind: StructureDefinitionKind,
    ) -> Self {
        Self {
            resource_type: "StructureDefinition".to_string(),
            id: None,
            url,
            version: None,
            name,
            title: None,
            status: "draft".to_string(),
            publisher: None,
            description: None,
            fhir_version: None,
            kind,
            is_abstract: false,
            context: None,
            type_field,
            base_definition: None,
            derivation: Some("constraint".to_string()),
            snapshot: None,
            differential: None,
            extra: Map::new(),
        }
    }

    pub fn elements(&self) -> &[ElementDefinition] {
        self.snapshot.as_ref().map(|s| s.element.as_slice()).unwrap_or(&[])
    }

    pub fn elements_mut(&mut self) -> &mut Vec<ElementDefinition> {
        &mut self.get_or_create_snapshot().element
    }

    pub fn get_or_create_snapshot(&mut self) -> &mut ElementList {
        self.snapshot.get_or_insert_with(ElementList::default)
    }

    pub fn find_element(&self, path: &str) -> Option<&ElementDefinition> {
        self.elements()
            .iter()
            .find(|e| e.path == path && e.slice_name.is_none())
    }

    pub fn position_by_id(&self, id: &str) -> Option<usize> {
        self.elements().iter().position(|e| e.element_id() == id)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&ElementDefinition> {
        self.elements().iter().find(|e| e.element_id() == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut ElementDefinition> {
        self.snapshot
            .as_mut()?
            .element
            .iter_mut()
            .find(|e| e.element_id() == id)
    }

    /// Index just past the subtree rooted at `index` (children, their
    /// children, and slices, by id prefix)
    pub fn end_of_subtree(&self, index: usize) -> usize {
        let elements = self.elements();
        let base_id = elements[index].element_id();
        let mut end = index + 1;
        while end < elements.len() {
            let id = elements[end].element_id();
            if id.starts_with(&format!("{base_id}.")) || id.starts_with(&format!("{base_id}:")) {
                end += 1;
            } else {
                break;
            }
        }
        end
    }

    /// Whether this definition represents a resource (vs datatype/logical)
    pub fn is_resource(&self) -> bool {
        self.kind == StructureDefinitionKind::Resource
    }
}

/// Kind of structure definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

/// `snapshot` / `differential` — a flat, ordered list of elements
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementList {
    pub element: Vec<ElementDefinition>,
}

/// Context where an extension can be used
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinitionContext {
    /// element | extension | fhirpath
    #[serde(rename = "type")]
    pub type_: String,
    pub expression: String,
}

impl StructureDefinitionContext {
    pub fn element(expression: impl Into<String>) -> Self {
        Self {
            type_: "element".to_string(),
            expression: expression.into(),
        }
    }
}

// ============================================================================
// ElementDefinition
// ============================================================================

/// Definition of one element in a structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementSlicing>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,

    /// `"*"` or a number rendered as text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementBase>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ElementType>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_summary: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementBinding>,

    /// short, definition, comment, constraint, patternX, fixedX, ... —
    /// preserved for faithful snapshot cloning
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ElementDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// The element's id; falls back to the path when the source omitted ids
    pub fn element_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.path.clone())
    }

    pub fn type_codes(&self) -> Vec<&str> {
        self.types
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|t| t.code.as_str())
            .collect()
    }

    /// The single type code, if exactly one
    pub fn single_type(&self) -> Option<&str> {
        match self.types.as_deref() {
            Some([only]) => Some(only.code.as_str()),
            _ => None,
        }
    }

    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    pub fn is_array(&self) -> bool {
        self.max.as_deref().map(|m| m != "0" && m != "1").unwrap_or(false)
    }

    /// The `fixedX` or `patternX` entry of this element, if any
    pub fn fixed_or_pattern(&self) -> Option<(&str, &JsonValue)> {
        self.extra
            .iter()
            .find(|(k, _)| k.starts_with("fixed") || k.starts_with("pattern"))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn fixed_value(&self) -> Option<(&str, &JsonValue)> {
        self.fixed_or_pattern().filter(|(k, _)| k.starts_with("fixed"))
    }

    pub fn pattern_value(&self) -> Option<(&str, &JsonValue)> {
        self.fixed_or_pattern()
            .filter(|(k, _)| k.starts_with("pattern"))
    }

    /// Install a `fixedX`/`patternX` value, clearing any previous one
    pub fn set_fixed_or_pattern(&mut self, type_code: &str, value: JsonValue, exactly: bool) {
        let existing: Vec<String> = self
            .extra
            .keys()
            .filter(|k| k.starts_with("fixed") || k.starts_with("pattern"))
            .cloned()
            .collect();
        for key in existing {
            self.extra.remove(&key);
        }
        let prefix = if exactly { "fixed" } else { "pattern" };
        self.extra
            .insert(format!("{prefix}{}", capitalize(type_code)), value);
    }
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// Base element cardinality carried through derivations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementBase {
    pub path: String,
    pub min: u32,
    pub max: String,
}

/// Data type for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementType {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ElementType {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            profile: None,
            target_profile: None,
            extra: Map::new(),
        }
    }
}

/// Slicing metadata on an array element
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementSlicing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<SlicingDiscriminator>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,

    /// closed | open | openAtEnd
    pub rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlicingDiscriminator {
    /// value | exists | pattern | type | profile
    #[serde(rename = "type")]
    pub type_: String,
    pub path: String,
}

/// ValueSet binding for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementBinding {
    /// required | extensible | preferred | example
    pub strength: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

// ============================================================================
// ValueSet
// ============================================================================

/// FHIR ValueSet resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetResource {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ValueSetCompose>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ValueSetResource {
    pub fn new(url: impl Into<String>, name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            resource_type: "ValueSet".to_string(),
            id: None,
            url: url.into(),
            version: None,
            name: name.into(),
            title: None,
            status: status.into(),
            publisher: None,
            description: None,
            compose: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetCompose {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub include: Vec<ValueSetInclude>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exclude: Vec<ValueSetInclude>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetInclude {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<ValueSetConcept>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<ValueSetFilter>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetConcept {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetFilter {
    pub property: String,

    /// = | is-a | descendent-of | is-not-a | regex | in | not-in | exists
    pub op: String,

    pub value: String,
}

// ============================================================================
// CodeSystem
// ============================================================================

/// FHIR CodeSystem resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemResource {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// not-present | example | fragment | complete | supplement
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl CodeSystemResource {
    pub fn new(url: impl Into<String>, name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            resource_type: "CodeSystem".to_string(),
            id: None,
            url: url.into(),
            version: None,
            name: name.into(),
            title: None,
            status: status.into(),
            publisher: None,
            description: None,
            content: "complete".to_string(),
            count: None,
            concept: None,
            extra: Map::new(),
        }
    }

    /// Recount concepts, including nested children
    pub fn update_count(&mut self) {
        fn count(concepts: &[CodeSystemConcept]) -> u32 {
            concepts
                .iter()
                .map(|c| 1 + c.concept.as_deref().map(count).unwrap_or(0))
                .sum()
        }
        self.count = self.concept.as_deref().map(count);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemConcept {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
}

impl CodeSystemConcept {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: None,
            definition: None,
            concept: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn element_roundtrips_unknown_fields() {
        let source = json!({
            "id": "Observation.status",
            "path": "Observation.status",
            "short": "registered | preliminary | final | amended +",
            "min": 1,
            "max": "1",
            "type": [{"code": "code"}],
            "fixedCode": "final"
        });
        let element: ElementDefinition = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(element.min, Some(1));
        assert_eq!(
            element.extra.get("short").and_then(|v| v.as_str()),
            Some("registered | preliminary | final | amended +")
        );
        assert_eq!(element.fixed_value().map(|(k, _)| k), Some("fixedCode"));

        let back = serde_json::to_value(&element).unwrap();
        assert_eq!(back.get("short"), source.get("short"));
        assert_eq!(back.get("fixedCode"), source.get("fixedCode"));
    }

    #[test]
    fn set_fixed_or_pattern_replaces_previous() {
        let mut element = ElementDefinition::new("Observation.value[x]");
        element.set_fixed_or_pattern("Quantity", json!({"code": "mg"}), false);
        assert!(element.extra.contains_key("patternQuantity"));

        element.set_fixed_or_pattern("Quantity", json!({"code": "mL"}), true);
        assert!(!element.extra.contains_key("patternQuantity"));
        assert!(element.extra.contains_key("fixedQuantity"));
    }

    #[test]
    fn end_of_subtree_spans_children_and_slices() {
        let mut sd = StructureDefinition::new(
            "http://example.org/sd".into(),
            "Test".into(),
            "Observation".into(),
            StructureDefinitionKind::Resource,
        );
        let paths = [
            ("Observation", "Observation"),
            ("Observation.category", "Observation.category"),
            ("Observation.category.coding", "Observation.category.coding"),
            ("Observation.category:vs", "Observation.category"),
            ("Observation.status", "Observation.status"),
        ];
        for (id, path) in paths {
            let mut e = ElementDefinition::new(path);
            e.id = Some(id.to_string());
            sd.elements_mut().push(e);
        }
        assert_eq!(sd.end_of_subtree(1), 4);
        assert_eq!(sd.end_of_subtree(4), 5);
    }

    #[test]
    fn codesystem_count_is_recursive() {
        let mut cs = CodeSystemResource::new("http://example.org/cs", "CS", "draft");
        let mut parent = CodeSystemConcept::new("produce");
        parent.concept = Some(vec![CodeSystemConcept::new("apple")]);
        cs.concept = Some(vec![parent, CodeSystemConcept::new("dairy")]);
        cs.update_count();
        assert_eq!(cs.count, Some(3));
    }
}
