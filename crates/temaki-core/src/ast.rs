//! Typed AST for FSH documents
//!
//! The importer turns source text into a [`Document`] of entities. Entities
//! and rules are closed sums: every exporter dispatches over them
//! exhaustively, so adding a variant is a compile-time event across the
//! pipeline. Each node carries the [`Location`] it was parsed from for
//! diagnostics.

use crate::diagnostics::Location;
use std::path::PathBuf;

/// A parsed FSH document (one source file)
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub file: PathBuf,
    pub entities: Vec<Entity>,
}

impl Document {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            entities: Vec::new(),
        }
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Profile(p) => Some(p),
            _ => None,
        })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Extension(x) => Some(x),
            _ => None,
        })
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Instance(i) => Some(i),
            _ => None,
        })
    }

    pub fn rule_sets(&self) -> impl Iterator<Item = &RuleSet> {
        self.entities.iter().filter_map(|e| match e {
            Entity::RuleSet(r) => Some(r),
            _ => None,
        })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &Alias> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Alias(a) => Some(a),
            _ => None,
        })
    }

    pub fn value_sets(&self) -> impl Iterator<Item = &FshValueSet> {
        self.entities.iter().filter_map(|e| match e {
            Entity::ValueSet(v) => Some(v),
            _ => None,
        })
    }

    pub fn code_systems(&self) -> impl Iterator<Item = &FshCodeSystem> {
        self.entities.iter().filter_map(|e| match e {
            Entity::CodeSystem(c) => Some(c),
            _ => None,
        })
    }
}

/// Top-level entity kinds
#[derive(Debug, Clone)]
pub enum Entity {
    Profile(Profile),
    Extension(Extension),
    Instance(Instance),
    RuleSet(RuleSet),
    Alias(Alias),
    ValueSet(FshValueSet),
    CodeSystem(FshCodeSystem),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Profile(p) => &p.name,
            Entity::Extension(x) => &x.name,
            Entity::Instance(i) => &i.name,
            Entity::RuleSet(r) => &r.name,
            Entity::Alias(a) => &a.name,
            Entity::ValueSet(v) => &v.name,
            Entity::CodeSystem(c) => &c.name,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Entity::Profile(p) => &p.location,
            Entity::Extension(x) => &x.location,
            Entity::Instance(i) => &i.location,
            Entity::RuleSet(r) => &r.location,
            Entity::Alias(a) => &a.location,
            Entity::ValueSet(v) => &v.location,
            Entity::CodeSystem(c) => &c.location,
        }
    }
}

/// `Profile: Name` — a constraint on a base resource type
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub id: Option<String>,
    pub parent: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub location: Location,
}

/// `Extension: Name` — a profile whose base is the Extension type
#[derive(Debug, Clone)]
pub struct Extension {
    pub name: String,
    pub id: Option<String>,
    pub parent: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub location: Location,
}

/// How an instance is intended to be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceUsage {
    #[default]
    Example,
    Inline,
    Definition,
}

impl InstanceUsage {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "#example" | "Example" => Some(Self::Example),
            "#inline" | "Inline" => Some(Self::Inline),
            "#definition" | "Definition" => Some(Self::Definition),
            _ => None,
        }
    }
}

/// `Instance: Name` — a concrete resource instance
#[derive(Debug, Clone)]
pub struct Instance {
    pub name: String,
    pub id: Option<String>,
    pub instance_of: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub usage: InstanceUsage,
    /// Whether the author wrote a `Usage:` line at all; a non-resource
    /// instanceOf forces Inline with a warning only when they did not
    pub usage_explicit: bool,
    pub rules: Vec<Rule>,
    pub mixins: Vec<String>,
    pub location: Location,
}

/// `RuleSet: Name` — a reusable bag of rules
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Rule>,
    pub location: Location,
}

/// `Alias: NAME = url`
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub url: String,
    pub location: Location,
}

/// `ValueSet: Name`
#[derive(Debug, Clone)]
pub struct FshValueSet {
    pub name: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub components: Vec<ValueSetComponent>,
    pub caret_rules: Vec<CaretValueRule>,
    pub location: Location,
}

/// One include/exclude line of a value set
#[derive(Debug, Clone)]
pub struct ValueSetComponent {
    pub include: bool,
    pub content: ValueSetComponentContent,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub enum ValueSetComponentContent {
    /// `* include SYSTEM#code "display"`
    Concept(FshCode),
    /// `* include codes from system X [where prop op value ...]`
    System {
        system: String,
        filters: Vec<ValueSetFilterSpec>,
    },
    /// `* include codes from valueset Y`
    ValueSet { value_set: String },
}

#[derive(Debug, Clone)]
pub struct ValueSetFilterSpec {
    pub property: String,
    pub op: String,
    pub value: FshValue,
}

/// `CodeSystem: Name`
#[derive(Debug, Clone)]
pub struct FshCodeSystem {
    pub name: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub concepts: Vec<ConceptDef>,
    pub caret_rules: Vec<CaretValueRule>,
    pub location: Location,
}

/// One concept of a CodeSystem; hierarchy is given by the chain of parent
/// codes written before the concept's own code
#[derive(Debug, Clone)]
pub struct ConceptDef {
    pub parents: Vec<String>,
    pub code: String,
    pub display: Option<String>,
    pub definition: Option<String>,
    pub location: Location,
}

// ============================================================================
// Rules
// ============================================================================

/// Rule variants. Constraint rules are legal on Profile/Extension;
/// Assignment is legal on Instance; Insert expands a RuleSet in place.
#[derive(Debug, Clone)]
pub enum Rule {
    Card(CardRule),
    Flag(FlagRule),
    Binding(BindingRule),
    Only(OnlyRule),
    Contains(ContainsRule),
    CaretValue(CaretValueRule),
    FixedValue(FixedValueRule),
    Assignment(AssignmentRule),
    Insert(InsertRule),
}

impl Rule {
    pub fn location(&self) -> &Location {
        match self {
            Rule::Card(r) => &r.location,
            Rule::Flag(r) => &r.location,
            Rule::Binding(r) => &r.location,
            Rule::Only(r) => &r.location,
            Rule::Contains(r) => &r.location,
            Rule::CaretValue(r) => &r.location,
            Rule::FixedValue(r) => &r.location,
            Rule::Assignment(r) => &r.location,
            Rule::Insert(r) => &r.location,
        }
    }

    /// Constraint rules may be applied to a StructureDefinition
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            Rule::Card(_)
                | Rule::Flag(_)
                | Rule::Binding(_)
                | Rule::Only(_)
                | Rule::Contains(_)
                | Rule::CaretValue(_)
                | Rule::FixedValue(_)
        )
    }
}

/// `* path min..max [flags]`
#[derive(Debug, Clone)]
pub struct CardRule {
    pub path: String,
    pub min: Option<u32>,
    /// `"*"` or a number rendered as text
    pub max: Option<String>,
    pub location: Location,
}

/// `* path MS SU ?!` — flags OR-ed into the element
#[derive(Debug, Clone, Default)]
pub struct FlagRule {
    pub paths: Vec<String>,
    pub must_support: bool,
    pub summary: bool,
    pub modifier: bool,
    pub location: Location,
}

/// Binding strength ordering follows the FHIR hierarchy:
/// example < preferred < extensible < required
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BindingStrength {
    Example,
    Preferred,
    Extensible,
    Required,
}

impl BindingStrength {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "example" => Some(Self::Example),
            "preferred" => Some(Self::Preferred),
            "extensible" => Some(Self::Extensible),
            "required" => Some(Self::Required),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Example => "example",
            Self::Preferred => "preferred",
            Self::Extensible => "extensible",
            Self::Required => "required",
        }
    }
}

/// `* path from valueSet (strength)`
#[derive(Debug, Clone)]
pub struct BindingRule {
    pub path: String,
    pub value_set: String,
    pub strength: BindingStrength,
    pub location: Location,
}

/// One target of an `only` rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlyRuleType {
    pub name: String,
    pub is_reference: bool,
}

/// `* path only Type1 or Reference(A | B)`
#[derive(Debug, Clone)]
pub struct OnlyRule {
    pub path: String,
    pub types: Vec<OnlyRuleType>,
    pub location: Location,
}

/// One named slice declared by a contains rule
#[derive(Debug, Clone)]
pub struct ContainsItem {
    pub name: String,
    /// Named type for `contains Type named slice` form
    pub type_name: Option<String>,
    pub min: Option<u32>,
    pub max: Option<String>,
    pub flags: FlagSet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet {
    pub must_support: bool,
    pub summary: bool,
    pub modifier: bool,
}

/// `* path contains sliceA 1..1 MS and sliceB 0..*`
#[derive(Debug, Clone)]
pub struct ContainsRule {
    pub path: String,
    pub items: Vec<ContainsItem>,
    pub location: Location,
}

/// `* path ^caretPath = value` — sets a field of the ElementDefinition (or,
/// with an empty path, of the definition resource) itself
#[derive(Debug, Clone)]
pub struct CaretValueRule {
    pub path: String,
    pub caret_path: String,
    pub value: FshValue,
    pub location: Location,
}

/// `* path = value [(exactly)]` on a Profile/Extension: pattern unless exact
#[derive(Debug, Clone)]
pub struct FixedValueRule {
    pub path: String,
    pub value: FshValue,
    pub exactly: bool,
    pub location: Location,
}

/// `* path = value [(exactly)]` on an Instance
#[derive(Debug, Clone)]
pub struct AssignmentRule {
    pub path: String,
    pub value: FshValue,
    pub exactly: bool,
    pub location: Location,
}

impl AssignmentRule {
    /// Whether the assigned value names another instance
    pub fn is_instance(&self) -> bool {
        matches!(self.value, FshValue::InstanceRef(_))
    }
}

/// `* insert RuleSetName`
#[derive(Debug, Clone)]
pub struct InsertRule {
    pub rule_set: String,
    pub location: Location,
}

// ============================================================================
// Values
// ============================================================================

/// `SYSTEM#code "display"` — system may be empty (`#code`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FshCode {
    pub system: Option<String>,
    pub code: String,
    pub display: Option<String>,
}

/// `5.4 'mg'` — a UCUM quantity
#[derive(Debug, Clone, PartialEq)]
pub struct FshQuantity {
    pub value: serde_json::Number,
    pub unit: Option<String>,
}

/// `q1 : q2`
#[derive(Debug, Clone, PartialEq)]
pub struct FshRatio {
    pub numerator: FshQuantity,
    pub denominator: FshQuantity,
}

/// Scalar value literals accepted on the right-hand side of `=`
#[derive(Debug, Clone, PartialEq)]
pub enum FshValue {
    String(String),
    Number(serde_json::Number),
    Boolean(bool),
    /// Date, dateTime, and time lexemes are carried opaquely
    DateTime(String),
    Code(FshCode),
    Quantity(FshQuantity),
    Ratio(FshRatio),
    /// `Reference(Name)`
    Reference(String),
    /// `Canonical(Name)`
    Canonical(String),
    /// A bare name in an instance assignment: a reference to another instance
    InstanceRef(String),
}

impl FshValue {
    /// Short human label used in type mismatch diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            FshValue::String(_) => "string",
            FshValue::Number(_) => "number",
            FshValue::Boolean(_) => "boolean",
            FshValue::DateTime(_) => "dateTime",
            FshValue::Code(_) => "code",
            FshValue::Quantity(_) => "Quantity",
            FshValue::Ratio(_) => "Ratio",
            FshValue::Reference(_) => "Reference",
            FshValue::Canonical(_) => "canonical",
            FshValue::InstanceRef(_) => "instance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_strength_is_ordered() {
        assert!(BindingStrength::Example < BindingStrength::Preferred);
        assert!(BindingStrength::Preferred < BindingStrength::Extensible);
        assert!(BindingStrength::Extensible < BindingStrength::Required);
    }

    #[test]
    fn usage_parses_both_spellings() {
        assert_eq!(InstanceUsage::parse("#example"), Some(InstanceUsage::Example));
        assert_eq!(InstanceUsage::parse("Inline"), Some(InstanceUsage::Inline));
        assert_eq!(InstanceUsage::parse("#unknown"), None);
    }

    #[test]
    fn assignment_detects_instance_values() {
        let rule = AssignmentRule {
            path: "managingOrganization".to_string(),
            value: FshValue::InstanceRef("OrgInst".to_string()),
            exactly: false,
            location: Location::default(),
        };
        assert!(rule.is_instance());
    }
}
