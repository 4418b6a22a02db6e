//! RuleSet expansion for insert rules and mixins
//!
//! RuleSets are reusable bags of rules attached to an entity either by an
//! in-body `* insert Name` rule (expanded at its textual position) or by an
//! entity-level `Mixins:` declaration (expanded before any body rule, in
//! declaration order). Expansion tracks the chain of active RuleSets so a
//! RuleSet inserting itself, directly or through another one, is reported
//! instead of looping.
//!
//! Rules arriving through expansion keep their own source span and gain the
//! span of the entity they were applied in, so diagnostics can point at both
//! sites.

use crate::ast::{AssignmentRule, FixedValueRule, Rule};
use crate::diagnostics::{Diagnostic, DiagnosticCollector, Location, Severity};
use crate::semantic::FshTank;
use tracing::trace;

/// Which rule kinds the consuming entity accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    /// Profile or Extension: constraint rules only
    StructureDefinition,
    /// Instance: assignment rules only
    Instance,
}

/// A rule after expansion, with the application site when it came out of a
/// RuleSet
#[derive(Debug, Clone)]
pub struct ExpandedRule {
    pub rule: Rule,
    pub applied_in: Option<Location>,
}

impl ExpandedRule {
    pub fn local(rule: Rule) -> Self {
        Self {
            rule,
            applied_in: None,
        }
    }

    /// Diagnostic pre-loaded with this rule's origin and application spans
    pub fn diagnostic(&self, severity: Severity, message: impl Into<String>) -> Diagnostic {
        let mut d = Diagnostic::new(severity, message).with_location(self.rule.location().clone());
        if let Some(ref applied) = self.applied_in {
            d = d.with_applied_location(applied.clone());
        }
        d
    }
}

/// Expand mixins then body rules for one entity.
///
/// `mixins` come first in declaration order; body rules follow with insert
/// rules replaced by their RuleSet's rules at the insert's position.
pub fn expand_rules(
    target: RuleTarget,
    body_rules: &[Rule],
    mixins: &[String],
    entity_location: &Location,
    tank: &FshTank,
    collector: &DiagnosticCollector,
) -> Vec<ExpandedRule> {
    let mut expander = Expander {
        target,
        tank,
        collector,
        entity_location,
        stack: Vec::new(),
        out: Vec::new(),
    };

    for mixin in mixins {
        expander.expand_rule_set(mixin, entity_location);
    }
    for rule in body_rules {
        expander.push_rule(rule.clone(), None);
    }
    expander.out
}

struct Expander<'a> {
    target: RuleTarget,
    tank: &'a FshTank,
    collector: &'a DiagnosticCollector,
    entity_location: &'a Location,
    stack: Vec<String>,
    out: Vec<ExpandedRule>,
}

impl<'a> Expander<'a> {
    fn push_rule(&mut self, rule: Rule, applied_in: Option<Location>) {
        if let Rule::Insert(ref insert) = rule {
            let site = insert.location.clone();
            let name = insert.rule_set.clone();
            self.expand_rule_set(&name, &site);
            return;
        }

        let rule = match (self.target, rule) {
            // A `path = value` rule written in a RuleSet parses as a fixed
            // value rule; on an Instance it is the same shape as an
            // assignment.
            (RuleTarget::Instance, Rule::FixedValue(f)) => Rule::Assignment(convert_fixed(f)),
            (target, rule) => {
                let acceptable = match target {
                    RuleTarget::StructureDefinition => rule.is_constraint(),
                    RuleTarget::Instance => matches!(rule, Rule::Assignment(_)),
                };
                if !acceptable {
                    let expanded = ExpandedRule {
                        rule,
                        applied_in: applied_in.clone(),
                    };
                    let kind = match target {
                        RuleTarget::StructureDefinition => "a StructureDefinition",
                        RuleTarget::Instance => "an instance",
                    };
                    self.collector.push(expanded.diagnostic(
                        Severity::Error,
                        format!("Rule cannot be applied to {kind}; skipping"),
                    ));
                    return;
                }
                rule
            }
        };

        self.out.push(ExpandedRule { rule, applied_in });
    }

    fn expand_rule_set(&mut self, name: &str, site: &Location) {
        if self.stack.iter().any(|n| n == name) {
            let chain = format!("{} -> {}", self.stack.join(" -> "), name);
            self.collector.push(
                Diagnostic::new(
                    Severity::Error,
                    format!("Recursive RuleSet insertion detected: {chain}"),
                )
                .with_location(site.clone())
                .with_applied_location(self.entity_location.clone()),
            );
            return;
        }

        let Some(rule_set) = self.tank.find_rule_set(name) else {
            self.collector.push(
                Diagnostic::new(Severity::Error, format!("RuleSet '{name}' is not defined"))
                    .with_location(site.clone())
                    .with_applied_location(self.entity_location.clone()),
            );
            return;
        };

        trace!("Expanding RuleSet '{}' ({} rules)", name, rule_set.rules.len());
        self.stack.push(name.to_string());
        for rule in rule_set.rules.clone() {
            self.push_rule(rule, Some(self.entity_location.clone()));
        }
        self.stack.pop();
    }
}

fn convert_fixed(rule: FixedValueRule) -> AssignmentRule {
    AssignmentRule {
        path: rule.path,
        value: rule.value,
        exactly: rule.exactly,
        location: rule.location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn card_rule(path: &str) -> Rule {
        Rule::Card(CardRule {
            path: path.to_string(),
            min: Some(1),
            max: Some("1".to_string()),
            location: Location::default(),
        })
    }

    fn insert_rule(name: &str) -> Rule {
        Rule::Insert(InsertRule {
            rule_set: name.to_string(),
            location: Location::default(),
        })
    }

    fn rule_set(name: &str, rules: Vec<Rule>) -> Entity {
        Entity::RuleSet(RuleSet {
            name: name.to_string(),
            rules,
            location: Location::default(),
        })
    }

    fn tank_with(entities: Vec<Entity>) -> FshTank {
        let mut doc = Document::new("rules.fsh");
        doc.entities = entities;
        FshTank::new(vec![doc])
    }

    #[test]
    fn inserts_expand_at_their_position() {
        let tank = tank_with(vec![rule_set("Common", vec![card_rule("status")])]);
        let collector = DiagnosticCollector::new();
        let body = vec![card_rule("subject"), insert_rule("Common"), card_rule("code")];

        let expanded = expand_rules(
            RuleTarget::StructureDefinition,
            &body,
            &[],
            &Location::default(),
            &tank,
            &collector,
        );

        let paths: Vec<_> = expanded
            .iter()
            .map(|e| match &e.rule {
                Rule::Card(c) => c.path.clone(),
                _ => panic!("unexpected rule"),
            })
            .collect();
        assert_eq!(paths, vec!["subject", "status", "code"]);
        assert!(expanded[1].applied_in.is_some());
        assert_eq!(collector.error_count(), 0);
    }

    #[test]
    fn mixins_expand_before_body_rules() {
        let tank = tank_with(vec![rule_set(
            "Mixin",
            vec![Rule::FixedValue(FixedValueRule {
                path: "status".to_string(),
                value: FshValue::Code(FshCode {
                    system: None,
                    code: "final".to_string(),
                    display: None,
                }),
                exactly: false,
                location: Location::default(),
            })],
        )]);
        let collector = DiagnosticCollector::new();
        let body = vec![Rule::Assignment(AssignmentRule {
            path: "id".to_string(),
            value: FshValue::String("x".to_string()),
            exactly: false,
            location: Location::default(),
        })];

        let expanded = expand_rules(
            RuleTarget::Instance,
            &body,
            &["Mixin".to_string()],
            &Location::default(),
            &tank,
            &collector,
        );

        assert_eq!(expanded.len(), 2);
        // fixed value from the mixin arrives as an assignment
        assert!(matches!(expanded[0].rule, Rule::Assignment(_)));
    }

    #[test]
    fn recursive_insertion_is_detected() {
        let tank = tank_with(vec![
            rule_set("A", vec![insert_rule("B")]),
            rule_set("B", vec![insert_rule("A")]),
        ]);
        let collector = DiagnosticCollector::new();

        let expanded = expand_rules(
            RuleTarget::StructureDefinition,
            &[insert_rule("A")],
            &[],
            &Location::default(),
            &tank,
            &collector,
        );

        assert!(expanded.is_empty());
        assert!(
            collector
                .records()
                .iter()
                .any(|d| d.message.contains("Recursive RuleSet insertion"))
        );
    }

    #[test]
    fn constraint_rule_dropped_on_instance() {
        let tank = tank_with(vec![rule_set("Bad", vec![card_rule("status")])]);
        let collector = DiagnosticCollector::new();

        let expanded = expand_rules(
            RuleTarget::Instance,
            &[insert_rule("Bad")],
            &[],
            &Location::default(),
            &tank,
            &collector,
        );

        assert!(expanded.is_empty());
        assert_eq!(collector.error_count(), 1);
    }
}
