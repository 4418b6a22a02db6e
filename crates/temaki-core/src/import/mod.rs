//! The Shorthand Importer: source text -> [`FshTank`]
//!
//! Importing is two-pass: the first pass parses every document and collects
//! `Alias:` definitions across all of them; the second resolves every
//! name-position token that matches a known alias to its URL. Cross-document
//! references are left as names for the exporters to fish.
//!
//! An importer instance is single-use. Re-importing through the same
//! instance emits an error and returns an empty tank, which keeps stale
//! alias state from leaking between compilations.

pub mod lexer;
pub mod parser;

use crate::ast::*;
use crate::diagnostics::DiagnosticCollector;
use crate::semantic::{AliasTable, FshTank};
use std::path::PathBuf;
use tracing::debug;

pub use parser::parse_document;

/// Single-use FSH importer
#[derive(Debug, Default)]
pub struct FshImporter {
    used: bool,
}

impl FshImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import all sources into a tank. `sources` pairs a file path (for
    /// diagnostics) with its text content.
    pub fn import(
        &mut self,
        sources: &[(PathBuf, String)],
        collector: &DiagnosticCollector,
    ) -> (FshTank, AliasTable) {
        if self.used {
            collector.error("Importer was already used; returning an empty tank");
            return (FshTank::default(), AliasTable::new());
        }
        self.used = true;

        // Pass 1: parse and collect aliases
        let mut documents = Vec::new();
        let mut aliases = AliasTable::new();
        for (path, text) in sources {
            let document = parse_document(path, text, collector);
            for alias in document.aliases() {
                if let Err(err) = aliases.add(&alias.name, &alias.url, alias.location.clone()) {
                    collector.error_at(err.to_string(), alias.location.clone());
                }
            }
            documents.push(document);
        }
        debug!(
            "Imported {} documents, {} aliases",
            documents.len(),
            aliases.len()
        );

        // Pass 2: resolve alias tokens in place
        for document in &mut documents {
            resolve_document_aliases(document, &aliases);
        }

        (FshTank::new(documents), aliases)
    }
}

fn resolve_document_aliases(document: &mut Document, aliases: &AliasTable) {
    for entity in &mut document.entities {
        match entity {
            Entity::Profile(p) => {
                resolve_name(&mut p.parent, aliases);
                resolve_rules(&mut p.rules, aliases);
            }
            Entity::Extension(x) => {
                resolve_name(&mut x.parent, aliases);
                resolve_rules(&mut x.rules, aliases);
            }
            Entity::Instance(i) => resolve_rules(&mut i.rules, aliases),
            Entity::RuleSet(r) => resolve_rules(&mut r.rules, aliases),
            Entity::Alias(_) => {}
            Entity::ValueSet(v) => {
                for component in &mut v.components {
                    match &mut component.content {
                        ValueSetComponentContent::Concept(code) => {
                            resolve_code(code, aliases);
                        }
                        ValueSetComponentContent::System { system, filters } => {
                            resolve_string(system, aliases);
                            for filter in filters {
                                resolve_value(&mut filter.value, aliases);
                            }
                        }
                        ValueSetComponentContent::ValueSet { value_set } => {
                            resolve_string(value_set, aliases);
                        }
                    }
                }
                for caret in &mut v.caret_rules {
                    resolve_value(&mut caret.value, aliases);
                }
            }
            Entity::CodeSystem(c) => {
                for caret in &mut c.caret_rules {
                    resolve_value(&mut caret.value, aliases);
                }
            }
        }
    }
}

fn resolve_string(value: &mut String, aliases: &AliasTable) {
    if let Some(url) = aliases.resolve(value) {
        *value = url.to_string();
    }
}

fn resolve_name(value: &mut Option<String>, aliases: &AliasTable) {
    if let Some(name) = value {
        resolve_string(name, aliases);
    }
}

fn resolve_code(code: &mut FshCode, aliases: &AliasTable) {
    if let Some(system) = &mut code.system {
        resolve_string(system, aliases);
    }
}

fn resolve_value(value: &mut FshValue, aliases: &AliasTable) {
    match value {
        FshValue::Code(code) => resolve_code(code, aliases),
        FshValue::Ratio(_)
        | FshValue::Quantity(_)
        | FshValue::String(_)
        | FshValue::Number(_)
        | FshValue::Boolean(_)
        | FshValue::DateTime(_)
        | FshValue::Reference(_)
        | FshValue::Canonical(_)
        | FshValue::InstanceRef(_) => {}
    }
}

fn resolve_rules(rules: &mut [Rule], aliases: &AliasTable) {
    for rule in rules {
        match rule {
            Rule::Binding(b) => resolve_string(&mut b.value_set, aliases),
            Rule::Only(o) => {
                for t in &mut o.types {
                    resolve_string(&mut t.name, aliases);
                }
            }
            Rule::Contains(c) => {
                for item in &mut c.items {
                    if let Some(type_name) = &mut item.type_name {
                        resolve_string(type_name, aliases);
                    }
                }
            }
            Rule::CaretValue(c) => resolve_value(&mut c.value, aliases),
            Rule::FixedValue(f) => resolve_value(&mut f.value, aliases),
            Rule::Assignment(a) => resolve_value(&mut a.value, aliases),
            Rule::Card(_) | Rule::Flag(_) | Rule::Insert(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(sources: &[(&str, &str)]) -> (FshTank, AliasTable, DiagnosticCollector) {
        let collector = DiagnosticCollector::new();
        let sources: Vec<(PathBuf, String)> = sources
            .iter()
            .map(|(p, t)| (PathBuf::from(p), t.to_string()))
            .collect();
        let mut importer = FshImporter::new();
        let (tank, aliases) = importer.import(&sources, &collector);
        (tank, aliases, collector)
    }

    #[test]
    fn aliases_resolve_across_documents() {
        let (tank, aliases, collector) = import(&[
            ("aliases.fsh", "Alias: LNC = http://loinc.org\n"),
            (
                "profile.fsh",
                "Profile: P\nParent: Observation\n* code from LNC\n* code = LNC#1234-5\n",
            ),
        ]);
        assert_eq!(collector.error_count(), 0);
        assert_eq!(aliases.len(), 1);
        let profile = tank.profiles().next().unwrap();
        match &profile.rules[0] {
            Rule::Binding(b) => assert_eq!(b.value_set, "http://loinc.org"),
            other => panic!("expected binding, got {other:?}"),
        }
        match &profile.rules[1] {
            Rule::FixedValue(f) => match &f.value {
                FshValue::Code(c) => assert_eq!(c.system.as_deref(), Some("http://loinc.org")),
                other => panic!("expected code, got {other:?}"),
            },
            other => panic!("expected fixed value, got {other:?}"),
        }
    }

    #[test]
    fn importer_is_single_use() {
        let collector = DiagnosticCollector::new();
        let mut importer = FshImporter::new();
        let sources = vec![(PathBuf::from("a.fsh"), "Profile: P\nParent: X\n".to_string())];

        let (first, _) = importer.import(&sources, &collector);
        assert_eq!(first.profiles().count(), 1);

        let (second, _) = importer.import(&sources, &collector);
        assert_eq!(second.profiles().count(), 0);
        assert_eq!(collector.error_count(), 1);
    }

    #[test]
    fn conflicting_alias_definitions_are_reported() {
        let (_, _, collector) = import(&[
            ("a.fsh", "Alias: X = http://one.example.org\n"),
            ("b.fsh", "Alias: X = http://two.example.org\n"),
        ]);
        assert_eq!(collector.error_count(), 1);
    }
}
