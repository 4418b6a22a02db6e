//! StructureDefinition exporter
//!
//! Compiles Profile and Extension entities into derived StructureDefinitions:
//! resolve the parent, clone its snapshot, apply the entity's constraint
//! rules in source order, and record a differential containing exactly the
//! elements the rules touched.
//!
//! Parent resolution is re-entrant: a parent that is itself an FSH entity is
//! exported first, on demand, with an in-flight stack guarding against
//! cycles. Exported artifacts land in the shared [`Package`], where later
//! lookups (including the instance exporter's) fish them.

use super::fhir_types::*;
use super::package::Package;
use super::path_resolver::PathResolver;
use super::value::{
    convert_value_loose, convert_value_for_type, is_codeable_type, set_json_path,
    validate_composite_value,
};
use super::ExportError;
use crate::ast::{
    self, BindingStrength, CardRule, CaretValueRule, ContainsRule, FixedValueRule, FlagRule,
    OnlyRule, Rule,
};
use crate::config::ProjectConfiguration;
use crate::diagnostics::{DiagnosticCollector, Severity};
use crate::fish::{FishKind, Fishable, FishingContext};
use crate::semantic::{ExpandedRule, FshTank, RuleTarget, expand_rules};
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Exports Profiles and Extensions to StructureDefinitions
pub struct StructureDefinitionExporter<'a> {
    tank: &'a FshTank,
    defs: &'a dyn Fishable,
    package: &'a RefCell<Package>,
    collector: &'a DiagnosticCollector,
    config: &'a ProjectConfiguration,
    /// Names currently being exported, for parent cycle detection
    in_flight: RefCell<Vec<String>>,
}

impl<'a> StructureDefinitionExporter<'a> {
    pub fn new(
        tank: &'a FshTank,
        defs: &'a dyn Fishable,
        package: &'a RefCell<Package>,
        collector: &'a DiagnosticCollector,
        config: &'a ProjectConfiguration,
    ) -> Self {
        Self {
            tank,
            defs,
            package,
            collector,
            config,
            in_flight: RefCell::new(Vec::new()),
        }
    }

    /// Export every Profile and Extension in the tank, in document order.
    /// A failed entity is reported and skipped; its siblings still export.
    pub fn export_all(&self) {
        let names: Vec<String> = self
            .tank
            .profiles()
            .map(|p| p.name.clone())
            .chain(self.tank.extensions().map(|x| x.name.clone()))
            .collect();
        for name in names {
            if let Err(err) = self.export_by_name(&name) {
                warn!("Skipping '{}': {}", name, err);
            }
        }
    }

    /// Export one entity by name, re-using the packaged artifact when it was
    /// already exported (possibly as someone's parent)
    pub fn export_by_name(&self, name: &str) -> Result<StructureDefinition, ExportError> {
        if let Some(existing) = self.package.borrow().structure_definition(name) {
            return Ok(existing);
        }

        if self.in_flight.borrow().iter().any(|n| n == name) {
            let chain = {
                let stack = self.in_flight.borrow();
                format!("{} -> {}", stack.join(" -> "), name)
            };
            return Err(ExportError::ParentNotDefined {
                name: name.to_string(),
                parent: name.to_string(),
                note: format!(" (parent cycle: {chain})"),
            });
        }

        self.in_flight.borrow_mut().push(name.to_string());
        let result = if let Some(profile) = self.tank.find_profile(name) {
            let sd = self.export_profile(profile);
            if let Ok(ref sd) = sd {
                self.package.borrow_mut().add_profile(sd.clone());
            }
            sd
        } else if let Some(extension) = self.tank.find_extension(name) {
            let sd = self.export_extension(extension);
            if let Ok(ref sd) = sd {
                self.package.borrow_mut().add_extension(sd.clone());
            }
            sd
        } else {
            Err(ExportError::ParentNotDefined {
                name: name.to_string(),
                parent: name.to_string(),
                note: String::new(),
            })
        };
        self.in_flight.borrow_mut().pop();
        result
    }

    pub fn export_profile(&self, profile: &ast::Profile) -> Result<StructureDefinition, ExportError> {
        debug!("Exporting profile {}", profile.name);
        let parent = profile.parent.clone().ok_or_else(|| {
            let err = ExportError::ParentNotDefined {
                name: profile.name.clone(),
                parent: "(none)".to_string(),
                note: String::new(),
            };
            self.collector.error_at(err.to_string(), profile.location.clone());
            err
        })?;

        let mut sd = self.resolve_parent(&profile.name, &parent, &profile.location)?;
        self.apply_metadata(
            &mut sd,
            &profile.name,
            profile.id.as_deref(),
            profile.title.as_deref(),
            profile.description.as_deref(),
        );

        let rules = expand_rules(
            RuleTarget::StructureDefinition,
            &profile.rules,
            &[],
            &profile.location,
            self.tank,
            self.collector,
        );
        self.apply_rules(&mut sd, &rules);
        Ok(sd)
    }

    pub fn export_extension(
        &self,
        extension: &ast::Extension,
    ) -> Result<StructureDefinition, ExportError> {
        debug!("Exporting extension {}", extension.name);
        let parent = extension
            .parent
            .clone()
            .unwrap_or_else(|| "Extension".to_string());

        let mut sd = self.resolve_parent(&extension.name, &parent, &extension.location)?;
        if sd.type_field != "Extension" {
            let err = ExportError::InvalidExtensionParent(parent);
            self.collector
                .error_at(err.to_string(), extension.location.clone());
            return Err(err);
        }
        self.apply_metadata(
            &mut sd,
            &extension.name,
            extension.id.as_deref(),
            extension.title.as_deref(),
            extension.description.as_deref(),
        );
        sd.kind = StructureDefinitionKind::ComplexType;
        // the parent's context is preserved; a bare Extension parent gets the
        // default element context
        if sd.context.is_none() {
            sd.context = Some(vec![StructureDefinitionContext::element("Element")]);
        }

        let rules = expand_rules(
            RuleTarget::StructureDefinition,
            &extension.rules,
            &[],
            &extension.location,
            self.tank,
            self.collector,
        );
        self.apply_rules(&mut sd, &rules);
        Ok(sd)
    }

    // ------------------------------------------------------------------
    // Parent resolution
    // ------------------------------------------------------------------

    /// Resolve a parent to a cloned StructureDefinition ready for
    /// constraining: Tank entities first (exporting them on demand), then
    /// the definitions cache
    fn resolve_parent(
        &self,
        name: &str,
        parent: &str,
        location: &crate::diagnostics::Location,
    ) -> Result<StructureDefinition, ExportError> {
        let parent_sd = self.fish_parent_sd(name, parent, location)?;
        if parent_sd.snapshot.is_none() {
            let err = ExportError::MissingSnapshot(parent.to_string());
            self.collector.error_at(err.to_string(), location.clone());
            return Err(err);
        }
        Ok(parent_sd)
    }

    fn fish_parent_sd(
        &self,
        name: &str,
        parent: &str,
        location: &crate::diagnostics::Location,
    ) -> Result<StructureDefinition, ExportError> {
        // FSH entities shadow external definitions
        if self.tank.find_profile(parent).is_some() || self.tank.find_extension(parent).is_some() {
            return self.export_by_name(parent).map_err(|err| {
                let err = match err {
                    ExportError::ParentNotDefined { note, .. } => ExportError::ParentNotDefined {
                        name: name.to_string(),
                        parent: parent.to_string(),
                        note,
                    },
                    other => other,
                };
                self.collector.error_at(err.to_string(), location.clone());
                err
            });
        }

        let fished = self.defs.fish_for_fhir(
            parent,
            &[
                FishKind::Resource,
                FishKind::Profile,
                FishKind::Extension,
                FishKind::Type,
            ],
        );
        match fished {
            Some(json) => Ok(serde_json::from_value((*json).clone())?),
            None => {
                let err = ExportError::ParentNotDefined {
                    name: name.to_string(),
                    parent: parent.to_string(),
                    note: String::new(),
                };
                self.collector.error_at(err.to_string(), location.clone());
                Err(err)
            }
        }
    }

    fn apply_metadata(
        &self,
        sd: &mut StructureDefinition,
        name: &str,
        id: Option<&str>,
        title: Option<&str>,
        description: Option<&str>,
    ) {
        let id = id.unwrap_or(name).to_string();
        sd.base_definition = Some(sd.url.clone());
        sd.url = format!("{}/StructureDefinition/{id}", self.config.canonical);
        sd.id = Some(id);
        sd.name = name.to_string();
        sd.title = title.map(String::from);
        if let Some(description) = description {
            // description inherits from the parent when unset
            sd.description = Some(description.to_string());
        }
        sd.version = self.config.version.clone();
        sd.status = self.config.status_or_default().to_string();
        sd.publisher = self.config.publisher.clone();
        sd.fhir_version = Some(self.config.fhir_version.clone());
        sd.derivation = Some("constraint".to_string());
        sd.differential = None;
        // parent bookkeeping that must not leak into the derived artifact
        sd.extra.remove("mapping");
        sd.extra.remove("text");
    }

    // ------------------------------------------------------------------
    // Rule application
    // ------------------------------------------------------------------

    fn apply_rules(&self, sd: &mut StructureDefinition, rules: &[ExpandedRule]) {
        // original element state, for the differential diff
        let original: HashMap<String, JsonValue> = sd
            .elements()
            .iter()
            .map(|e| {
                (
                    e.element_id(),
                    serde_json::to_value(e).expect("element serializes"),
                )
            })
            .collect();
        let mut changed: Vec<String> = Vec::new();

        // the package fishes through its RefCell, so re-entrant exports
        // triggered by a rule can still append to it
        let fisher = FishingContext::new(vec![self.package as &dyn Fishable, self.defs]);
        let resolver = PathResolver::new(&fisher);

        for expanded in rules {
            let result = match &expanded.rule {
                Rule::Card(rule) => self.apply_card(sd, &resolver, rule),
                Rule::Flag(rule) => self.apply_flag(sd, &resolver, rule),
                Rule::Binding(rule) => self.apply_binding(sd, &resolver, rule, &fisher),
                Rule::Only(rule) => self.apply_only(sd, &resolver, rule, &fisher),
                Rule::Contains(rule) => self.apply_contains(sd, &resolver, rule, &fisher),
                Rule::CaretValue(rule) => self.apply_caret(sd, &resolver, rule),
                Rule::FixedValue(rule) => self.apply_fixed(sd, &resolver, rule, &fisher),
                Rule::Assignment(_) | Rule::Insert(_) => {
                    unreachable!("filtered during expansion")
                }
            };
            match result {
                Ok(touched) => {
                    for id in touched {
                        if !changed.contains(&id) {
                            changed.push(id);
                        }
                    }
                }
                Err(err) => {
                    self.collector
                        .push(expanded.diagnostic(Severity::Error, err.to_string()));
                }
            }
        }

        sd.differential = Some(self.build_differential(sd, &original, &changed));
    }

    fn apply_card(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &CardRule,
    ) -> Result<Vec<String>, ExportError> {
        let resolved = resolver.resolve(sd, &rule.path)?;
        let parent_max = self.slice_parent_max(sd, &resolved.id);

        let (old_min, old_max, is_slice) = {
            let element = sd.find_by_id(&resolved.id).expect("resolved element exists");
            (
                element.min.unwrap_or(0),
                element.max.clone().unwrap_or_else(|| "*".to_string()),
                element.slice_name.is_some(),
            )
        };
        let new_min = rule.min.unwrap_or(old_min);
        let new_max = rule.max.clone().unwrap_or_else(|| old_max.clone());

        if max_lt(&old_max, &new_max) || new_min < old_min {
            return Err(ExportError::WideningCardinality {
                path: rule.path.clone(),
                old: format!("{old_min}..{old_max}"),
                new: format!("{new_min}..{new_max}"),
            });
        }
        if let Some(max_num) = parse_max(&new_max)
            && new_min > max_num
        {
            return Err(ExportError::InvalidCardinality(format!(
                "{new_min}..{new_max}"
            )));
        }

        // slice cardinality must fit inside the sliced element; all checks
        // run before any mutation so a rejected rule leaves no trace
        if is_slice && let Some(parent_max) = parent_max {
            if max_lt(&parent_max, &new_max) {
                return Err(ExportError::InvalidMaxOfSlice {
                    path: rule.path.clone(),
                    slice_max: new_max,
                    max: parent_max,
                });
            }
            let sibling_sum = self.sum_of_slice_mins(sd, &resolved.id) - old_min;
            if let Some(parent_max_num) = parse_max(&parent_max)
                && sibling_sum + new_min > parent_max_num
            {
                return Err(ExportError::InvalidSumOfSliceMins {
                    path: rule.path.clone(),
                    sum: sibling_sum + new_min,
                    max: parent_max,
                });
            }
        }

        let element = sd
            .find_by_id_mut(&resolved.id)
            .expect("resolved element exists");
        element.min = Some(new_min);
        element.max = Some(new_max);
        Ok(vec![resolved.id])
    }

    /// Max cardinality of the array element a slice belongs to
    fn slice_parent_max(&self, sd: &StructureDefinition, id: &str) -> Option<String> {
        let base_id = id.rsplit_once(':').map(|(base, _)| base)?;
        sd.find_by_id(base_id).and_then(|e| e.max.clone())
    }

    fn sum_of_slice_mins(&self, sd: &StructureDefinition, slice_id: &str) -> u32 {
        let Some((base_id, _)) = slice_id.rsplit_once(':') else {
            return 0;
        };
        sd.elements()
            .iter()
            .filter(|e| {
                e.slice_name.is_some()
                    && e.element_id()
                        .rsplit_once(':')
                        .map(|(base, _)| base == base_id)
                        .unwrap_or(false)
            })
            .map(|e| e.min.unwrap_or(0))
            .sum()
    }

    fn apply_flag(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &FlagRule,
    ) -> Result<Vec<String>, ExportError> {
        let mut touched = Vec::new();
        for path in &rule.paths {
            let resolved = resolver.resolve(sd, path)?;
            let element = sd
                .find_by_id_mut(&resolved.id)
                .expect("resolved element exists");
            // flags only ever accumulate
            if rule.must_support {
                element.must_support = Some(true);
            }
            if rule.summary {
                element.is_summary = Some(true);
            }
            if rule.modifier {
                element.is_modifier = Some(true);
            }
            touched.push(resolved.id);
        }
        Ok(touched)
    }

    fn apply_binding(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &ast::BindingRule,
        fisher: &dyn Fishable,
    ) -> Result<Vec<String>, ExportError> {
        let value_set_url = self.resolve_value_set_url(&rule.value_set, fisher)?;
        let resolved = resolver.resolve(sd, &rule.path)?;
        let element = sd
            .find_by_id_mut(&resolved.id)
            .expect("resolved element exists");

        let previously_bound = element.binding.is_some();
        let codeable = element.type_codes().iter().any(|c| {
            is_codeable_type(c) && (*c != "string" && *c != "uri" || !previously_bound)
        });
        if !codeable {
            return Err(ExportError::CodedTypeNotFound {
                path: rule.path.clone(),
            });
        }

        if let Some(existing) = &element.binding
            && let Some(old_strength) = BindingStrength::parse(&existing.strength)
            && rule.strength < old_strength
        {
            return Err(ExportError::BindingStrength {
                path: rule.path.clone(),
                old: old_strength.as_str().to_string(),
                new: rule.strength.as_str().to_string(),
            });
        }

        element.binding = Some(ElementBinding {
            strength: rule.strength.as_str().to_string(),
            description: element.binding.as_ref().and_then(|b| b.description.clone()),
            value_set: Some(value_set_url),
        });
        Ok(vec![resolved.id])
    }

    fn resolve_value_set_url(
        &self,
        value_set: &str,
        fisher: &dyn Fishable,
    ) -> Result<String, ExportError> {
        if value_set.starts_with("http://") || value_set.starts_with("https://") {
            if value_set.contains(char::is_whitespace) {
                return Err(ExportError::InvalidUri(value_set.to_string()));
            }
            return Ok(value_set.to_string());
        }
        // a Tank value set resolves to the URL its export will carry
        if let Some(vs) = self.tank.find_value_set(value_set) {
            let id = vs.id.clone().unwrap_or_else(|| vs.name.clone());
            return Ok(format!("{}/ValueSet/{id}", self.config.canonical));
        }
        fisher
            .fish_for_metadata(value_set, &[FishKind::ValueSet])
            .and_then(|meta| meta.url)
            .ok_or_else(|| ExportError::CannotResolveCanonical(value_set.to_string()))
    }

    fn apply_only(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &OnlyRule,
        fisher: &dyn Fishable,
    ) -> Result<Vec<String>, ExportError> {
        let resolved = resolver.resolve(sd, &rule.path)?;

        let reference_targets: Vec<&ast::OnlyRuleType> =
            rule.types.iter().filter(|t| t.is_reference).collect();
        let plain_types: Vec<&ast::OnlyRuleType> =
            rule.types.iter().filter(|t| !t.is_reference).collect();

        // resolve names before mutably borrowing the element
        let mut resolved_reference_urls = Vec::new();
        for target in &reference_targets {
            resolved_reference_urls.push(self.resolve_type_url(&target.name, fisher)?);
        }

        let element = sd
            .find_by_id_mut(&resolved.id)
            .expect("resolved element exists");
        let old_types = element.types.clone().unwrap_or_default();

        if !plain_types.is_empty() {
            let mut new_types = Vec::new();
            for wanted in &plain_types {
                match old_types.iter().find(|t| t.code == wanted.name) {
                    Some(existing) => new_types.push(existing.clone()),
                    None => return Err(ExportError::TypeNotFound(wanted.name.clone())),
                }
            }
            element.types = Some(new_types);
        }

        if !reference_targets.is_empty() {
            let mut types = element.types.clone().unwrap_or_default();
            let reference = types
                .iter_mut()
                .find(|t| t.code == "Reference")
                .ok_or_else(|| ExportError::TypeNotFound("Reference".to_string()))?;

            match reference.target_profile.clone() {
                None => {
                    reference.target_profile = Some(resolved_reference_urls);
                }
                Some(old_targets) => {
                    // narrowed targets first, untouched old targets after,
                    // preserving their order
                    let narrowed: Vec<String> = resolved_reference_urls
                        .iter()
                        .filter(|url| old_targets.contains(url))
                        .cloned()
                        .collect();
                    if narrowed.is_empty() {
                        return Err(ExportError::TypeNotFound(
                            reference_targets
                                .iter()
                                .map(|t| t.name.as_str())
                                .collect::<Vec<_>>()
                                .join(", "),
                        ));
                    }
                    let untouched: Vec<String> = old_targets
                        .iter()
                        .filter(|url| !narrowed.contains(url))
                        .filter(|url| !resolved_reference_urls.iter().any(|n| n == *url))
                        .cloned()
                        .collect();
                    let kept = narrowed.into_iter().chain(untouched).collect();
                    reference.target_profile = Some(kept);
                }
            }
            element.types = Some(types);
        }

        Ok(vec![resolved.id])
    }

    fn resolve_type_url(&self, name: &str, fisher: &dyn Fishable) -> Result<String, ExportError> {
        if name.starts_with("http://") || name.starts_with("https://") {
            return Ok(name.to_string());
        }
        if self.tank.find_profile(name).is_some() {
            // export on demand so the URL is authoritative
            return self.export_by_name(name).map(|sd| sd.url);
        }
        fisher
            .fish_for_metadata(
                name,
                &[FishKind::Resource, FishKind::Profile, FishKind::Type],
            )
            .and_then(|meta| meta.url)
            .ok_or_else(|| ExportError::TypeNotFound(name.to_string()))
    }

    fn apply_contains(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &ContainsRule,
        fisher: &dyn Fishable,
    ) -> Result<Vec<String>, ExportError> {
        let resolved = resolver.resolve(sd, &rule.path)?;
        let index = sd
            .position_by_id(&resolved.id)
            .expect("resolved element exists");

        let (element_path, element_max, last_segment) = {
            let element = &sd.elements()[index];
            if !element.is_array() {
                return Err(ExportError::SlicingDefinitionError {
                    path: rule.path.clone(),
                    reason: "element does not repeat".to_string(),
                });
            }
            let last = element
                .path
                .rsplit('.')
                .next()
                .unwrap_or(&element.path)
                .to_string();
            (element.path.clone(), element.max.clone(), last)
        };

        let mut touched = vec![resolved.id.clone()];

        // install the default discriminator on first slicing
        {
            let element = sd
                .find_by_id_mut(&resolved.id)
                .expect("resolved element exists");
            if element.slicing.is_none() {
                let discriminator = if last_segment == "extension"
                    || last_segment == "modifierExtension"
                {
                    SlicingDiscriminator {
                        type_: "value".to_string(),
                        path: "url".to_string(),
                    }
                } else {
                    SlicingDiscriminator {
                        type_: "value".to_string(),
                        path: "$this".to_string(),
                    }
                };
                element.slicing = Some(ElementSlicing {
                    discriminator: Some(vec![discriminator]),
                    description: None,
                    ordered: Some(false),
                    rules: "open".to_string(),
                });
            }
        }

        for item in &rule.items {
            let slice_id = format!("{}:{}", resolved.id, item.name);
            if sd.position_by_id(&slice_id).is_some() {
                continue; // re-declaring an existing slice is a no-op
            }

            let mut slice = ElementDefinition::new(element_path.clone());
            slice.id = Some(slice_id.clone());
            slice.slice_name = Some(item.name.clone());
            slice.min = Some(item.min.unwrap_or(0));
            slice.max = item
                .max
                .clone()
                .or_else(|| element_max.clone())
                .or_else(|| Some("*".to_string()));
            if item.flags.must_support {
                slice.must_support = Some(true);
            }
            if item.flags.summary {
                slice.is_summary = Some(true);
            }
            if item.flags.modifier {
                slice.is_modifier = Some(true);
            }
            if let Some(type_name) = &item.type_name {
                let url = self.resolve_type_url(type_name, fisher)?;
                let code = if last_segment == "extension" || last_segment == "modifierExtension" {
                    "Extension"
                } else {
                    type_name.as_str()
                };
                let mut element_type = ElementType::new(code);
                element_type.profile = Some(vec![url]);
                slice.types = Some(vec![element_type]);
            }

            if let (Some(slice_max), Some(parent_max)) = (&slice.max, &element_max)
                && max_lt(parent_max, slice_max)
            {
                return Err(ExportError::InvalidMaxOfSlice {
                    path: rule.path.clone(),
                    slice_max: slice_max.clone(),
                    max: parent_max.clone(),
                });
            }

            let insert_at = sd.end_of_subtree(
                sd.position_by_id(&resolved.id)
                    .expect("resolved element exists"),
            );
            sd.elements_mut().insert(insert_at, slice);
            touched.push(slice_id);
        }

        Ok(touched)
    }

    fn apply_caret(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &CaretValueRule,
    ) -> Result<Vec<String>, ExportError> {
        let value = convert_value_loose(&rule.value);

        if rule.path.is_empty() {
            // a rule on the definition resource itself
            let mut map = match serde_json::to_value(&*sd)? {
                JsonValue::Object(map) => map,
                _ => unreachable!("struct serializes to object"),
            };
            set_json_path(&mut map, &rule.caret_path, value)?;
            *sd = serde_json::from_value(JsonValue::Object(map))?;
            return Ok(Vec::new());
        }

        let resolved = resolver.resolve(sd, &rule.path)?;
        let element = sd
            .find_by_id_mut(&resolved.id)
            .expect("resolved element exists");

        // flags never clear once set
        if matches!(rule.caret_path.as_str(), "mustSupport" | "isModifier")
            && value == JsonValue::Bool(false)
        {
            let currently = match rule.caret_path.as_str() {
                "mustSupport" => element.must_support,
                _ => element.is_modifier,
            };
            if currently == Some(true) {
                return Err(ExportError::CannotClearFlag {
                    path: rule.path.clone(),
                    flag: rule.caret_path.clone(),
                });
            }
        }

        let mut map = match serde_json::to_value(&*element)? {
            JsonValue::Object(map) => map,
            _ => unreachable!("struct serializes to object"),
        };
        set_json_path(&mut map, &rule.caret_path, value)?;
        *element = serde_json::from_value(JsonValue::Object(map))?;
        Ok(vec![resolved.id])
    }

    fn apply_fixed(
        &self,
        sd: &mut StructureDefinition,
        resolver: &PathResolver,
        rule: &FixedValueRule,
        fisher: &dyn Fishable,
    ) -> Result<Vec<String>, ExportError> {
        let resolved = resolver.resolve(sd, &rule.path)?;

        // resolve name-carrying values before borrowing the element
        let pre_resolved = match &rule.value {
            ast::FshValue::Canonical(name) => Some(
                fisher
                    .fish_for_metadata(name, &[])
                    .and_then(|meta| meta.url)
                    .ok_or_else(|| ExportError::CannotResolveCanonical(name.clone()))?,
            ),
            ast::FshValue::InstanceRef(name) => {
                return Err(ExportError::FixingNonResource(name.clone()));
            }
            _ => None,
        };

        let element = sd
            .find_by_id_mut(&resolved.id)
            .expect("resolved element exists");

        let type_code = resolved
            .choice_type
            .clone()
            .or_else(|| element.single_type().map(String::from))
            .ok_or_else(|| ExportError::NoSingleType {
                path: rule.path.clone(),
            })?;

        let value = match pre_resolved {
            Some(url) => JsonValue::String(url),
            None => convert_value_for_type(&rule.value, &type_code)?,
        };
        validate_composite_value(&type_code, &rule.path, &value)?;

        if let Some((_, existing)) = element.fixed_value() {
            if !rule.exactly {
                return Err(ExportError::FixedToPattern {
                    path: rule.path.clone(),
                });
            }
            if *existing != value {
                return Err(ExportError::ValueAlreadyFixed {
                    path: rule.path.clone(),
                    existing: existing.to_string(),
                    requested: value.to_string(),
                });
            }
            return Ok(vec![resolved.id]); // same fixed value: idempotent
        }

        element.set_fixed_or_pattern(&type_code, value, rule.exactly);
        Ok(vec![resolved.id])
    }

    // ------------------------------------------------------------------
    // Differential
    // ------------------------------------------------------------------

    /// Differential = the touched elements, each trimmed to its changed
    /// fields (new slices appear whole)
    fn build_differential(
        &self,
        sd: &StructureDefinition,
        original: &HashMap<String, JsonValue>,
        changed: &[String],
    ) -> ElementList {
        let mut differential = Vec::new();
        for element in sd.elements() {
            let id = element.element_id();
            if !changed.contains(&id) {
                continue;
            }
            let current = serde_json::to_value(element).expect("element serializes");
            let entry = match original.get(&id) {
                None => current, // new element (slice)
                Some(before) => diff_element(before, &current),
            };
            if let JsonValue::Object(map) = entry {
                // a touched element with nothing actually changed is dropped
                if map.keys().any(|k| !matches!(k.as_str(), "id" | "path" | "sliceName")) {
                    let mut element: ElementDefinition =
                        serde_json::from_value(JsonValue::Object(map))
                            .expect("diffed element deserializes");
                    element.id = Some(id);
                    differential.push(element);
                }
            }
        }
        ElementList {
            element: differential,
        }
    }
}

/// Keep only the fields of `current` that differ from `before`, plus the
/// element's identity
fn diff_element(before: &JsonValue, current: &JsonValue) -> JsonValue {
    let (Some(before), Some(current)) = (before.as_object(), current.as_object()) else {
        return current.clone();
    };
    let mut out = Map::new();
    for (key, value) in current {
        let unchanged = before.get(key) == Some(value);
        if !unchanged || matches!(key.as_str(), "id" | "path" | "sliceName") {
            out.insert(key.clone(), value.clone());
        }
    }
    JsonValue::Object(out)
}

/// Numeric comparison of FHIR max cardinalities; `*` is unbounded
fn parse_max(max: &str) -> Option<u32> {
    if max == "*" { None } else { max.parse().ok() }
}

fn max_lt(left: &str, right: &str) -> bool {
    match (parse_max(left), parse_max(right)) {
        (None, None) => false,
        (None, Some(_)) => false,
        (Some(_), None) => true,
        (Some(l), Some(r)) => l < r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn max_comparison_treats_star_as_unbounded() {
        assert!(max_lt("1", "*"));
        assert!(max_lt("1", "2"));
        assert!(!max_lt("*", "1"));
        assert!(!max_lt("*", "*"));
        assert!(!max_lt("2", "2"));
    }

    #[test]
    fn diff_keeps_only_changes_and_identity() {
        let before = json!({
            "id": "Observation.subject",
            "path": "Observation.subject",
            "min": 0,
            "max": "1",
            "short": "Who this is about"
        });
        let after = json!({
            "id": "Observation.subject",
            "path": "Observation.subject",
            "min": 1,
            "max": "1",
            "short": "Who this is about"
        });
        let diff = diff_element(&before, &after);
        assert_eq!(
            diff,
            json!({"id": "Observation.subject", "path": "Observation.subject", "min": 1})
        );
    }
}
