//! Instance exporter
//!
//! Builds concrete resource instances by walking assignment rules over the
//! element definitions of the instance's declared profile. Patterns and
//! fixed values inherited from the profile materialize as *implied values*
//! along every path a rule reaches, references to other instances resolve to
//! `Type/id` (or `#id` for contained resources), and inline instances nest
//! whole resources — after which descendant paths validate against the
//! nested resource's own type.

use super::fhir_types::StructureDefinition;
use super::package::Package;
use super::path_resolver::{InstancePathPart, PathResolver, parse_fsh_path};
use super::sd_exporter::StructureDefinitionExporter;
use super::value::{convert_value_for_type, validate_composite_value};
use super::ExportError;
use crate::ast::{self, AssignmentRule, FshValue, InstanceUsage, Rule};
use crate::config::ProjectConfiguration;
use crate::diagnostics::{DiagnosticCollector, Severity};
use crate::fish::{FishKind, Fishable, FishingContext};
use crate::semantic::{ExpandedRule, FshTank, RuleTarget, expand_rules};
use regex::Regex;
use serde_json::{Map, Value as JsonValue, json};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-.]{1,64}$").expect("valid regex"))
}

/// Compiler-internal identity of an instance, stripped on serialization
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMeta {
    pub name: String,
    pub usage: InstanceUsage,
    pub instance_of: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// An exported resource instance: a JSON-shaped tree plus bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDefinition {
    pub resource_type: String,
    pub id: Option<String>,
    /// Data fields in assignment order (resourceType/id/meta excluded)
    pub content: Map<String, JsonValue>,
    pub meta: InstanceMeta,
}

impl InstanceDefinition {
    pub fn is_inline(&self) -> bool {
        self.meta.usage == InstanceUsage::Inline
    }

    /// The serialized resource: resourceType, id, then data fields
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert("resourceType".to_string(), json!(self.resource_type));
        if let Some(id) = &self.id {
            map.insert("id".to_string(), json!(id));
        }
        for (key, value) in &self.content {
            if key != "resourceType" && key != "id" {
                map.insert(key.clone(), value.clone());
            }
        }
        JsonValue::Object(map)
    }
}

/// Exports Instance entities to [`InstanceDefinition`]s
pub struct InstanceExporter<'a> {
    tank: &'a FshTank,
    defs: &'a dyn Fishable,
    package: &'a RefCell<Package>,
    collector: &'a DiagnosticCollector,
    config: &'a ProjectConfiguration,
    sd_exporter: &'a StructureDefinitionExporter<'a>,
    /// Instance names being exported, for inline reference cycles
    in_flight: RefCell<Vec<String>>,
}

impl<'a> InstanceExporter<'a> {
    pub fn new(
        tank: &'a FshTank,
        defs: &'a dyn Fishable,
        package: &'a RefCell<Package>,
        collector: &'a DiagnosticCollector,
        config: &'a ProjectConfiguration,
        sd_exporter: &'a StructureDefinitionExporter<'a>,
    ) -> Self {
        Self {
            tank,
            defs,
            package,
            collector,
            config,
            sd_exporter,
            in_flight: RefCell::new(Vec::new()),
        }
    }

    /// Export every instance in the tank, in document order. Failed
    /// instances are reported and skipped.
    pub fn export_all(&self) {
        let names: Vec<String> = self.tank.instances().map(|i| i.name.clone()).collect();
        for name in names {
            if let Err(err) = self.export_by_name(&name) {
                warn!("Skipping instance '{}': {}", name, err);
            }
        }
    }

    /// Export one instance by name, re-using a packaged result when the
    /// instance was already exported (e.g. as someone's inline value)
    pub fn export_by_name(&self, name: &str) -> Result<InstanceDefinition, ExportError> {
        if let Some(existing) = self.package.borrow().find_instance(name) {
            return Ok(existing.clone());
        }
        if self.in_flight.borrow().iter().any(|n| n == name) {
            return Err(ExportError::InstanceOfNotDefined {
                name: name.to_string(),
                instance_of: format!("(instance cycle through '{name}')"),
            });
        }
        let Some(instance) = self.tank.find_instance(name) else {
            return Err(ExportError::InstanceOfNotDefined {
                name: name.to_string(),
                instance_of: "(unknown instance)".to_string(),
            });
        };

        self.in_flight.borrow_mut().push(name.to_string());
        let result = self.export_instance(instance);
        self.in_flight.borrow_mut().pop();

        if let Ok(ref exported) = result
            && let Err(err) = self.package.borrow_mut().add_instance(exported.clone())
        {
            self.collector
                .error_at(err.to_string(), instance.location.clone());
        }
        result
    }

    fn export_instance(
        &self,
        instance: &ast::Instance,
    ) -> Result<InstanceDefinition, ExportError> {
        debug!("Exporting instance {}", instance.name);

        // 1. resolve instanceOf: Resource, Profile, Extension, Type
        let sd = self.resolve_instance_of(instance)?;

        // 2. non-resources can only ever be inline
        let mut usage = instance.usage;
        if !sd.is_resource() && usage != InstanceUsage::Inline {
            self.collector.push(
                crate::diagnostics::Diagnostic::new(
                    Severity::Warning,
                    format!(
                        "Instance '{}' is of non-resource type '{}'; usage forced to Inline",
                        instance.name, sd.type_field
                    ),
                )
                .with_location(instance.location.clone()),
            );
            usage = InstanceUsage::Inline;
        }

        // 3. id shape: sanitize '_' then validate; malformed ids are
        // reported but the instance is still emitted
        let raw_id = instance.id.clone().unwrap_or_else(|| instance.name.clone());
        let id = if raw_id.contains('_') {
            let sanitized = raw_id.replace('_', "-");
            if id_regex().is_match(&sanitized) {
                self.collector.warn_at(
                    format!("Instance id '{raw_id}' contains '_'; sanitized to '{sanitized}'"),
                    instance.location.clone(),
                );
                sanitized
            } else {
                raw_id
            }
        } else {
            raw_id
        };
        if !id_regex().is_match(&id) {
            self.collector.error_at(
                ExportError::InvalidFHIRId(id.clone()).to_string(),
                instance.location.clone(),
            );
        }

        let mut exported = InstanceDefinition {
            resource_type: sd.type_field.clone(),
            id: Some(id),
            content: Map::new(),
            meta: InstanceMeta {
                name: instance.name.clone(),
                usage,
                instance_of: instance.instance_of.clone(),
                title: instance.title.clone(),
                description: instance.description.clone(),
            },
        };

        // derived profiles stamp meta.profile
        if sd.derivation.as_deref() == Some("constraint") {
            exported
                .content
                .insert("meta".to_string(), json!({"profile": [sd.url]}));
        }

        // 4. expand mixins and inserts into the assignment stream
        let rules = expand_rules(
            RuleTarget::Instance,
            &instance.rules,
            &instance.mixins,
            &instance.location,
            self.tank,
            self.collector,
        );

        // 5. pre-scan for inline-resource paths: descendants of an inline
        // assignment validate against the nested resource's type
        let overrides = self.scan_inline_overrides(&rules);

        // 6-8. resolve, validate, and apply every rule
        let fisher = FishingContext::new(vec![self.package as &dyn Fishable, self.defs]);
        let resolver = PathResolver::new(&fisher);
        let mut resolution_sd = sd.clone();
        let mut override_sds: HashMap<String, StructureDefinition> = HashMap::new();
        let mut slice_indexes: HashMap<String, usize> = HashMap::new();

        for expanded in &rules {
            let Rule::Assignment(rule) = &expanded.rule else {
                unreachable!("filtered during expansion");
            };
            if let Err(err) = self.apply_assignment(
                rule,
                &mut exported,
                &resolver,
                &mut resolution_sd,
                &overrides,
                &mut override_sds,
                &mut slice_indexes,
                &fisher,
            ) {
                self.collector
                    .push(expanded.diagnostic(Severity::Error, err.to_string()));
            }
        }

        // 9. drop empty containers left by failed or partial assignments
        clean_value_tree(&mut exported.content);
        // known element order, as the profile defines it
        sort_by_element_order(&mut exported.content, &resolution_sd);

        // 10. required elements
        self.validate_required(instance, &exported, &resolution_sd);

        Ok(exported)
    }

    fn resolve_instance_of(
        &self,
        instance: &ast::Instance,
    ) -> Result<StructureDefinition, ExportError> {
        if instance.instance_of.is_empty() {
            let err = ExportError::InstanceOfNotDefined {
                name: instance.name.clone(),
                instance_of: "(none)".to_string(),
            };
            self.collector
                .error_at(err.to_string(), instance.location.clone());
            return Err(err);
        }

        // FSH profiles and extensions export on demand
        if self.tank.find_profile(&instance.instance_of).is_some()
            || self.tank.find_extension(&instance.instance_of).is_some()
        {
            return self.sd_exporter.export_by_name(&instance.instance_of);
        }

        let fished = self.defs.fish_for_fhir(
            &instance.instance_of,
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
                let err = ExportError::InstanceOfNotDefined {
                    name: instance.name.clone(),
                    instance_of: instance.instance_of.clone(),
                };
                self.collector
                    .error_at(err.to_string(), instance.location.clone());
                Err(err)
            }
        }
    }

    /// Paths whose subtree is governed by another resource type: inline
    /// instance assignments and explicit `.resourceType` assignments
    fn scan_inline_overrides(&self, rules: &[ExpandedRule]) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        for expanded in rules {
            let Rule::Assignment(rule) = &expanded.rule else {
                continue;
            };
            match &rule.value {
                FshValue::InstanceRef(name) => {
                    if let Some(prefix) = normalize_path_key(&rule.path)
                        && let Ok(referent) = self.export_by_name(name)
                    {
                        overrides.insert(prefix, referent.resource_type.clone());
                    }
                }
                FshValue::String(type_name) if rule.path.ends_with(".resourceType") => {
                    let parent = rule.path.trim_end_matches(".resourceType");
                    if let Some(prefix) = normalize_path_key(parent) {
                        overrides.insert(prefix, type_name.clone());
                    }
                }
                _ => {}
            }
        }
        overrides
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_assignment(
        &self,
        rule: &AssignmentRule,
        exported: &mut InstanceDefinition,
        resolver: &PathResolver,
        resolution_sd: &mut StructureDefinition,
        overrides: &HashMap<String, String>,
        override_sds: &mut HashMap<String, StructureDefinition>,
        slice_indexes: &mut HashMap<String, usize>,
        fisher: &dyn Fishable,
    ) -> Result<(), ExportError> {
        // `resourceType` is a JSON type tag, not an element; an explicit
        // assignment places it directly on the nested object
        if let Some(parent) = rule.path.strip_suffix(".resourceType")
            && let FshValue::String(type_name) = &rule.value
        {
            let parts =
                self.resolve_parts(parent, resolver, resolution_sd, overrides, override_sds)?;
            let slot = navigate(&mut exported.content, &parts, slice_indexes);
            if !slot.is_object() {
                *slot = JsonValue::Object(Map::new());
            }
            slot.as_object_mut()
                .expect("just ensured object")
                .insert("resourceType".to_string(), json!(type_name));
            return Ok(());
        }

        // 6. produce path parts, swapping in the inline resource's type tree
        // under an annotated prefix
        let parts = self.resolve_parts(
            &rule.path,
            resolver,
            resolution_sd,
            overrides,
            override_sds,
        )?;

        // the element definitions used for implied values and typing come
        // from whichever tree each part resolved against
        let leaf = parts.last().expect("paths have at least one segment");

        // value resolution (references, canonicals, inline instances)
        let value = match &rule.value {
            FshValue::Reference(name) => {
                let referent = self.resolve_reference(name)?;
                let target_id = referent.id.clone().unwrap_or_default();
                let contained = exported
                    .content
                    .get("contained")
                    .and_then(|c| c.as_array())
                    .map(|entries| {
                        entries.iter().any(|entry| {
                            entry.get("id").and_then(|v| v.as_str()) == Some(target_id.as_str())
                        })
                    })
                    .unwrap_or(false);
                let reference = if contained {
                    format!("#{target_id}")
                } else {
                    format!("{}/{target_id}", referent.resource_type)
                };
                json!({ "reference": reference })
            }
            FshValue::Canonical(name) => {
                let url = fisher
                    .fish_for_metadata(name, &[])
                    .and_then(|meta| meta.url)
                    .or_else(|| {
                        self.tank.find_value_set(name).map(|vs| {
                            let id = vs.id.clone().unwrap_or_else(|| vs.name.clone());
                            format!("{}/ValueSet/{id}", self.config.canonical)
                        })
                    })
                    .ok_or_else(|| ExportError::CannotResolveCanonical(name.clone()))?;
                json!(url)
            }
            FshValue::InstanceRef(name) => {
                let referent = self.export_by_name(name).map_err(|_| {
                    ExportError::FixingNonResource(name.clone())
                })?;
                referent.to_json()
            }
            other => {
                let type_code = leaf.type_code.clone().ok_or_else(|| {
                    ExportError::NoSingleType {
                        path: rule.path.clone(),
                    }
                })?;
                convert_value_for_type(other, &type_code)?
            }
        };

        // 7. implied values first: ancestor patterns materialize along the
        // reached path, never overwriting anything already present
        for depth in 0..parts.len() {
            let element_pattern = self
                .pattern_for(&parts[depth], resolution_sd, override_sds)
                .map(|(_, v)| v.clone());
            if let Some(pattern) = element_pattern {
                let slot = navigate(&mut exported.content, &parts[..=depth], slice_indexes);
                merge_implied(slot, &pattern);
            }
        }

        // 8. the explicit assignment, honoring fixed/pattern conflicts
        let (fixed_key, sd_value) = match self.pattern_for(leaf, resolution_sd, override_sds) {
            Some((key, value)) => (Some(key.to_string()), Some(value.clone())),
            None => (None, None),
        };
        let slot = navigate(&mut exported.content, &parts, slice_indexes);
        if let (Some(key), Some(sd_value)) = (&fixed_key, &sd_value)
            && !values_compatible(sd_value, &value)
        {
            if key.starts_with("fixed") {
                // the SD value is preserved and the instance value rejected
                *slot = sd_value.clone();
            } else {
                // element-typed pattern wins; the error still surfaces
                let mut merged = value.clone();
                overlay(&mut merged, sd_value);
                *slot = merged;
            }
            return Err(ExportError::ValueAlreadyFixed {
                path: rule.path.clone(),
                existing: sd_value.to_string(),
                requested: value.to_string(),
            });
        }

        // superset assignments union with the implied value already there
        if let (JsonValue::Object(_), JsonValue::Object(_)) = (&*slot, &value) {
            let mut merged = value;
            merge_implied(&mut merged, slot);
            *slot = merged;
        } else {
            *slot = value;
        }

        // Period and Range shapes assemble across several rules; re-check
        // every such ancestor this assignment just touched
        for depth in (0..parts.len()).rev() {
            if let Some(type_code @ ("Period" | "Range")) = parts[depth].type_code.as_deref() {
                let ancestor = navigate(&mut exported.content, &parts[..=depth], slice_indexes);
                validate_composite_value(type_code, &rule.path, ancestor)?;
            }
        }
        Ok(())
    }

    /// Resolve a rule path to parts, delegating the remainder under an
    /// inline-resource override to that resource type's own tree
    fn resolve_parts(
        &self,
        path: &str,
        resolver: &PathResolver,
        resolution_sd: &mut StructureDefinition,
        overrides: &HashMap<String, String>,
        override_sds: &mut HashMap<String, StructureDefinition>,
    ) -> Result<Vec<ResolvedPart>, ExportError> {
        let segments = parse_fsh_path(path)?;

        // longest annotated prefix wins
        let mut split_at = 0;
        let mut override_type = None;
        for end in (1..segments.len()).rev() {
            let key = segments_key(&segments[..end]);
            if let Some(type_name) = overrides.get(&key) {
                split_at = end;
                override_type = Some(type_name.clone());
                break;
            }
        }

        let mut parts = Vec::new();
        let prefix_path = segments_to_path(&segments[..if split_at == 0 {
            segments.len()
        } else {
            split_at
        }]);
        for part in resolver.resolve_for_instance(resolution_sd, &prefix_path)? {
            parts.push(ResolvedPart::from_part(part, None));
        }

        if let Some(type_name) = override_type {
            let fisher = FishingContext::new(vec![self.package as &dyn Fishable, self.defs]);
            if !override_sds.contains_key(&type_name) {
                let json = fisher
                    .fish_for_fhir(&type_name, &[FishKind::Resource, FishKind::Type])
                    .ok_or_else(|| ExportError::InvalidResourceType(type_name.clone()))?;
                let sd: StructureDefinition = serde_json::from_value((*json).clone())?;
                override_sds.insert(type_name.clone(), sd);
            }
            let override_sd = override_sds
                .get_mut(&type_name)
                .expect("just inserted");
            let override_resolver = PathResolver::new(&fisher);
            let remainder = segments_to_path(&segments[split_at..]);
            for part in override_resolver.resolve_for_instance(override_sd, &remainder)? {
                parts.push(ResolvedPart::from_part(part, Some(type_name.clone())));
            }
        }
        Ok(parts)
    }

    /// The fixed/pattern entry on the element a part resolved to
    fn pattern_for<'s>(
        &self,
        part: &ResolvedPart,
        resolution_sd: &'s StructureDefinition,
        override_sds: &'s HashMap<String, StructureDefinition>,
    ) -> Option<(&'s str, &'s JsonValue)> {
        let sd = match &part.override_type {
            Some(type_name) => override_sds.get(type_name)?,
            None => resolution_sd,
        };
        sd.find_by_id(&part.element_id)?.fixed_or_pattern()
    }

    fn resolve_reference(&self, name: &str) -> Result<InstanceDefinition, ExportError> {
        self.export_by_name(name)
    }

    // ------------------------------------------------------------------
    // Required element validation
    // ------------------------------------------------------------------

    fn validate_required(
        &self,
        instance: &ast::Instance,
        exported: &InstanceDefinition,
        sd: &StructureDefinition,
    ) {
        let root = sd
            .elements()
            .first()
            .map(|e| e.element_id())
            .unwrap_or_default();
        let data = JsonValue::Object(exported.content.clone());
        self.validate_required_children(instance, exported, sd, &root, &data);
    }

    fn validate_required_children(
        &self,
        instance: &ast::Instance,
        exported: &InstanceDefinition,
        sd: &StructureDefinition,
        parent_id: &str,
        data: &JsonValue,
    ) {
        let prefix = format!("{parent_id}.");
        for element in sd.elements() {
            let id = element.element_id();
            let Some(rest) = id.strip_prefix(&prefix) else {
                continue;
            };
            if rest.contains('.') || rest.contains(':') || element.slice_name.is_some() {
                continue;
            }
            let min = element.min.unwrap_or(0);
            let occurrences = count_occurrences(data, rest);
            if min > 0 && occurrences < min as usize {
                // the id is implicit; the resource-level fields are not data
                if rest == "id" && exported.id.is_some() {
                    continue;
                }
                let err = ExportError::RequiredElementMissing {
                    instance: instance.name.clone(),
                    path: element.path.clone(),
                };
                self.collector
                    .error_at(err.to_string(), instance.location.clone());
                continue;
            }
            // recurse into present complex children
            if let Some(child_data) = lookup_key(data, rest) {
                match child_data {
                    JsonValue::Object(_) => {
                        self.validate_required_children(instance, exported, sd, &id, child_data);
                    }
                    JsonValue::Array(entries) => {
                        for entry in entries {
                            if entry.is_object() {
                                self.validate_required_children(
                                    instance, exported, sd, &id, entry,
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// One resolved path part, tagged with the override tree it came from
#[derive(Debug, Clone)]
struct ResolvedPart {
    json_key: String,
    element_id: String,
    index: Option<usize>,
    slice_name: Option<String>,
    is_array: bool,
    type_code: Option<String>,
    override_type: Option<String>,
}

impl ResolvedPart {
    fn from_part(part: InstancePathPart, override_type: Option<String>) -> Self {
        Self {
            json_key: part.json_key,
            element_id: part.element_id,
            index: part.index,
            slice_name: part.slice_name,
            is_array: part.is_array,
            type_code: part.type_code,
            override_type,
        }
    }
}

/// Normalized string key for a path prefix: `[0]` collapses away, named
/// slices and larger indexes stay
fn normalize_path_key(path: &str) -> Option<String> {
    let segments = parse_fsh_path(path).ok()?;
    Some(segments_key(&segments))
}

fn segments_key(segments: &[super::path_resolver::PathSegment]) -> String {
    segments
        .iter()
        .map(|s| {
            let mut out = s.base.clone();
            if let Some(slice) = s.slice_name() {
                out.push_str(&format!("[{slice}]"));
            }
            if let Some(index) = s.index()
                && index > 0
            {
                out.push_str(&format!("[{index}]"));
            }
            out
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn segments_to_path(segments: &[super::path_resolver::PathSegment]) -> String {
    segments
        .iter()
        .map(|s| {
            let mut out = s.base.clone();
            for bracket in &s.brackets {
                match bracket {
                    super::path_resolver::Bracket::Choice => out.push_str("[x]"),
                    super::path_resolver::Bracket::Index(i) => out.push_str(&format!("[{i}]")),
                    super::path_resolver::Bracket::Slice(name) => {
                        out.push_str(&format!("[{name}]"))
                    }
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Walk/create the JSON location for `parts`, returning the slot to assign
fn navigate<'j>(
    content: &'j mut Map<String, JsonValue>,
    parts: &[ResolvedPart],
    slice_indexes: &mut HashMap<String, usize>,
) -> &'j mut JsonValue {
    let mut root = Some(content);
    let mut current: Option<&'j mut JsonValue> = None;
    let mut concrete_path = String::new();

    for part in parts {
        let map: &mut Map<String, JsonValue> = match current.take() {
            None => root.take().expect("root consumed only on the first segment"),
            Some(value) => {
                if !value.is_object() {
                    *value = JsonValue::Object(Map::new());
                }
                value.as_object_mut().expect("just ensured object")
            }
        };

        concrete_path.push_str(&part.json_key);
        if part.is_array || part.index.is_some() || part.slice_name.is_some() {
            let base_index = match &part.slice_name {
                Some(slice) => {
                    let slice_key = format!("{concrete_path}[{slice}]");
                    match slice_indexes.get(&slice_key) {
                        Some(&index) => index,
                        None => {
                            let next = map
                                .get(&part.json_key)
                                .and_then(|v| v.as_array())
                                .map(|a| a.len())
                                .unwrap_or(0);
                            slice_indexes.insert(slice_key, next);
                            next
                        }
                    }
                }
                None => 0,
            };
            let index = base_index + part.index.unwrap_or(0);
            concrete_path.push_str(&format!("[{index}]"));

            let entry = map
                .entry(part.json_key.clone())
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            if !entry.is_array() {
                *entry = JsonValue::Array(vec![entry.take()]);
            }
            let array = entry.as_array_mut().expect("just ensured array");
            while array.len() <= index {
                array.push(JsonValue::Null);
            }
            current = Some(&mut array[index]);
        } else {
            let entry = map
                .entry(part.json_key.clone())
                .or_insert(JsonValue::Null);
            current = Some(entry);
        }
        concrete_path.push('.');
    }
    current.expect("paths have at least one segment")
}

/// Merge `implied` into `target` without overwriting anything present
fn merge_implied(target: &mut JsonValue, implied: &JsonValue) {
    if target.is_null() {
        *target = implied.clone();
        return;
    }
    match (target, implied) {
        (JsonValue::Object(target), JsonValue::Object(implied)) => {
            for (key, value) in implied {
                match target.get_mut(key) {
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                    Some(existing) => merge_implied(existing, value),
                }
            }
        }
        (JsonValue::Array(target), JsonValue::Array(implied)) => {
            for (i, value) in implied.iter().enumerate() {
                match target.get_mut(i) {
                    None => target.push(value.clone()),
                    Some(existing) => merge_implied(existing, value),
                }
            }
        }
        _ => {} // scalars present stay
    }
}

/// Force `winner`'s leaves over `target`
fn overlay(target: &mut JsonValue, winner: &JsonValue) {
    match (target, winner) {
        (JsonValue::Object(target), JsonValue::Object(winner)) => {
            for (key, value) in winner {
                match target.get_mut(key) {
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                    Some(existing) => overlay(existing, value),
                }
            }
        }
        (target, winner) => *target = winner.clone(),
    }
}

/// Whether an assignment agrees with (or extends) an SD-supplied value
fn values_compatible(sd_value: &JsonValue, assigned: &JsonValue) -> bool {
    match (sd_value, assigned) {
        (JsonValue::Object(sd), JsonValue::Object(assigned)) => sd
            .iter()
            .all(|(key, value)| assigned.get(key).map(|a| values_compatible(value, a)).unwrap_or(false)),
        (JsonValue::Array(sd), JsonValue::Array(assigned)) => {
            sd.len() <= assigned.len()
                && sd
                    .iter()
                    .zip(assigned)
                    .all(|(s, a)| values_compatible(s, a))
        }
        (sd, assigned) => sd == assigned,
    }
}

/// Drop null entries and empty containers
fn clean_value_tree(content: &mut Map<String, JsonValue>) {
    let keys: Vec<String> = content.keys().cloned().collect();
    for key in keys {
        let remove = {
            let value = content.get_mut(&key).expect("key exists");
            clean_value(value);
            value.is_null()
                || value.as_object().map(|o| o.is_empty()).unwrap_or(false)
                || value.as_array().map(|a| a.is_empty()).unwrap_or(false)
        };
        if remove {
            content.shift_remove(&key);
        }
    }
}

fn clean_value(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => clean_value_tree(map),
        JsonValue::Array(entries) => {
            for entry in entries.iter_mut() {
                clean_value(entry);
            }
            while entries.last().map(|e| e.is_null()).unwrap_or(false) {
                entries.pop();
            }
        }
        _ => {}
    }
}

/// Order top-level fields the way the profile's element tree orders them
fn sort_by_element_order(content: &mut Map<String, JsonValue>, sd: &StructureDefinition) {
    let Some(root) = sd.elements().first().map(|e| e.element_id()) else {
        return;
    };
    let prefix = format!("{root}.");
    // (name, is_choice) in tree order; meta always leads
    let mut order: Vec<(String, bool)> = vec![("meta".to_string(), false)];
    for element in sd.elements() {
        let id = element.element_id();
        if let Some(rest) = id.strip_prefix(&prefix)
            && !rest.contains('.')
            && !rest.contains(':')
        {
            match rest.strip_suffix("[x]") {
                Some(base) => order.push((base.to_string(), true)),
                None => order.push((rest.to_string(), false)),
            }
        }
    }

    let mut sorted = Map::new();
    for (key, is_choice) in &order {
        let matching: Vec<String> = content
            .keys()
            .filter(|k| {
                if *is_choice {
                    // value[x] serializes as valueQuantity, valueString, ...
                    k.strip_prefix(key.as_str())
                        .map(|suffix| {
                            !suffix.is_empty()
                                && suffix.chars().next().map(char::is_uppercase).unwrap_or(false)
                        })
                        .unwrap_or(false)
                } else {
                    k.as_str() == key.as_str()
                        || k.strip_prefix('_')
                            .map(|stripped| stripped == key.as_str())
                            .unwrap_or(false)
                }
            })
            .cloned()
            .collect();
        for k in matching {
            if let Some(v) = content.shift_remove(&k) {
                sorted.insert(k, v);
            }
        }
    }
    // anything the tree does not name keeps its assignment order
    for (key, value) in std::mem::take(content) {
        sorted.insert(key, value);
    }
    *content = sorted;
}

fn count_occurrences(data: &JsonValue, element_name: &str) -> usize {
    match lookup_key(data, element_name) {
        Some(JsonValue::Array(entries)) => entries.len(),
        Some(JsonValue::Null) | None => 0,
        Some(_) => 1,
    }
}

/// Find the data for an element name, handling choice elements
/// (`value[x]` -> any `valueXxx` key) and primitive `_name` siblings
fn lookup_key<'j>(data: &'j JsonValue, element_name: &str) -> Option<&'j JsonValue> {
    let map = data.as_object()?;
    if let Some(base) = element_name.strip_suffix("[x]") {
        return map.iter().find_map(|(key, value)| {
            key.strip_prefix(base)
                .filter(|suffix| {
                    !suffix.is_empty()
                        && suffix.chars().next().map(char::is_uppercase).unwrap_or(false)
                })
                .map(|_| value)
        });
    }
    map.get(element_name)
        .or_else(|| map.get(&format!("_{element_name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_implied_never_overwrites() {
        let mut target = json!({"code": "explicit"});
        merge_implied(&mut target, &json!({"code": "implied", "system": "http://foo.com"}));
        assert_eq!(target, json!({"code": "explicit", "system": "http://foo.com"}));
    }

    #[test]
    fn values_compatible_accepts_supersets() {
        let sd = json!({"coding": [{"code": "a"}]});
        assert!(values_compatible(&sd, &json!({"coding": [{"code": "a", "system": "s"}], "text": "x"})));
        assert!(!values_compatible(&sd, &json!({"coding": [{"code": "b"}]})));
    }

    #[test]
    fn clean_drops_empty_containers() {
        let mut content = serde_json::from_value::<Map<String, JsonValue>>(json!({
            "a": {"b": {}},
            "c": [],
            "d": "keep",
            "e": [null, {"f": 1}, null]
        }))
        .unwrap();
        clean_value_tree(&mut content);
        assert_eq!(
            JsonValue::Object(content),
            json!({"d": "keep", "e": [null, {"f": 1}]})
        );
    }

    #[test]
    fn choice_lookup_matches_typed_key() {
        let data = json!({"valueQuantity": {"value": 1}});
        assert!(lookup_key(&data, "value[x]").is_some());
        assert!(lookup_key(&data, "effective[x]").is_none());
    }

    #[test]
    fn primitive_sibling_counts_as_present() {
        let data = json!({"_status": {"extension": []}});
        assert_eq!(count_occurrences(&data, "status"), 1);
    }

    #[test]
    fn normalize_path_collapses_zero_indexes() {
        assert_eq!(
            normalize_path_key("contained[0]").as_deref(),
            Some("contained")
        );
        assert_eq!(
            normalize_path_key("contained[1]").as_deref(),
            Some("contained[1]")
        );
        assert_eq!(
            normalize_path_key("item[answer].value").as_deref(),
            Some("item[answer].value")
        );
    }
}
