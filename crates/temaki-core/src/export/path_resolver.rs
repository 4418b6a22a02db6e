//! FSH path resolution against a StructureDefinition element tree
//!
//! Resolves paths like `name.given`, `value[x]`, `valueQuantity.code`, or
//! `category[niceSlice].coding` to element definitions in a snapshot,
//! materializing missing pieces on the way:
//!
//! - a choice suffix (`valueQuantity`) resolves to the `value[x]` element
//!   when the named type is one of its types, and the chosen type follows
//!   the walk so deeper segments unfold against it;
//! - a `[sliceName]` bracket descends into an existing slice;
//! - a child that exists on the element's type but is not yet in the
//!   snapshot is *unfolded*: the type's own element definitions are fished
//!   and its immediate children grafted in, re-rooted at the current path.
//!
//! The same walker serves the StructureDefinition exporter (which mutates
//! the resolved element) and the instance exporter (which validates values
//! and needs the per-segment JSON keys).

use super::fhir_types::{ElementDefinition, StructureDefinition, capitalize};
use super::ExportError;
use crate::fish::{FishKind, Fishable};
use tracing::trace;

/// One `[...]` bracket in a path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bracket {
    /// `[x]` — an explicit choice element reference
    Choice,
    /// `[0]`, `[1]` — an array index
    Index(usize),
    /// `[sliceName]`
    Slice(String),
}

/// One dot-separated segment of an FSH path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub base: String,
    pub brackets: Vec<Bracket>,
}

impl PathSegment {
    pub fn slice_name(&self) -> Option<&str> {
        self.brackets.iter().find_map(|b| match b {
            Bracket::Slice(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn index(&self) -> Option<usize> {
        self.brackets.iter().find_map(|b| match b {
            Bracket::Index(i) => Some(*i),
            _ => None,
        })
    }

    pub fn is_choice(&self) -> bool {
        self.brackets.contains(&Bracket::Choice)
    }
}

/// Parse an FSH path into segments, honoring brackets
pub fn parse_fsh_path(path: &str) -> Result<Vec<PathSegment>, ExportError> {
    let mut segments = Vec::new();
    let mut base = String::new();
    let mut brackets = Vec::new();
    let mut chars = path.chars().peekable();

    let invalid = || ExportError::CannotResolvePath {
        path: path.to_string(),
        target: "path syntax".to_string(),
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if base.is_empty() {
                    return Err(invalid());
                }
                segments.push(PathSegment {
                    base: std::mem::take(&mut base),
                    brackets: std::mem::take(&mut brackets),
                });
            }
            '[' => {
                let mut content = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(c) => content.push(c),
                        None => return Err(invalid()),
                    }
                }
                let bracket = if content == "x" {
                    Bracket::Choice
                } else if content.chars().all(|c| c.is_ascii_digit()) && !content.is_empty() {
                    Bracket::Index(content.parse().map_err(|_| invalid())?)
                } else if content.is_empty() {
                    return Err(invalid());
                } else {
                    Bracket::Slice(content)
                };
                brackets.push(bracket);
            }
            _ => {
                if !brackets.is_empty() {
                    return Err(invalid());
                }
                base.push(c);
            }
        }
    }
    if !base.is_empty() || !brackets.is_empty() {
        if base.is_empty() {
            return Err(invalid());
        }
        segments.push(PathSegment { base, brackets });
    }
    if segments.is_empty() {
        return Err(invalid());
    }
    Ok(segments)
}

/// Result of resolving a path for mutation
#[derive(Debug, Clone)]
pub struct ResolvedElement {
    /// Element id within the snapshot
    pub id: String,
    /// The concrete type selected by a trailing choice suffix
    /// (`valueQuantity` -> `Quantity`)
    pub choice_type: Option<String>,
}

/// Per-segment outcome used by the instance exporter
#[derive(Debug, Clone)]
pub struct InstancePathPart {
    /// The JSON property name this segment writes (`valueQuantity`, `coding`)
    pub json_key: String,
    pub element_id: String,
    pub index: Option<usize>,
    pub slice_name: Option<String>,
    pub is_array: bool,
    /// The effective type at this segment: the chosen choice type, or the
    /// element's single declared type
    pub type_code: Option<String>,
}

/// Path walker over a StructureDefinition snapshot
pub struct PathResolver<'a> {
    fisher: &'a dyn Fishable,
}

impl<'a> PathResolver<'a> {
    pub fn new(fisher: &'a dyn Fishable) -> Self {
        Self { fisher }
    }

    /// Resolve `fsh_path` to exactly one element, unfolding as needed
    pub fn resolve(
        &self,
        sd: &mut StructureDefinition,
        fsh_path: &str,
    ) -> Result<ResolvedElement, ExportError> {
        let segments = parse_fsh_path(fsh_path)?;
        let mut current_id = root_id(sd)?;
        let mut choice_type: Option<String> = None;

        for segment in &segments {
            let step = self.step(sd, &current_id, choice_type.as_deref(), segment, fsh_path)?;
            current_id = step.element_id;
            choice_type = step.choice_type;
        }

        Ok(ResolvedElement {
            id: current_id,
            choice_type,
        })
    }

    /// Resolve a path for instance building: returns the JSON key, array
    /// information, and element id for every segment
    pub fn resolve_for_instance(
        &self,
        sd: &mut StructureDefinition,
        fsh_path: &str,
    ) -> Result<Vec<InstancePathPart>, ExportError> {
        let segments = parse_fsh_path(fsh_path)?;
        let mut current_id = root_id(sd)?;
        let mut choice_type: Option<String> = None;
        let mut parts = Vec::new();

        for segment in &segments {
            let step = self.step(sd, &current_id, choice_type.as_deref(), segment, fsh_path)?;

            let json_key = match &step.choice_type {
                // choice writes the type-qualified key: value[x] -> valueQuantity
                Some(type_code) if step.was_choice => {
                    let element = sd
                        .find_by_id(&step.element_id)
                        .ok_or_else(|| missing(fsh_path, sd))?;
                    let base = element
                        .path
                        .rsplit('.')
                        .next()
                        .unwrap_or(&element.path)
                        .trim_end_matches("[x]")
                        .to_string();
                    format!("{base}{}", capitalize(type_code))
                }
                _ => segment.base.clone(),
            };

            let element = sd
                .find_by_id(&step.element_id)
                .ok_or_else(|| missing(fsh_path, sd))?;
            parts.push(InstancePathPart {
                json_key,
                element_id: step.element_id.clone(),
                index: segment.index(),
                slice_name: segment.slice_name().map(String::from),
                is_array: element.is_array(),
                type_code: step
                    .choice_type
                    .clone()
                    .or_else(|| element.single_type().map(String::from)),
            });

            current_id = step.element_id;
            choice_type = step.choice_type;
        }
        Ok(parts)
    }

    fn step(
        &self,
        sd: &mut StructureDefinition,
        current_id: &str,
        inherited_choice: Option<&str>,
        segment: &PathSegment,
        full_path: &str,
    ) -> Result<Step, ExportError> {
        // (a) direct child
        let direct_id = format!("{current_id}.{base}", base = segment.base);
        let direct_id = if segment.is_choice() {
            format!("{direct_id}[x]")
        } else {
            direct_id
        };

        let mut found = sd.position_by_id(&direct_id).map(|_| Step {
            element_id: direct_id.clone(),
            choice_type: None,
            was_choice: segment.is_choice(),
        });

        // (b) choice specialization: valueQuantity -> value[x] + Quantity
        if found.is_none()
            && let Some((choice_id, type_code)) = self.match_choice(sd, current_id, &segment.base)
        {
            found = Some(Step {
                element_id: choice_id,
                choice_type: Some(type_code),
                was_choice: true,
            });
        }

        // unfold children from the element's type, then retry (a) and (b)
        if found.is_none() && self.unfold(sd, current_id, inherited_choice)? {
            if sd.position_by_id(&direct_id).is_some() {
                found = Some(Step {
                    element_id: direct_id.clone(),
                    choice_type: None,
                    was_choice: segment.is_choice(),
                });
            } else if let Some((choice_id, type_code)) =
                self.match_choice(sd, current_id, &segment.base)
            {
                found = Some(Step {
                    element_id: choice_id,
                    choice_type: Some(type_code),
                    was_choice: true,
                });
            }
        }

        let mut step = found.ok_or_else(|| ExportError::CannotResolvePath {
            path: full_path.to_string(),
            target: sd.name.clone(),
        })?;

        // (c) descend into a named slice
        if let Some(slice) = segment.slice_name() {
            let slice_id = format!("{}:{slice}", step.element_id);
            if sd.position_by_id(&slice_id).is_none() {
                return Err(ExportError::CannotResolvePath {
                    path: full_path.to_string(),
                    target: sd.name.clone(),
                });
            }
            step.element_id = slice_id;
        }

        Ok(step)
    }

    /// Try to interpret `base` as `<choicePrefix><TypeName>` against a
    /// `<choicePrefix>[x]` sibling
    fn match_choice(
        &self,
        sd: &StructureDefinition,
        current_id: &str,
        base: &str,
    ) -> Option<(String, String)> {
        for element in sd.elements() {
            let id = element.element_id();
            let Some(rest) = id.strip_prefix(&format!("{current_id}.")) else {
                continue;
            };
            let Some(prefix) = rest.strip_suffix("[x]") else {
                continue;
            };
            if rest.contains('.') || element.slice_name.is_some() {
                continue;
            }
            let Some(type_part) = base.strip_prefix(prefix) else {
                continue;
            };
            if type_part.is_empty() {
                continue;
            }
            // the suffix must name one of the element's types
            for code in element.type_codes() {
                if capitalize(code) == type_part {
                    return Some((id.clone(), code.to_string()));
                }
            }
        }
        None
    }

    /// Graft the immediate children of `element`'s type into the snapshot.
    /// Returns true when new elements were added.
    fn unfold(
        &self,
        sd: &mut StructureDefinition,
        element_id: &str,
        choice_override: Option<&str>,
    ) -> Result<bool, ExportError> {
        let index = sd
            .position_by_id(element_id)
            .ok_or_else(|| missing(element_id, sd))?;
        let child_prefix = format!("{element_id}.");
        if sd
            .elements()
            .iter()
            .any(|e| e.element_id().starts_with(&child_prefix))
        {
            return Ok(false);
        }

        let element = &sd.elements()[index];
        let type_code = match choice_override {
            Some(code) => code.to_string(),
            None => match element.single_type() {
                Some(code) => code.to_string(),
                None => {
                    return Err(ExportError::NoSingleType {
                        path: element.path.clone(),
                    });
                }
            },
        };
        // inline backbone children always live in the snapshot already
        if matches!(type_code.as_str(), "BackboneElement" | "Element") {
            return Ok(false);
        }

        let type_json = self
            .fisher
            .fish_for_fhir(&type_code, &[FishKind::Resource, FishKind::Type])
            .ok_or_else(|| ExportError::TypeNotFound(type_code.clone()))?;
        let type_sd: StructureDefinition = serde_json::from_value((*type_json).clone())?;
        let type_elements = type_sd
            .snapshot
            .as_ref()
            .ok_or_else(|| ExportError::MissingSnapshot(type_code.clone()))?;
        let type_root = &type_sd.type_field;

        let element_path = sd.elements()[index].path.clone();
        let mut grafted = Vec::new();
        for child in &type_elements.element {
            let Some(suffix) = child.path.strip_prefix(&format!("{type_root}.")) else {
                continue;
            };
            if suffix.contains('.') {
                continue; // immediate children only; deeper levels unfold on demand
            }
            let mut grafted_child = child.clone();
            grafted_child.path = format!("{element_path}.{suffix}");
            grafted_child.id = Some(format!("{element_id}.{suffix}"));
            grafted.push(grafted_child);
        }
        if grafted.is_empty() {
            return Ok(false);
        }

        trace!(
            "Unfolded {} children of {} from type {}",
            grafted.len(),
            element_id,
            type_code
        );
        let insert_at = index + 1;
        let elements = sd.elements_mut();
        for (offset, child) in grafted.into_iter().enumerate() {
            elements.insert(insert_at + offset, child);
        }
        Ok(true)
    }
}

struct Step {
    element_id: String,
    choice_type: Option<String>,
    was_choice: bool,
}

fn root_id(sd: &StructureDefinition) -> Result<String, ExportError> {
    sd.elements()
        .first()
        .map(|e| e.element_id())
        .ok_or_else(|| ExportError::MissingSnapshot(sd.name.clone()))
}

fn missing(path: &str, sd: &StructureDefinition) -> ExportError {
    ExportError::CannotResolvePath {
        path: path.to_string(),
        target: sd.name.clone(),
    }
}
