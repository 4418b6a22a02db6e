//! ig.ini emitter
//!
//! Produces the IG publisher's `ig.ini` companion file: a boxed banner
//! comment, a single `[IG]` section, one `key = value` per line, and a
//! trailing blank line. Three situations:
//!
//! - the author configured a `template` and has no `ig.ini` of their own:
//!   generate the file outright;
//! - the author configured a `template` *and* keeps an `ig.ini` on disk:
//!   the generated file wins and the on-disk one is reported as overridden;
//! - no `template`, on-disk `ig.ini`: copy it through with a banner naming
//!   the source, warning about (but preserving) deprecated keys, and merge
//!   in defaults for any missing `ig`/`template` key.

use crate::config::ProjectConfiguration;
use crate::diagnostics::DiagnosticCollector;
use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

const DEPRECATED_KEYS: &[&str] = &[
    "copyrightyear",
    "license",
    "version",
    "ballotstatus",
    "fhirspec",
    "excludexml",
    "excludejson",
    "excludettl",
    "excludeMaps",
];

const DEFAULT_TEMPLATE: &str = "fhir.base.template";

/// Emits the ig.ini file content for one compilation
pub struct IgIniEmitter<'a> {
    config: &'a ProjectConfiguration,
    collector: &'a DiagnosticCollector,
}

impl<'a> IgIniEmitter<'a> {
    pub fn new(config: &'a ProjectConfiguration, collector: &'a DiagnosticCollector) -> Self {
        Self { config, collector }
    }

    /// Produce the ig.ini content; `existing` is an author-supplied ig.ini
    /// found on disk, as `(path, content)`. Returns `None` when there is
    /// nothing to emit (no template configured and no file supplied).
    pub fn emit(&self, existing: Option<(&Path, &str)>) -> Option<String> {
        match (&self.config.template, existing) {
            (Some(template), None) => Some(self.generate(template)),
            (Some(template), Some((path, _))) => {
                self.collector.warn(format!(
                    "Found both a template in the configuration and an ig.ini at {}; \
                     the configured template wins and the file is overridden",
                    path.display()
                ));
                Some(self.generate(template))
            }
            (None, Some((path, content))) => Some(self.copy_with_defaults(path, content)),
            (None, None) => None,
        }
    }

    fn ig_entry(&self) -> String {
        format!(
            "input/ImplementationGuide-{}.json",
            self.config.ig_id()
        )
    }

    fn generate(&self, template: &str) -> String {
        let mut keys = IndexMap::new();
        keys.insert("ig".to_string(), self.ig_entry());
        keys.insert("template".to_string(), template.to_string());
        debug!("Generated ig.ini");
        self.collector.info("Generated ig.ini.");
        render(&generated_banner(), &keys)
    }

    fn copy_with_defaults(&self, path: &Path, content: &str) -> String {
        let mut keys = parse_ini(content);

        for key in keys.keys() {
            if DEPRECATED_KEYS.contains(&key.as_str()) {
                self.collector.warn(format!(
                    "ig.ini key '{key}' is deprecated and no longer used by the IG publisher; \
                     preserving it as-is"
                ));
            }
        }

        if !keys.contains_key("ig") {
            self.collector
                .warn("ig.ini is missing the 'ig' key; adding the default".to_string());
            keys.insert("ig".to_string(), self.ig_entry());
        }
        if !keys.contains_key("template") {
            self.collector
                .warn("ig.ini is missing the 'template' key; adding the default".to_string());
            keys.insert("template".to_string(), DEFAULT_TEMPLATE.to_string());
        }

        render(&copied_banner(path), &keys)
    }
}

fn generated_banner() -> Vec<String> {
    vec![
        "WARNING: DO NOT EDIT THIS FILE".to_string(),
        "This file is generated from the project configuration.".to_string(),
        "Changes made here will be overwritten on the next build.".to_string(),
    ]
}

fn copied_banner(source: &Path) -> Vec<String> {
    vec![
        "WARNING: DO NOT EDIT THIS FILE".to_string(),
        format!("This file is copied from {}.", source.display()),
        "To change its contents, edit that file instead.".to_string(),
    ]
}

/// Boxed banner + `[IG]` section + `key = value` lines + trailing blank line
fn render(banner: &[String], keys: &IndexMap<String, String>) -> String {
    let width = banner.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    let mut out = String::new();
    out.push_str(&format!("; {}\n", "*".repeat(width)));
    for line in banner {
        out.push_str(&format!("; * {:w$} *\n", line, w = width - 4));
    }
    out.push_str(&format!("; {}\n", "*".repeat(width)));
    out.push_str("\n[IG]\n");
    for (key, value) in keys {
        out.push_str(&format!("{key} = {value}\n"));
    }
    out.push('\n');
    out
}

/// Minimal INI reader: a single section of `key = value` lines. Comments
/// and section headers are skipped; the publisher only reads `[IG]`.
fn parse_ini(content: &str) -> IndexMap<String, String> {
    let mut keys = IndexMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with('[')
        {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            keys.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with_template() -> ProjectConfiguration {
        ProjectConfiguration {
            canonical: "http://hl7.org/fhir/us/minimal".to_string(),
            id: Some("fhir.us.minimal".to_string()),
            template: Some("hl7.fhir.template#0.0.5".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn generates_from_template() {
        let config = config_with_template();
        let collector = DiagnosticCollector::new();
        let content = IgIniEmitter::new(&config, &collector).emit(None).unwrap();

        assert!(content.contains("[IG]"));
        assert!(content.contains("; *"));
        assert!(content.contains("ig = input/ImplementationGuide-fhir.us.minimal.json"));
        assert!(content.contains("template = hl7.fhir.template#0.0.5"));
        assert!(content.ends_with("\n\n"));

        let infos: Vec<_> = collector
            .records()
            .into_iter()
            .filter(|d| d.severity == crate::diagnostics::Severity::Info)
            .collect();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].message, "Generated ig.ini.");
    }

    #[test]
    fn template_overrides_on_disk_file_with_warning() {
        let config = config_with_template();
        let collector = DiagnosticCollector::new();
        let path = PathBuf::from("ig-data/ig.ini");
        let content = IgIniEmitter::new(&config, &collector)
            .emit(Some((&path, "[IG]\nig = custom.json\n")))
            .unwrap();

        assert!(content.contains("template = hl7.fhir.template#0.0.5"));
        assert!(!content.contains("custom.json"));
        assert!(
            collector
                .records()
                .iter()
                .any(|d| d.message.contains("overridden"))
        );
    }

    #[test]
    fn copies_user_file_preserving_deprecated_keys() {
        let config = ProjectConfiguration {
            canonical: "http://example.org/fhir".to_string(),
            id: Some("example".to_string()),
            ..Default::default()
        };
        let collector = DiagnosticCollector::new();
        let path = PathBuf::from("ig-data/ig.ini");
        let user = "[IG]\nig = input/ImplementationGuide-example.json\ntemplate = my.template\ncopyrightyear = 2020\n";
        let content = IgIniEmitter::new(&config, &collector)
            .emit(Some((&path, user)))
            .unwrap();

        assert!(content.contains("copyrightyear = 2020"));
        assert!(content.contains("ig-data/ig.ini"));
        assert!(
            collector
                .records()
                .iter()
                .any(|d| d.message.contains("'copyrightyear' is deprecated"))
        );
    }

    #[test]
    fn merges_missing_keys_with_warnings() {
        let config = ProjectConfiguration {
            canonical: "http://example.org/fhir".to_string(),
            id: Some("example".to_string()),
            ..Default::default()
        };
        let collector = DiagnosticCollector::new();
        let path = PathBuf::from("ig.ini");
        let content = IgIniEmitter::new(&config, &collector)
            .emit(Some((&path, "[IG]\n")))
            .unwrap();

        assert!(content.contains("ig = input/ImplementationGuide-example.json"));
        assert!(content.contains(&format!("template = {DEFAULT_TEMPLATE}")));
        assert_eq!(collector.warning_count(), 2);
    }

    #[test]
    fn nothing_to_emit_without_template_or_file() {
        let config = ProjectConfiguration {
            canonical: "http://example.org/fhir".to_string(),
            ..Default::default()
        };
        let collector = DiagnosticCollector::new();
        assert!(IgIniEmitter::new(&config, &collector).emit(None).is_none());
    }
}
