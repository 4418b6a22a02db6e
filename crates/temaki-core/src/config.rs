//! Project configuration (sushi-config.yaml compatible)
//!
//! The compiler reads the same YAML shape SUSHI projects use. Only the keys
//! the pipeline consumes are modeled; unknown keys are ignored so existing
//! configurations load unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration at '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_yaml::Error),

    #[error("Missing required configuration key: {0}")]
    MissingKey(&'static str),
}

/// Implementation Guide project configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfiguration {
    /// Canonical URL base for every generated artifact (required)
    pub canonical: String,

    /// Package/IG id, e.g. `fhir.us.minimal`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default = "default_fhir_version")]
    pub fhir_version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// draft | active | retired | unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// IG publisher template coordinate, e.g. `hl7.fhir.template#0.0.5`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// package-id -> version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
}

fn default_fhir_version() -> String {
    "4.0.1".to_string()
}

impl Default for ProjectConfiguration {
    fn default() -> Self {
        Self {
            canonical: String::new(),
            id: None,
            name: None,
            title: None,
            fhir_version: default_fhir_version(),
            version: None,
            status: None,
            publisher: None,
            template: None,
            dependencies: None,
        }
    }
}

impl ProjectConfiguration {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        if config.canonical.is_empty() {
            return Err(ConfigError::MissingKey("canonical"));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// The IG id used in artifact file names; falls back to `ig`
    pub fn ig_id(&self) -> &str {
        self.id.as_deref().unwrap_or("ig")
    }

    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or("draft")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_yaml() {
        let config = ProjectConfiguration::from_yaml(
            "canonical: http://hl7.org/fhir/us/minimal\n\
             id: fhir.us.minimal\n\
             fhirVersion: 4.0.1\n\
             template: hl7.fhir.template#0.0.5\n",
        )
        .unwrap();
        assert_eq!(config.canonical, "http://hl7.org/fhir/us/minimal");
        assert_eq!(config.ig_id(), "fhir.us.minimal");
        assert_eq!(config.template.as_deref(), Some("hl7.fhir.template#0.0.5"));
        assert_eq!(config.status_or_default(), "draft");
    }

    #[test]
    fn missing_canonical_is_rejected() {
        let err = ProjectConfiguration::from_yaml("id: x\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(_) | ConfigError::MissingKey("canonical")
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = ProjectConfiguration::from_yaml(
            "canonical: http://example.org/fhir\n\
             pages:\n  index.md:\n    title: Home\n",
        )
        .unwrap();
        assert_eq!(config.canonical, "http://example.org/fhir");
    }
}
