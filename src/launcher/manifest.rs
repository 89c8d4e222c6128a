use crate::isolation::IsolationLevel;
use crate::supervisor::update::{ProcessCategory, ProcessConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Manifest loaded at startup: one template per managed-process pattern this
/// launcher knows how to run. Unknown fields in the file are ignored so
/// manifests can carry information for other tools.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub templates: Vec<ProcessTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTemplate {
    pub name: String,
    pub version: String,
    pub isolation_level: IsolationLevel,
    #[serde(default = "default_category")]
    pub category: ProcessCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

fn default_category() -> ProcessCategory {
    ProcessCategory::Pattern
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub port: u16,
    #[serde(default = "default_healthcheck_path")]
    pub path: String,
    #[serde(default = "default_healthcheck_interval")]
    pub interval_sec: u64,
    #[serde(default = "default_healthcheck_timeout")]
    pub timeout_sec: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_healthcheck_path() -> String {
    "/health".to_string()
}
fn default_healthcheck_interval() -> u64 {
    10
}
fn default_healthcheck_timeout() -> u64 {
    2
}
fn default_failure_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("reading manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("manifest template {index} is missing a name")]
    MissingName { index: usize },

    #[error("duplicate manifest template '{0}'")]
    DuplicateName(String),
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = std::collections::HashSet::new();
        for (index, template) in self.templates.iter().enumerate() {
            if template.name.is_empty() {
                return Err(ManifestError::MissingName { index });
            }
            if !seen.insert(template.name.as_str()) {
                return Err(ManifestError::DuplicateName(template.name.clone()));
            }
        }
        Ok(())
    }

    pub fn template(&self, name: &str) -> Option<&ProcessTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }
}

impl ProcessTemplate {
    /// Folds the template into the opaque config handed to the syncer. The
    /// whole template rides along as payload; the supervisor never looks
    /// inside it.
    pub fn process_config(&self) -> ProcessConfig {
        let payload = serde_yaml::to_value(self).unwrap_or(serde_yaml::Value::Null);
        let mut config = ProcessConfig::new(self.category).with_payload(payload);
        config.address = self.address.clone();
        config
    }
}
