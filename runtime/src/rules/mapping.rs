use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::info;

use super::{JsonPath, RuleRegistry};
use crate::error::{DppError, DppResult};

/// Correlates document-data paths with the rule (or literal edits) to apply
/// there. Loaded once per run and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Entries are skipped unless explicitly enabled.
    #[serde(default)]
    pub enabled: bool,
    pub json_path: JsonPath,
    /// Key inside each match that holds the fragment. When absent the match
    /// itself is the fragment.
    #[serde(default)]
    pub json_key: Option<String>,
    #[serde(default, alias = "replace_value_with_rule_name")]
    pub rule: Option<String>,
    #[serde(default, alias = "replace_with_key")]
    pub rename_key: Option<String>,
    #[serde(default, alias = "replace_with_value")]
    pub replace_value: Option<Value>,
}

impl MappingEntry {
    pub fn for_rule(json_path: JsonPath, json_key: Option<&str>, rule: &str) -> Self {
        Self {
            enabled: true,
            json_path,
            json_key: json_key.map(str::to_string),
            rule: Some(rule.to_string()),
            rename_key: None,
            replace_value: None,
        }
    }
}

impl SourceMapping {
    pub fn new(mappings: Vec<MappingEntry>) -> Self {
        Self { mappings }
    }

    pub async fn load(path: &Path) -> DppResult<Self> {
        let contents = fs::read_to_string(path).await.map_err(|err| {
            DppError::config(format!(
                "failed to read source mapping at {}: {err}",
                path.display()
            ))
        })?;
        let mapping = Self::from_yaml(&contents).map_err(|err| match err {
            DppError::Configuration(msg) => {
                DppError::config(format!("{msg} (in {})", path.display()))
            }
            other => other,
        })?;
        info!(
            path = %path.display(),
            entries = mapping.mappings.len(),
            "source mapping loaded"
        );
        Ok(mapping)
    }

    pub fn from_yaml(contents: &str) -> DppResult<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|err| DppError::config(format!("malformed source mapping: {err}")))
    }

    pub fn enabled_entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.mappings.iter().filter(|entry| entry.enabled)
    }

    pub fn is_noop(&self) -> bool {
        self.enabled_entries().next().is_none()
    }

    /// Rejects entries that could never do anything and rules the registry
    /// does not know, so a bad mapping aborts the run before any document.
    pub fn validate(&self, registry: &RuleRegistry) -> DppResult<()> {
        for (idx, entry) in self.enabled_entries().enumerate() {
            let label = format!("mapping #{} ({})", idx + 1, entry.json_path);
            if entry.rule.is_none() && entry.rename_key.is_none() && entry.replace_value.is_none() {
                return Err(DppError::config(format!(
                    "{label} has no rule, rename_key or replace_value"
                )));
            }
            if entry.json_key.is_none() && entry.rename_key.is_some() {
                return Err(DppError::config(format!(
                    "{label} sets rename_key without json_key"
                )));
            }
            if let Some(rule) = entry.rule.as_deref() {
                if !registry.contains(rule) {
                    return Err(DppError::config(format!(
                        "{label} references unregistered rule `{rule}`"
                    )));
                }
            }
        }
        Ok(())
    }
}
