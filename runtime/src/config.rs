//! Pipeline configuration: the YAML processor list, provider settings and
//! `${VAR}` substitution.

use std::{
    collections::{BTreeMap, HashSet},
    env,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use tokio::fs;
use tracing::info;

use crate::{
    error::{DppError, DppResult},
    providers::{LlmProviderConfig, OcrProviderConfig},
};

pub const CONFIG_PATH_ENV: &str = "DPP_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.yaml";
const ENV_PREFIX: &str = "ENV:";

/// Locations of the two configuration documents for a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigParamData {
    pub processor_config_file_path: PathBuf,
    pub source_mapping_config_file_path: Option<PathBuf>,
}

impl ConfigParamData {
    pub fn new(
        processor_config_file_path: impl Into<PathBuf>,
        source_mapping_config_file_path: Option<PathBuf>,
    ) -> Self {
        Self {
            processor_config_file_path: processor_config_file_path.into(),
            source_mapping_config_file_path,
        }
    }
}

pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Where the document-status store keeps `doc_status_<namespace>.json`.
    #[serde(default)]
    pub status_dir: Option<PathBuf>,
    #[serde(default)]
    pub source_mapping_config_file_path: Option<PathBuf>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub processor_list: Vec<ProcessorEntry>,
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub ocr: Vec<OcrProviderConfig>,
    #[serde(default)]
    pub llm: Option<LlmProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorEntry {
    pub name: String,
    pub processor: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub config: Value,
}

fn enabled_by_default() -> bool {
    true
}

impl PipelineConfig {
    pub async fn load(path: &Path) -> DppResult<Self> {
        let contents = fs::read_to_string(path).await.map_err(|err| {
            DppError::config(format!(
                "failed to read pipeline config at {}: {err}",
                path.display()
            ))
        })?;
        let config = Self::from_yaml(&contents)?;
        info!(
            path = %path.display(),
            stages = config.processor_list.len(),
            "pipeline configuration loaded"
        );
        Ok(config)
    }

    /// Parses YAML, resolves `variables` (values prefixed `ENV:` come from
    /// the process environment) and substitutes `${NAME}` in every string.
    pub fn from_yaml(contents: &str) -> DppResult<Self> {
        let mut raw: YamlValue = serde_yaml::from_str(contents)
            .map_err(|err| DppError::config(format!("malformed pipeline config: {err}")))?;

        let declared: BTreeMap<String, String> = match raw.get("variables") {
            Some(vars) => serde_yaml::from_value(vars.clone())
                .map_err(|err| DppError::config(format!("invalid `variables`: {err}")))?,
            None => BTreeMap::new(),
        };
        let resolved = resolve_variables(&declared)?;
        substitute(&mut raw, &resolved)?;

        let mut config: Self = serde_yaml::from_value(raw)
            .map_err(|err| DppError::config(format!("invalid pipeline config: {err}")))?;
        config.variables = resolved;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DppResult<()> {
        if self.workers == 0 {
            return Err(DppError::config("workers must be greater than zero"));
        }
        let mut names = HashSet::new();
        for entry in &self.processor_list {
            if entry.name.trim().is_empty() {
                return Err(DppError::config("processor entry with an empty name"));
            }
            if entry.processor.trim().is_empty() {
                return Err(DppError::config(format!(
                    "processor entry `{}` has no processor id",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(DppError::config(format!(
                    "processor name `{}` is used twice",
                    entry.name
                )));
            }
        }
        for ocr in &self.providers.ocr {
            ocr.validate()?;
        }
        if let Some(llm) = self.providers.llm.as_ref() {
            llm.validate()?;
        }
        Ok(())
    }

    pub fn enabled_processors(&self) -> impl Iterator<Item = &ProcessorEntry> {
        self.processor_list.iter().filter(|entry| entry.enabled)
    }
}

fn resolve_variables(declared: &BTreeMap<String, String>) -> DppResult<BTreeMap<String, String>> {
    declared
        .iter()
        .map(|(name, value)| {
            let resolved = match value.strip_prefix(ENV_PREFIX) {
                Some(var) => env::var(var.trim()).map_err(|_| {
                    DppError::config(format!(
                        "variable `{name}` reads unset environment variable `{}`",
                        var.trim()
                    ))
                })?,
                None => value.clone(),
            };
            Ok((name.clone(), resolved))
        })
        .collect()
}

fn substitute(value: &mut YamlValue, vars: &BTreeMap<String, String>) -> DppResult<()> {
    match value {
        YamlValue::String(text) => {
            if text.contains("${") {
                *text = substitute_str(text, vars)?;
            }
        }
        YamlValue::Sequence(items) => {
            for item in items {
                substitute(item, vars)?;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute(item, vars)?;
            }
        }
        YamlValue::Tagged(tagged) => substitute(&mut tagged.value, vars)?,
        _ => {}
    }
    Ok(())
}

fn substitute_str(text: &str, vars: &BTreeMap<String, String>) -> DppResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| DppError::config(format!("unterminated placeholder in `{text}`")))?;
        let name = &after[..end];
        let value = vars
            .get(name)
            .ok_or_else(|| DppError::config(format!("undefined variable `{name}` in `{text}`")))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Input discovery settings for the request creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemReaderConfigData {
    pub read_path: PathBuf,
    /// Case-insensitive extensions or name fragments; empty means all files.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    20
}

impl FileSystemReaderConfigData {
    pub fn validate(&self) -> DppResult<()> {
        if self.read_path.as_os_str().is_empty() {
            return Err(DppError::config("read_path must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(DppError::config("batch_size must be greater than zero"));
        }
        Ok(())
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        let name = file_name.to_ascii_lowercase();
        let matches = |pattern: &String| {
            let pattern = pattern.to_ascii_lowercase();
            if pattern.starts_with('.') {
                name.ends_with(&pattern)
            } else {
                name.contains(&pattern)
            }
        };
        let included = self.include.is_empty() || self.include.iter().any(matches);
        included && !self.exclude.iter().any(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
variables:
  ROOT: /data/dpp
  MODEL: gpt-4o-mini
workers: 2
source_mapping_config_file_path: ${ROOT}/source_mapping.yaml
providers:
  llm:
    model_name: ${MODEL}
processor_list:
  - name: creator
    processor: request_creator
    config:
      work_root_path: ${ROOT}/work
  - name: closer
    processor: request_closer
    enabled: false
"#;

    #[test]
    fn variables_are_substituted_everywhere() {
        let config = PipelineConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(
            config.source_mapping_config_file_path,
            Some(PathBuf::from("/data/dpp/source_mapping.yaml"))
        );
        assert_eq!(
            config.processor_list[0].config["work_root_path"],
            Value::String("/data/dpp/work".into())
        );
        assert_eq!(
            config.providers.llm.as_ref().map(|llm| llm.model_name.as_str()),
            Some("gpt-4o-mini")
        );
        assert_eq!(config.enabled_processors().count(), 1);
    }

    #[test]
    fn undefined_variable_is_a_configuration_error() {
        let yaml = "processor_list:\n  - name: a\n    processor: ${NOPE}\n";
        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, DppError::Configuration(msg) if msg.contains("NOPE")));
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let yaml = "processor_list:\n  - {name: a, processor: x}\n  - {name: a, processor: y}\n";
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn reader_filters_by_extension_and_fragment() {
        let reader = FileSystemReaderConfigData {
            read_path: PathBuf::from("/in"),
            include: vec![".pdf".into(), ".PNG".into()],
            exclude: vec!["draft".into()],
            batch_size: 10,
        };
        assert!(reader.accepts("invoice.pdf"));
        assert!(reader.accepts("scan.png"));
        assert!(!reader.accepts("notes.txt"));
        assert!(!reader.accepts("draft_invoice.pdf"));
    }
}
