//! Explicit dependency check run once before the pipeline starts.

use std::{
    env,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    config::{ConfigParamData, PipelineConfig},
    error::{DppError, DppResult},
    processors::{RequestCreatorConfig, request_creator},
    providers::OcrProviderKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub checks: Vec<DependencyCheck>,
}

impl DependencyReport {
    fn ok(&mut self, name: impl Into<String>, detail: impl Into<String>) {
        self.checks.push(DependencyCheck {
            name: name.into(),
            detail: detail.into(),
        });
    }
}

/// Fails with [`DppError::Dependency`] on the first missing file, directory,
/// executable or environment variable the configured pipeline needs.
pub fn verify_dependencies(
    config: &PipelineConfig,
    params: &ConfigParamData,
) -> DppResult<DependencyReport> {
    let mut report = DependencyReport::default();

    require_file("processor config", &params.processor_config_file_path)?;
    report.ok(
        "processor config",
        params.processor_config_file_path.display().to_string(),
    );
    if let Some(mapping) = params.source_mapping_config_file_path.as_ref() {
        require_file("source mapping", mapping)?;
        report.ok("source mapping", mapping.display().to_string());
    }

    for ocr in &config.providers.ocr {
        if ocr.kind == OcrProviderKind::AzureRead {
            continue;
        }
        let exe = ocr.executable();
        let found = locate_engine(exe, ocr.kind)?;
        if let Some(models) = ocr.model_home_path.as_ref() {
            require_dir(&format!("{} models", ocr.kind), models)?;
        }
        report.ok(ocr.kind.to_string(), found.display().to_string());
    }

    if let Some(var) = config
        .providers
        .llm
        .as_ref()
        .and_then(|llm| llm.api_key_env.as_deref())
    {
        if env::var_os(var).is_none() {
            return Err(DppError::Dependency {
                name: var.to_string(),
                detail: "llm api key environment variable is not set".into(),
            });
        }
        report.ok("llm api key", var);
    }

    for entry in config
        .enabled_processors()
        .filter(|entry| entry.processor == request_creator::PROCESSOR_ID)
    {
        let creator: RequestCreatorConfig = serde_json::from_value(entry.config.clone())
            .map_err(|err| DppError::config(format!("stage `{}`: {err}", entry.name)))?;
        require_dir("read_path", &creator.from_data_file.read_path)?;
        report.ok(
            format!("{} read_path", entry.name),
            creator.from_data_file.read_path.display().to_string(),
        );
    }

    info!(checks = report.checks.len(), "dependencies verified");
    Ok(report)
}

fn require_file(name: &str, path: &Path) -> DppResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DppError::Dependency {
            name: name.to_string(),
            detail: format!("{} is not a readable file", path.display()),
        })
    }
}

fn require_dir(name: &str, path: &Path) -> DppResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(DppError::Dependency {
            name: name.to_string(),
            detail: format!("{} is not a directory", path.display()),
        })
    }
}

/// Resolves bare names through `PATH`; paths are checked as given.
fn locate_engine(exe: &str, kind: OcrProviderKind) -> DppResult<PathBuf> {
    which::which(exe).map_err(|err| DppError::Dependency {
        name: exe.to_string(),
        detail: format!("`{kind}` ocr engine is not an executable on PATH: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_processor_config_is_a_dependency_error() {
        let config = PipelineConfig::from_yaml("processor_list: []").unwrap();
        let params = ConfigParamData::new("/definitely/not/here.yaml", None);
        let err = verify_dependencies(&config, &params).unwrap_err();
        assert!(matches!(err, DppError::Dependency { name, .. } if name == "processor config"));
    }

    #[test]
    fn absolute_executable_paths_are_checked_directly() {
        let err = locate_engine("/definitely/not/tesseract", OcrProviderKind::Tesseract)
            .unwrap_err();
        assert!(matches!(err, DppError::Dependency { name, .. } if name == "/definitely/not/tesseract"));
    }

    #[cfg(unix)]
    #[test]
    fn engines_must_be_executable_not_just_present() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("tesseract");
        std::fs::write(&engine, "#!/bin/sh\n").unwrap();
        let exe = engine.to_str().unwrap();

        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = locate_engine(exe, OcrProviderKind::Tesseract).unwrap_err();
        assert!(matches!(err, DppError::Dependency { .. }));

        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(locate_engine(exe, OcrProviderKind::Tesseract).unwrap(), engine);
    }
}
