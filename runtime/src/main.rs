use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dpp_runtime::{
    config::{self, ConfigParamData, PipelineConfig},
    pipeline::{BuildContext, DocStatusService, DocumentStatus, Pipeline, ProcessorRegistry},
    providers::{
        LlmProvider, OcrProviderSet, OpenAiFormatLlmProvider, ProviderSet, build_ocr_provider,
    },
    rules::{RuleRegistry, SourceMapping},
    startup,
    storage::{DocStatusStorage, JsonDocStatusConfig, JsonDocStatusStorage},
};

const DEFAULT_STATUS_DIR: &str = "data/status";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "Pipeline run crashed");
        eprintln!("Pipeline run crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();
    if let Err(err) = dotenv() {
        warn!(error = %err, "no .env file loaded");
    }

    let config_path = config::config_path();
    let config = PipelineConfig::load(&config_path)
        .await
        .with_context(|| format!("Failed to load pipeline config at {}", config_path.display()))?;
    let params = ConfigParamData::new(
        config_path.clone(),
        config.source_mapping_config_file_path.clone(),
    );

    let report = startup::verify_dependencies(&config, &params)
        .context("Dependency check failed")?;
    for check in &report.checks {
        info!(dependency = %check.name, detail = %check.detail, "dependency ok");
    }

    let source_mapping = match params.source_mapping_config_file_path.as_deref() {
        Some(path) => SourceMapping::load(path)
            .await
            .context("Failed to load source mapping")?,
        None => SourceMapping::default(),
    };

    let mut ocr = OcrProviderSet::new();
    for ocr_config in &config.providers.ocr {
        ocr.insert(build_ocr_provider(ocr_config).context("Failed to set up ocr provider")?);
    }
    let llm: Option<Arc<dyn LlmProvider>> = match config.providers.llm.clone() {
        Some(llm_config) => Some(Arc::new(
            OpenAiFormatLlmProvider::new(llm_config).context("Failed to set up llm provider")?,
        )),
        None => None,
    };

    let context = BuildContext::new(params)
        .with_rules(RuleRegistry::with_builtin_rules())
        .with_source_mapping(source_mapping)
        .with_providers(ProviderSet { ocr, llm });

    let workspace = env::var("WORKSPACE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let doc_status = Arc::new(JsonDocStatusStorage::new(JsonDocStatusConfig {
        working_dir: config
            .status_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATUS_DIR)),
        namespace: "doc_status".into(),
        workspace,
    }));
    doc_status
        .initialize()
        .await
        .context("Failed to initialize document status store")?;

    let registry = ProcessorRegistry::with_builtin_processors();
    let pipeline = Pipeline::from_config(&config, &registry, &context)
        .context("Failed to build pipeline")?
        .with_status_service(DocStatusService::new(doc_status.clone()));
    info!(stages = ?pipeline.stage_names(), "Pipeline ready");

    let run_report = pipeline.run_once().await;
    for failure in run_report.failures() {
        error!(failure = %failure, "document failed");
    }
    if let Some(stage) = run_report.halted_by.as_deref() {
        warn!(stage = %stage, "run halted early");
    }

    if let Err(err) = doc_status.finalize().await {
        warn!(error = %err, "Failed to finalize document status store");
    }

    info!(
        documents = run_report.outcomes.len(),
        processed = run_report.count(DocumentStatus::Processed),
        failed = run_report.count(DocumentStatus::Failed),
        "Run complete"
    );
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
