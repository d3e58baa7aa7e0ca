use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::{context_str, request_creator, write_context};
use crate::{
    document::{ContextData, DocumentData, MessageItem, ProcessResponse},
    error::{DppError, DppResult},
    pipeline::{BuildContext, Processor, parse_processor_config},
    providers::{OcrProvider, OcrProviderKind, OcrRequest},
};

pub const PROCESSOR_ID: &str = "content_extractor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentExtractorConfig {
    #[serde(default = "default_provider")]
    pub provider: OcrProviderKind,
    /// Page number stamped on lines when the engine reports none.
    #[serde(default)]
    pub page: Option<u32>,
}

fn default_provider() -> OcrProviderKind {
    OcrProviderKind::Tesseract
}

impl Default for ContentExtractorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            page: None,
        }
    }
}

/// Runs the configured OCR provider on the work file and appends the lines
/// to `raw_data.other_data`. Provider errors are returned as-is.
pub struct ContentExtractor {
    config: ContentExtractorConfig,
    provider: Arc<dyn OcrProvider>,
}

impl ContentExtractor {
    pub fn new(config: ContentExtractorConfig, provider: Arc<dyn OcrProvider>) -> Self {
        Self { config, provider }
    }

    pub fn factory(context: &BuildContext, config: &Value) -> DppResult<Arc<dyn Processor>> {
        let config: ContentExtractorConfig = parse_processor_config(PROCESSOR_ID, config)?;
        let provider = context.providers.ocr.get(config.provider)?;
        Ok(Arc::new(Self::new(config, provider)))
    }

    fn source_path(document: &DocumentData, context: &ContextData) -> DppResult<PathBuf> {
        context_str(context, request_creator::PROCESSOR_ID, "work_file_path")
            .or_else(|| document.filepath())
            .map(PathBuf::from)
            .ok_or_else(|| {
                DppError::validation(
                    "/context_data/request_creator/work_file_path",
                    "no work file to extract content from",
                )
            })
    }
}

#[async_trait]
impl Processor for ContentExtractor {
    fn processor_id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn do_process(
        &self,
        mut document: DocumentData,
        mut context: ContextData,
    ) -> DppResult<ProcessResponse> {
        let source = Self::source_path(&document, &context)?;
        let request = OcrRequest {
            file_path: source.clone(),
            page: self.config.page,
        };
        let response = self.provider.extract(&request).await?;
        let line_count = response.lines.len();
        document.append_content(response.lines);
        document.validate()?;

        let mut values = Map::new();
        values.insert(
            "provider".into(),
            Value::String(self.provider.kind().to_string()),
        );
        values.insert("line_count".into(), Value::from(line_count));
        write_context(&mut context, PROCESSOR_ID, values);

        info!(
            doc_id = ?document.document_id(),
            provider = %self.provider.kind(),
            lines = line_count,
            "content extracted"
        );

        let mut response = ProcessResponse::new(document, context);
        if line_count == 0 {
            response = response.with_message(MessageItem::warning(format!(
                "no text found in {}",
                source.display()
            )));
        }
        Ok(response)
    }
}
