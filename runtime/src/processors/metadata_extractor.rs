use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use super::write_context;
use crate::{
    document::{ContextData, DocumentData, ProcessResponse, ValueData},
    error::{DppError, DppResult},
    pipeline::{BuildContext, Processor, parse_processor_config},
    providers::{LlmProvider, LlmRequestData, LlmResponseData},
};

pub const PROCESSOR_ID: &str = "metadata_extractor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Key written under `metadata.extracted`.
    pub name: String,
    /// May reference `{text}`, `{filename}` and `{document_id}`.
    pub prompt_template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataExtractorConfig {
    pub prompts: Vec<PromptConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Truncates `{text}` to this many characters.
    #[serde(default)]
    pub max_text_chars: Option<usize>,
}

impl MetadataExtractorConfig {
    pub fn validate(&self) -> DppResult<()> {
        if self.prompts.is_empty() {
            return Err(DppError::config("metadata extractor needs at least one prompt"));
        }
        if let Some(prompt) = self.prompts.iter().find(|p| p.name.trim().is_empty()) {
            return Err(DppError::config(format!(
                "prompt `{}` has an empty name",
                prompt.prompt_template
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(DppError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Asks the LLM provider one question per configured prompt and stores the
/// answers as extracted metadata.
pub struct MetadataExtractor {
    config: MetadataExtractorConfig,
    llm: Arc<dyn LlmProvider>,
}

impl MetadataExtractor {
    pub fn new(config: MetadataExtractorConfig, llm: Arc<dyn LlmProvider>) -> DppResult<Self> {
        config.validate()?;
        Ok(Self { config, llm })
    }

    pub fn factory(context: &BuildContext, config: &Value) -> DppResult<Arc<dyn Processor>> {
        let config = parse_processor_config(PROCESSOR_ID, config)?;
        Ok(Arc::new(Self::new(config, context.providers.llm()?)?))
    }

    fn document_text(&self, document: &DocumentData) -> String {
        let text = if document.segments().is_empty() {
            document
                .raw_data
                .other_data
                .iter()
                .filter_map(|line| line.content.as_deref())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            document
                .segments()
                .iter()
                .map(|segment| segment.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        match self.config.max_text_chars {
            Some(limit) => text.chars().take(limit).collect(),
            None => text,
        }
    }

    async fn call_with_retry(&self, request: LlmRequestData) -> DppResult<LlmResponseData> {
        let retry = self.config.retry;
        let mut attempt = 1;
        loop {
            match self.llm.get_llm_response(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_recoverable() && attempt < retry.max_attempts => {
                    warn!(
                        provider = self.llm.name(),
                        attempt,
                        error = %err,
                        "llm call failed, retrying"
                    );
                    sleep(Duration::from_millis(retry.backoff_ms * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Processor for MetadataExtractor {
    fn processor_id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn do_process(
        &self,
        mut document: DocumentData,
        mut context: ContextData,
    ) -> DppResult<ProcessResponse> {
        let mut vars = BTreeMap::new();
        vars.insert("text".to_string(), self.document_text(&document));
        vars.insert(
            "filename".to_string(),
            document
                .metadata
                .standard_data
                .as_ref()
                .and_then(|standard| standard.filename.as_ref())
                .map(|name| name.value.clone())
                .unwrap_or_default(),
        );
        vars.insert(
            "document_id".to_string(),
            document.document_id().unwrap_or_default().to_string(),
        );

        let mut extracted = BTreeMap::new();
        let mut exchanges = Map::new();
        for prompt in &self.config.prompts {
            let response = self
                .call_with_retry(LlmRequestData {
                    prompt_template: prompt.prompt_template.clone(),
                    template_var_to_value_dict: vars.clone(),
                })
                .await?;
            extracted.insert(
                prompt.name.clone(),
                ValueData::new(response.llm_response_txt.trim()),
            );
            exchanges.insert(prompt.name.clone(), serde_json::to_value(&response)?);
        }

        info!(
            doc_id = ?document.document_id(),
            fields = extracted.len(),
            "metadata extracted"
        );
        document.merge_extracted_metadata(extracted);
        write_context(&mut context, PROCESSOR_ID, exchanges);
        Ok(ProcessResponse::new(document, context))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::providers::render_prompt;

    struct FlakyLlm {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyLlm {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get_llm_response(&self, request: LlmRequestData) -> DppResult<LlmResponseData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(DppError::provider("flaky", "503"));
            }
            let prompt = render_prompt(&request.prompt_template, &request.template_var_to_value_dict);
            Ok(LlmResponseData {
                llm_response_txt: format!(" answer for {prompt} "),
                llm_request_txt: prompt,
            })
        }
    }

    fn config(max_attempts: u32) -> MetadataExtractorConfig {
        MetadataExtractorConfig {
            prompts: vec![PromptConfig {
                name: "doc_ref".into(),
                prompt_template: "{document_id}".into(),
            }],
            retry: RetryConfig {
                max_attempts,
                backoff_ms: 1,
            },
            max_text_chars: None,
        }
    }

    #[tokio::test]
    async fn retries_provider_errors_then_stores_answer() {
        let llm = Arc::new(FlakyLlm {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let extractor = MetadataExtractor::new(config(3), llm.clone()).unwrap();

        let response = extractor
            .do_process(DocumentData::new("doc-7"), ContextData::new())
            .await
            .unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            response.document_data.metadata.extracted["doc_ref"].value,
            "answer for doc-7"
        );
        assert_eq!(
            response.context_data["metadata_extractor"]["doc_ref"]["llm_request_txt"],
            "doc-7"
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let llm = Arc::new(FlakyLlm {
            failures_left: AtomicU32::new(5),
            calls: AtomicU32::new(0),
        });
        let extractor = MetadataExtractor::new(config(2), llm.clone()).unwrap();

        let err = extractor
            .do_process(DocumentData::new("doc-7"), ContextData::new())
            .await
            .unwrap_err();

        assert!(err.is_recoverable());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }
}
