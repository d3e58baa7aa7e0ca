use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{context_str, request_creator, write_context};
use crate::{
    document::{ContextData, DocumentData, MessageItem, ProcessResponse},
    error::{DppError, DppResult},
    pipeline::{BuildContext, Processor, parse_processor_config},
    storage::{FileRepository, files::unique_target, write_bytes_atomic},
};

pub const PROCESSOR_ID: &str = "request_closer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCloserConfig {
    pub output_root_path: PathBuf,
    /// Move the original input into the output folder; copy it when false.
    #[serde(default = "move_by_default")]
    pub move_input: bool,
    #[serde(default = "default_document_file_name")]
    pub document_file_name: String,
}

fn move_by_default() -> bool {
    true
}

fn default_document_file_name() -> String {
    "document_data.json".into()
}

/// Persists the finished document under `output_root_path/D-<id>/`, files
/// the original input next to it and releases the queue lock.
pub struct RequestCloser {
    config: RequestCloserConfig,
    file_repo: Arc<dyn FileRepository>,
}

impl RequestCloser {
    pub fn new(config: RequestCloserConfig, file_repo: Arc<dyn FileRepository>) -> DppResult<Self> {
        if config.output_root_path.as_os_str().is_empty() {
            return Err(DppError::config("output_root_path must not be empty"));
        }
        if config.document_file_name.trim().is_empty() {
            return Err(DppError::config("document_file_name must not be empty"));
        }
        Ok(Self { config, file_repo })
    }

    pub fn factory(context: &BuildContext, config: &Value) -> DppResult<Arc<dyn Processor>> {
        let config = parse_processor_config(PROCESSOR_ID, config)?;
        Ok(Arc::new(Self::new(config, context.file_repo.clone())?))
    }

    async fn file_input(&self, input: &Path, output_dir: &Path) -> DppResult<PathBuf> {
        let target = unique_target(self.file_repo.as_ref(), output_dir, input)
            .map_err(DppError::Storage)?;
        let result = if self.config.move_input {
            self.file_repo.rename(input, &target).await
        } else {
            self.file_repo.copy(input, &target).await
        };
        result.map_err(DppError::Storage)?;
        Ok(target)
    }
}

#[async_trait]
impl Processor for RequestCloser {
    fn processor_id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn do_process(
        &self,
        mut document: DocumentData,
        mut context: ContextData,
    ) -> DppResult<ProcessResponse> {
        let document_id = document
            .document_id()
            .ok_or_else(|| DppError::validation("/document_data/document_id", "missing"))?
            .to_string();
        let output_dir = self.config.output_root_path.join(format!("D-{document_id}"));
        self.file_repo
            .create_dir_all(&output_dir)
            .await
            .map_err(DppError::Storage)?;

        let mut messages = Vec::new();
        let mut values = Map::new();
        let input = context_str(&context, request_creator::PROCESSOR_ID, "input_file_path")
            .or_else(|| document.filepath())
            .map(PathBuf::from);
        match input {
            Some(input) if self.file_repo.exists(&input) => {
                let target = self.file_input(&input, &output_dir).await?;
                values.insert(
                    "output_file_path".into(),
                    Value::String(target.to_string_lossy().into_owned()),
                );
            }
            Some(input) => {
                warn!(doc_id = %document_id, file = %input.display(), "original input is gone");
                messages.push(MessageItem::warning(format!(
                    "original input {} not found",
                    input.display()
                )));
            }
            None => {}
        }

        document.close();
        let document_file = output_dir.join(&self.config.document_file_name);
        write_bytes_atomic(&document_file, document.to_json_pretty()?.as_bytes())
            .await
            .map_err(DppError::Storage)?;
        values.insert(
            "document_data_file_path".into(),
            Value::String(document_file.to_string_lossy().into_owned()),
        );

        if let Some(lock) = context_str(&context, request_creator::PROCESSOR_ID, "queue_lock_path") {
            self.file_repo
                .remove_file(Path::new(lock))
                .await
                .map_err(DppError::Storage)?;
        }

        write_context(&mut context, PROCESSOR_ID, values);
        info!(doc_id = %document_id, output = %output_dir.display(), "request closed");

        let mut response = ProcessResponse::new(document, context);
        for message in messages {
            response = response.with_message(message);
        }
        Ok(response)
    }
}
