use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::write_context;
use crate::{
    config::FileSystemReaderConfigData,
    document::{ContextData, DocumentData, MessageItem, ProcessResponse, StandardData, WorkItem},
    error::{DppError, DppResult},
    pipeline::{BuildContext, Processor, parse_processor_config},
    storage::FileRepository,
    text::compute_mdhash_id,
};

pub const PROCESSOR_ID: &str = "request_creator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCreatorConfig {
    pub from_data_file: FileSystemReaderConfigData,
    pub work_root_path: PathBuf,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Lock files that keep concurrent runs from picking the same input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub queue_root_path: Option<PathBuf>,
}

impl RequestCreatorConfig {
    pub fn validate(&self) -> DppResult<()> {
        self.from_data_file.validate()?;
        if self.work_root_path.as_os_str().is_empty() {
            return Err(DppError::config("work_root_path must not be empty"));
        }
        if self.queue.enabled && self.queue.queue_root_path.is_none() {
            return Err(DppError::config(
                "queue.queue_root_path is required when the queue is enabled",
            ));
        }
        Ok(())
    }
}

enum QueueLock {
    Disabled,
    Acquired(PathBuf),
    /// Another run already holds the lock.
    Held,
}

/// Turns input files into documents: one fresh id and one work folder per
/// file, `D-<id>/<filename>` plus a `<filename>_files/` scratch folder.
pub struct RequestCreator {
    config: RequestCreatorConfig,
    file_repo: Arc<dyn FileRepository>,
}

impl RequestCreator {
    pub fn new(config: RequestCreatorConfig, file_repo: Arc<dyn FileRepository>) -> DppResult<Self> {
        config.validate()?;
        Ok(Self { config, file_repo })
    }

    pub fn factory(context: &BuildContext, config: &Value) -> DppResult<Arc<dyn Processor>> {
        let config = parse_processor_config(PROCESSOR_ID, config)?;
        Ok(Arc::new(Self::new(config, context.file_repo.clone())?))
    }

    async fn discover(&self) -> DppResult<Vec<PathBuf>> {
        let reader = &self.config.from_data_file;
        let files = self
            .file_repo
            .list_files(&reader.read_path)
            .await
            .map_err(DppError::Storage)?;
        Ok(files
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| reader.accepts(name))
            })
            .collect())
    }

    async fn try_lock(&self, input: &Path) -> DppResult<QueueLock> {
        let queue = &self.config.queue;
        let Some(root) = queue.queue_root_path.as_ref().filter(|_| queue.enabled) else {
            return Ok(QueueLock::Disabled);
        };
        let input_str = input.to_string_lossy();
        let lock_path = root.join(format!("{}.lock", compute_mdhash_id(&input_str, "")));
        let acquired = self
            .file_repo
            .create_new(&lock_path, input_str.as_bytes())
            .await
            .map_err(DppError::Storage)?;
        Ok(if acquired {
            QueueLock::Acquired(lock_path)
        } else {
            QueueLock::Held
        })
    }

    async fn claim_inputs(&self, limit: usize) -> DppResult<Vec<(PathBuf, Option<PathBuf>)>> {
        let mut claimed = Vec::new();
        for input in self.discover().await? {
            if claimed.len() >= limit {
                break;
            }
            match self.try_lock(&input).await? {
                QueueLock::Disabled => claimed.push((input, None)),
                QueueLock::Acquired(lock) => claimed.push((input, Some(lock))),
                QueueLock::Held => {
                    debug!(file = %input.display(), "input already queued, skipping")
                }
            }
        }
        Ok(claimed)
    }

    async fn create_request(
        &self,
        input: &Path,
        lock_path: Option<&Path>,
        mut context: ContextData,
    ) -> DppResult<ProcessResponse> {
        let document_id = Uuid::new_v4().to_string();
        let file_name = input
            .file_name()
            .ok_or_else(|| DppError::validation("/read_path", "input has no file name"))?;

        let work_dir = self.config.work_root_path.join(format!("D-{document_id}"));
        let work_file = work_dir.join(file_name);
        let scratch_dir = work_dir.join(format!("{}_files", file_name.to_string_lossy()));

        self.file_repo
            .create_dir_all(&scratch_dir)
            .await
            .map_err(DppError::Storage)?;
        self.file_repo
            .copy(input, &work_file)
            .await
            .map_err(DppError::Storage)?;

        let metadata = tokio::fs::metadata(input).await.ok();
        let mut document = DocumentData::new(document_id.clone());
        document.metadata.standard_data = Some(StandardData::from_path(input, metadata.as_ref()));

        let mut values = Map::new();
        values.insert(
            "input_file_path".into(),
            Value::String(input.to_string_lossy().into_owned()),
        );
        values.insert(
            "work_file_path".into(),
            Value::String(work_file.to_string_lossy().into_owned()),
        );
        if let Some(lock) = lock_path {
            values.insert(
                "queue_lock_path".into(),
                Value::String(lock.to_string_lossy().into_owned()),
            );
        }
        write_context(&mut context, PROCESSOR_ID, values);

        info!(doc_id = %document_id, file = %input.display(), "request created");
        Ok(ProcessResponse::new(document, context))
    }

    /// Frees a claimed input so the next run can pick it up again.
    async fn release_lock(&self, lock: &Path, cause: &DppError) {
        match self.file_repo.remove_file(lock).await {
            Ok(()) => debug!(
                lock = %lock.display(),
                error = %cause,
                "request failed, queue lock released"
            ),
            Err(err) => warn!(
                lock = %lock.display(),
                error = %err,
                "failed to release queue lock"
            ),
        }
    }

    async fn create_requests(
        &self,
        context: ContextData,
        limit: usize,
        workers: usize,
    ) -> Vec<DppResult<ProcessResponse>> {
        let claimed = match self.claim_inputs(limit).await {
            Ok(claimed) => claimed,
            Err(err) => return vec![Err(err)],
        };
        if claimed.is_empty() {
            info!(
                read_path = %self.config.from_data_file.read_path.display(),
                "no input files found"
            );
            let response = ProcessResponse::new(DocumentData::default(), context)
                .with_message(MessageItem::info("no input files found"));
            return vec![Ok(response)];
        }

        stream::iter(claimed)
            .map(|(input, lock)| {
                let context = context.clone();
                async move {
                    let result = self.create_request(&input, lock.as_deref(), context).await;
                    if let (Err(err), Some(lock)) = (&result, lock.as_deref()) {
                        self.release_lock(lock, err).await;
                    }
                    result
                }
            })
            .buffered(workers.max(1))
            .collect()
            .await
    }
}

#[async_trait]
impl Processor for RequestCreator {
    fn processor_id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn do_process(
        &self,
        _document: DocumentData,
        context: ContextData,
    ) -> DppResult<ProcessResponse> {
        self.create_requests(context, 1, 1)
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| Err(DppError::config("request creator produced no response")))
    }

    /// Ignores the incoming documents and fans out one response per claimed
    /// input file, up to `batch_size`.
    async fn do_process_batch(
        &self,
        batch: Vec<WorkItem>,
        workers: usize,
    ) -> Vec<DppResult<ProcessResponse>> {
        let context = batch
            .into_iter()
            .next()
            .map(|item| item.context_data)
            .unwrap_or_default();
        self.create_requests(context, self.config.from_data_file.batch_size, workers)
            .await
    }
}
