use std::{collections::HashMap, sync::Arc};

use crate::{
    error::DocumentFailure,
    storage::{DocProcessingStatus, DocStatus, DocStatusStorage, StorageResult},
};

/// Writes per-document run status through a [`DocStatusStorage`]:
/// pending -> processing (current stage) -> processed | halted | failed.
#[derive(Clone)]
pub struct DocStatusService {
    doc_status: Arc<dyn DocStatusStorage>,
}

impl DocStatusService {
    pub fn new(doc_status: Arc<dyn DocStatusStorage>) -> Self {
        Self { doc_status }
    }

    pub fn storage(&self) -> &Arc<dyn DocStatusStorage> {
        &self.doc_status
    }

    async fn update<F>(&self, doc_id: &str, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut DocProcessingStatus) + Send,
    {
        let now = chrono::Utc::now().to_rfc3339();
        let mut status = self
            .doc_status
            .get_by_id(doc_id)
            .await?
            .unwrap_or_else(|| DocProcessingStatus {
                id: Some(doc_id.to_string()),
                created_at: Some(now.clone()),
                ..DocProcessingStatus::default()
            });
        apply(&mut status);
        status.updated_at = Some(now);

        let mut payload = HashMap::new();
        payload.insert(doc_id.to_string(), status);
        self.doc_status.upsert(payload).await
    }

    pub async fn mark_pending(&self, doc_id: &str, file_path: Option<&str>) -> StorageResult<()> {
        let file_path = file_path.map(str::to_string);
        self.update(doc_id, move |status| {
            status.status = DocStatus::Pending;
            if file_path.is_some() {
                status.file_path = file_path;
            }
        })
        .await
    }

    pub async fn mark_processing(
        &self,
        doc_id: &str,
        stage: &str,
        file_path: Option<&str>,
    ) -> StorageResult<()> {
        let stage = stage.to_string();
        let file_path = file_path.map(str::to_string);
        self.update(doc_id, move |status| {
            status.status = DocStatus::Processing;
            status.current_stage = Some(stage);
            if file_path.is_some() {
                status.file_path = file_path;
            }
        })
        .await
    }

    pub async fn mark_stage_completed(&self, doc_id: &str, stage: &str) -> StorageResult<()> {
        let stage = stage.to_string();
        self.update(doc_id, move |status| {
            status.current_stage = None;
            status.stages_completed.push(stage);
        })
        .await
    }

    pub async fn mark_processed(&self, doc_id: &str) -> StorageResult<()> {
        self.update(doc_id, |status| {
            status.status = DocStatus::Processed;
            status.current_stage = None;
            status.error_kind = None;
            status.error_msg = None;
        })
        .await
    }

    pub async fn mark_halted(&self, doc_id: &str, stage: &str) -> StorageResult<()> {
        let stage = stage.to_string();
        self.update(doc_id, move |status| {
            status.status = DocStatus::Halted;
            status.current_stage = Some(stage);
        })
        .await
    }

    pub async fn mark_failed(&self, doc_id: &str, failure: &DocumentFailure) -> StorageResult<()> {
        let stage = failure.stage.clone();
        let kind = failure.error.kind().to_string();
        let message = failure.error.to_string();
        self.update(doc_id, move |status| {
            status.status = DocStatus::Failed;
            status.current_stage = None;
            status.failed_stage = Some(stage);
            status.error_kind = Some(kind);
            status.error_msg = Some(message);
        })
        .await
    }

    pub async fn sync(&self) -> StorageResult<()> {
        self.doc_status.sync_if_dirty().await
    }
}
