use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::io::{ensure_parent_dir, load_or_default, write_json_file};
use super::{DocProcessingStatus, DocStatus, DocStatusStorage};

#[derive(Clone, Debug)]
pub struct JsonDocStatusConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
    pub workspace: Option<String>,
}

/// Document run status kept in memory and flushed to
/// `<working_dir>[/<workspace>]/doc_status_<namespace>.json`.
pub struct JsonDocStatusStorage {
    final_namespace: String,
    file_path: PathBuf,
    data: Arc<RwLock<HashMap<String, DocRecord>>>,
    dirty: AtomicBool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DocRecord {
    pub status: DocStatus,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub stages_completed: Vec<String>,
    #[serde(default)]
    pub failed_stage: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl DocRecord {
    fn from_status(status: DocProcessingStatus) -> Self {
        Self {
            status: status.status,
            file_path: status.file_path,
            current_stage: status.current_stage,
            stages_completed: status.stages_completed,
            failed_stage: status.failed_stage,
            error_kind: status.error_kind,
            error_msg: status.error_msg,
            created_at: status.created_at,
            updated_at: status.updated_at,
        }
    }

    fn to_status(&self, id: &str) -> DocProcessingStatus {
        DocProcessingStatus {
            id: Some(id.to_string()),
            status: self.status,
            file_path: self.file_path.clone(),
            current_stage: self.current_stage.clone(),
            stages_completed: self.stages_completed.clone(),
            failed_stage: self.failed_stage.clone(),
            error_kind: self.error_kind.clone(),
            error_msg: self.error_msg.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

impl JsonDocStatusStorage {
    pub fn new(config: JsonDocStatusConfig) -> Self {
        let JsonDocStatusConfig {
            working_dir,
            namespace,
            workspace,
        } = config;

        let (workspace_prefix, workspace_dir) = match workspace.as_deref() {
            Some(ws) if !ws.is_empty() => (ws.to_string(), working_dir.join(ws)),
            _ => ("_".to_string(), working_dir.clone()),
        };

        let final_namespace = format!("{}_{}", workspace_prefix, namespace);
        let file_path = workspace_dir.join(format!("doc_status_{}.json", namespace));

        Self {
            final_namespace,
            file_path,
            data: Arc::new(RwLock::new(HashMap::new())),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl DocStatusStorage for JsonDocStatusStorage {
    async fn initialize(&self) -> Result<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data: HashMap<String, DocRecord> = load_or_default(&self.file_path).await?;
        *self.data.write().await = data;
        self.dirty.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        self.sync_if_dirty().await
    }

    async fn upsert(&self, records: HashMap<String, DocProcessingStatus>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut guard = self.data.write().await;
        for (id, status) in records {
            let mut record = DocRecord::from_status(status);
            if record.created_at.is_none() {
                record.created_at = guard.get(&id).and_then(|prev| prev.created_at.clone());
            }
            guard.insert(id, record);
        }

        drop(guard);
        self.mark_dirty();
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut guard = self.data.write().await;
        let mut removed_any = false;
        for id in ids {
            if guard.remove(id).is_some() {
                removed_any = true;
            }
        }

        drop(guard);
        if removed_any {
            self.mark_dirty();
        }
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        {
            let mut guard = self.data.write().await;
            if guard.is_empty() {
                return Ok(());
            }
            guard.clear();
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DocProcessingStatus>> {
        let guard = self.data.read().await;
        Ok(guard.get(id).map(|record| record.to_status(id)))
    }

    async fn get_doc_by_file_path(&self, file_path: &str) -> Result<Option<DocProcessingStatus>> {
        let guard = self.data.read().await;
        Ok(guard.iter().find_map(|(id, record)| {
            record
                .file_path
                .as_deref()
                .filter(|fp| *fp == file_path)
                .map(|_| record.to_status(id))
        }))
    }

    async fn filter_keys(&self, keys: &HashSet<String>) -> Result<HashSet<String>> {
        let guard = self.data.read().await;
        Ok(keys
            .iter()
            .filter(|key| !guard.contains_key(*key))
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<HashMap<DocStatus, usize>> {
        let guard = self.data.read().await;
        let mut counts: HashMap<DocStatus, usize> = HashMap::new();
        for record in guard.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn status_counts_with_total(&self) -> Result<HashMap<DocStatus, usize>> {
        let mut counts = self.status_counts().await?;
        let total: usize = counts.values().copied().sum();
        counts.insert(DocStatus::All, total);
        Ok(counts)
    }

    async fn docs_by_status(
        &self,
        status: DocStatus,
    ) -> Result<HashMap<String, DocProcessingStatus>> {
        let guard = self.data.read().await;
        Ok(guard
            .iter()
            .filter(|(_, record)| record.status == status)
            .map(|(id, record)| (id.clone(), record.to_status(id)))
            .collect())
    }

    async fn sync_if_dirty(&self) -> Result<()> {
        if !self.dirty.swap(false, AtomicOrdering::SeqCst) {
            return Ok(());
        }

        let snapshot = {
            let guard = self.data.read().await;
            guard.clone()
        };

        write_json_file(&self.file_path, &snapshot)
            .await
            .with_context(|| format!("failed to write doc status {}", self.final_namespace))?;
        Ok(())
    }
}
