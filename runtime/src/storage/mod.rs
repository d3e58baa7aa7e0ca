use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod files;
pub mod io;
pub mod json_doc_status;

pub use files::{FileRepository, FsFileRepository};
pub use io::*;
pub use json_doc_status::{JsonDocStatusConfig, JsonDocStatusStorage};

pub type StorageResult<T> = Result<T>;

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    /// Finished early on a processor's request; not an error.
    Halted,
    Failed,
    All,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocProcessingStatus {
    #[serde(default)]
    pub id: Option<String>,
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

#[async_trait]
pub trait DocStatusStorage: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn upsert(&self, records: HashMap<String, DocProcessingStatus>) -> StorageResult<()>;

    async fn delete(&self, ids: &[String]) -> StorageResult<()>;
    async fn drop_all(&self) -> StorageResult<()>;

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<DocProcessingStatus>>;

    async fn get_doc_by_file_path(
        &self,
        file_path: &str,
    ) -> StorageResult<Option<DocProcessingStatus>>;

    /// Keys from `keys` that are not stored yet.
    async fn filter_keys(&self, keys: &HashSet<String>) -> StorageResult<HashSet<String>>;

    async fn status_counts(&self) -> StorageResult<HashMap<DocStatus, usize>>;
    async fn status_counts_with_total(&self) -> StorageResult<HashMap<DocStatus, usize>>;

    async fn docs_by_status(
        &self,
        status: DocStatus,
    ) -> StorageResult<HashMap<String, DocProcessingStatus>>;

    async fn sync_if_dirty(&self) -> StorageResult<()>;
}
