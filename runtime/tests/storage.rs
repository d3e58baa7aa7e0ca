use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use dpp_runtime::{
    document::DocumentData,
    error::{DocumentFailure, DppError},
    pipeline::DocStatusService,
    storage::{
        DocProcessingStatus, DocStatus, DocStatusStorage, FileRepository, FsFileRepository,
        JsonDocStatusConfig, JsonDocStatusStorage, files::unique_target, write_bytes_atomic,
    },
};
use tempfile::TempDir;

fn temp_working_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn status(id: &str, status: DocStatus, stages: &[&str]) -> DocProcessingStatus {
    DocProcessingStatus {
        id: Some(id.to_string()),
        status,
        file_path: Some(format!("/in/{id}.png")),
        stages_completed: stages.iter().map(|s| s.to_string()).collect(),
        created_at: Some("2025-02-10T12:00:00Z".into()),
        updated_at: Some("2025-02-10T12:05:00Z".into()),
        ..DocProcessingStatus::default()
    }
}

#[tokio::test]
async fn json_doc_status_roundtrip_counts_and_reload() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let config = JsonDocStatusConfig {
        working_dir: dir.path().into(),
        namespace: "doc_status".to_string(),
        workspace: Some("workspace".to_string()),
    };

    let storage = JsonDocStatusStorage::new(config.clone());
    storage.initialize().await?;

    let docs: HashMap<_, _> = vec![
        ("doc-1".to_string(), status("doc-1", DocStatus::Processed, &["a", "b"])),
        ("doc-2".to_string(), status("doc-2", DocStatus::Failed, &["a"])),
        ("doc-3".to_string(), status("doc-3", DocStatus::Processed, &["a", "b"])),
    ]
    .into_iter()
    .collect();

    storage.upsert(docs).await?;
    storage.sync_if_dirty().await?;
    assert!(
        dir.path()
            .join("workspace")
            .join("doc_status_doc_status.json")
            .is_file()
    );

    let counts = storage.status_counts().await?;
    assert_eq!(counts.get(&DocStatus::Processed), Some(&2));

    let counts_with_total = storage.status_counts_with_total().await?;
    assert_eq!(counts_with_total.get(&DocStatus::All), Some(&3));

    let by_status = storage.docs_by_status(DocStatus::Processed).await?;
    assert_eq!(by_status.len(), 2);

    let by_path = storage.get_doc_by_file_path("/in/doc-2.png").await?;
    assert_eq!(by_path.map(|s| s.status), Some(DocStatus::Failed));

    let mut keys = HashSet::new();
    keys.insert("doc-1".to_string());
    keys.insert("doc-9".to_string());
    let unseen = storage.filter_keys(&keys).await?;
    assert_eq!(unseen.len(), 1);
    assert!(unseen.contains("doc-9"));

    storage.delete(&["doc-2".to_string()]).await?;
    storage.sync_if_dirty().await?;
    assert!(storage.get_by_id("doc-2").await?.is_none());

    let reopened = JsonDocStatusStorage::new(config);
    reopened.initialize().await?;
    let doc_1 = reopened.get_by_id("doc-1").await?.expect("doc-1 persisted");
    assert_eq!(doc_1.stages_completed, vec!["a".to_string(), "b".to_string()]);

    reopened.drop_all().await?;
    assert!(reopened.status_counts().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn status_service_walks_a_document_through_its_lifecycle() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let storage = Arc::new(JsonDocStatusStorage::new(JsonDocStatusConfig {
        working_dir: dir.path().into(),
        namespace: "lifecycle".to_string(),
        workspace: None,
    }));
    storage.initialize().await?;
    let service = DocStatusService::new(storage.clone());

    service.mark_pending("doc-1", Some("/in/a.png")).await?;
    let created_at = storage.get_by_id("doc-1").await?.and_then(|s| s.created_at);
    assert!(created_at.is_some());

    service.mark_processing("doc-1", "ocr", None).await?;
    let current = storage.get_by_id("doc-1").await?.expect("status exists");
    assert_eq!(current.status, DocStatus::Processing);
    assert_eq!(current.current_stage.as_deref(), Some("ocr"));
    assert_eq!(current.file_path.as_deref(), Some("/in/a.png"));

    service.mark_stage_completed("doc-1", "ocr").await?;
    let failure = DocumentFailure {
        document_id: Some("doc-1".into()),
        stage: "update".into(),
        error: DppError::validation("/document_data/raw_data", "bad box"),
    };
    service.mark_failed("doc-1", &failure).await?;
    service.sync().await?;

    let reopened = JsonDocStatusStorage::new(JsonDocStatusConfig {
        working_dir: dir.path().into(),
        namespace: "lifecycle".to_string(),
        workspace: None,
    });
    reopened.initialize().await?;
    let stored = reopened.get_by_id("doc-1").await?.expect("status persisted");
    assert_eq!(stored.status, DocStatus::Failed);
    assert_eq!(stored.stages_completed, vec!["ocr".to_string()]);
    assert_eq!(stored.failed_stage.as_deref(), Some("update"));
    assert_eq!(stored.error_kind.as_deref(), Some("validation"));
    assert_eq!(stored.created_at, created_at);

    Ok(())
}

#[tokio::test]
async fn unique_target_never_overwrites() -> anyhow::Result<()> {
    let dir = temp_working_dir();
    let repo = FsFileRepository;
    let existing = dir.path().join("scan.png");
    write_bytes_atomic(&existing, b"first").await?;

    let target = unique_target(&repo, dir.path(), &existing)?;
    assert_eq!(target, dir.path().join("scan_1.png"));

    assert!(repo.create_new(&target, b"second").await?);
    assert!(!repo.create_new(&target, b"third").await?);
    assert_eq!(repo.read(&target).await?, b"second".to_vec());

    let document = DocumentData::new("doc-1");
    write_bytes_atomic(&dir.path().join("doc.json"), document.to_json_pretty()?.as_bytes())
        .await?;
    let listed = repo.list_files(dir.path()).await?;
    assert_eq!(listed.len(), 3);

    Ok(())
}
