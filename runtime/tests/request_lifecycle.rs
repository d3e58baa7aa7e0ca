use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use dpp_runtime::{
    ConfigParamData, DocumentData, Pipeline, PipelineConfig, ProcessorRegistry, RunReport,
    config::FileSystemReaderConfigData,
    document::{BBOX_FORMAT_CORNERS, BBOX_FORMAT_ORIGIN_SIZE, ContentData, MessageCode, WorkItem},
    error::DppResult,
    pipeline::{BuildContext, DocStatusService, DocumentStatus, Processor},
    processors::{QueueConfig, RequestCreator, RequestCreatorConfig},
    providers::{OcrProvider, OcrProviderKind, OcrProviderSet, OcrRequest, OcrResponse, ProviderSet},
    rules::SourceMapping,
    storage::{
        DocStatus, DocStatusStorage, FileRepository, FsFileRepository, JsonDocStatusConfig,
        JsonDocStatusStorage,
    },
    text::compute_mdhash_id,
};
use tempfile::TempDir;

/// Stands in for tesseract: one line per file, boxed as corners.
struct FixedOcr;

#[async_trait]
impl OcrProvider for FixedOcr {
    fn kind(&self) -> OcrProviderKind {
        OcrProviderKind::Tesseract
    }

    async fn extract(&self, request: &OcrRequest) -> DppResult<OcrResponse> {
        let name = request
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(OcrResponse {
            lines: vec![ContentData {
                content_type: Some("line".into()),
                content: Some(format!("Invoice total 42 from {name}")),
                content_bbox: Some(vec![10.0, 20.0, 50.0, 80.0]),
                bbox_format: Some(BBOX_FORMAT_CORNERS.into()),
                confidence_pct: Some(91),
                page: Some(1),
                ..ContentData::default()
            }],
        })
    }
}

const MAPPING: &str = r#"
mappings:
  - enabled: true
    json_path: $.document_data.raw_data.other_data[*]
    json_key: content_bbox
    rule: CUS_001
  - enabled: true
    json_path: $.document_data.raw_data.other_data[*]
    json_key: bbox_format
    replace_value: xywh
"#;

struct Workspace {
    _root: TempDir,
    input: PathBuf,
    work: PathBuf,
    output: PathBuf,
    queue: PathBuf,
    status: PathBuf,
}

impl Workspace {
    fn new() -> Result<Self> {
        let root = TempDir::new()?;
        let dir = |name: &str| -> Result<PathBuf> {
            let path = root.path().join(name);
            std::fs::create_dir_all(&path)?;
            Ok(path)
        };
        Ok(Self {
            input: dir("input")?,
            work: dir("work")?,
            output: dir("output")?,
            queue: dir("queue")?,
            status: dir("status")?,
            _root: root,
        })
    }

    fn config_yaml(&self) -> String {
        format!(
            r#"
workers: 2
processor_list:
  - name: request_creation
    processor: request_creator
    config:
      from_data_file:
        read_path: '{input}'
        include: ['.png']
      work_root_path: '{work}'
      queue:
        enabled: true
        queue_root_path: '{queue}'
  - name: ocr_extraction
    processor: content_extractor
    continue_on_error: true
  - name: segmentation
    processor: segmenter
    config:
      tokenizer: whitespace
      chunk_size: 64
      chunk_overlap: 8
  - name: normalization
    processor: document_data_updater
  - name: request_closing
    processor: request_closer
    config:
      output_root_path: '{output}'
"#,
            input = self.input.display(),
            work = self.work.display(),
            queue = self.queue.display(),
            output = self.output.display(),
        )
    }

    async fn status_store(&self) -> Result<Arc<JsonDocStatusStorage>> {
        let store = Arc::new(JsonDocStatusStorage::new(JsonDocStatusConfig {
            working_dir: self.status.clone(),
            namespace: "doc_status".into(),
            workspace: None,
        }));
        store.initialize().await?;
        Ok(store)
    }

    async fn run(&self, store: Arc<JsonDocStatusStorage>) -> Result<RunReport> {
        let config = PipelineConfig::from_yaml(&self.config_yaml())?;
        let context = BuildContext::new(ConfigParamData::default())
            .with_source_mapping(SourceMapping::from_yaml(MAPPING)?)
            .with_providers(ProviderSet {
                ocr: OcrProviderSet::new().with(Arc::new(FixedOcr)),
                llm: None,
            });
        let pipeline = Pipeline::from_config(
            &config,
            &ProcessorRegistry::with_builtin_processors(),
            &context,
        )?
        .with_status_service(DocStatusService::new(store.clone()));
        let report = pipeline.run_once().await;
        store.finalize().await?;
        Ok(report)
    }

    fn write_input(&self, name: &str) -> Result<()> {
        std::fs::write(self.input.join(name), format!("fake image {name}"))?;
        Ok(())
    }
}

/// Local disk, except that copying a file always fails.
struct CopyFails(FsFileRepository);

#[async_trait]
impl FileRepository for CopyFails {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.0.create_dir_all(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.0.rename(from, to).await
    }

    async fn copy(&self, from: &Path, _to: &Path) -> Result<()> {
        anyhow::bail!("disk full while copying {}", from.display())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.0.read(path).await
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.0.list_files(dir).await
    }

    async fn create_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        self.0.create_new(path, contents).await
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.0.remove_file(path).await
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.exists(path)
    }
}

fn files_in(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

#[tokio::test]
async fn inputs_flow_from_folder_to_closed_documents() -> Result<()> {
    let ws = Workspace::new()?;
    ws.write_input("a.png")?;
    ws.write_input("b.png")?;
    ws.write_input("notes.txt")?;
    let store = ws.status_store().await?;

    let report = ws.run(store.clone()).await?;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.count(DocumentStatus::Processed), 2);
    assert!(report.failures().next().is_none());

    for outcome in &report.outcomes {
        let doc_id = outcome.document_id.as_deref().expect("document id");
        assert!(outcome.document_data.is_closed());
        assert_eq!(outcome.stages_run.len(), 5);
        assert!(!outcome.document_data.segments().is_empty());

        let written = ws.output.join(format!("D-{doc_id}")).join("document_data.json");
        let persisted = DocumentData::from_json(&std::fs::read_to_string(&written)?)?;
        assert_eq!(persisted.document_id(), Some(doc_id));
        let line = &persisted.raw_data.other_data[0];
        assert_eq!(line.content_bbox, Some(vec![10.0, 20.0, 40.0, 60.0]));
        assert_eq!(line.bbox_format.as_deref(), Some(BBOX_FORMAT_ORIGIN_SIZE));

        let filed = files_in(&ws.output.join(format!("D-{doc_id}")))?;
        assert_eq!(filed.len(), 2, "input moved next to document data: {filed:?}");
        assert!(ws.work.join(format!("D-{doc_id}")).is_dir());

        let status = store.get_by_id(doc_id).await?.expect("status recorded");
        assert_eq!(status.status, DocStatus::Processed);
        assert_eq!(status.stages_completed.len(), 5);
    }

    assert_eq!(files_in(&ws.input)?, vec!["notes.txt"]);
    assert!(files_in(&ws.queue)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_input_folder_drops_the_seed() -> Result<()> {
    let ws = Workspace::new()?;
    let store = ws.status_store().await?;

    let report = ws.run(store).await?;

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, DocumentStatus::Dropped);
    assert!(outcome.document_id.is_none());
    assert!(outcome
        .messages
        .iter()
        .any(|m| m.code == MessageCode::NoRecordsFound));
    assert!(files_in(&ws.output)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn queued_inputs_are_left_for_the_lock_holder() -> Result<()> {
    let ws = Workspace::new()?;
    ws.write_input("a.png")?;
    ws.write_input("b.png")?;
    let held = ws.input.join("b.png");
    let lock = ws
        .queue
        .join(format!("{}.lock", compute_mdhash_id(&held.to_string_lossy(), "")));
    std::fs::write(&lock, "held by another run")?;
    let store = ws.status_store().await?;

    let report = ws.run(store).await?;

    assert_eq!(report.count(DocumentStatus::Processed), 1);
    assert_eq!(files_in(&ws.input)?, vec!["b.png"]);
    assert!(lock.exists());
    Ok(())
}

#[tokio::test]
async fn failed_request_releases_its_queue_lock() -> Result<()> {
    let ws = Workspace::new()?;
    ws.write_input("a.png")?;
    let creator = RequestCreator::new(
        RequestCreatorConfig {
            from_data_file: FileSystemReaderConfigData {
                read_path: ws.input.clone(),
                include: vec![".png".into()],
                exclude: Vec::new(),
                batch_size: 5,
            },
            work_root_path: ws.work.clone(),
            queue: QueueConfig {
                enabled: true,
                queue_root_path: Some(ws.queue.clone()),
            },
        },
        Arc::new(CopyFails(FsFileRepository)),
    )?;

    let results = creator.do_process_batch(vec![WorkItem::default()], 1).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
    assert!(files_in(&ws.queue)?.is_empty(), "lock left behind");
    assert_eq!(files_in(&ws.input)?, vec!["a.png"]);
    Ok(())
}
