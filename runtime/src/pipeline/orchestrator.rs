use std::{fmt, sync::Arc};

use tracing::{error, info, warn};

use super::{BuildContext, DocStatusService, Processor, ProcessorRegistry};
use crate::{
    config::PipelineConfig,
    document::{
        ContextData, DocumentData, FlowControl, MessageCode, MessageItem, ProcessResponse,
        StageStatus, WorkItem,
    },
    error::{DocumentFailure, DppError, DppResult},
    storage::StorageResult,
};

pub struct PipelineStage {
    pub name: String,
    /// Tolerate recoverable (provider) errors: keep the pre-stage document
    /// and move on with a warning.
    pub continue_on_error: bool,
    pub processor: Arc<dyn Processor>,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        Self {
            name: name.into(),
            continue_on_error: false,
            processor,
        }
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    /// Ran every stage, or was closed by the request closer.
    Processed,
    /// Stopped early on a processor's request.
    Halted,
    /// Left the run without an id or with a tracked message.
    Dropped,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Processed => "processed",
            Self::Halted => "halted",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: Option<String>,
    pub status: DocumentStatus,
    pub stages_run: Vec<String>,
    pub document_data: DocumentData,
    pub context_data: ContextData,
    pub messages: Vec<MessageItem>,
    pub failure: Option<DocumentFailure>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<DocumentOutcome>,
    /// Stage that asked for the whole run to stop, if any.
    pub halted_by: Option<String>,
}

impl RunReport {
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentFailure> {
        self.outcomes.iter().filter_map(|o| o.failure.as_ref())
    }

    pub fn outcome(&self, document_id: &str) -> Option<&DocumentOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.document_id.as_deref() == Some(document_id))
    }
}

#[derive(Clone, Default)]
struct Tracked {
    item: WorkItem,
    messages: Vec<MessageItem>,
    stages_run: Vec<String>,
}

impl Tracked {
    fn new(item: WorkItem) -> Self {
        Self {
            item,
            ..Self::default()
        }
    }

    fn id(&self) -> Option<String> {
        self.item.document_data.document_id().map(str::to_string)
    }

    fn finish(self, status: DocumentStatus, failure: Option<DocumentFailure>) -> DocumentOutcome {
        DocumentOutcome {
            document_id: self.id(),
            status,
            stages_run: self.stages_run,
            document_data: self.item.document_data,
            context_data: self.item.context_data,
            messages: self.messages,
            failure,
        }
    }
}

enum StatusUpdate<'a> {
    Processing {
        stage: &'a str,
        file_path: Option<&'a str>,
    },
    StageCompleted(&'a str),
    Processed,
    Halted(&'a str),
    Failed(&'a DocumentFailure),
}

/// Runs documents through an ordered list of stages. Every live document
/// passes stage N before any enters stage N+1; within a stage, documents run
/// concurrently with at most `workers` in flight.
pub struct Pipeline {
    stages: Vec<PipelineStage>,
    workers: usize,
    status: Option<DocStatusService>,
}

impl Pipeline {
    pub fn new(stages: Vec<PipelineStage>, workers: usize) -> Self {
        Self {
            stages,
            workers: workers.max(1),
            status: None,
        }
    }

    /// Resolves every processor id and validates the source mapping before
    /// any document is touched.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &ProcessorRegistry,
        context: &BuildContext,
    ) -> DppResult<Self> {
        config.validate()?;
        if let Some(unknown) = config
            .processor_list
            .iter()
            .find(|entry| !registry.contains(&entry.processor))
        {
            return Err(DppError::config(format!(
                "stage `{}` uses unregistered processor `{}`",
                unknown.name, unknown.processor
            )));
        }
        context.source_mapping.validate(&context.rules)?;

        let mut stages = Vec::new();
        for entry in config.processor_list.iter().filter(|entry| entry.enabled) {
            let processor = registry
                .build(&entry.processor, context, &entry.config)
                .map_err(|err| match err {
                    DppError::Configuration(msg) => {
                        DppError::config(format!("stage `{}`: {msg}", entry.name))
                    }
                    other => other,
                })?;
            stages.push(
                PipelineStage::new(entry.name.clone(), processor)
                    .continue_on_error(entry.continue_on_error),
            );
        }

        if stages.is_empty() {
            return Err(DppError::config("pipeline has no enabled processors"));
        }
        info!(
            stages = stages.len(),
            workers = config.workers,
            "pipeline built"
        );
        Ok(Self::new(stages, config.workers))
    }

    pub fn with_status_service(mut self, status: DocStatusService) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    /// Starts from a single empty work item, which the request creator fans
    /// out into one document per input file.
    pub async fn run_once(&self) -> RunReport {
        self.run(vec![WorkItem::default()]).await
    }

    pub async fn run(&self, seed: Vec<WorkItem>) -> RunReport {
        let mut live: Vec<Tracked> = seed.into_iter().map(Tracked::new).collect();
        let mut report = RunReport::default();

        for stage in &self.stages {
            if live.is_empty() || report.halted_by.is_some() {
                break;
            }
            info!(stage = %stage.name, documents = live.len(), "running stage");

            for tracked in &live {
                let doc = &tracked.item.document_data;
                self.record_status(
                    doc.document_id(),
                    StatusUpdate::Processing {
                        stage: &stage.name,
                        file_path: doc.filepath(),
                    },
                )
                .await;
            }

            let inputs: Vec<WorkItem> = live.iter().map(|t| t.item.clone()).collect();
            let results = stage.processor.do_process_batch(inputs, self.workers).await;

            let input_count = live.len();
            let result_count = results.len();
            // A lone input may fan out into many documents (request creation).
            let single_parent = input_count == 1 && result_count != 1;
            let mut previous: Vec<Option<Tracked>> =
                std::mem::take(&mut live).into_iter().map(Some).collect();

            for (idx, result) in results.into_iter().enumerate() {
                let parent = if single_parent {
                    previous[0].clone()
                } else {
                    previous.get_mut(idx).and_then(Option::take)
                };
                let mut tracked = parent.unwrap_or_default();
                let original_id = tracked.id();
                let result = result.and_then(|response| keep_document_id(original_id, response));

                let response = match result {
                    Ok(response) => response,
                    Err(error) if stage.continue_on_error && error.is_recoverable() => {
                        warn!(
                            stage = %stage.name,
                            doc_id = ?tracked.id(),
                            error = %error,
                            "stage failed, continuing with previous document data"
                        );
                        tracked.item.document_data.record_stage(
                            &stage.name,
                            StageStatus::Skipped,
                            Some(error.to_string()),
                        );
                        tracked.messages.push(stamp(
                            MessageItem::warning(format!("{error}")),
                            &stage.name,
                        ));
                        tracked.stages_run.push(stage.name.clone());
                        live.push(tracked);
                        continue;
                    }
                    Err(error) => {
                        self.fail_document(&mut report, tracked, &stage.name, error)
                            .await;
                        continue;
                    }
                };

                let control = response.control;
                let mut document = response.document_data;
                let stage_status = match control {
                    FlowControl::Continue => StageStatus::Completed,
                    FlowControl::SkipRemaining | FlowControl::HaltPipeline => StageStatus::Halted,
                };
                document.record_stage(&stage.name, stage_status, None);

                let messages: Vec<MessageItem> = response
                    .message_data
                    .into_iter()
                    .map(|message| stamp(message, &stage.name))
                    .collect();
                let has_tracked = messages.iter().any(MessageItem::is_tracked);
                tracked.messages.extend(messages);
                tracked.stages_run.push(stage.name.clone());
                tracked.item = WorkItem::new(document, response.context_data);

                let Some(doc_id) = tracked.id() else {
                    info!(stage = %stage.name, "document has no id, dropping it");
                    tracked.messages.push(stamp(
                        MessageItem::new(MessageCode::NoRecordsFound, "no document to process"),
                        &stage.name,
                    ));
                    report
                        .outcomes
                        .push(tracked.finish(DocumentStatus::Dropped, None));
                    continue;
                };

                self.record_status(Some(&doc_id), StatusUpdate::StageCompleted(&stage.name))
                    .await;

                if has_tracked {
                    warn!(stage = %stage.name, doc_id = %doc_id, "tracked message raised, dropping document");
                    self.record_status(Some(&doc_id), StatusUpdate::Halted(&stage.name))
                        .await;
                    report
                        .outcomes
                        .push(tracked.finish(DocumentStatus::Dropped, None));
                    continue;
                }

                match control {
                    FlowControl::SkipRemaining => {
                        info!(stage = %stage.name, doc_id = %doc_id, "remaining stages skipped");
                        self.record_status(Some(&doc_id), StatusUpdate::Halted(&stage.name))
                            .await;
                        report
                            .outcomes
                            .push(tracked.finish(DocumentStatus::Halted, None));
                    }
                    FlowControl::HaltPipeline => {
                        warn!(stage = %stage.name, doc_id = %doc_id, "pipeline halt requested");
                        report.halted_by.get_or_insert_with(|| stage.name.clone());
                        live.push(tracked);
                    }
                    FlowControl::Continue if tracked.item.document_data.is_closed() => {
                        self.record_status(Some(&doc_id), StatusUpdate::Processed).await;
                        report
                            .outcomes
                            .push(tracked.finish(DocumentStatus::Processed, None));
                    }
                    FlowControl::Continue => live.push(tracked),
                }
            }

            let unmatched: Vec<Tracked> = if single_parent && result_count > 0 {
                Vec::new()
            } else {
                previous.into_iter().flatten().collect()
            };
            for tracked in unmatched {
                let error = DppError::config(format!(
                    "stage `{}` returned {result_count} results for {input_count} documents",
                    stage.name
                ));
                self.fail_document(&mut report, tracked, &stage.name, error)
                    .await;
            }
        }

        let final_status = match report.halted_by.as_deref() {
            Some(_) => DocumentStatus::Halted,
            None => DocumentStatus::Processed,
        };
        for tracked in live {
            let doc_id = tracked.id();
            let update = match report.halted_by.as_deref() {
                Some(stage) => StatusUpdate::Halted(stage),
                None => StatusUpdate::Processed,
            };
            self.record_status(doc_id.as_deref(), update).await;
            report.outcomes.push(tracked.finish(final_status, None));
        }

        if let Some(status) = self.status.as_ref() {
            if let Err(err) = status.sync().await {
                warn!(error = %err, "failed to persist document status");
            }
        }

        info!(
            processed = report.count(DocumentStatus::Processed),
            halted = report.count(DocumentStatus::Halted),
            dropped = report.count(DocumentStatus::Dropped),
            failed = report.count(DocumentStatus::Failed),
            "pipeline run finished"
        );
        report
    }

    async fn fail_document(
        &self,
        report: &mut RunReport,
        mut tracked: Tracked,
        stage: &str,
        error: DppError,
    ) {
        error!(
            stage = %stage,
            doc_id = ?tracked.id(),
            kind = error.kind(),
            error = %error,
            "stage failed"
        );
        tracked
            .item
            .document_data
            .record_stage(stage, StageStatus::Failed, Some(error.to_string()));
        tracked.stages_run.push(stage.to_string());
        let failure = DocumentFailure {
            document_id: tracked.id(),
            stage: stage.to_string(),
            error,
        };
        self.record_status(failure.document_id.as_deref(), StatusUpdate::Failed(&failure))
            .await;
        report
            .outcomes
            .push(tracked.finish(DocumentStatus::Failed, Some(failure)));
    }

    async fn record_status(&self, doc_id: Option<&str>, update: StatusUpdate<'_>) {
        let (Some(status), Some(doc_id)) = (self.status.as_ref(), doc_id) else {
            return;
        };
        let result: StorageResult<()> = match update {
            StatusUpdate::Processing { stage, file_path } => {
                status.mark_processing(doc_id, stage, file_path).await
            }
            StatusUpdate::StageCompleted(stage) => status.mark_stage_completed(doc_id, stage).await,
            StatusUpdate::Processed => status.mark_processed(doc_id).await,
            StatusUpdate::Halted(stage) => status.mark_halted(doc_id, stage).await,
            StatusUpdate::Failed(failure) => status.mark_failed(doc_id, failure).await,
        };
        if let Err(err) = result {
            warn!(doc_id = %doc_id, error = %err, "failed to record document status");
        }
    }
}

/// A document keeps the id it was created with for the whole run.
fn keep_document_id(
    original: Option<String>,
    response: ProcessResponse,
) -> DppResult<ProcessResponse> {
    match original {
        Some(id) if response.document_data.document_id() != Some(id.as_str()) => {
            Err(DppError::validation(
                "/document_data/document_id",
                format!(
                    "document id `{id}` was changed to {:?}",
                    response.document_data.document_id()
                ),
            ))
        }
        _ => Ok(response),
    }
}

fn stamp(mut message: MessageItem, stage: &str) -> MessageItem {
    if message.processor_name.is_none() {
        message.processor_name = Some(stage.to_string());
    }
    message
}
