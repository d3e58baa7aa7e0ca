use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DocumentData, MessageItem};

/// Per-document scratch space shared between stages. Each processor writes
/// under its own top-level key.
pub type ContextData = Map<String, Value>;

/// What the orchestrator should do after a stage returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    Continue,
    /// Finish this document without running the remaining stages.
    SkipRemaining,
    /// Stop every remaining stage for every document in the run.
    HaltPipeline,
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub document_data: DocumentData,
    pub context_data: ContextData,
}

impl WorkItem {
    pub fn new(document_data: DocumentData, context_data: ContextData) -> Self {
        Self {
            document_data,
            context_data,
        }
    }
}

impl Default for WorkItem {
    fn default() -> Self {
        Self::new(DocumentData::default(), ContextData::new())
    }
}

#[derive(Debug, Clone)]
pub struct ProcessResponse {
    pub document_data: DocumentData,
    pub context_data: ContextData,
    pub message_data: Vec<MessageItem>,
    pub control: FlowControl,
}

impl ProcessResponse {
    pub fn new(document_data: DocumentData, context_data: ContextData) -> Self {
        Self {
            document_data,
            context_data,
            message_data: Vec::new(),
            control: FlowControl::Continue,
        }
    }

    pub fn with_message(mut self, message: MessageItem) -> Self {
        self.message_data.push(message);
        self
    }

    pub fn with_control(mut self, control: FlowControl) -> Self {
        self.control = control;
        self
    }
}
