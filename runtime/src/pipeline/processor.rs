use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::{
    document::{ContextData, DocumentData, ProcessResponse, WorkItem},
    error::DppResult,
};

/// One pipeline stage. Implementations receive their typed configuration at
/// construction and must not keep per-document state between calls.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Registry identifier of the implementation, e.g. `request_creator`.
    fn processor_id(&self) -> &str;

    async fn do_process(
        &self,
        document: DocumentData,
        context: ContextData,
    ) -> DppResult<ProcessResponse>;

    /// Runs [`Processor::do_process`] over `batch` with at most `workers`
    /// calls in flight. Results come back in input order.
    async fn do_process_batch(
        &self,
        batch: Vec<WorkItem>,
        workers: usize,
    ) -> Vec<DppResult<ProcessResponse>> {
        stream::iter(batch)
            .map(|item| self.do_process(item.document_data, item.context_data))
            .buffered(workers.max(1))
            .collect()
            .await
    }
}
