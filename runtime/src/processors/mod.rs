//! Built-in pipeline stages.

use serde_json::{Map, Value};

use crate::{document::ContextData, pipeline::ProcessorRegistry};

pub mod content_extractor;
pub mod document_data_updater;
pub mod metadata_extractor;
pub mod request_closer;
pub mod request_creator;
pub mod segmenter;

pub use content_extractor::{ContentExtractor, ContentExtractorConfig};
pub use document_data_updater::DocumentDataUpdater;
pub use metadata_extractor::{MetadataExtractor, MetadataExtractorConfig, PromptConfig, RetryConfig};
pub use request_closer::{RequestCloser, RequestCloserConfig};
pub use request_creator::{QueueConfig, RequestCreator, RequestCreatorConfig};
pub use segmenter::{Segmenter, SegmenterConfig, TokenizerKind};

pub fn register_builtin_processors(registry: &mut ProcessorRegistry) {
    let builtins: [(&str, crate::pipeline::ProcessorFactory); 6] = [
        (request_creator::PROCESSOR_ID, RequestCreator::factory),
        (content_extractor::PROCESSOR_ID, ContentExtractor::factory),
        (segmenter::PROCESSOR_ID, Segmenter::factory),
        (metadata_extractor::PROCESSOR_ID, MetadataExtractor::factory),
        (document_data_updater::PROCESSOR_ID, DocumentDataUpdater::factory),
        (request_closer::PROCESSOR_ID, RequestCloser::factory),
    ];
    for (id, factory) in builtins {
        registry.insert(id, factory);
    }
}

/// Reads `context[processor][key]` as a string.
pub fn context_str<'a>(context: &'a ContextData, processor: &str, key: &str) -> Option<&'a str> {
    context
        .get(processor)
        .and_then(|section| section.get(key))
        .and_then(Value::as_str)
}

/// Merges `values` into `context[processor]`.
pub fn write_context(context: &mut ContextData, processor: &str, values: Map<String, Value>) {
    let section = context
        .entry(processor.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match section {
        Value::Object(existing) => existing.extend(values),
        other => *other = Value::Object(values),
    }
}
