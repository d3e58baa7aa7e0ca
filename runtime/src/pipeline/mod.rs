//! Processor contract, registry and the stage-major orchestrator.

pub mod orchestrator;
pub mod processor;
pub mod registry;
pub mod status_service;

pub use orchestrator::{DocumentOutcome, DocumentStatus, Pipeline, PipelineStage, RunReport};
pub use processor::Processor;
pub use registry::{BuildContext, ProcessorFactory, ProcessorRegistry, parse_processor_config};
pub use status_service::DocStatusService;
