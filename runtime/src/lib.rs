pub mod config;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod processors;
pub mod providers;
pub mod rules;
pub mod startup;
pub mod storage;
pub mod text;

pub use config::{ConfigParamData, PipelineConfig};
pub use document::{DocumentData, ProcessResponse};
pub use error::{DppError, DppResult};
pub use pipeline::{Pipeline, Processor, ProcessorRegistry, RunReport};
