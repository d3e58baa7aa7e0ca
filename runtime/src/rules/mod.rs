//! Named, pure transformations applied to fragments of document data.

use std::sync::Arc;

use serde_json::Value;

use crate::error::RuleError;

pub mod builtin;
pub mod json_path;
pub mod mapping;
pub mod registry;
pub mod resolver;

pub use builtin::{BboxCornersToOriginSize, BboxOriginSizeToCorners, TrimWhitespace};
pub use json_path::JsonPath;
pub(crate) use json_path::escape_token;
pub use mapping::{MappingEntry, SourceMapping};
pub use registry::{RuleConstructor, RuleRegistry};
pub use resolver::{ResolutionSummary, RuleResolver};

/// A stateless rule. The same input must always produce the same output,
/// and implementations must not touch process-wide state.
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;

    fn do_process(&self, input: &Value) -> Result<Value, RuleError>;
}

pub type SharedRule = Arc<dyn Rule>;
