//! Error taxonomy shared by every stage of the pipeline.

use thiserror::Error;

pub type DppResult<T> = Result<T, DppError>;

#[derive(Error, Debug)]
pub enum DppError {
    /// Missing or invalid processor/rule registration, malformed source mapping.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A document-data fragment failed an input contract.
    #[error("validation failed at `{field_path}`: {reason}")]
    Validation { field_path: String, reason: String },

    /// An external OCR/LLM backend failed after the owning processor gave up.
    #[error("provider `{provider}` failed: {message}")]
    Provider { provider: String, message: String },

    #[error("missing dependency `{name}`: {detail}")]
    Dependency { name: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl DppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn validation(field_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field_path: field_path.into(),
            reason: reason.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Only provider failures may be tolerated by a `continue_on_error` stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Validation { .. } => "validation",
            Self::Provider { .. } => "provider",
            Self::Dependency { .. } => "dependency",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Storage(_) => "storage",
        }
    }
}

/// Failure of a single rule's input contract. The resolver attaches the
/// field path when it turns this into [`DppError::Validation`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("expected an array, found {found}")]
    NotAnArray { found: &'static str },

    #[error("expected {expected} elements, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("element {index} is not a number")]
    NotNumeric { index: usize },

    #[error("expected a string, found {found}")]
    NotAString { found: &'static str },
}

impl RuleError {
    pub fn into_validation(self, field_path: &str) -> DppError {
        DppError::validation(field_path, self.to_string())
    }
}

/// Failure report for one document: where it stopped and why.
#[derive(Debug)]
pub struct DocumentFailure {
    pub document_id: Option<String>,
    pub stage: String,
    pub error: DppError,
}

impl std::fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "document {} failed in stage `{}`: {}",
            self.document_id.as_deref().unwrap_or("<none>"),
            self.stage,
            self.error
        )
    }
}

pub(crate) fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
