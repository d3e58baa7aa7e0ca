use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::write_context;
use crate::{
    document::{ContextData, DocumentData, ProcessResponse},
    error::{DppError, DppResult},
    pipeline::{BuildContext, Processor},
    rules::{RuleResolver, SourceMapping, escape_token},
};

pub const PROCESSOR_ID: &str = "document_data_updater";

const DOCUMENT_DATA_KEY: &str = "document_data";
const CONTEXT_DATA_KEY: &str = "context_data";

/// Applies the source mapping to `{ document_data, context_data }`. Rules
/// are resolved by id through the shared registry.
pub struct DocumentDataUpdater {
    mapping: Arc<SourceMapping>,
    resolver: RuleResolver,
}

impl DocumentDataUpdater {
    pub fn new(mapping: Arc<SourceMapping>, resolver: RuleResolver) -> DppResult<Self> {
        mapping.validate(resolver.registry())?;
        Ok(Self { mapping, resolver })
    }

    pub fn factory(context: &BuildContext, _config: &Value) -> DppResult<Arc<dyn Processor>> {
        Ok(Arc::new(Self::new(
            context.source_mapping.clone(),
            context.resolver(),
        )?))
    }
}

/// Pointer of the first non-empty value in `before` that has no counterpart
/// in `after`. Scalars are not compared; numbers may change representation.
fn first_lost_value(before: &Value, after: &Value, pointer: &str) -> Option<String> {
    match (before, after) {
        (Value::Object(fields), Value::Object(kept)) => fields.iter().find_map(|(key, value)| {
            let child = format!("{pointer}/{}", escape_token(key));
            match kept.get(key) {
                Some(next) => first_lost_value(value, next, &child),
                None if carries_data(value) => Some(child),
                None => None,
            }
        }),
        (Value::Array(items), Value::Array(kept)) => {
            items.iter().enumerate().find_map(|(idx, value)| {
                let child = format!("{pointer}/{idx}");
                match kept.get(idx) {
                    Some(next) => first_lost_value(value, next, &child),
                    None if carries_data(value) => Some(child),
                    None => None,
                }
            })
        }
        (_, Value::Null) if carries_data(before) => Some(pointer.to_string()),
        _ => None,
    }
}

fn carries_data(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => items.iter().any(carries_data),
        Value::Object(fields) => fields.values().any(carries_data),
        _ => true,
    }
}

#[async_trait]
impl Processor for DocumentDataUpdater {
    fn processor_id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn do_process(
        &self,
        document: DocumentData,
        context: ContextData,
    ) -> DppResult<ProcessResponse> {
        if self.mapping.is_noop() {
            debug!(doc_id = ?document.document_id(), "source mapping is empty, nothing to update");
            return Ok(ProcessResponse::new(document, context));
        }

        let original_id = document.document_id().map(str::to_string);
        let mut envelope = Map::new();
        envelope.insert(DOCUMENT_DATA_KEY.into(), serde_json::to_value(&document)?);
        envelope.insert(CONTEXT_DATA_KEY.into(), Value::Object(context));
        let mut envelope = Value::Object(envelope);

        let summary = self.resolver.apply(&mut envelope, &self.mapping)?;

        let Value::Object(mut envelope) = envelope else {
            return Err(DppError::validation("/", "envelope is no longer an object"));
        };
        let document_value = envelope.remove(DOCUMENT_DATA_KEY).unwrap_or(Value::Null);
        let updated: DocumentData = serde_json::from_value(document_value.clone())
            .map_err(|err| DppError::validation("/document_data", err.to_string()))?;
        if let Some(lost) = first_lost_value(
            &document_value,
            &serde_json::to_value(&updated)?,
            &format!("/{DOCUMENT_DATA_KEY}"),
        ) {
            return Err(DppError::validation(
                lost,
                "value has no place in document data and would be dropped",
            ));
        }
        let mut context = match envelope.remove(CONTEXT_DATA_KEY) {
            Some(Value::Object(context)) => context,
            _ => {
                return Err(DppError::validation(
                    "/context_data",
                    "context data must stay an object",
                ));
            }
        };

        if updated.document_id() != original_id.as_deref() {
            return Err(DppError::validation(
                "/document_data/document_id",
                "document id cannot be changed by a mapping",
            ));
        }
        updated.validate()?;

        let mut values = Map::new();
        values.insert("entries_matched".into(), Value::from(summary.entries_matched));
        values.insert(
            "fragments_updated".into(),
            Value::from(summary.fragments_updated),
        );
        write_context(&mut context, PROCESSOR_ID, values);

        info!(
            doc_id = ?updated.document_id(),
            entries = summary.entries_matched,
            fragments = summary.fragments_updated,
            "document data updated"
        );
        Ok(ProcessResponse::new(updated, context))
    }
}
