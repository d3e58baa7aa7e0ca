use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::{MappingEntry, RuleRegistry, SourceMapping, escape_token};
use crate::error::{DppError, DppResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionSummary {
    /// Enabled entries whose path matched at least one node.
    pub entries_matched: usize,
    /// Fragments actually rewritten (renamed, replaced, or passed to a rule).
    pub fragments_updated: usize,
}

/// Applies source-mapping entries to a JSON envelope, resolving rules by id.
#[derive(Clone)]
pub struct RuleResolver {
    registry: Arc<RuleRegistry>,
}

impl RuleResolver {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn apply(&self, envelope: &mut Value, mapping: &SourceMapping) -> DppResult<ResolutionSummary> {
        let mut summary = ResolutionSummary::default();
        for entry in mapping.enabled_entries() {
            let updated = self.apply_entry(envelope, entry)?;
            if let Some(updated) = updated {
                summary.entries_matched += 1;
                summary.fragments_updated += updated;
            }
        }
        Ok(summary)
    }

    /// Returns `None` when the path matched nothing, otherwise the number of
    /// fragments rewritten.
    pub fn apply_entry(&self, envelope: &mut Value, entry: &MappingEntry) -> DppResult<Option<usize>> {
        let pointers = entry.json_path.find_pointers(envelope);
        if pointers.is_empty() {
            info!(json_path = %entry.json_path, "json_path matched nothing, skipping");
            return Ok(None);
        }

        let rule = entry
            .rule
            .as_deref()
            .map(|id| self.registry.resolve(id))
            .transpose()?;

        let mut updated = 0usize;
        for pointer in pointers {
            let Some(node) = envelope.pointer_mut(&pointer) else {
                continue;
            };

            let Some(key) = entry.json_key.as_deref() else {
                if let Some(value) = entry.replace_value.as_ref() {
                    *node = value.clone();
                    updated += 1;
                }
                if let Some(rule) = rule.as_ref() {
                    if !node.is_null() {
                        *node = rule
                            .do_process(node)
                            .map_err(|err| err.into_validation(&pointer))?;
                        updated += 1;
                    }
                }
                continue;
            };

            let Value::Object(fields) = node else {
                return Err(DppError::validation(
                    pointer,
                    format!("expected an object holding `{key}`"),
                ));
            };

            let mut target_key = key.to_string();
            if let Some(new_key) = entry.rename_key.as_deref() {
                if let Some(value) = fields.remove(key) {
                    fields.insert(new_key.to_string(), value);
                    updated += 1;
                }
                target_key = new_key.to_string();
            }

            if let Some(value) = entry.replace_value.as_ref() {
                fields.insert(target_key.clone(), value.clone());
                updated += 1;
            }

            if let Some(rule) = rule.as_ref() {
                match fields.get_mut(&target_key) {
                    None | Some(Value::Null) => {
                        debug!(pointer = %pointer, key = %target_key, "no fragment at match");
                    }
                    Some(fragment) => {
                        let field_path = format!("{pointer}/{}", escape_token(&target_key));
                        *fragment = rule
                            .do_process(fragment)
                            .map_err(|err| err.into_validation(&field_path))?;
                        updated += 1;
                    }
                }
            }
        }

        Ok(Some(updated))
    }
}
