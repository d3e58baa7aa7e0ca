use std::collections::HashMap;

use tracing::debug;

use super::{
    SharedRule,
    builtin::{
        BBOX_CORNERS_TO_ORIGIN_SIZE, BBOX_ORIGIN_SIZE_TO_CORNERS, BboxCornersToOriginSize,
        BboxOriginSizeToCorners, TRIM_WHITESPACE, TrimWhitespace,
    },
};
use crate::error::{DppError, DppResult};

pub type RuleConstructor = fn() -> SharedRule;

/// Identifier -> constructor map. Populated once at startup, then shared
/// read-only (behind an `Arc`) by every document in the run.
#[derive(Default, Clone)]
pub struct RuleRegistry {
    constructors: HashMap<String, RuleConstructor>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, RuleConstructor); 3] = [
            (BBOX_CORNERS_TO_ORIGIN_SIZE, BboxCornersToOriginSize::shared),
            (BBOX_ORIGIN_SIZE_TO_CORNERS, BboxOriginSizeToCorners::shared),
            (TRIM_WHITESPACE, TrimWhitespace::shared),
        ];
        for (id, constructor) in builtins {
            registry.constructors.insert(id.to_string(), constructor);
        }
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, constructor: RuleConstructor) -> DppResult<()> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DppError::config("rule identifier must not be empty"));
        }
        if self.constructors.contains_key(&id) {
            return Err(DppError::config(format!("rule `{id}` is already registered")));
        }
        debug!(rule = %id, "registered rule");
        self.constructors.insert(id, constructor);
        Ok(())
    }

    /// Exact-match lookup. Unknown identifiers are a configuration error.
    pub fn resolve(&self, id: &str) -> DppResult<SharedRule> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| DppError::config(format!("rule `{id}` is not registered")))?;
        Ok(constructor())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
