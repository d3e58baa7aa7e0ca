use std::{collections::HashMap, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::Processor;
use crate::{
    config::ConfigParamData,
    error::{DppError, DppResult},
    providers::ProviderSet,
    rules::{RuleRegistry, RuleResolver, SourceMapping},
    storage::{FileRepository, FsFileRepository},
};

/// Shared, read-only dependencies handed to every processor factory.
#[derive(Clone)]
pub struct BuildContext {
    pub config: Arc<ConfigParamData>,
    pub rules: Arc<RuleRegistry>,
    pub source_mapping: Arc<SourceMapping>,
    pub providers: ProviderSet,
    pub file_repo: Arc<dyn FileRepository>,
}

impl BuildContext {
    pub fn new(config: ConfigParamData) -> Self {
        Self {
            config: Arc::new(config),
            rules: Arc::new(RuleRegistry::with_builtin_rules()),
            source_mapping: Arc::new(SourceMapping::default()),
            providers: ProviderSet::default(),
            file_repo: Arc::new(FsFileRepository),
        }
    }

    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_source_mapping(mut self, mapping: SourceMapping) -> Self {
        self.source_mapping = Arc::new(mapping);
        self
    }

    pub fn with_providers(mut self, providers: ProviderSet) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_file_repo(mut self, file_repo: Arc<dyn FileRepository>) -> Self {
        self.file_repo = file_repo;
        self
    }

    pub fn resolver(&self) -> RuleResolver {
        RuleResolver::new(self.rules.clone())
    }
}

pub type ProcessorFactory = fn(&BuildContext, &Value) -> DppResult<Arc<dyn Processor>>;

/// Processor id -> factory. Unknown ids fail pipeline construction.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_processors() -> Self {
        let mut registry = Self::new();
        crate::processors::register_builtin_processors(&mut registry);
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, factory: ProcessorFactory) -> DppResult<()> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DppError::config("processor identifier must not be empty"));
        }
        if self.factories.contains_key(&id) {
            return Err(DppError::config(format!(
                "processor `{id}` is already registered"
            )));
        }
        debug!(processor = %id, "registered processor");
        self.factories.insert(id, factory);
        Ok(())
    }

    /// Registers or replaces without checks; used for the built-in set.
    pub(crate) fn insert(&mut self, id: &str, factory: ProcessorFactory) {
        self.factories.insert(id.to_string(), factory);
    }

    pub fn build(
        &self,
        id: &str,
        context: &BuildContext,
        config: &Value,
    ) -> DppResult<Arc<dyn Processor>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| DppError::config(format!("processor `{id}` is not registered")))?;
        factory(context, config)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }
}

/// Deserializes a processor's `config` block. A missing block is read as
/// `{}` so struct-level defaults apply.
pub fn parse_processor_config<T: DeserializeOwned>(processor: &str, config: &Value) -> DppResult<T> {
    let value = match config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|err| DppError::config(format!("invalid config for `{processor}`: {err}")))
}
