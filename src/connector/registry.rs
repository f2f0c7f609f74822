use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::ValidationSource;
use crate::model::TaskKind;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no connector registered for {0}")]
    NotFound(TaskKind),
}

/// Registry mapping task kinds to connector instances.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<TaskKind, Arc<dyn ValidationSource>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: TaskKind, connector: Arc<dyn ValidationSource>) {
        self.connectors.insert(kind, connector);
    }

    pub fn get(&self, kind: TaskKind) -> Result<Arc<dyn ValidationSource>, RegistryError> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotFound(kind))
    }

    pub fn has(&self, kind: TaskKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.connectors.keys().copied().collect()
    }
}
