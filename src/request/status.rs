use std::fmt::Debug;
use std::sync::Arc;

use crate::service::AgentConfig;

/// Liveness and the configuration an agent is willing to expose.
pub trait StatusProvider: Send + Sync + Debug {
    fn is_up(&self) -> bool;

    /// `(key, value)` pairs, already filtered by the allow-list.
    fn entries(&self) -> Vec<(String, String)>;
}

/// Reports `UP` and the allow-listed keys of the agent configuration.
#[derive(Debug)]
pub struct ConfigStatusProvider {
    config: Arc<AgentConfig>,
}

impl ConfigStatusProvider {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        ConfigStatusProvider { config }
    }
}

impl StatusProvider for ConfigStatusProvider {
    fn is_up(&self) -> bool {
        true
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.config
            .info
            .allowed_keys
            .iter()
            .filter_map(|key| self.config.lookup(key).map(|value| (key.clone(), value)))
            .collect()
    }
}
