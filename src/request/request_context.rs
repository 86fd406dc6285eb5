use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::service::AgentConfig;
use crate::session::SessionManager;
use crate::transfer::TransferExecutor;

use super::{ConfigStatusProvider, InterceptorRegistry, PathLocks, Repository, StatusProvider};

/// Services shared by every connection of one agent.
#[derive(Debug)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub repository: Repository,
    pub sessions: Arc<SessionManager>,
    pub interceptors: InterceptorRegistry,
    pub status: Arc<dyn StatusProvider>,
    pub path_locks: PathLocks,
    pub transfers: TransferExecutor,
    pub notify_shutdown: broadcast::Sender<()>,
}

impl AgentContext {
    pub fn new(
        config: Arc<AgentConfig>,
        interceptors: InterceptorRegistry,
        status: Option<Arc<dyn StatusProvider>>,
        notify_shutdown: broadcast::Sender<()>,
    ) -> Self {
        let status =
            status.unwrap_or_else(|| Arc::new(ConfigStatusProvider::new(config.clone())));
        AgentContext {
            repository: Repository::new(&config.repository),
            sessions: Arc::new(SessionManager::new(Duration::from_secs(
                config.session.timeout_secs,
            ))),
            interceptors,
            status,
            path_locks: PathLocks::new(),
            transfers: TransferExecutor::new(config.transfer.max_concurrent_transfers),
            notify_shutdown,
            config,
        }
    }
}

/// Per-request view handed to the handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub agent: Arc<AgentContext>,
    pub connection_id: u64,
    pub remote: String,
    /// uri of the request being handled, echoed by its response
    pub uri: String,
}

impl RequestContext {
    pub fn new(
        agent: Arc<AgentContext>,
        connection_id: u64,
        remote: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        RequestContext {
            agent,
            connection_id,
            remote: remote.into(),
            uri: uri.into(),
        }
    }
}
