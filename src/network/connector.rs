use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::{AgentAddr, ResponseCode};
use crate::service::AgentConfig;
use crate::{AppError, AppResult};

use super::AgentClient;

/// Opens client connections to other agents.
pub trait AgentConnector: Send + Sync + 'static {
    fn connect(&self, addr: &AgentAddr) -> impl Future<Output = AppResult<AgentClient>> + Send;

    fn config(&self) -> &Arc<AgentConfig>;
}

/// Plain TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: Arc<AgentConfig>,
}

impl TcpConnector {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        TcpConnector { config }
    }
}

impl AgentConnector for TcpConnector {
    async fn connect(&self, addr: &AgentAddr) -> AppResult<AgentClient> {
        AgentClient::connect(addr, self.config.clone()).await
    }

    fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }
}

/// Tries `candidates` in order and returns the first agent that accepts.
/// Nothing is remembered between calls.
pub async fn connect_first<C: AgentConnector>(
    connector: &C,
    candidates: &[AgentAddr],
) -> AppResult<AgentClient> {
    let mut failures = Vec::with_capacity(candidates.len());
    for addr in candidates {
        match connector.connect(addr).await {
            Ok(client) => {
                debug!("connected to candidate {}", addr);
                return Ok(client);
            }
            Err(e) => {
                warn!("candidate agent {} is unreachable: {}", addr, e);
                failures.push(format!("{}: {}", addr, e));
            }
        }
    }
    Err(AppError::response(
        ResponseCode::TransferFailed,
        format!("no destination agent reachable ({})", failures.join("; ")),
    ))
}
