pub use agent::{Agent, AgentHandle};
pub use app_error::{AppError, AppResult};
pub use config::{
    AgentConfig, GeneralConfig, InfoConfig, NetworkConfig, RepositoryConfig, RequestHandlerPool,
    SessionConfig, TransferConfig,
};
pub use server::{RequestTask, Server};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing, LogGuard};

mod agent;
mod app_error;
mod config;
mod server;
mod shutdown;
mod tracing_config;
