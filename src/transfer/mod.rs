//! Multi-file TRANSFER between agents.

pub use executor::TransferExecutor;
pub use orchestrator::{group_tasks, pool_size, LocalTask, TransferGroup, TransferOrchestrator};
pub use task::{TransferRequest, TransferResult, TransferTask};

mod executor;
mod orchestrator;
mod task;
