use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::network::{connect_first, AgentConnector};
use crate::parallel::ParallelUploader;
use crate::protocol::{AfterTransfer, AgentAddr, OnExist, ResponseCode};
use crate::request::{InterceptorChain, Repository};
use crate::{AppError, AppResult};

use super::{TransferResult, TransferTask};

/// Workers for one group: one per `min_chunk` bytes of every file, at least
/// one per file, at most `max_workers`.
pub fn pool_size(sizes: impl IntoIterator<Item = u64>, min_chunk: u64, max_workers: usize) -> usize {
    let wanted: u64 = sizes
        .into_iter()
        .map(|size| size.div_ceil(min_chunk.max(1)).max(1))
        .sum();
    usize::try_from(wanted)
        .unwrap_or(usize::MAX)
        .clamp(1, max_workers.max(1))
}

/// A task whose source was found on this agent.
#[derive(Debug, Clone)]
pub struct LocalTask {
    pub task: TransferTask,
    pub path: PathBuf,
    pub size: u64,
}

/// Tasks sharing one destination candidate list.
#[derive(Debug)]
pub struct TransferGroup {
    pub candidates: Vec<AgentAddr>,
    pub tasks: Vec<LocalTask>,
}

/// Groups by identical candidate list, keeping the order in which each list
/// first appears.
pub fn group_tasks(tasks: Vec<LocalTask>) -> Vec<TransferGroup> {
    let mut groups: Vec<TransferGroup> = Vec::new();
    for task in tasks {
        match groups
            .iter_mut()
            .find(|group| group.candidates.as_slice() == task.task.candidates())
        {
            Some(group) => group.tasks.push(task),
            None => groups.push(TransferGroup {
                candidates: task.task.candidates().to_vec(),
                tasks: vec![task],
            }),
        }
    }
    groups
}

/// Moves a batch of local files to other agents.
///
/// The prepare phase fails the whole batch: a missing source, a group with
/// no reachable agent or a destination that exists under `onExist=fail`.
/// After that every task is reported on its own, including the tasks of a
/// group that became unreachable in between.
#[derive(Debug)]
pub struct TransferOrchestrator<C> {
    connector: Arc<C>,
    repository: Repository,
    interceptors: InterceptorChain,
}

impl<C> Clone for TransferOrchestrator<C> {
    fn clone(&self) -> Self {
        TransferOrchestrator {
            connector: self.connector.clone(),
            repository: self.repository.clone(),
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<C: AgentConnector> TransferOrchestrator<C> {
    pub fn new(connector: Arc<C>, repository: Repository, interceptors: InterceptorChain) -> Self {
        TransferOrchestrator {
            connector,
            repository,
            interceptors,
        }
    }

    pub async fn run(&self, tasks: Vec<TransferTask>) -> AppResult<TransferResult> {
        let groups = self.prepare(tasks).await?;
        let mut result = TransferResult::default();
        for group in groups {
            result.absorb(self.transfer_group(group).await);
        }
        info!(
            "transfer finished: {} succeeded, {} failed",
            result.succeeded, result.failed
        );
        Ok(result)
    }

    pub async fn prepare(&self, tasks: Vec<TransferTask>) -> AppResult<Vec<TransferGroup>> {
        let mut local = Vec::with_capacity(tasks.len());
        for task in tasks {
            let path = self.repository.resolve_exact(&task.source)?;
            let size = match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => metadata.len(),
                _ => {
                    return Err(AppError::response(
                        ResponseCode::SourceFileNotFound,
                        format!("source {} not found", task.source),
                    ))
                }
            };
            local.push(LocalTask { task, path, size });
        }

        let groups = group_tasks(local);
        for group in &groups {
            let mut client = connect_first(&*self.connector, &group.candidates).await?;
            for local in &group.tasks {
                let destination = &local.task.destination;
                if destination.options.on_exist != OnExist::Fail {
                    continue;
                }
                if client.exist(destination).await?.is_some() {
                    return Err(AppError::response(
                        ResponseCode::AlreadyExist,
                        format!("{} already exists on {}", destination.path, client.addr()),
                    ));
                }
            }
            if let Err(e) = client.close().await {
                debug!("closing prepare connection to {}: {}", client_label(&group.candidates), e);
            }
        }
        Ok(groups)
    }

    async fn transfer_group(&self, group: TransferGroup) -> TransferResult {
        let mut result = TransferResult::default();
        match connect_first(&*self.connector, &group.candidates).await {
            Ok(client) => {
                if let Err(e) = client.close().await {
                    debug!("closing probe connection: {}", e);
                }
            }
            Err(e) => {
                warn!(
                    "{} unreachable, failing {} task(s)",
                    client_label(&group.candidates),
                    group.tasks.len()
                );
                for local in &group.tasks {
                    result.record_failure(&local.task, e.reason());
                }
                return result;
            }
        }

        let config = self.connector.config();
        let workers = pool_size(
            group.tasks.iter().map(|local| local.size),
            config.transfer.min_chunk_size,
            config.transfer.max_workers,
        );
        debug!(
            "transferring {} task(s) to {} with {} worker(s)",
            group.tasks.len(),
            client_label(&group.candidates),
            workers
        );
        let permits = Arc::new(Semaphore::new(workers));
        let mut pending: HashSet<usize> = (0..group.tasks.len()).collect();
        let mut join_set = JoinSet::new();
        for (index, local) in group.tasks.iter().cloned().enumerate() {
            let this = self.clone();
            let permits = permits.clone();
            join_set.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => this.transfer_one(&local).await,
                    Err(e) => Err(AppError::IllegalState(e.to_string())),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    pending.remove(&index);
                    let task = &group.tasks[index].task;
                    match outcome {
                        Ok(()) => result.record_success(task),
                        Err(e) => {
                            warn!("transfer {} -> {} failed: {}", task.source, task.destination, e);
                            result.record_failure(task, e.reason());
                        }
                    }
                }
                Err(e) => warn!("transfer worker died: {}", e),
            }
        }
        for index in pending {
            result.record_failure(&group.tasks[index].task, "transfer worker died");
        }
        result
    }

    async fn transfer_one(&self, local: &LocalTask) -> AppResult<()> {
        if let Err(e) = self.interceptors.pre_transfer(&local.path) {
            self.interceptors.post_transfer(&local.path, Some(&e));
            return Err(e);
        }
        let outcome = async {
            let mut client = connect_first(&*self.connector, local.task.candidates()).await?;
            ParallelUploader::new(self.connector.clone())
                .put(&mut client, &local.path, &local.task.destination)
                .await?;
            if let Err(e) = client.close().await {
                debug!("closing transfer connection: {}", e);
            }
            self.after_transfer(local).await
        }
        .await
        .map_err(|e| e.or_code(ResponseCode::TransferFailed));
        self.interceptors
            .post_transfer(&local.path, outcome.as_ref().err());
        outcome
    }

    /// The optional post-action on the source of a successful task.
    async fn after_transfer(&self, local: &LocalTask) -> AppResult<()> {
        match local.task.source.options.after_transfer {
            None => Ok(()),
            Some(AfterTransfer::Delete) => {
                fs::remove_file(&local.path).await?;
                debug!("deleted transferred source {}", local.path.display());
                Ok(())
            }
            Some(AfterTransfer::Backup) => {
                let target = self.repository.backup_path(&local.task.source)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).await?;
                }
                if fs::rename(&local.path, &target).await.is_err() {
                    fs::copy(&local.path, &target).await?;
                    fs::remove_file(&local.path).await?;
                }
                debug!(
                    "backed up transferred source {} to {}",
                    local.path.display(),
                    target.display()
                );
                Ok(())
            }
        }
    }
}

fn client_label(candidates: &[AgentAddr]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
