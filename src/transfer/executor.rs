use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, error, warn};

use crate::{AppError, AppResult};

use super::TransferResult;

/// Runs TRANSFER batches off the connection that asked for them, at most
/// `max_concurrent` at a time.
#[derive(Debug)]
pub struct TransferExecutor {
    permits: Arc<Semaphore>,
}

impl TransferExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        TransferExecutor {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawns `work`. With `validation` the caller waits up to `timeout` for
    /// the result and the work is aborted when it expires; without it the
    /// work runs detached and `None` is returned at once.
    pub async fn submit<F>(
        &self,
        validation: bool,
        timeout: Duration,
        work: F,
    ) -> AppResult<Option<TransferResult>>
    where
        F: Future<Output = AppResult<TransferResult>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalState(format!("transfer pool closed: {}", e)))?;
            work.await
        });

        if !validation {
            debug!("transfer running detached");
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(result)) if result.is_success() => {
                        debug!("detached transfer of {} resource(s) done", result.total())
                    }
                    Ok(Ok(result)) => warn!(
                        "detached transfer finished with {} failure(s): {:?}",
                        result.failed, result.reasons
                    ),
                    Ok(Err(e)) => warn!("detached transfer failed: {}", e),
                    Err(e) => error!("detached transfer task died: {}", e),
                }
            });
            return Ok(None);
        }

        let abort = handle.abort_handle();
        match time::timeout(timeout, handle).await {
            Ok(joined) => Ok(Some(joined??)),
            Err(_) => {
                abort.abort();
                Err(AppError::Timeout(format!(
                    "transfer did not finish within {:?}",
                    timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseCode;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_validated_mode_returns_the_result() -> AppResult<()> {
        let executor = TransferExecutor::new(2);
        let result = executor
            .submit(true, Duration::from_secs(5), async {
                Ok(TransferResult {
                    succeeded: 1,
                    ..Default::default()
                })
            })
            .await?;
        assert_eq!(result.map(|r| r.succeeded), Some(1));
        assert_eq!(executor.available(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_validation_cancels_the_work() {
        let executor = TransferExecutor::new(1);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let err = executor
            .submit(true, Duration::from_secs(1), async move {
                time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(TransferResult::default())
            })
            .await
            .unwrap_err();
        assert_eq!(err.response_code(), ResponseCode::TimeoutOccurred);

        time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(executor.available(), 1);
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_at_once() -> AppResult<()> {
        let executor = TransferExecutor::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let result = executor
            .submit(false, Duration::from_secs(1), async move {
                let _ = tx.send(());
                Ok(TransferResult::default())
            })
            .await?;
        assert!(result.is_none());
        rx.await?;
        Ok(())
    }
}
