use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tracing::{debug, error, warn};

use crate::service::RequestHandlerPool;
use crate::Shutdown;

/// Processes the tasks taken off a [`WorkerPool`] channel.
pub trait PoolHandler<T>: Clone + Send + Sync + 'static {
    fn handle(&self, task: T) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub channel_capacity: usize,
    pub num_workers: usize,
    pub monitor_interval: Duration,
    pub worker_check_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig::from(&RequestHandlerPool::default())
    }
}

impl From<&RequestHandlerPool> for WorkerPoolConfig {
    fn from(pool: &RequestHandlerPool) -> Self {
        WorkerPoolConfig {
            channel_capacity: pool.channel_capacity.max(1),
            num_workers: pool.num_channels.max(1),
            monitor_interval: Duration::from_secs(pool.monitor_interval.max(1)),
            worker_check_timeout: Duration::from_millis(pool.worker_check_timeout),
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

/// A fixed set of workers sharing one bounded channel.
///
/// A monitor task restarts workers that panicked, so a handler bug costs one
/// request instead of the whole pool. Workers exit once every sender is
/// dropped; the monitor exits on the shutdown signal.
#[derive(Debug)]
pub struct WorkerPool<T> {
    sender: async_channel::Sender<T>,
}

impl<T> Clone for WorkerPool<T> {
    fn clone(&self) -> Self {
        WorkerPool {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn start<H: PoolHandler<T>>(
        name: &'static str,
        handler: H,
        config: WorkerPoolConfig,
        notify_shutdown: broadcast::Sender<()>,
    ) -> Self {
        let (sender, receiver) = async_channel::bounded(config.channel_capacity);
        let workers = (0..config.num_workers)
            .map(|id| spawn_worker(name, id, handler.clone(), receiver.clone()))
            .collect();
        spawn_monitor(name, workers, receiver, handler, config, notify_shutdown);
        WorkerPool { sender }
    }

    pub async fn send(&self, task: T) -> Result<(), async_channel::SendError<T>> {
        self.sender.send(task).await
    }
}

fn spawn_worker<T, H>(
    name: &'static str,
    id: usize,
    handler: H,
    receiver: async_channel::Receiver<T>,
) -> Worker
where
    T: Send + 'static,
    H: PoolHandler<T>,
{
    let handle = tokio::spawn(async move {
        debug!("{} worker {} started", name, id);
        while let Ok(task) = receiver.recv().await {
            handler.handle(task).await;
        }
        debug!("{} worker {} exited", name, id);
    });
    Worker { id, handle }
}

fn spawn_monitor<T, H>(
    name: &'static str,
    mut workers: Vec<Worker>,
    receiver: async_channel::Receiver<T>,
    handler: H,
    config: WorkerPoolConfig,
    notify_shutdown: broadcast::Sender<()>,
) where
    T: Send + 'static,
    H: PoolHandler<T>,
{
    tokio::spawn(async move {
        let mut shutdown = Shutdown::subscribe(&notify_shutdown);
        let mut interval = time::interval(config.monitor_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("{} monitor received shutdown signal", name);
                    break;
                }
                _ = interval.tick() => {}
            }
            for worker in workers.iter_mut() {
                let joined = match time::timeout(config.worker_check_timeout, &mut worker.handle).await {
                    // still running
                    Err(_) => continue,
                    Ok(joined) => joined,
                };
                match joined {
                    Ok(()) => {
                        if receiver.is_closed() {
                            continue;
                        }
                        warn!("{} worker {} exited unexpectedly", name, worker.id);
                    }
                    Err(e) => log_worker_failure(name, worker.id, e),
                }
                *worker = spawn_worker(name, worker.id, handler.clone(), receiver.clone());
            }
            if receiver.is_closed() {
                debug!("{} channel closed, monitor exits", name);
                break;
            }
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

fn log_worker_failure(name: &str, id: usize, err: JoinError) {
    if err.is_panic() {
        let payload = err.into_panic();
        error!(
            "{} worker {} panicked: {}, restarting it",
            name,
            id,
            panic_message(payload.as_ref())
        );
    } else {
        error!("{} worker {} was cancelled, restarting it", name, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[derive(Clone)]
    struct Doubler {
        handled: Arc<AtomicUsize>,
    }

    impl PoolHandler<(u32, oneshot::Sender<u32>)> for Doubler {
        async fn handle(&self, (value, reply): (u32, oneshot::Sender<u32>)) {
            if value == 0 {
                panic!("zero is not allowed");
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            let _ = reply.send(value * 2);
        }
    }

    #[tokio::test]
    async fn test_pool_survives_panicking_handler() {
        let (notify, _) = broadcast::channel(1);
        let handler = Doubler {
            handled: Arc::new(AtomicUsize::new(0)),
        };
        let config = WorkerPoolConfig {
            channel_capacity: 8,
            num_workers: 1,
            monitor_interval: Duration::from_millis(20),
            worker_check_timeout: Duration::from_millis(5),
        };
        let pool = WorkerPool::start("test", handler.clone(), config, notify.clone());

        let (tx, rx) = oneshot::channel();
        pool.send((0, tx)).await.unwrap();
        // the panicking worker dropped the reply sender
        assert!(rx.await.is_err());

        let (tx, rx) = oneshot::channel();
        pool.send((21, tx)).await.unwrap();
        assert_eq!(rx.await.unwrap(), 42);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        let _ = notify.send(());
    }
}
