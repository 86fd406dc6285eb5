use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::{runtime, signal};
use tracing::{error, info, trace};

use crate::protocol::AgentAddr;
use crate::request::{AgentContext, InterceptorRegistry, StatusProvider};
use crate::{AppError, AppResult};

use super::{AgentConfig, Server, Shutdown};

/// One agent: the server side plus everything its handlers share.
pub struct Agent {
    config: Arc<AgentConfig>,
    interceptors: InterceptorRegistry,
    status: Option<Arc<dyn StatusProvider>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Agent {
            config: Arc::new(config),
            interceptors: InterceptorRegistry::new(),
            status: None,
        }
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorRegistry) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn with_status_provider(mut self, status: Arc<dyn StatusProvider>) -> Self {
        self.status = Some(status);
        self
    }

    /// Binds the listen address and starts serving on the current runtime.
    pub async fn bind(self) -> AppResult<AgentHandle> {
        let config = self.config;
        fs::create_dir_all(config.temp_dir()).await?;

        let listen_address = config.listen_address();
        let listener = TcpListener::bind(&listen_address).await.map_err(|err| {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!("{}", error_msg);
            AppError::IllegalState(error_msg)
        })?;
        let local_addr = listener.local_addr()?;
        info!("tcp server binding to {} for listening", local_addr);

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        let context = Arc::new(AgentContext::new(
            config.clone(),
            self.interceptors,
            self.status,
            notify_shutdown.clone(),
        ));
        let sweeper = context.sessions.start_sweeper(
            Duration::from_secs(config.session.sweep_interval_secs.max(1)),
            notify_shutdown.clone(),
        );

        let server = Server::new(
            listener,
            Arc::new(Semaphore::new(config.network.max_connection.max(1))),
            notify_shutdown.clone(),
            shutdown_complete_tx,
            context.clone(),
        );
        let mut server_shutdown = Shutdown::subscribe(&notify_shutdown);
        let server_task = tokio::spawn(async move {
            tokio::select! {
                res = server.run() => {
                    if let Err(err) = res {
                        error!(cause = %err, "failed to accept");
                    }
                }
                _ = server_shutdown.recv() => {
                    info!("tcp server received shutdown signal");
                }
            }
        });

        Ok(AgentHandle {
            local_addr,
            shutdown: Shutdown::subscribe(&notify_shutdown),
            notify_shutdown,
            context,
            shutdown_complete_rx,
            server_task,
            sweeper,
        })
    }

    /// Serves until ctrl-c or a remote ACTION:/shutdown, on a runtime of its own.
    pub fn start(self) -> AppResult<()> {
        let rt = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("courier-worker")
            .build()?;
        rt.block_on(async move {
            let mut handle = self.bind().await?;
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("get shutdown signal");
                }
                _ = handle.stopped() => {
                    info!("shutdown requested by a peer");
                }
            }
            handle.shutdown().await
        })
    }
}

/// A running agent.
pub struct AgentHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    notify_shutdown: broadcast::Sender<()>,
    context: Arc<AgentContext>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    server_task: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl AgentHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address other agents use to reach this one.
    pub fn agent_addr(&self) -> AgentAddr {
        AgentAddr::new(self.local_addr.ip().to_string(), self.local_addr.port())
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.context
    }

    /// Resolves once a shutdown was signalled, from here or by a peer.
    pub async fn stopped(&mut self) {
        self.shutdown.recv().await
    }

    /// Signals shutdown and waits for the server, the session sweeper and
    /// every open connection to finish.
    pub async fn shutdown(mut self) -> AppResult<()> {
        // nobody subscribed any more means everything already stopped
        let _ = self.notify_shutdown.send(());
        self.server_task.await?;
        self.sweeper.await?;
        trace!("waiting for connection handlers to finish");
        let _ = self.shutdown_complete_rx.recv().await;
        info!("agent on {} shutdown complete", self.local_addr);
        Ok(())
    }
}
