use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::network::Connection;
use crate::protocol::{headers, Command, Message, ResponseCode};
use crate::request::{AgentContext, HandlerOutcome, RequestContext, RequestProcessor};
use crate::utils::{PoolHandler, WorkerPool, WorkerPoolConfig};
use crate::AppError;
use crate::AppResult;

use super::Shutdown;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct RequestTask {
    connection_id: u64,
    remote: String,
    message: Message,
    response_tx: oneshot::Sender<HandlerOutcome>,
}

/// Runs requests taken off the pool channel through the processor.
#[derive(Debug, Clone)]
struct RequestHandler {
    context: Arc<AgentContext>,
}

impl PoolHandler<RequestTask> for RequestHandler {
    async fn handle(&self, task: RequestTask) {
        let RequestTask {
            connection_id,
            remote,
            message,
            response_tx,
        } = task;
        let context = RequestContext::new(
            self.context.clone(),
            connection_id,
            remote,
            message.uri.clone(),
        );
        if message.command == Command::Transfer {
            // a validated transfer may wait on requests this pool has to serve
            debug!("transfer on connection {} leaves the request pool", connection_id);
            tokio::spawn(respond(message, context, response_tx));
            return;
        }
        respond(message, context, response_tx).await;
    }
}

async fn respond(
    message: Message,
    context: RequestContext,
    response_tx: oneshot::Sender<HandlerOutcome>,
) {
    let outcome = RequestProcessor::process_request(message, &context).await;
    if let Err(outcome) = response_tx.send(outcome) {
        // the connection went away while the request was processed
        error!(
            "connection {} closed before the response for {} was ready",
            context.connection_id, outcome.response.uri
        );
    }
}

// handler for each connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    remote: String,
    connection: Connection<TcpStream>,
    request_pool: WorkerPool<RequestTask>,
    context: Arc<AgentContext>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::subscribe(&self.notify_shutdown);
        loop {
            // None is a clean close by the peer between two messages
            let read = tokio::select! {
                res = self.connection.read_message() => res,
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    return Ok(());
                }
            };
            let maybe_message = match read {
                Ok(maybe_message) => maybe_message,
                Err(err) => {
                    warn!(
                        "reading a request on connection {} from {} failed: {}",
                        self.connection_id, self.remote, err
                    );
                    let uri = self.connection.last_uri().to_string();
                    self.reply_and_close(&err, uri).await?;
                    return Err(err);
                }
            };
            let mut message = match maybe_message {
                Some(message) => message,
                None => break,
            };

            if message.decode_result.is_failure() {
                warn!(
                    "undecodable request on connection {} from {}: {:?}",
                    self.connection_id, self.remote, message.decode_result
                );
                message.headers.set(headers::CONNECTION, headers::CLOSE)?;
                if let Err(e) = self.connection.write_message(message).await {
                    debug!("error response not delivered: {}", e);
                }
                break;
            }

            let close = message.is_close();
            let uri = message.uri.clone();
            let (response_tx, response_rx) = oneshot::channel();
            let task = RequestTask {
                connection_id: self.connection_id,
                remote: self.remote.clone(),
                message,
                response_tx,
            };
            self.request_pool.send(task).await?;

            let outcome = match response_rx.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // the worker panicked, the pool monitor restarts it
                    error!("request processor dropped {} without a response", uri);
                    let err = AppError::IllegalState(format!("no response produced for {}", uri));
                    self.reply_and_close(&err, uri).await?;
                    return Err(err);
                }
            };

            let (mut response, steps) = outcome.into_parts();
            if close {
                response.headers.set(headers::CONNECTION, headers::CLOSE)?;
            }
            let code = response.response_code();
            let delivered = self.connection.write_message(response).await;
            let failure = match (&delivered, code) {
                (Err(e), _) => Some(AppError::DetailedIoError(format!(
                    "response for {} not delivered: {}",
                    uri, e
                ))),
                (Ok(()), Some(code)) if !code.is_success() => {
                    Some(AppError::response(code, format!("{} answered with {}", uri, code)))
                }
                (Ok(()), None) => Some(AppError::response(
                    ResponseCode::InternalServerError,
                    format!("{} answered without a response code", uri),
                )),
                _ => None,
            };
            if !steps.is_empty() {
                steps.run(failure.as_ref(), &self.context).await;
            }
            delivered?;
            if close {
                break;
            }
        }
        debug!("connection handler exit read loop");
        Ok(())
    }

    /// Best effort: the peer may already be gone.
    async fn reply_and_close(&mut self, err: &AppError, uri: String) -> AppResult<()> {
        let mut response = Message::error_response(err, uri);
        response.headers.set(headers::CONNECTION, headers::CLOSE)?;
        if let Err(e) = self.connection.write_message(response).await {
            debug!("error response not delivered: {}", e);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    context: Arc<AgentContext>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        context: Arc<AgentContext>,
    ) -> Self {
        Server {
            listener,
            limit_connections,
            notify_shutdown,
            shutdown_complete_tx,
            context,
        }
    }

    /// Accepts connections until accepting fails for good.
    ///
    /// Each connection gets its own handler task and a permit from the
    /// connection semaphore; requests are processed on the request handler
    /// pool. On shutdown the caller drops this future, every handler stops
    /// reading once it sees the signal and the pool workers exit when the
    /// last handler releases its sender.
    pub async fn run(&self) -> AppResult<()> {
        let request_pool = WorkerPool::start(
            "request-handler",
            RequestHandler {
                context: self.context.clone(),
            },
            WorkerPoolConfig::from(&self.context.config.request_handler_pool),
            self.notify_shutdown.clone(),
        );

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalState(format!("connection limit closed: {}", e)))?;

            let socket = self.accept().await?;
            let remote = socket
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            if let Err(e) = socket.set_nodelay(true) {
                debug!("set_nodelay on {}: {}", remote, e);
            }
            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            debug!("accepted connection {} from {}", connection_id, remote);

            let mut handler = ConnectionHandler {
                notify_shutdown: self.notify_shutdown.clone(),
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                connection_id,
                remote,
                connection: Connection::server(socket, &self.context.config),
                request_pool: request_pool.clone(),
                context: self.context.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    warn!(
                        "connection {} from {} ended with error: {}",
                        handler.connection_id, handler.remote, err
                    );
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::Accept(format!(
                            "accept on {:?} failed: {}",
                            self.listener.local_addr(),
                            err
                        )));
                    }
                    warn!("accept failed, retrying in {}s: {}", backoff, err);
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        info!("tcp server dropped");
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler {} dropped", self.connection_id);
    }
}
