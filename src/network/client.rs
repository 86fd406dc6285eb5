use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, trace};

use crate::content::ContentBuffer;
use crate::parallel::ParallelUploader;
use crate::protocol::{headers, AgentAddr, Command, Message, ResourceUri, ResponseCode};
use crate::service::AgentConfig;
use crate::transfer::{TransferRequest, TransferResult};
use crate::{AppError, AppResult};

use super::{Connection, TcpConnector};

/// The active side of a connection to another agent.
///
/// At most one exchange is in flight at a time. A request counts as in
/// flight from the moment it is written until its response has been read
/// completely. An exchange that fails half way leaves the connection
/// unusable, and closing it then reports the unanswered request.
#[derive(Debug)]
pub struct AgentClient {
    addr: AgentAddr,
    config: Arc<AgentConfig>,
    connection: Connection<TcpStream>,
    in_flight: usize,
    broken: bool,
}

impl AgentClient {
    pub async fn connect(addr: &AgentAddr, config: Arc<AgentConfig>) -> AppResult<AgentClient> {
        let target = addr.to_string();
        let stream = time::timeout(config.connect_timeout(), TcpStream::connect(&target))
            .await
            .map_err(|_| AppError::Timeout(format!("connecting to {}", target)))??;
        stream.set_nodelay(true)?;
        debug!("connected to agent {}", target);
        Ok(AgentClient {
            addr: addr.clone(),
            connection: Connection::client(stream, &config),
            config,
            in_flight: 0,
            broken: false,
        })
    }

    pub fn addr(&self) -> &AgentAddr {
        &self.addr
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Requests written without a complete response yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Writes `request` and waits for its response, whatever its code.
    pub async fn exchange(&mut self, mut request: Message) -> AppResult<Message> {
        if self.broken {
            return Err(AppError::IllegalState(format!(
                "connection to {} is no longer usable",
                self.addr
            )));
        }
        if self.in_flight != 0 {
            return Err(AppError::IllegalState(format!(
                "connection to {} already has an exchange in flight",
                self.addr
            )));
        }
        request
            .headers
            .set(headers::AGENT, self.config.general.agent_name.clone())?;
        request
            .headers
            .set(headers::AGENT_TYPE, self.config.general.agent_type.clone())?;
        let uri = request.uri.clone();
        let timeout = self.config.request_timeout();

        self.in_flight += 1;
        let pending = self.in_flight;
        let connection = &mut self.connection;
        let exchange = async move {
            connection.write_message(request).await?;
            connection
                .read_message()
                .await?
                .ok_or(AppError::PrematureClosure(pending))
        };
        let result = match time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "no response from {} for {} within {:?}",
                self.addr, uri, timeout
            ))),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        };
        self.in_flight -= 1;
        if response.decode_result.is_failure() {
            // the decoder is in its sink state, nothing more can be read
            self.broken = true;
        } else if response.command != Command::Response {
            self.broken = true;
            return Err(AppError::response(
                ResponseCode::BadResponse,
                format!("{} answered {} with a {} message", self.addr, uri, response.command),
            ));
        }
        trace!("{} answered {} with {:?}", self.addr, uri, response.response_code());
        Ok(response)
    }

    /// Like [`AgentClient::exchange`], but a non-success response is an error.
    pub async fn request(&mut self, request: Message) -> AppResult<Message> {
        self.exchange(request).await?.ensure_success()
    }

    /// Sends an already materialised body as a PUT to `destination`.
    pub async fn put(&mut self, content: ContentBuffer, destination: &ResourceUri) -> AppResult<Message> {
        let mut request = Message::new(Command::Put, destination.to_local().to_string());
        request.set_content(content);
        self.request(request).await
    }

    /// Uploads a local file, switching to parallel splits above the large
    /// file threshold.
    pub async fn put_file(&mut self, local: &Path, destination: &ResourceUri) -> AppResult<Message> {
        let connector = Arc::new(TcpConnector::new(self.config.clone()));
        ParallelUploader::new(connector).put(self, local, destination).await
    }

    /// Downloads `source` into `local`, replacing it. Returns the length.
    pub async fn get_file(&mut self, source: &ResourceUri, local: &Path) -> AppResult<u64> {
        let request = Message::new(Command::Get, source.to_local().to_string());
        let mut response = self.request(request).await?;
        let mut content = response.take_content().ok_or_else(|| {
            AppError::response(
                ResponseCode::BadResponse,
                format!("GET {} returned no content", source),
            )
        })?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        content.rename_to(local).await?;
        Ok(content.len())
    }

    /// Paths matching `pattern`, as reported by the remote agent.
    pub async fn list(&mut self, pattern: &ResourceUri) -> AppResult<Vec<String>> {
        let request = Message::new(Command::List, pattern.to_local().to_string());
        let response = self.request(request).await?;
        Ok(response.reasons().into_iter().map(str::to_string).collect())
    }

    /// Removes everything matching `pattern`. Returns the number removed.
    pub async fn delete(&mut self, pattern: &ResourceUri) -> AppResult<u64> {
        let request = Message::new(Command::Delete, pattern.to_local().to_string());
        let response = self.request(request).await?;
        Ok(response
            .headers
            .get_parsed(headers::DELETED_COUNT)?
            .unwrap_or_default())
    }

    /// Length of `resource` when it exists.
    pub async fn exist(&mut self, resource: &ResourceUri) -> AppResult<Option<u64>> {
        let request = Message::new(Command::Info, "/exist")
            .with_header(headers::TRANSFER_SOURCE_URI, resource.to_local().to_string())?;
        let response = self.exchange(request).await?;
        match response.response_code() {
            Some(ResponseCode::NotExist) => Ok(None),
            _ => {
                let response = response.ensure_success()?;
                Ok(Some(
                    response
                        .headers
                        .get_parsed(headers::RESOURCE_LENGTH)?
                        .unwrap_or_default(),
                ))
            }
        }
    }

    /// The remote agent's status, `UP` when healthy.
    pub async fn health(&mut self) -> AppResult<String> {
        let response = self.request(Message::new(Command::Info, "/health")).await?;
        Ok(response.header(headers::STATUS).unwrap_or_default().to_string())
    }

    /// Allow-listed configuration of the remote agent.
    pub async fn info(&mut self) -> AppResult<Vec<(String, String)>> {
        let response = self.request(Message::new(Command::Info, "/info")).await?;
        Ok(response
            .headers
            .get_all(headers::CONFIG_ENTRY)
            .into_iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    pub async fn open_session(&mut self) -> AppResult<String> {
        let response = self.request(Message::new(Command::Action, "/session")).await?;
        response
            .header(headers::SESSION_ID)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::response(ResponseCode::BadResponse, "session response carries no id")
            })
    }

    /// Asks the remote agent to merge `splits` into `destination`.
    pub async fn merge(
        &mut self,
        destination: &ResourceUri,
        session_id: &str,
        splits: &[String],
    ) -> AppResult<Message> {
        let mut request = Message::new(Command::Action, "/merge")
            .with_header(
                headers::TRANSFER_DESTINATION_URI,
                destination.to_local().to_string(),
            )?
            .with_header(headers::SESSION_ID, session_id)?;
        for split in splits {
            request.headers.add(headers::MERGE_RESOURCE, split.clone())?;
        }
        self.request(request).await
    }

    /// Asks the remote agent to shut down.
    pub async fn shutdown_agent(&mut self) -> AppResult<()> {
        self.request(Message::new(Command::Action, "/shutdown")).await?;
        Ok(())
    }

    /// Runs a TRANSFER on the remote agent. A batch in which some tasks
    /// failed still returns its per-task result.
    pub async fn transfer(&mut self, request: &TransferRequest) -> AppResult<TransferResult> {
        let response = self.exchange(request.to_message()?).await?;
        match response.response_code() {
            Some(ResponseCode::TransferFailed) if response.headers.contains(headers::FAILED_COUNT) => {
                TransferResult::from_response(&response)
            }
            _ => TransferResult::from_response(&response.ensure_success()?),
        }
    }

    /// Closes the connection. Fails when a request is still unanswered.
    pub async fn close(mut self) -> AppResult<()> {
        if self.in_flight != 0 {
            return Err(AppError::PrematureClosure(self.in_flight));
        }
        self.connection.shutdown().await?;
        debug!("closed connection to {}", self.addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_peer_closing_after_the_request_leaves_it_unanswered() -> AppResult<()> {
        let config = Arc::new(AgentConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let server_config = config.clone();
        let peer = tokio::spawn(async move {
            let (socket, _) = listener.accept().await?;
            let mut connection = Connection::server(socket, &server_config);
            let request = connection.read_message().await?;
            // dropping the connection closes it without an answer
            Ok::<_, AppError>(request.map(|m| m.uri))
        });

        let mut client = AgentClient::connect(&AgentAddr::new("127.0.0.1", port), config).await?;
        let err = client
            .exchange(Message::new(Command::Get, "/a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PrematureClosure(1)));
        assert_eq!(client.in_flight(), 1);
        assert_eq!(peer.await??, Some("/a.txt".to_string()));

        let err = client
            .exchange(Message::new(Command::Get, "/b.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IllegalState(_)));
        assert!(matches!(
            client.close().await,
            Err(AppError::PrematureClosure(1))
        ));
        Ok(())
    }
}
