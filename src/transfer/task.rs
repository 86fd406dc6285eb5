use std::time::Duration;

use crate::protocol::{headers, AgentAddr, Command, Message, ResponseCode, ResourceUri};
use crate::{AppError, AppResult};

/// One file to move: a source on this agent and a destination with its
/// ordered list of candidate agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub source: ResourceUri,
    pub destination: ResourceUri,
}

impl TransferTask {
    pub fn new(source: ResourceUri, destination: ResourceUri) -> Self {
        TransferTask {
            source,
            destination,
        }
    }

    /// Destination agents in failover order.
    pub fn candidates(&self) -> &[AgentAddr] {
        &self.destination.agents
    }
}

/// Outcome of a batch. Every task contributes exactly one success or one
/// failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferResult {
    pub succeeded: usize,
    pub failed: usize,
    pub transferred: Vec<String>,
    pub reasons: Vec<String>,
}

impl TransferResult {
    pub fn record_success(&mut self, task: &TransferTask) {
        self.succeeded += 1;
        self.transferred.push(task.destination.to_string());
    }

    pub fn record_failure(&mut self, task: &TransferTask, reason: impl AsRef<str>) {
        self.failed += 1;
        self.reasons.push(format!(
            "{} -> {}: {}",
            task.source,
            task.destination,
            reason.as_ref()
        ));
    }

    pub fn absorb(&mut self, other: TransferResult) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.transferred.extend(other.transferred);
        self.reasons.extend(other.reasons);
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// `OK` when every task succeeded, `TRANSFER_FAILED` otherwise; both
    /// carry the per-task details.
    pub fn to_response(&self, uri: impl Into<String>) -> AppResult<Message> {
        let code = if self.is_success() {
            ResponseCode::Ok
        } else {
            ResponseCode::TransferFailed
        };
        let mut response = Message::response(code, uri);
        for transferred in &self.transferred {
            response.headers.add(headers::TRANSFERRED_RESOURCE, transferred.clone())?;
        }
        for reason in &self.reasons {
            response.add_reason(reason);
        }
        response
            .headers
            .set(headers::SUCCEEDED_COUNT, self.succeeded.to_string())?;
        response
            .headers
            .set(headers::FAILED_COUNT, self.failed.to_string())?;
        Ok(response)
    }

    /// Reads the details back from a TRANSFER response.
    pub fn from_response(response: &Message) -> AppResult<Self> {
        Ok(TransferResult {
            succeeded: response
                .headers
                .get_parsed(headers::SUCCEEDED_COUNT)?
                .unwrap_or_default(),
            failed: response
                .headers
                .get_parsed(headers::FAILED_COUNT)?
                .unwrap_or_default(),
            transferred: response
                .headers
                .get_all(headers::TRANSFERRED_RESOURCE)
                .into_iter()
                .map(str::to_string)
                .collect(),
            reasons: response.reasons().into_iter().map(str::to_string).collect(),
        })
    }
}

/// The parameters of a TRANSFER command.
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    pub sources: Vec<ResourceUri>,
    pub destinations: Vec<ResourceUri>,
    /// wait for the outcome instead of returning at once
    pub validation: bool,
    pub timeout: Option<Duration>,
    pub interceptors: Vec<String>,
    /// candidates for destinations that name no agent themselves
    pub destination_agents: Vec<AgentAddr>,
}

impl TransferRequest {
    pub fn new(sources: Vec<ResourceUri>, destinations: Vec<ResourceUri>) -> Self {
        TransferRequest {
            sources,
            destinations,
            ..Default::default()
        }
    }

    pub fn validated(mut self, timeout: Option<Duration>) -> Self {
        self.validation = true;
        self.timeout = timeout;
        self
    }

    pub fn to_message(&self) -> AppResult<Message> {
        let mut message = Message::new(Command::Transfer, "/");
        for source in &self.sources {
            message
                .headers
                .add(headers::TRANSFER_SOURCE_URI, source.to_string())?;
        }
        for destination in &self.destinations {
            message
                .headers
                .add(headers::TRANSFER_DESTINATION_URI, destination.to_string())?;
        }
        let validation = if self.validation { "on" } else { "off" };
        message.headers.add(headers::TRANSFER_VALIDATION, validation)?;
        if let Some(timeout) = self.timeout {
            message
                .headers
                .add(headers::TRANSFER_TIMEOUT_SECONDS, timeout.as_secs().to_string())?;
        }
        for interceptor in &self.interceptors {
            message
                .headers
                .add(headers::TRANSFER_INTERCEPTOR, interceptor.clone())?;
        }
        if !self.destination_agents.is_empty() {
            let agents: Vec<String> = self.destination_agents.iter().map(|a| a.to_string()).collect();
            message
                .headers
                .add(headers::DESTINATION_AGENT, agents.join(","))?;
        }
        Ok(message)
    }

    pub fn from_message(message: &Message) -> AppResult<Self> {
        let parse_all = |name: &str| -> AppResult<Vec<ResourceUri>> {
            message
                .headers
                .get_all(name)
                .into_iter()
                .map(|raw| {
                    raw.parse::<ResourceUri>()
                        .map_err(|e| AppError::response(ResponseCode::BadRequest, e.to_string()))
                })
                .collect()
        };
        let validation = match message.header(headers::TRANSFER_VALIDATION) {
            None => false,
            Some(v) if v.eq_ignore_ascii_case("on") || v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("off") || v.eq_ignore_ascii_case("false") => false,
            Some(v) => {
                return Err(AppError::response(
                    ResponseCode::BadRequest,
                    format!("{}: {}", headers::TRANSFER_VALIDATION, v),
                ))
            }
        };
        let timeout = message
            .headers
            .get_parsed::<u64>(headers::TRANSFER_TIMEOUT_SECONDS)
            .map_err(|e| AppError::response(ResponseCode::BadRequest, e.to_string()))?
            .map(Duration::from_secs);
        let destination_agents = match message.header(headers::DESTINATION_AGENT) {
            Some(raw) => raw
                .split(',')
                .filter(|a| !a.trim().is_empty())
                .map(str::parse)
                .collect::<AppResult<Vec<AgentAddr>>>()
                .map_err(|e| AppError::response(ResponseCode::BadRequest, e.to_string()))?,
            None => Vec::new(),
        };
        Ok(TransferRequest {
            sources: parse_all(headers::TRANSFER_SOURCE_URI)?,
            destinations: parse_all(headers::TRANSFER_DESTINATION_URI)?,
            validation,
            timeout,
            interceptors: message
                .headers
                .get_all(headers::TRANSFER_INTERCEPTOR)
                .into_iter()
                .map(str::to_string)
                .collect(),
            destination_agents,
        })
    }

    /// Pairs sources with destinations. The lists must be non-empty and of
    /// equal length, and every destination must end up with a candidate.
    pub fn tasks(&self) -> AppResult<Vec<TransferTask>> {
        if self.sources.is_empty() || self.sources.len() != self.destinations.len() {
            return Err(AppError::response(
                ResponseCode::BadRequest,
                format!(
                    "{} source uri(s) do not pair with {} destination uri(s)",
                    self.sources.len(),
                    self.destinations.len()
                ),
            ));
        }
        self.sources
            .iter()
            .zip(&self.destinations)
            .map(|(source, destination)| {
                let mut destination = destination.clone();
                if destination.agents.is_empty() {
                    destination.agents = self.destination_agents.clone();
                }
                if destination.agents.is_empty() {
                    return Err(AppError::response(
                        ResponseCode::BadRequest,
                        format!("no destination agent for {}", destination),
                    ));
                }
                Ok(TransferTask::new(source.clone(), destination))
            })
            .collect()
    }
}
