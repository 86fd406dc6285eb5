use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::network::TcpConnector;
use crate::protocol::{Message, ResponseCode};
use crate::request::{HandlerOutcome, RequestContext};
use crate::transfer::{TransferOrchestrator, TransferRequest};
use crate::AppResult;

use super::ApiHandler;

pub struct TransferRequestHandler;

impl ApiHandler for TransferRequestHandler {
    type Request = TransferRequest;

    async fn handle_request(
        &self,
        request: TransferRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let agent = &context.agent;
        let tasks = request.tasks()?;
        let chain = agent.interceptors.chain(&request.interceptors)?;
        let orchestrator = TransferOrchestrator::new(
            Arc::new(TcpConnector::new(agent.config.clone())),
            agent.repository.clone(),
            chain,
        );
        let timeout = request
            .timeout
            .unwrap_or_else(|| Duration::from_secs(agent.config.transfer.default_timeout_secs));
        info!(
            "transfer of {} resource(s) requested by {}, validation {}",
            tasks.len(),
            context.remote,
            request.validation
        );

        let result = agent
            .transfers
            .submit(request.validation, timeout, async move {
                orchestrator.run(tasks).await
            })
            .await?;
        let response = match result {
            Some(result) => result.to_response(context.uri.clone())?,
            None => {
                let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
                response.add_reason("transfer accepted");
                response
            }
        };
        Ok(HandlerOutcome::respond(response))
    }
}
