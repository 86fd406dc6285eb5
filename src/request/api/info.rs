use tokio::fs;

use crate::protocol::{headers, Message, ResourceUri, ResponseCode};
use crate::request::{HandlerOutcome, RequestContext};
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug)]
pub enum InfoRequest {
    Health,
    Info,
    /// existence and length of one resource
    Exist(ResourceUri),
}

pub struct InfoRequestHandler;

fn status(up: bool) -> &'static str {
    if up {
        "UP"
    } else {
        "DOWN"
    }
}

impl ApiHandler for InfoRequestHandler {
    type Request = InfoRequest;

    async fn handle_request(
        &self,
        request: InfoRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let agent = &context.agent;
        let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
        match request {
            InfoRequest::Health => {
                response
                    .headers
                    .set(headers::STATUS, status(agent.status.is_up()))?;
            }
            InfoRequest::Info => {
                response
                    .headers
                    .set(headers::STATUS, status(agent.status.is_up()))?;
                for (key, value) in agent.status.entries() {
                    response
                        .headers
                        .add(headers::CONFIG_ENTRY, format!("{}={}", key, value))?;
                }
            }
            InfoRequest::Exist(resource) => {
                let path = agent.repository.resolve_exact(&resource)?;
                let length = match fs::metadata(&path).await {
                    Ok(metadata) if metadata.is_file() => metadata.len(),
                    _ => {
                        return Err(AppError::response(
                            ResponseCode::NotExist,
                            format!("{} does not exist", resource.path),
                        ))
                    }
                };
                response
                    .headers
                    .set(headers::RESOURCE_LENGTH, length.to_string())?;
            }
        }
        Ok(HandlerOutcome::respond(response))
    }
}
