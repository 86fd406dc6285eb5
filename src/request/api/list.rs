use crate::protocol::{headers, Message, ResourceUri, ResponseCode};
use crate::request::{HandlerOutcome, RequestContext};
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug)]
pub struct ListRequest {
    pub pattern: ResourceUri,
}

pub struct ListRequestHandler;

impl ApiHandler for ListRequestHandler {
    type Request = ListRequest;

    async fn handle_request(
        &self,
        request: ListRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let repository = &context.agent.repository;
        let pattern = request.pattern;
        let matches = repository.matches(&pattern)?;
        if matches.is_empty() {
            return Err(AppError::response(
                ResponseCode::NotExist,
                format!("nothing matches {}", pattern.path),
            ));
        }

        let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
        for path in &matches {
            response.add_reason(repository.uri_path(&pattern, path));
        }
        response
            .headers
            .set(headers::RESOURCE_LENGTH, matches.len().to_string())?;
        Ok(HandlerOutcome::respond(response))
    }
}
