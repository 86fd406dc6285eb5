use tracing::debug;

use crate::content::ContentBuffer;
use crate::protocol::{headers, Message, ResourceUri, ResponseCode};
use crate::request::{HandlerOutcome, PostStep, RequestContext};
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug)]
pub struct GetRequest {
    pub source: ResourceUri,
}

pub struct GetRequestHandler;

impl ApiHandler for GetRequestHandler {
    type Request = GetRequest;

    async fn handle_request(
        &self,
        request: GetRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let agent = &context.agent;
        let source = request.source;
        let path = agent.repository.resolve_exact(&source)?;
        let chain = agent.interceptors.chain(&source.options.interceptors)?;

        let opened = async {
            if !path.is_file() {
                return Err(AppError::response(
                    ResponseCode::NotExist,
                    format!("{} does not exist", source.path),
                ));
            }
            chain.pre_transfer(&path)?;
            ContentBuffer::adopt(&path).await
        }
        .await;
        let content = match opened {
            Ok(content) => content,
            Err(e) => {
                chain.post_transfer(&path, Some(&e));
                return Ok(HandlerOutcome::failed_completion(
                    &e,
                    context.uri.clone(),
                    chain,
                    path,
                ));
            }
        };
        debug!(
            "serving {} ({} bytes) to {}",
            path.display(),
            content.len(),
            context.remote
        );

        let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
        response
            .headers
            .set(headers::RESOURCE_LENGTH, content.len().to_string())?;
        response.set_content(content);

        let mut outcome = HandlerOutcome::respond(response)
            .on_success(PostStep::PostTransfer {
                chain: chain.clone(),
                path: path.clone(),
            })
            .on_failure(PostStep::PostTransfer {
                chain: chain.clone(),
                path: path.clone(),
            });
        if source.options.delete_on_exit {
            outcome = outcome.on_success(PostStep::RemoveFile(path.clone()));
        }
        Ok(outcome.on_complete(PostStep::AfterCompletion { chain, path }))
    }
}
