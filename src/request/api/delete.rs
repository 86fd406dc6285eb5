use tokio::fs;
use tracing::{info, warn};

use crate::protocol::{headers, Message, ResourceUri, ResponseCode};
use crate::request::{HandlerOutcome, RequestContext};
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug)]
pub struct DeleteRequest {
    pub pattern: ResourceUri,
}

pub struct DeleteRequestHandler;

impl ApiHandler for DeleteRequestHandler {
    type Request = DeleteRequest;

    async fn handle_request(
        &self,
        request: DeleteRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let agent = &context.agent;
        let pattern = request.pattern;
        let matches = agent.repository.matches(&pattern)?;
        if matches.is_empty() {
            return Err(AppError::response(
                ResponseCode::NotExist,
                format!("nothing matches {}", pattern.path),
            ));
        }

        let mut deleted = Vec::with_capacity(matches.len());
        let mut failures = Vec::new();
        for path in matches {
            let _guard = agent.path_locks.lock(&path).await;
            let shown = agent.repository.uri_path(&pattern, &path);
            match fs::remove_file(&path).await {
                Ok(()) => deleted.push(shown),
                Err(e) => {
                    warn!("failed to delete {}: {}", path.display(), e);
                    failures.push(format!("{}: {}", shown, e));
                }
            }
        }
        info!(
            "deleted {} resource(s) matching {} for {}",
            deleted.len(),
            pattern.path,
            context.remote
        );

        let code = if failures.is_empty() {
            ResponseCode::Ok
        } else {
            ResponseCode::DeleteFailed
        };
        let mut response = Message::response(code, context.uri.clone());
        for line in deleted.iter().chain(&failures) {
            response.add_reason(line);
        }
        response
            .headers
            .set(headers::DELETED_COUNT, deleted.len().to_string())?;
        Ok(HandlerOutcome::respond(response))
    }
}
