use std::path::{Path, PathBuf};

use tracing::info;

use crate::parallel::{merge_splits, order_splits};
use crate::protocol::{headers, Message, ResourceUri, ResponseCode};
use crate::request::{write_ack, HandlerOutcome, PostStep, RequestContext};
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug)]
pub struct MergeRequest {
    pub destination: ResourceUri,
    pub session_id: String,
    /// split file names, in any order
    pub splits: Vec<String>,
}

#[derive(Debug)]
pub enum ActionRequest {
    Session,
    Merge(MergeRequest),
    Shutdown,
}

pub struct ActionRequestHandler;

impl ApiHandler for ActionRequestHandler {
    type Request = ActionRequest;

    async fn handle_request(
        &self,
        request: ActionRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let agent = &context.agent;
        match request {
            ActionRequest::Session => {
                let session = agent.sessions.create_session();
                let response = Message::response(ResponseCode::Ok, context.uri.clone())
                    .with_header(headers::SESSION_ID, session.id())?;
                Ok(HandlerOutcome::respond(response))
            }
            ActionRequest::Merge(merge) => merge_request(merge, context).await,
            ActionRequest::Shutdown => {
                info!("shutdown requested by {}", context.remote);
                let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
                response.add_reason("shutting down");
                Ok(HandlerOutcome::respond(response).on_success(PostStep::Shutdown))
            }
        }
    }
}

async fn merge_request(merge: MergeRequest, context: &RequestContext) -> AppResult<HandlerOutcome> {
    let agent = &context.agent;
    let MergeRequest {
        destination,
        session_id,
        splits,
    } = merge;
    let path = agent.repository.resolve_exact(&destination)?;
    let ordered = order_splits(&splits)?;
    let session = agent.sessions.get_session(&session_id).ok_or_else(|| {
        AppError::response(
            ResponseCode::NotExist,
            format!("unknown session {}", session_id),
        )
    })?;
    let chain = agent.interceptors.chain(&destination.options.interceptors)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let split_paths: Vec<PathBuf> = ordered.iter().map(|name| dir.join(name)).collect();
    let merged = chain
        .around_receive(
            &path,
            merge_splits(
                &path,
                &split_paths,
                destination.options.on_exist,
                &agent.path_locks,
                &session,
            ),
        )
        .await;
    // whatever is still tracked at this point is not part of the destination
    agent.sessions.expire(&session_id).await;
    let acked = match merged {
        Ok(length) if destination.options.create_ack => write_ack(&agent.repository, &path)
            .await
            .map(|_| length),
        other => other,
    };
    let length = match acked {
        Ok(length) => length,
        Err(e) => {
            return Ok(HandlerOutcome::failed_completion(
                &e,
                context.uri.clone(),
                chain,
                path,
            ))
        }
    };
    info!(
        "merged {} split(s) into {} for {}",
        split_paths.len(),
        path.display(),
        context.remote
    );

    let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
    response
        .headers
        .set(headers::RESOURCE_LENGTH, length.to_string())?;
    Ok(HandlerOutcome::respond(response).on_complete(PostStep::AfterCompletion { chain, path }))
}
