use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use crate::content::ContentBuffer;
use crate::protocol::{headers, Message, ResourceUri, ResponseCode};
use crate::request::{
    check_on_exist, write_ack, AgentContext, HandlerOutcome, PostStep, RequestContext,
};
use crate::session::ResourceSession;
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug)]
pub struct PutRequest {
    pub destination: ResourceUri,
    pub content: ContentBuffer,
    /// set by split workers of a parallel upload
    pub session_id: Option<String>,
}

pub struct PutRequestHandler;

impl ApiHandler for PutRequestHandler {
    type Request = PutRequest;

    async fn handle_request(
        &self,
        request: PutRequest,
        context: &RequestContext,
    ) -> AppResult<HandlerOutcome> {
        let agent = &context.agent;
        let PutRequest {
            destination,
            mut content,
            session_id,
        } = request;
        let path = agent.repository.resolve_exact(&destination)?;
        let session = match &session_id {
            Some(id) => Some(agent.sessions.get_session(id).ok_or_else(|| {
                AppError::response(ResponseCode::NotExist, format!("unknown session {}", id))
            })?),
            None => None,
        };
        let chain = agent.interceptors.chain(&destination.options.interceptors)?;

        let stored = chain
            .around_receive(
                &path,
                store(agent, &destination, &path, &mut content, session.as_deref()),
            )
            .await;
        let length = match stored {
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
            "stored {} ({} bytes) from {}",
            path.display(),
            length,
            context.remote
        );

        let mut response = Message::response(ResponseCode::Ok, context.uri.clone());
        response
            .headers
            .set(headers::RESOURCE_LENGTH, length.to_string())?;
        Ok(HandlerOutcome::respond(response)
            .on_complete(PostStep::AfterCompletion { chain, path }))
    }
}

/// Moves the received body into place under the destination's lock.
async fn store(
    agent: &AgentContext,
    destination: &ResourceUri,
    path: &Path,
    content: &mut ContentBuffer,
    session: Option<&ResourceSession>,
) -> AppResult<u64> {
    if let Some(parent) = path.parent() {
        agent.path_locks.create_dir_all(parent).await?;
    }
    let _guard = agent.path_locks.lock(path).await;
    let append = check_on_exist(path, destination.options.on_exist).await?;

    if let Some(session) = session {
        if destination.options.delete_on_exit {
            session.processing(path)?;
        } else {
            session.ensure_active()?;
            session.touch();
        }
    }

    let length = if append {
        content.append_into(path).await?;
        fs::metadata(path).await?.len()
    } else {
        content.rename_to(path).await?;
        content.len()
    };

    if let Some(session) = session {
        // the sweep may have invalidated the session while the file moved
        if let Err(e) = session.ensure_active() {
            if !append {
                if let Err(remove) = fs::remove_file(path).await {
                    warn!("failed to remove orphaned {}: {}", path.display(), remove);
                }
            }
            return Err(e);
        }
    }
    if destination.options.create_ack {
        write_ack(&agent.repository, path).await?;
    }
    Ok(length)
}
