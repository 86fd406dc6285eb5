use std::path::PathBuf;

use tokio::fs;
use tracing::{info, warn};

use crate::protocol::Message;
use crate::AppError;

use super::{AgentContext, InterceptorChain};

/// Work left to do once the response of a request has been written.
#[derive(Debug)]
pub enum PostStep {
    /// begin an orderly shutdown of the agent
    Shutdown,
    RemoveFile(PathBuf),
    PostTransfer {
        chain: InterceptorChain,
        path: PathBuf,
    },
    AfterCompletion {
        chain: InterceptorChain,
        path: PathBuf,
    },
}

#[derive(Debug, Default)]
pub struct PostSteps {
    pub on_success: Vec<PostStep>,
    pub on_failure: Vec<PostStep>,
    pub on_complete: Vec<PostStep>,
}

impl PostSteps {
    pub fn is_empty(&self) -> bool {
        self.on_success.is_empty() && self.on_failure.is_empty() && self.on_complete.is_empty()
    }

    /// Runs the steps matching how the exchange ended. `failure` is `None`
    /// when a success response reached the peer.
    pub async fn run(self, failure: Option<&AppError>, context: &AgentContext) {
        let first = match failure {
            None => self.on_success,
            Some(_) => self.on_failure,
        };
        for step in first.into_iter().chain(self.on_complete) {
            run_step(step, failure, context).await;
        }
    }
}

async fn run_step(step: PostStep, failure: Option<&AppError>, context: &AgentContext) {
    match step {
        PostStep::Shutdown => {
            info!("shutdown requested by a peer");
            // nobody listening means the agent is already going down
            let _ = context.notify_shutdown.send(());
        }
        PostStep::RemoveFile(path) => {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("failed to remove {} after delivery: {}", path.display(), e);
            }
        }
        PostStep::PostTransfer { chain, path } => chain.post_transfer(&path, failure),
        PostStep::AfterCompletion { chain, path } => chain.after_completion(&path, failure),
    }
}

/// What a handler produced: the response plus the steps to run after it.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub response: Message,
    pub steps: PostSteps,
}

impl HandlerOutcome {
    pub fn respond(response: Message) -> Self {
        HandlerOutcome {
            response,
            steps: PostSteps::default(),
        }
    }

    /// Answers with `err` and still hands the outcome to the completion
    /// hooks of `chain` once the response is written.
    pub fn failed_completion(
        err: &AppError,
        uri: impl Into<String>,
        chain: InterceptorChain,
        path: PathBuf,
    ) -> Self {
        let uri = uri.into();
        warn!("{} on {} failed: {}", uri, path.display(), err);
        HandlerOutcome::respond(Message::error_response(err, uri))
            .on_complete(PostStep::AfterCompletion { chain, path })
    }

    pub fn on_success(mut self, step: PostStep) -> Self {
        self.steps.on_success.push(step);
        self
    }

    pub fn on_failure(mut self, step: PostStep) -> Self {
        self.steps.on_failure.push(step);
        self
    }

    pub fn on_complete(mut self, step: PostStep) -> Self {
        self.steps.on_complete.push(step);
        self
    }

    pub fn into_parts(self) -> (Message, PostSteps) {
        (self.response, self.steps)
    }
}
