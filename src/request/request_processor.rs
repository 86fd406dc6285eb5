// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing::{trace, warn};

use crate::protocol::Message;
use crate::request::api::ActionRequestHandler;
use crate::request::api::DeleteRequestHandler;
use crate::request::api::GetRequestHandler;
use crate::request::api::InfoRequestHandler;
use crate::request::api::ListRequestHandler;
use crate::request::api::PutRequestHandler;
use crate::request::api::TransferRequestHandler;

use crate::request::ApiRequest;
use crate::request::HandlerOutcome;
use crate::request::RequestContext;

use super::api::ApiHandler;

/// general async handler
async fn execute_handler<H>(
    handler: H,
    request: H::Request,
    context: &RequestContext,
) -> HandlerOutcome
where
    H: ApiHandler + Sync,
{
    match handler.handle_request(request, context).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{} from {} failed: {}", context.uri, context.remote, e);
            HandlerOutcome::respond(Message::error_response(&e, context.uri.clone()))
        }
    }
}

pub struct RequestProcessor;

impl RequestProcessor {
    pub async fn process_request(message: Message, context: &RequestContext) -> HandlerOutcome {
        trace!(
            "processing {} {} from {} on connection {}",
            message.command,
            message.uri,
            context.remote,
            context.connection_id
        );
        let request = match ApiRequest::parse_from(message) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting {} from {}: {}", context.uri, context.remote, e);
                return HandlerOutcome::respond(Message::error_response(&e, context.uri.clone()));
            }
        };
        match request {
            ApiRequest::Put(request) => {
                let handler = PutRequestHandler;
                execute_handler(handler, request, context).await
            }
            ApiRequest::Get(request) => {
                let handler = GetRequestHandler;
                execute_handler(handler, request, context).await
            }
            ApiRequest::List(request) => {
                let handler = ListRequestHandler;
                execute_handler(handler, request, context).await
            }
            ApiRequest::Delete(request) => {
                let handler = DeleteRequestHandler;
                execute_handler(handler, request, context).await
            }
            ApiRequest::Info(request) => {
                let handler = InfoRequestHandler;
                execute_handler(handler, request, context).await
            }
            ApiRequest::Action(request) => {
                let handler = ActionRequestHandler;
                execute_handler(handler, request, context).await
            }
            ApiRequest::Transfer(request) => {
                let handler = TransferRequestHandler;
                execute_handler(handler, request, context).await
            }
        }
    }
}
