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

use std::future::Future;

use crate::request::{HandlerOutcome, RequestContext};
use crate::AppResult;

pub trait ApiHandler {
    type Request: Send + 'static;

    /// Handles one request. An error becomes the response code and reason
    /// of the reply; a handler that needs its post steps to run after a
    /// failure answers with a failed outcome instead.
    fn handle_request(
        &self,
        request: Self::Request,
        context: &RequestContext,
    ) -> impl Future<Output = AppResult<HandlerOutcome>> + Send;
}
