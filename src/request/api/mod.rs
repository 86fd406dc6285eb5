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

mod action;
mod delete;
mod get;
mod handler;
mod info;
mod list;
mod put;
mod transfer;

// requests
pub use action::{ActionRequest, MergeRequest};
pub use delete::DeleteRequest;
pub use get::GetRequest;
pub use info::InfoRequest;
pub use list::ListRequest;
pub use put::PutRequest;

// handlers
pub use action::ActionRequestHandler;
pub use delete::DeleteRequestHandler;
pub use get::GetRequestHandler;
pub use handler::ApiHandler;
pub use info::InfoRequestHandler;
pub use list::ListRequestHandler;
pub use put::PutRequestHandler;
pub use transfer::TransferRequestHandler;
