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

use std::io::ErrorKind;

use crate::protocol::ResponseCode;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("accept error: {0}")]
    Accept(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// transfer errors
    #[error("content out of size: declared {declared} bytes, attempted to write {attempted}")]
    OutOfSize { declared: u64, attempted: u64 },

    #[error("connection closed prematurely with {0} unanswered request(s)")]
    PrematureClosure(usize),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("{code}: {reason}")]
    Response { code: ResponseCode, reason: String },
}

impl AppError {
    /// Builds an error that already carries its wire response code.
    pub fn response(code: ResponseCode, reason: impl Into<String>) -> Self {
        AppError::Response {
            code,
            reason: reason.into(),
        }
    }

    /// Maps this error onto the response code catalog.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            AppError::Response { code, .. } => *code,
            AppError::Timeout(_) => ResponseCode::TimeoutOccurred,
            AppError::MalformedProtocol(_) | AppError::OutOfSize { .. } => {
                ResponseCode::BadRequest
            }
            AppError::InvalidValue(_) => ResponseCode::BadRequest,
            AppError::SessionExpired(_) => ResponseCode::NotExist,
            AppError::IoError(e) => match e.kind() {
                ErrorKind::NotFound => ResponseCode::NotExist,
                ErrorKind::PermissionDenied => ResponseCode::FilePermissionError,
                ErrorKind::TimedOut => ResponseCode::TimeoutOccurred,
                _ => ResponseCode::InternalServerError,
            },
            _ => ResponseCode::InternalServerError,
        }
    }

    /// The human readable part sent in the `Reason` header.
    pub fn reason(&self) -> String {
        match self {
            AppError::Response { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Re-labels unexpected errors with `code`; errors that already carry a
    /// catalog code keep it.
    pub fn or_code(self, code: ResponseCode) -> Self {
        match self {
            AppError::Response { .. } | AppError::Timeout(_) => self,
            other => AppError::response(code, other.to_string()),
        }
    }
}

impl<T> From<async_channel::SendError<T>> for AppError {
    fn from(value: async_channel::SendError<T>) -> Self {
        AppError::ChannelSendError(value.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for AppError {
    fn from(value: tokio::sync::oneshot::error::RecvError) -> Self {
        AppError::ChannelRecvError(value.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        AppError::IllegalState(format!("worker task failed: {}", value))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(value: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_mapping() {
        let err = AppError::response(ResponseCode::AlreadyExist, "/a exists");
        assert_eq!(err.response_code(), ResponseCode::AlreadyExist);
        assert_eq!(err.reason(), "/a exists");

        let err = AppError::IoError(std::io::Error::new(ErrorKind::NotFound, "gone"));
        assert_eq!(err.response_code(), ResponseCode::NotExist);

        let err = AppError::OutOfSize {
            declared: 1,
            attempted: 2,
        };
        assert_eq!(err.response_code(), ResponseCode::BadRequest);
        assert_eq!(
            AppError::IllegalState("x".into()).response_code(),
            ResponseCode::InternalServerError
        );
    }

    #[test]
    fn test_or_code_keeps_catalog_codes() {
        let err = AppError::response(ResponseCode::MergeFailed, "m").or_code(ResponseCode::BadResponse);
        assert_eq!(err.response_code(), ResponseCode::MergeFailed);
        let err = AppError::IllegalState("boom".into()).or_code(ResponseCode::TransferFailed);
        assert_eq!(err.response_code(), ResponseCode::TransferFailed);
    }
}
