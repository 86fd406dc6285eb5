use crate::content::ContentBuffer;
use crate::{AppError, AppResult};

use super::headers::{self, Headers};
use super::{Command, ResponseCode};

/// Outcome of decoding a message head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    Success,
    Failure(String),
}

impl DecodeResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, DecodeResult::Failure(_))
    }
}

/// One request or response: initial line, headers and an optional body.
#[derive(Debug)]
pub struct Message {
    pub command: Command,
    pub uri: String,
    pub headers: Headers,
    pub content: Option<ContentBuffer>,
    pub decode_result: DecodeResult,
}

impl Message {
    pub fn new(command: Command, uri: impl Into<String>) -> Self {
        Message {
            command,
            uri: uri.into(),
            headers: Headers::new(),
            content: None,
            decode_result: DecodeResult::Success,
        }
    }

    /// A response to `uri` carrying `code`.
    pub fn response(code: ResponseCode, uri: impl Into<String>) -> Self {
        let mut message = Message::new(Command::Response, uri);
        message.set_response_code(code);
        message
    }

    /// A response built from an error, its reason becomes a `Reason` line.
    pub fn error_response(err: &AppError, uri: impl Into<String>) -> Self {
        let mut message = Message::response(err.response_code(), uri);
        message.add_reason(err.reason());
        message
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> AppResult<Self> {
        self.headers.add(name, value)?;
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_response_code(&mut self, code: ResponseCode) {
        // a decimal number always satisfies the value validator
        let _ = self.headers.set(headers::RESPONSE_CODE, code.code().to_string());
    }

    pub fn response_code(&self) -> Option<ResponseCode> {
        self.headers
            .get(headers::RESPONSE_CODE)
            .and_then(|raw| raw.split_whitespace().next())
            .and_then(|raw| raw.parse::<u16>().ok())
            .and_then(ResponseCode::from_code)
    }

    /// Adds a `Reason` line; line breaks are flattened so arbitrary error
    /// text can never corrupt the frame.
    pub fn add_reason(&mut self, reason: impl AsRef<str>) {
        let flat: String = reason
            .as_ref()
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let _ = self.headers.add(headers::REASON, flat);
    }

    pub fn reasons(&self) -> Vec<&str> {
        self.headers.get_all(headers::REASON)
    }

    pub fn content_length(&self) -> AppResult<Option<u64>> {
        self.headers.get_parsed::<u64>(headers::CONTENT_LENGTH)
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get(headers::TRANSFER_ENCODING)
            .map(|v| v.trim().eq_ignore_ascii_case(headers::CHUNKED))
            .unwrap_or(false)
    }

    /// Whether a body follows the head on the wire.
    pub fn has_body(&self) -> bool {
        self.is_chunked() || self.headers.contains(headers::CONTENT_LENGTH)
    }

    pub fn is_close(&self) -> bool {
        self.headers
            .get(headers::CONNECTION)
            .map(|v| v.trim().eq_ignore_ascii_case(headers::CLOSE))
            .unwrap_or(false)
    }

    pub fn set_content(&mut self, content: ContentBuffer) {
        self.content = Some(content);
    }

    pub fn take_content(&mut self) -> Option<ContentBuffer> {
        self.content.take()
    }

    /// Turns a non-success response into `AppError::Response`.
    pub fn ensure_success(self) -> AppResult<Self> {
        match self.response_code() {
            Some(code) if code.is_success() => Ok(self),
            Some(code) => Err(AppError::response(code, self.reasons().join("; "))),
            None => Err(AppError::response(
                ResponseCode::BadResponse,
                format!("response to {} carries no valid response code", self.uri),
            )),
        }
    }

    /// Copy of the initial line and headers without the body.
    pub fn head(&self) -> Message {
        Message {
            command: self.command,
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            content: None,
            decode_result: self.decode_result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_round_trip() {
        let mut message = Message::response(ResponseCode::AlreadyExist, "/a");
        assert_eq!(message.response_code(), Some(ResponseCode::AlreadyExist));
        message.set_response_code(ResponseCode::Ok);
        assert_eq!(message.headers.get_all(headers::RESPONSE_CODE), vec!["200"]);
    }

    #[test]
    fn test_ensure_success() {
        let mut message = Message::response(ResponseCode::TransferFailed, "/x");
        message.add_reason("agent down\r\nsecond line");
        let err = message.ensure_success().unwrap_err();
        assert_eq!(err.response_code(), ResponseCode::TransferFailed);
        assert_eq!(err.reason(), "agent down  second line");

        let message = Message::new(Command::Response, "/y");
        assert_eq!(
            message.ensure_success().unwrap_err().response_code(),
            ResponseCode::BadResponse
        );
    }

    #[test]
    fn test_body_detection() -> AppResult<()> {
        let message = Message::new(Command::Put, "/a").with_header("content-length", "0")?;
        assert!(message.has_body());
        assert!(!message.is_chunked());
        let message = Message::new(Command::Put, "/a").with_header("Transfer-Encoding", "Chunked")?;
        assert!(message.is_chunked());
        assert!(!Message::new(Command::Get, "/a").has_body());
        Ok(())
    }
}
