use std::fmt;
use std::str::FromStr;

use crate::{AppError, AppResult};

/// The token that opens every message's initial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Put,
    Get,
    List,
    Delete,
    Info,
    Action,
    Transfer,
    Response,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Put => "PUT",
            Command::Get => "GET",
            Command::List => "LIST",
            Command::Delete => "DELETE",
            Command::Info => "INFO",
            Command::Action => "ACTION",
            Command::Transfer => "TRANSFER",
            Command::Response => "RESPONSE",
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Command::Response)
    }
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let command = match s {
            "PUT" => Command::Put,
            "GET" => Command::Get,
            "LIST" => Command::List,
            "DELETE" => Command::Delete,
            "INFO" => Command::Info,
            "ACTION" => Command::Action,
            "TRANSFER" => Command::Transfer,
            "RESPONSE" => Command::Response,
            other => {
                return Err(AppError::MalformedProtocol(format!(
                    "unknown command: {}",
                    other
                )))
            }
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
