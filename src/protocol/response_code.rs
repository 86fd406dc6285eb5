use std::fmt;

/// Coarse grouping of response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseGroup {
    Success,
    ClientError,
    ServerError,
    Unknown,
}

/// Response code catalog carried by the `Response-Code` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 200,

    /// client side error codes
    BadRequest = 400,
    FilePermissionError = 403,
    NotExist = 404,
    AlreadyExist = 409,
    SourceFileNotFound = 460,
    DestinationFileNotFound = 461,

    /// server side error codes
    InternalServerError = 500,
    BadResponse = 502,
    TimeoutOccurred = 504,
    TransferFailed = 520,
    MergeFailed = 521,
    DeleteFailed = 522,
}

impl ResponseCode {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Reason phrase written next to the numeric code.
    pub fn message(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::BadRequest => "Bad Request",
            ResponseCode::FilePermissionError => "File Permission Error",
            ResponseCode::NotExist => "Not Exist",
            ResponseCode::AlreadyExist => "Already Exist",
            ResponseCode::SourceFileNotFound => "Source File Not Found",
            ResponseCode::DestinationFileNotFound => "Destination File Not Found",
            ResponseCode::InternalServerError => "Internal Server Error",
            ResponseCode::BadResponse => "Bad Response",
            ResponseCode::TimeoutOccurred => "Timeout Occurred",
            ResponseCode::TransferFailed => "Transfer Failed",
            ResponseCode::MergeFailed => "Merge Failed",
            ResponseCode::DeleteFailed => "Delete Failed",
        }
    }

    pub fn group(&self) -> ResponseGroup {
        Self::group_of(self.code())
    }

    pub fn group_of(code: u16) -> ResponseGroup {
        match code {
            200..=299 => ResponseGroup::Success,
            400..=499 => ResponseGroup::ClientError,
            500..=599 => ResponseGroup::ServerError,
            _ => ResponseGroup::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        self.group() == ResponseGroup::Success
    }

    /// Resolves a numeric code. Numbers outside the catalog fall back to the
    /// generic member of their group; numbers outside every group yield `None`.
    pub fn from_code(code: u16) -> Option<Self> {
        let code = match code {
            200 => ResponseCode::Ok,
            400 => ResponseCode::BadRequest,
            403 => ResponseCode::FilePermissionError,
            404 => ResponseCode::NotExist,
            409 => ResponseCode::AlreadyExist,
            460 => ResponseCode::SourceFileNotFound,
            461 => ResponseCode::DestinationFileNotFound,
            500 => ResponseCode::InternalServerError,
            502 => ResponseCode::BadResponse,
            504 => ResponseCode::TimeoutOccurred,
            520 => ResponseCode::TransferFailed,
            521 => ResponseCode::MergeFailed,
            522 => ResponseCode::DeleteFailed,
            other => match Self::group_of(other) {
                ResponseGroup::Success => ResponseCode::Ok,
                ResponseGroup::ClientError => ResponseCode::BadRequest,
                ResponseGroup::ServerError => ResponseCode::InternalServerError,
                ResponseGroup::Unknown => return None,
            },
        };
        Some(code)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert_eq!(ResponseCode::from_code(200), Some(ResponseCode::Ok));
        assert_eq!(ResponseCode::from_code(521), Some(ResponseCode::MergeFailed));
        assert_eq!(ResponseCode::from_code(418), Some(ResponseCode::BadRequest));
        assert_eq!(ResponseCode::from_code(302), None);
    }

    #[test]
    fn test_groups() {
        assert_eq!(ResponseCode::Ok.group(), ResponseGroup::Success);
        assert_eq!(ResponseCode::SourceFileNotFound.group(), ResponseGroup::ClientError);
        assert_eq!(ResponseCode::TimeoutOccurred.group(), ResponseGroup::ServerError);
        assert_eq!(ResponseCode::group_of(99), ResponseGroup::Unknown);
        assert_eq!(ResponseCode::AlreadyExist.to_string(), "409 Already Exist");
    }
}
