use crate::protocol::{headers, Command, Message, ResourceUri, ResponseCode};
use crate::request::api::{
    ActionRequest, DeleteRequest, GetRequest, InfoRequest, ListRequest, MergeRequest, PutRequest,
};
use crate::request::ApiRequest;
use crate::transfer::TransferRequest;
use crate::{AppError, AppResult};

fn bad_request(reason: impl Into<String>) -> AppError {
    AppError::response(ResponseCode::BadRequest, reason)
}

fn parse_uri(raw: &str) -> AppResult<ResourceUri> {
    raw.parse()
        .map_err(|e: AppError| bad_request(e.reason()))
}

/// The path of an INFO or ACTION uri, options stripped.
fn endpoint(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(path, _)| path)
}

impl ApiRequest {
    pub fn parse_from(mut message: Message) -> AppResult<ApiRequest> {
        match message.command {
            Command::Put => {
                let content = message
                    .take_content()
                    .ok_or_else(|| bad_request(format!("PUT {} carries no content", message.uri)))?;
                Ok(ApiRequest::Put(PutRequest {
                    destination: parse_uri(&message.uri)?,
                    content,
                    session_id: message.header(headers::SESSION_ID).map(str::to_string),
                }))
            }
            Command::Get => Ok(ApiRequest::Get(GetRequest {
                source: parse_uri(&message.uri)?,
            })),
            Command::List => Ok(ApiRequest::List(ListRequest {
                pattern: parse_uri(&message.uri)?,
            })),
            Command::Delete => Ok(ApiRequest::Delete(DeleteRequest {
                pattern: parse_uri(&message.uri)?,
            })),
            Command::Info => match endpoint(&message.uri) {
                "/health" => Ok(ApiRequest::Info(InfoRequest::Health)),
                "/info" => Ok(ApiRequest::Info(InfoRequest::Info)),
                "/exist" => {
                    let raw = message.header(headers::TRANSFER_SOURCE_URI).ok_or_else(|| {
                        bad_request(format!("{} header is required", headers::TRANSFER_SOURCE_URI))
                    })?;
                    Ok(ApiRequest::Info(InfoRequest::Exist(parse_uri(raw)?)))
                }
                other => Err(bad_request(format!("unknown INFO endpoint {}", other))),
            },
            Command::Action => match endpoint(&message.uri) {
                "/session" => Ok(ApiRequest::Action(ActionRequest::Session)),
                "/shutdown" => Ok(ApiRequest::Action(ActionRequest::Shutdown)),
                "/merge" => {
                    let destination = message
                        .header(headers::TRANSFER_DESTINATION_URI)
                        .ok_or_else(|| {
                            bad_request(format!(
                                "{} header is required",
                                headers::TRANSFER_DESTINATION_URI
                            ))
                        })?;
                    let session_id = message.header(headers::SESSION_ID).ok_or_else(|| {
                        bad_request(format!("{} header is required", headers::SESSION_ID))
                    })?;
                    Ok(ApiRequest::Action(ActionRequest::Merge(MergeRequest {
                        destination: parse_uri(destination)?,
                        session_id: session_id.to_string(),
                        splits: message
                            .headers
                            .get_all(headers::MERGE_RESOURCE)
                            .into_iter()
                            .map(str::to_string)
                            .collect(),
                    })))
                }
                other => Err(bad_request(format!("unknown ACTION endpoint {}", other))),
            },
            Command::Transfer => Ok(ApiRequest::Transfer(TransferRequest::from_message(
                &message,
            )?)),
            Command::Response => Err(bad_request(format!(
                "a response for {} arrived where a request was expected",
                message.uri
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_request_collects_splits() -> AppResult<()> {
        let message = Message::new(Command::Action, "/merge")
            .with_header(headers::TRANSFER_DESTINATION_URI, "/big.bin?onExist=overwriteOnExist")?
            .with_header(headers::SESSION_ID, "abc")?
            .with_header(headers::MERGE_RESOURCE, "big.bin.t.split1")?
            .with_header(headers::MERGE_RESOURCE, "big.bin.t.split0")?;
        match ApiRequest::parse_from(message)? {
            ApiRequest::Action(ActionRequest::Merge(merge)) => {
                assert_eq!(merge.destination.path, "/big.bin");
                assert_eq!(merge.session_id, "abc");
                assert_eq!(merge.splits, vec!["big.bin.t.split1", "big.bin.t.split0"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_malformed_requests_are_bad_requests() -> AppResult<()> {
        let cases = vec![
            Message::new(Command::Put, "/no-body"),
            Message::new(Command::Info, "/metrics"),
            Message::new(Command::Info, "/exist"),
            Message::new(Command::Action, "/merge").with_header(headers::SESSION_ID, "s")?,
            Message::new(Command::Response, "/x"),
            Message::new(Command::Get, "/x?onExist=sometimes"),
        ];
        for message in cases {
            let err = ApiRequest::parse_from(message).unwrap_err();
            assert_eq!(err.response_code(), ResponseCode::BadRequest);
        }
        Ok(())
    }

    #[test]
    fn test_info_endpoints() -> AppResult<()> {
        assert!(matches!(
            ApiRequest::parse_from(Message::new(Command::Info, "/health"))?,
            ApiRequest::Info(InfoRequest::Health)
        ));
        let exist = Message::new(Command::Info, "/exist")
            .with_header(headers::TRANSFER_SOURCE_URI, "/a/b.txt?site=inbox")?;
        match ApiRequest::parse_from(exist)? {
            ApiRequest::Info(InfoRequest::Exist(uri)) => {
                assert_eq!(uri.path, "/a/b.txt");
                assert_eq!(uri.options.site.as_deref(), Some("inbox"));
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }
}
