//! Ordered, case-insensitive, multi-valued header map.
//!
//! Names keep the case they were added with for encoding, but every lookup
//! compares them ASCII case-insensitively. Values for one name keep their
//! insertion order. Name and value validation are two plain functions so a
//! caller can swap them without subclassing anything.

use std::fmt;

use crate::{AppError, AppResult};

pub const RESPONSE_CODE: &str = "Response-Code";
pub const REASON: &str = "Reason";
pub const AGENT: &str = "Agent";
pub const REMOTE: &str = "Remote";
pub const AGENT_TYPE: &str = "Agent-Type";
pub const CONNECTION: &str = "Connection";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const TRANSFER_SOURCE_URI: &str = "Transfer-Source-Uri";
pub const TRANSFER_DESTINATION_URI: &str = "Transfer-Destination-Uri";
pub const DESTINATION_AGENT: &str = "Destination-Agent";
pub const TRANSFER_VALIDATION: &str = "Transfer-Validation";
pub const TRANSFER_TIMEOUT_SECONDS: &str = "Transfer-Timeout-Seconds";
pub const TRANSFER_INTERCEPTOR: &str = "Transfer-Interceptor";
pub const MERGE_RESOURCE: &str = "Merge-Resource";
pub const SESSION_ID: &str = "Session-Id";
pub const RESOURCE_LENGTH: &str = "Resource-Length";
pub const TRANSFERRED_RESOURCE: &str = "Transferred-Resource";
pub const DELETED_COUNT: &str = "Deleted-Count";
pub const SUCCEEDED_COUNT: &str = "Succeeded-Count";
pub const FAILED_COUNT: &str = "Failed-Count";
pub const STATUS: &str = "Status";
pub const CONFIG_ENTRY: &str = "Config-Entry";

pub const CHUNKED: &str = "chunked";
pub const CLOSE: &str = "close";

pub type NameValidator = fn(&str) -> Result<(), String>;
pub type ValueValidator = fn(&str) -> Result<(), String>;

/// Header names are tokens: visible ASCII without separators.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty header name".to_string());
    }
    match name
        .bytes()
        .find(|&b| !b.is_ascii_graphic() || matches!(b, b':' | b'(' | b')' | b'"' | b',' | b';'))
    {
        Some(b) => Err(format!(
            "header name {:?} contains prohibited character 0x{:02x}",
            name, b
        )),
        None => Ok(()),
    }
}

/// Header values may only contain CR or LF as part of a `CRLF (SP | HT)`
/// folding sequence.
pub fn validate_value(value: &str) -> Result<(), String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                let folded = bytes.get(i + 1) == Some(&b'\n')
                    && matches!(bytes.get(i + 2), Some(b' ') | Some(b'\t'));
                if !folded {
                    return Err(format!("header value {:?} contains a bare CR", value));
                }
                i += 3;
            }
            b'\n' => return Err(format!("header value {:?} contains a bare LF", value)),
            b'\0' | 0x0b | 0x0c => {
                return Err(format!(
                    "header value {:?} contains prohibited control character",
                    value
                ))
            }
            _ => i += 1,
        }
    }
    Ok(())
}

/// Brings a value into the form a decoder reads back: folded lines joined
/// with a single space, surrounding whitespace dropped.
fn normalize_value(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for part in value.split("\r\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(part);
    }
    normalized
}

/// A header name compared without regard to ASCII case.
#[derive(Debug, Clone)]
pub struct HeaderName(String);

impl HeaderName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for HeaderName {}

#[derive(Clone)]
pub struct Headers {
    entries: Vec<(HeaderName, String)>,
    name_validator: NameValidator,
    value_validator: ValueValidator,
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(n, v)| (n.as_str(), v)))
            .finish()
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::with_validators(validate_name, validate_value)
    }

    pub fn with_validators(name_validator: NameValidator, value_validator: ValueValidator) -> Self {
        Headers {
            entries: Vec::new(),
            name_validator,
            value_validator,
        }
    }

    /// Validates `name` and `value` and returns the value as it is stored.
    fn validate(&self, name: &str, value: &str) -> AppResult<String> {
        (self.name_validator)(name).map_err(AppError::MalformedProtocol)?;
        (self.value_validator)(value).map_err(AppError::MalformedProtocol)?;
        Ok(normalize_value(value))
    }

    /// Appends a value, keeping any existing values for the same name.
    pub fn add(&mut self, name: &str, value: impl Into<String>) -> AppResult<&mut Self> {
        let value = self.validate(name, &value.into())?;
        self.entries.push((HeaderName(name.to_string()), value));
        Ok(self)
    }

    /// Replaces every value for `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> AppResult<&mut Self> {
        let value = self.validate(name, &value.into())?;
        match self.entries.iter().position(|(n, _)| n.matches(name)) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= first || !n.matches(name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((HeaderName(name.to_string()), value)),
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.matches(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.matches(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Parses the first value of `name`, `None` when absent.
    pub fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                AppError::MalformedProtocol(format!("invalid value for {}: {:?}", name, raw))
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.matches(name))
    }

    pub fn remove(&mut self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|(n, v)| {
            if n.matches(name) {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Appends `more` to the last value of `name`, used for folded lines.
    pub(crate) fn append_to_last(&mut self, name: &str, more: &str) -> bool {
        match self.entries.iter_mut().rev().find(|(n, _)| n.matches(name)) {
            Some(_) if more.is_empty() => true,
            Some((_, value)) => {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(more);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_multi_values() -> AppResult<()> {
        let mut headers = Headers::new();
        headers.add("Reason", "first")?;
        headers.add("Agent", "a1")?;
        headers.add("reason", "second")?;

        assert_eq!(headers.get("REASON"), Some("first"));
        assert_eq!(headers.get_all("Reason"), vec!["first", "second"]);
        assert!(headers.contains("agent"));
        assert_eq!(headers.len(), 3);
        Ok(())
    }

    #[test]
    fn test_set_replaces_all_values() -> AppResult<()> {
        let mut headers = Headers::new();
        headers.add("Reason", "a")?.add("Agent", "x")?.add("Reason", "b")?;
        headers.set("reason", "c")?;

        assert_eq!(headers.get_all("Reason"), vec!["c"]);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Reason", "Agent"]);
        Ok(())
    }

    #[test]
    fn test_value_validation() {
        assert!(validate_value("plain value").is_ok());
        assert!(validate_value("folded\r\n continued").is_ok());
        assert!(validate_value("folded\r\n\tcontinued").is_ok());
        assert!(validate_value("bare\rcr").is_err());
        assert!(validate_value("bare\nlf").is_err());
        assert!(validate_value("crlf\r\nno-space").is_err());

        let mut headers = Headers::new();
        assert!(headers.add("Reason", "evil\r\nInjected: yes").is_err());
        assert!(headers.add("Bad Name", "v").is_err());
        assert!(headers.add("Bad:Name", "v").is_err());
    }

    #[test]
    fn test_values_are_stored_unfolded_and_trimmed() -> AppResult<()> {
        let mut headers = Headers::new();
        headers
            .add("X-Pad", " padded ")?
            .add("X-Fold", "a\r\n b")?
            .add("X-Blank", "x\r\n \r\n\ty ")?;
        assert_eq!(headers.get("X-Pad"), Some("padded"));
        assert_eq!(headers.get("X-Fold"), Some("a b"));
        assert_eq!(headers.get("X-Blank"), Some("x y"));
        Ok(())
    }

    #[test]
    fn test_custom_validators() -> AppResult<()> {
        fn any(_: &str) -> Result<(), String> {
            Ok(())
        }
        let mut headers = Headers::with_validators(any, any);
        headers.add("odd name", "x\ny")?;
        assert_eq!(headers.get("ODD NAME"), Some("x\ny"));
        Ok(())
    }

    #[test]
    fn test_remove_and_parse() -> AppResult<()> {
        let mut headers = Headers::new();
        headers.add(CONTENT_LENGTH, " 42 ")?;
        assert_eq!(headers.get_parsed::<u64>("content-length")?, Some(42));
        assert_eq!(headers.remove(CONTENT_LENGTH), vec!["42".to_string()]);
        assert_eq!(headers.get_parsed::<u64>(CONTENT_LENGTH)?, None);

        headers.add(CONTENT_LENGTH, "abc")?;
        assert!(headers.get_parsed::<u64>(CONTENT_LENGTH).is_err());
        Ok(())
    }
}
