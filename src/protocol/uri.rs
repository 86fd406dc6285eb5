//! Resource URIs.
//!
//! Cross-agent references look like `agent://host:port[,host:port...]/path?opt=val`,
//! local references like `/path?opt=val`. Every host in the authority is a
//! failover candidate, tried in the written order.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::trace;

use crate::{AppError, AppResult};

pub const AGENT_SCHEME: &str = "agent://";

/// Characters escaped in the path component. `/` is kept as the separator.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'&')
    .add(b'=')
    .add(b',');

/// Characters escaped in option values.
const QUERY_ESCAPE: &AsciiSet = &PATH_ESCAPE.add(b'/').add(b'+');

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentAddr {
    pub host: String,
    pub port: u16,
}

impl AgentAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        AgentAddr {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for AgentAddr {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| AppError::InvalidValue(format!("agent address {:?} has no port", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AppError::InvalidValue(format!("agent address {:?} has a bad port", s)))?;
        if host.is_empty() {
            return Err(AppError::InvalidValue(format!(
                "agent address {:?} has no host",
                s
            )));
        }
        Ok(AgentAddr::new(host, port))
    }
}

impl fmt::Display for AgentAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What to do when the destination of a write already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExist {
    #[default]
    Fail,
    Overwrite,
    Append,
}

impl OnExist {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnExist::Fail => "failOnExist",
            OnExist::Overwrite => "overwriteOnExist",
            OnExist::Append => "appendOnExist",
        }
    }
}

impl FromStr for OnExist {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "failOnExist" => Ok(OnExist::Fail),
            "overwriteOnExist" => Ok(OnExist::Overwrite),
            "appendOnExist" => Ok(OnExist::Append),
            other => Err(AppError::InvalidValue(format!("onExist={}", other))),
        }
    }
}

/// Post-action applied to a source file after it was transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterTransfer {
    Backup,
    Delete,
}

impl AfterTransfer {
    pub fn as_str(&self) -> &'static str {
        match self {
            AfterTransfer::Backup => "backup",
            AfterTransfer::Delete => "delete",
        }
    }
}

impl FromStr for AfterTransfer {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "backup" => Ok(AfterTransfer::Backup),
            "delete" => Ok(AfterTransfer::Delete),
            other => Err(AppError::InvalidValue(format!("afterTransfer={}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriOptions {
    pub site: Option<String>,
    pub create_ack: bool,
    pub after_transfer: Option<AfterTransfer>,
    pub interceptors: Vec<String>,
    pub delete_on_exit: bool,
    pub on_exist: OnExist,
}

fn parse_flag(key: &str, value: &str) -> AppResult<bool> {
    match value {
        "" | "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        other => Err(AppError::InvalidValue(format!("{}={}", key, other))),
    }
}

impl UriOptions {
    fn apply(&mut self, key: &str, value: String) -> AppResult<()> {
        match key {
            "site" => self.site = Some(value),
            "createAck" => self.create_ack = parse_flag(key, &value)?,
            "afterTransfer" => self.after_transfer = Some(value.parse()?),
            "interceptor" => self.interceptors.push(value),
            "deleteOnExit" => self.delete_on_exit = parse_flag(key, &value)?,
            "onExist" => self.on_exist = value.parse()?,
            other => trace!("ignoring unknown uri option {}", other),
        }
        Ok(())
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(site) = &self.site {
            pairs.push(("site", site.clone()));
        }
        if self.create_ack {
            pairs.push(("createAck", "true".to_string()));
        }
        if let Some(after) = self.after_transfer {
            pairs.push(("afterTransfer", after.as_str().to_string()));
        }
        for name in &self.interceptors {
            pairs.push(("interceptor", name.clone()));
        }
        if self.delete_on_exit {
            pairs.push(("deleteOnExit", "true".to_string()));
        }
        if self.on_exist != OnExist::default() {
            pairs.push(("onExist", self.on_exist.as_str().to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    /// failover candidates, empty for local references
    pub agents: Vec<AgentAddr>,
    /// decoded path
    pub path: String,
    pub options: UriOptions,
}

impl ResourceUri {
    pub fn local(path: impl Into<String>) -> Self {
        ResourceUri {
            agents: Vec::new(),
            path: path.into(),
            options: UriOptions::default(),
        }
    }

    pub fn is_remote(&self) -> bool {
        !self.agents.is_empty()
    }

    /// The same resource written in the bare `/path?opts` form, as sent to
    /// the agent that owns it.
    pub fn to_local(&self) -> ResourceUri {
        ResourceUri {
            agents: Vec::new(),
            path: self.path.clone(),
            options: self.options.clone(),
        }
    }

    pub fn with_path(&self, path: impl Into<String>) -> ResourceUri {
        ResourceUri {
            agents: self.agents.clone(),
            path: path.into(),
            options: self.options.clone(),
        }
    }

    pub fn with_options(mut self, options: UriOptions) -> ResourceUri {
        self.options = options;
        self
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

impl FromStr for ResourceUri {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let (agents, rest) = match s.strip_prefix(AGENT_SCHEME) {
            Some(remote) => {
                let (authority, rest) = match remote.find('/') {
                    Some(pos) => remote.split_at(pos),
                    None => (remote, "/"),
                };
                let agents = authority
                    .split(',')
                    .filter(|a| !a.trim().is_empty())
                    .map(str::parse)
                    .collect::<AppResult<Vec<AgentAddr>>>()?;
                (agents, rest)
            }
            None => (Vec::new(), s),
        };
        let (raw_path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if raw_path.is_empty() {
            return Err(AppError::InvalidValue(format!("uri {:?} has no path", s)));
        }
        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| AppError::InvalidValue(format!("uri {:?} is not utf-8", s)))?;
        let path = if decoded.starts_with('/') {
            decoded.into_owned()
        } else {
            format!("/{}", decoded)
        };

        let mut options = UriOptions::default();
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = percent_decode_str(value)
                .decode_utf8()
                .map_err(|_| AppError::InvalidValue(format!("option {} is not utf-8", key)))?;
            options.apply(key, value.into_owned())?;
        }
        Ok(ResourceUri {
            agents,
            path,
            options,
        })
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_remote() {
            f.write_str(AGENT_SCHEME)?;
            let agents: Vec<String> = self.agents.iter().map(|a| a.to_string()).collect();
            f.write_str(&agents.join(","))?;
        }
        write!(f, "{}", utf8_percent_encode(&self.path, PATH_ESCAPE))?;
        let pairs = self.options.pairs();
        for (i, (key, value)) in pairs.iter().enumerate() {
            let separator = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{}{}={}",
                separator,
                key,
                utf8_percent_encode(value, QUERY_ESCAPE)
            )?;
        }
        Ok(())
    }
}

/// True when `path` holds glob metacharacters.
pub fn is_glob_pattern(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_with_candidates() -> AppResult<()> {
        let uri: ResourceUri =
            "agent://10.0.0.1:7480,backup-host:7481/data/in%20box/a.bin?site=inbox&createAck=true&afterTransfer=backup&interceptor=audit&interceptor=scan&onExist=appendOnExist"
                .parse()?;

        assert_eq!(
            uri.agents,
            vec![AgentAddr::new("10.0.0.1", 7480), AgentAddr::new("backup-host", 7481)]
        );
        assert_eq!(uri.path, "/data/in box/a.bin");
        assert_eq!(uri.file_name(), "a.bin");
        assert_eq!(uri.options.site.as_deref(), Some("inbox"));
        assert!(uri.options.create_ack);
        assert_eq!(uri.options.after_transfer, Some(AfterTransfer::Backup));
        assert_eq!(uri.options.interceptors, vec!["audit", "scan"]);
        assert_eq!(uri.options.on_exist, OnExist::Append);
        assert!(!uri.options.delete_on_exit);
        Ok(())
    }

    #[test]
    fn test_display_reparses_to_same_uri() -> AppResult<()> {
        let uri: ResourceUri =
            "agent://h:1/a b/c%3Fd?deleteOnExit&onExist=overwriteOnExist&site=s%2F1".parse()?;
        assert_eq!(uri.path, "/a b/c?d");
        assert_eq!(uri.options.site.as_deref(), Some("s/1"));
        let text = uri.to_string();
        assert_eq!(text.parse::<ResourceUri>()?, uri);
        assert!(!text.contains(' '));
        Ok(())
    }

    #[test]
    fn test_local_form() -> AppResult<()> {
        let uri: ResourceUri = "relative/file.txt".parse()?;
        assert!(!uri.is_remote());
        assert_eq!(uri.path, "/relative/file.txt");
        assert_eq!(uri.to_string(), "/relative/file.txt");
        Ok(())
    }

    #[test]
    fn test_invalid_options() {
        assert!("/a?onExist=never".parse::<ResourceUri>().is_err());
        assert!("/a?afterTransfer=shred".parse::<ResourceUri>().is_err());
        assert!("agent://host/a".parse::<ResourceUri>().is_err());
        assert!("agent://host:1?x".parse::<ResourceUri>().is_err());
    }

    #[test]
    fn test_glob_detection() {
        assert!(is_glob_pattern("/logs/*.log"));
        assert!(is_glob_pattern("/logs/file[0-9]"));
        assert!(!is_glob_pattern("/logs/file.log"));
    }
}
