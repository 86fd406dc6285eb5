use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::CodecLimits;

use super::{AppError, AppResult};

pub const ENV_PREFIX: &str = "COURIER";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub agent_name: String,
    pub agent_type: String,
    /// where inbound message bodies are materialised
    pub temp_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            agent_name: "courier".to_string(),
            agent_type: "agent".to_string(),
            temp_dir: std::env::temp_dir()
                .join("courier")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub max_initial_line_length: usize,
    pub max_header_size: usize,
    pub max_chunk_size: usize,
    pub connect_timeout_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 7480,
            max_connection: 1024,
            max_initial_line_length: 4096,
            max_header_size: 8192,
            max_chunk_size: 64 * 1024,
            connect_timeout_ms: 3000,
            request_timeout_secs: 600,
        }
    }
}

/// Roots under which resource paths are resolved.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RepositoryConfig {
    pub root: String,
    /// named roots selected with the `site` uri option
    pub sites: HashMap<String, String>,
    pub backup_dir: String,
    pub ack_suffix: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig {
            root: "./repository".to_string(),
            sites: HashMap::new(),
            backup_dir: "./backup".to_string(),
            ack_suffix: ".ack".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// bodies above this size are sent with chunked encoding
    pub chunk_threshold: u64,
    /// files above this size are uploaded as parallel splits
    pub large_file_threshold: u64,
    pub min_chunk_size: u64,
    pub max_workers: usize,
    pub max_concurrent_transfers: usize,
    pub default_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_threshold: 1024 * 1024,
            large_file_threshold: 64 * 1024 * 1024,
            min_chunk_size: 16 * 1024 * 1024,
            max_workers: 8,
            max_concurrent_transfers: 4,
            default_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestHandlerPool {
    pub channel_capacity: usize,
    pub num_channels: usize,
    /// seconds
    pub monitor_interval: u64,
    /// milliseconds
    pub worker_check_timeout: u64,
}

impl Default for RequestHandlerPool {
    fn default() -> Self {
        RequestHandlerPool {
            channel_capacity: 1024,
            num_channels: num_cpus::get().max(4),
            monitor_interval: 5,
            worker_check_timeout: 200,
        }
    }
}

/// Configuration keys that `INFO:/info` is allowed to expose.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InfoConfig {
    pub allowed_keys: Vec<String>,
}

impl Default for InfoConfig {
    fn default() -> Self {
        InfoConfig {
            allowed_keys: [
                "general.agent_name",
                "general.agent_type",
                "network.port",
                "transfer.chunk_threshold",
                "transfer.large_file_threshold",
                "transfer.max_workers",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub repository: RepositoryConfig,
    pub transfer: TransferConfig,
    pub session: SessionConfig,
    pub request_handler_pool: RequestHandlerPool,
    pub info: InfoConfig,
}

impl AgentConfig {
    /// Loads `path` and layers `COURIER__SECTION__KEY` environment variables
    /// on top of it.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AgentConfig> {
        if !path.as_ref().exists() {
            return Err(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let agent_config: AgentConfig = config.try_deserialize()?;
        Ok(agent_config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.port)
    }

    pub fn codec_limits(&self) -> CodecLimits {
        CodecLimits {
            max_initial_line_length: self.network.max_initial_line_length,
            max_header_size: self.network.max_header_size,
            max_chunk_size: self.network.max_chunk_size,
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.temp_dir)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_secs)
    }

    /// Value of a dotted configuration key as text.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let value = match key {
            "general.agent_name" => self.general.agent_name.clone(),
            "general.agent_type" => self.general.agent_type.clone(),
            "general.temp_dir" => self.general.temp_dir.clone(),
            "network.ip" => self.network.ip.clone(),
            "network.port" => self.network.port.to_string(),
            "network.max_connection" => self.network.max_connection.to_string(),
            "repository.root" => self.repository.root.clone(),
            "repository.backup_dir" => self.repository.backup_dir.clone(),
            "transfer.chunk_threshold" => self.transfer.chunk_threshold.to_string(),
            "transfer.large_file_threshold" => self.transfer.large_file_threshold.to_string(),
            "transfer.min_chunk_size" => self.transfer.min_chunk_size.to_string(),
            "transfer.max_workers" => self.transfer.max_workers.to_string(),
            "transfer.max_concurrent_transfers" => {
                self.transfer.max_concurrent_transfers.to_string()
            }
            "session.timeout_secs" => self.session.timeout_secs.to_string(),
            "session.sweep_interval_secs" => self.session.sweep_interval_secs.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() -> AppResult<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            r#"
[general]
agent_name = "edge-1"

[network]
port = 9000

[repository.sites]
inbox = "/srv/inbox"

[transfer]
max_workers = 3
"#
        )?;

        let config = AgentConfig::set_up_config(file.path())?;
        assert_eq!(config.general.agent_name, "edge-1");
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.network.ip, "127.0.0.1");
        assert_eq!(config.repository.sites.get("inbox").map(String::as_str), Some("/srv/inbox"));
        assert_eq!(config.transfer.max_workers, 3);
        assert_eq!(config.transfer.chunk_threshold, 1024 * 1024);
        assert_eq!(config.session.sweep_interval_secs, 300);
        assert_eq!(config.listen_address(), "127.0.0.1:9000");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AgentConfig::set_up_config("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_lookup() {
        let config = AgentConfig::default();
        assert_eq!(config.lookup("network.port").as_deref(), Some("7480"));
        assert_eq!(config.lookup("no.such.key"), None);
    }
}
