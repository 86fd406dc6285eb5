#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use courier::{setup_local_tracing, Agent, AgentClient, AgentConfig, AgentHandle, AppResult};
use rand::RngCore;
use tempfile::TempDir;
use tokio::fs;

/// An agent listening on an ephemeral port with its own repository.
pub struct TestAgent {
    pub handle: AgentHandle,
    pub config: Arc<AgentConfig>,
    pub root: TempDir,
    pub temp: TempDir,
    pub backup: TempDir,
}

impl TestAgent {
    pub async fn client(&self) -> AppResult<AgentClient> {
        AgentClient::connect(&self.handle.agent_addr(), self.config.clone()).await
    }

    pub async fn stop(self) -> AppResult<()> {
        self.handle.shutdown().await
    }

    pub fn path(&self, relative: &str) -> std::path::PathBuf {
        self.root.path().join(relative.trim_start_matches('/'))
    }
}

/// Small thresholds so that chunked bodies and split uploads show up with
/// files of a few hundred KiB.
pub fn test_config(root: &Path, temp: &Path, backup: &Path) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.network.ip = "127.0.0.1".to_string();
    config.network.port = 0;
    config.network.connect_timeout_ms = 500;
    config.network.request_timeout_secs = 30;
    config.general.temp_dir = temp.to_string_lossy().into_owned();
    config.repository.root = root.to_string_lossy().into_owned();
    config.repository.backup_dir = backup.to_string_lossy().into_owned();
    config.transfer.chunk_threshold = 8 * 1024;
    config.transfer.large_file_threshold = 64 * 1024;
    config.transfer.min_chunk_size = 16 * 1024;
    config.transfer.max_workers = 4;
    config.request_handler_pool.num_channels = 4;
    config
}

pub async fn start_agent() -> AppResult<TestAgent> {
    start_agent_with(|_| {}).await
}

pub async fn start_agent_with(tune: impl FnOnce(&mut AgentConfig)) -> AppResult<TestAgent> {
    setup_local_tracing()?;
    let root = tempfile::tempdir()?;
    let temp = tempfile::tempdir()?;
    let backup = tempfile::tempdir()?;
    let mut config = test_config(root.path(), temp.path(), backup.path());
    tune(&mut config);
    let config = Arc::new(config);
    let handle = Agent::new((*config).clone()).bind().await?;
    Ok(TestAgent {
        handle,
        config,
        root,
        temp,
        backup,
    })
}

pub async fn write_random(path: &Path, len: usize) -> AppResult<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, &bytes).await?;
    Ok(bytes)
}

/// Polls `check` until it holds or two seconds passed.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Files under `dir` whose name contains `.split`.
pub fn split_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.contains(".split"))
                .collect()
        })
        .unwrap_or_default()
}
