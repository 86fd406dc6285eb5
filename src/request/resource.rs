use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::protocol::{is_glob_pattern, OnExist, ResourceUri, ResponseCode};
use crate::service::RepositoryConfig;
use crate::{AppError, AppResult};

const PRUNE_THRESHOLD: usize = 4096;

/// Maps resource uris onto the local file system.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    sites: HashMap<String, PathBuf>,
    backup_dir: PathBuf,
    ack_suffix: String,
}

impl Repository {
    pub fn new(config: &RepositoryConfig) -> Self {
        Repository {
            root: PathBuf::from(&config.root),
            sites: config
                .sites
                .iter()
                .map(|(name, root)| (name.clone(), PathBuf::from(root)))
                .collect(),
            backup_dir: PathBuf::from(&config.backup_dir),
            ack_suffix: config.ack_suffix.clone(),
        }
    }

    fn root_of(&self, uri: &ResourceUri) -> AppResult<&Path> {
        match &uri.options.site {
            None => Ok(&self.root),
            Some(site) => self.sites.get(site).map(PathBuf::as_path).ok_or_else(|| {
                AppError::response(ResponseCode::BadRequest, format!("unknown site {}", site))
            }),
        }
    }

    /// Path of `uri` relative to its root. Anything that would leave the root
    /// is refused.
    fn relative(uri: &ResourceUri) -> AppResult<PathBuf> {
        let mut relative = PathBuf::new();
        for component in Path::new(uri.path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(AppError::response(
                        ResponseCode::BadRequest,
                        format!("path {} leaves the repository", uri.path),
                    ))
                }
            }
        }
        Ok(relative)
    }

    pub fn resolve(&self, uri: &ResourceUri) -> AppResult<PathBuf> {
        Ok(self.root_of(uri)?.join(Self::relative(uri)?))
    }

    /// Like [`Repository::resolve`] but refuses glob patterns.
    pub fn resolve_exact(&self, uri: &ResourceUri) -> AppResult<PathBuf> {
        if is_glob_pattern(&uri.path) {
            return Err(AppError::response(
                ResponseCode::BadRequest,
                format!("{} is a pattern, a single resource is required", uri.path),
            ));
        }
        self.resolve(uri)
    }

    /// Regular files matching `uri`, which may be a glob pattern.
    pub fn matches(&self, uri: &ResourceUri) -> AppResult<Vec<PathBuf>> {
        let root = self.root_of(uri)?;
        let relative = Self::relative(uri)?;
        if !is_glob_pattern(&uri.path) {
            let path = root.join(relative);
            return Ok(if path.is_file() { vec![path] } else { Vec::new() });
        }
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&root.to_string_lossy()),
            relative.to_string_lossy()
        );
        trace!("globbing {}", pattern);
        let entries = glob::glob(&pattern)
            .map_err(|e| AppError::response(ResponseCode::BadRequest, e.to_string()))?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|path| path.is_file())
            .collect();
        found.sort();
        Ok(found)
    }

    /// The uri path under which `path` is visible through `uri`'s root.
    pub fn uri_path(&self, uri: &ResourceUri, path: &Path) -> String {
        let relative = self
            .root_of(uri)
            .ok()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    pub fn ack_path(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(&self.ack_suffix);
        PathBuf::from(name)
    }

    /// Where the `backup` post-action moves `uri`.
    pub fn backup_path(&self, uri: &ResourceUri) -> AppResult<PathBuf> {
        let mut target = self.backup_dir.clone();
        if let Some(site) = &uri.options.site {
            target.push(site);
        }
        Ok(target.join(Self::relative(uri)?))
    }
}

/// Async mutexes keyed by path, serialising directory creation and writes
/// to one destination.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        let mutex = self
            .locks
            .entry(path.to_path_buf())
            .or_default()
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Drops the locks nobody holds or waits for.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub async fn create_dir_all(&self, dir: &Path) -> AppResult<()> {
        if dir.is_dir() {
            return Ok(());
        }
        let _guard = self.lock(dir).await;
        fs::create_dir_all(dir).await?;
        debug!("created directory {}", dir.display());
        Ok(())
    }
}

/// Applies the on-exist policy to `path`. Returns whether the write has to
/// append to an existing file.
pub async fn check_on_exist(path: &Path, on_exist: OnExist) -> AppResult<bool> {
    if !fs::try_exists(path).await? {
        return Ok(false);
    }
    match on_exist {
        OnExist::Fail => Err(AppError::response(
            ResponseCode::AlreadyExist,
            format!("{} already exists", path.display()),
        )),
        OnExist::Overwrite => Ok(false),
        OnExist::Append => Ok(true),
    }
}

/// Writes the zero byte ack marker next to `path`.
pub async fn write_ack(repository: &Repository, path: &Path) -> AppResult<()> {
    let ack = repository.ack_path(path);
    fs::File::create(&ack).await?;
    trace!("ack marker {} written", ack.display());
    Ok(())
}
