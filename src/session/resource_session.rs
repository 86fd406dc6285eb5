use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Invalidated,
}

#[derive(Debug)]
struct SessionState {
    last_access: Instant,
    resources: HashSet<PathBuf>,
    status: SessionStatus,
}

/// Server-side bookkeeping for one parallel upload.
///
/// Every resource a chunk worker writes is tracked until the merge marks it
/// `completed`. Whatever is still tracked when the session is invalidated is
/// deleted. All mutators take the session's own lock, so concurrent workers
/// and the idle sweep never see a half-updated session.
#[derive(Debug)]
pub struct ResourceSession {
    id: String,
    created_at: DateTime<Local>,
    state: Mutex<SessionState>,
}

impl ResourceSession {
    pub fn new(id: impl Into<String>) -> Self {
        ResourceSession {
            id: id.into(),
            created_at: Local::now(),
            state: Mutex::new(SessionState {
                last_access: Instant::now(),
                resources: HashSet::new(),
                status: SessionStatus::Active,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn last_access(&self) -> Instant {
        self.state.lock().last_access
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.state.lock().resources.iter().cloned().collect()
    }

    pub fn touch(&self) {
        self.state.lock().last_access = Instant::now();
    }

    /// Starts tracking `path` for cleanup.
    pub fn processing(&self, path: &Path) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.status == SessionStatus::Invalidated {
            return Err(AppError::SessionExpired(self.id.clone()));
        }
        state.resources.insert(path.to_path_buf());
        state.last_access = Instant::now();
        Ok(())
    }

    /// Stops tracking `path`; its file now belongs to someone else.
    pub fn completed(&self, path: &Path) -> bool {
        let mut state = self.state.lock();
        state.last_access = Instant::now();
        state.resources.remove(path)
    }

    pub fn ensure_active(&self) -> AppResult<()> {
        match self.status() {
            SessionStatus::Active => Ok(()),
            SessionStatus::Invalidated => Err(AppError::SessionExpired(self.id.clone())),
        }
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.state.lock().last_access) > timeout
    }

    /// Flips the status to invalidated when the session has been idle longer
    /// than `timeout`. Checked and flipped under one lock so a worker that
    /// touches the session concurrently either wins or fails cleanly.
    pub(crate) fn mark_invalidated_if_idle(&self, now: Instant, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if now.saturating_duration_since(state.last_access) > timeout {
            state.status = SessionStatus::Invalidated;
            true
        } else {
            false
        }
    }

    /// Invalidates the session and deletes every resource still tracked.
    /// Returns the number of files removed.
    pub async fn invalidate(&self) -> usize {
        let resources: Vec<PathBuf> = {
            let mut state = self.state.lock();
            state.status = SessionStatus::Invalidated;
            state.resources.drain().collect()
        };
        let mut removed = 0;
        for path in resources {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("session {} failed to remove {}: {}", self.id, path.display(), e),
            }
        }
        debug!("session {} invalidated, {} resource(s) removed", self.id, removed);
        removed
    }
}
