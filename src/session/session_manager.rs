use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::Shutdown;

use super::ResourceSession;

/// Process-wide table of resource sessions.
///
/// The map itself is concurrent; every session carries its own lock, so the
/// sweep never holds a global lock while a chunk worker updates a session.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<ResourceSession>>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        SessionManager {
            sessions: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn create_session(&self) -> Arc<ResourceSession> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(ResourceSession::new(id.clone()));
        self.sessions.insert(id.clone(), session.clone());
        debug!("session {} created", id);
        session
    }

    /// Looks a session up and refreshes its access time.
    pub fn get_session(&self, id: &str) -> Option<Arc<ResourceSession>> {
        let session = self.sessions.get(id).map(|entry| entry.value().clone())?;
        session.touch();
        Some(session)
    }

    /// Forgets a session without touching its files.
    pub fn remove_session(&self, id: &str) -> Option<Arc<ResourceSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Removes a session and deletes whatever it still tracks.
    pub async fn expire(&self, id: &str) -> bool {
        match self.remove_session(id) {
            Some(session) => {
                session.invalidate().await;
                true
            }
            None => false,
        }
    }

    /// Evicts every session idle for longer than the timeout at `now`.
    pub async fn evict_idle(&self, now: Instant) -> usize {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now, self.timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in candidates {
            // re-checked under the session lock, a worker may have touched it since
            let removed = self
                .sessions
                .remove_if(&id, |_, session| session.mark_invalidated_if_idle(now, self.timeout));
            if let Some((_, session)) = removed {
                session.invalidate().await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!("evicted {} idle session(s)", evicted);
        }
        evicted
    }

    /// Runs [`SessionManager::evict_idle`] every `interval` until shutdown.
    pub fn start_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        notify_shutdown: broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut shutdown = Shutdown::subscribe(&notify_shutdown);
            let mut ticker = time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("session sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.evict_idle(Instant::now()).await;
                    }
                }
            }
        })
    }
}
