//! In-memory session store with per-session locking
//!
//! Every session sits behind its own mutex. A run holds the owned guard for
//! its whole duration, so two requests can never mutate the same session at
//! once; a request that finds the lock taken is turned away instead of
//! queueing. Abandoned sessions are evicted by the configured expiry policy.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::model::{AnalysisSession, ProviderConfig};

const SESSION_ID_PREFIX: &str = "file_";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionStoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session is already being analyzed: {0}")]
    Busy(String),
}

/// Decides when an idle session may be evicted
pub trait ExpiryPolicy: Send + Sync {
    fn is_expired(&self, idle_for: Duration) -> bool;
}

/// Keeps sessions until they complete or the process exits
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl ExpiryPolicy for NeverExpire {
    fn is_expired(&self, _idle_for: Duration) -> bool {
        false
    }
}

/// Evicts sessions nobody has touched for the given duration
#[derive(Debug, Clone, Copy)]
pub struct IdleTimeout(pub Duration);

impl ExpiryPolicy for IdleTimeout {
    fn is_expired(&self, idle_for: Duration) -> bool {
        idle_for >= self.0
    }
}

struct SessionEntry {
    session: Arc<Mutex<AnalysisSession>>,
    /// Last time a run acquired or released the session
    touched: Arc<StdMutex<Instant>>,
}

/// Exclusive access to one session for the duration of a run segment
pub struct SessionGuard {
    guard: OwnedMutexGuard<AnalysisSession>,
    touched: Arc<StdMutex<Instant>>,
}

impl Deref for SessionGuard {
    type Target = AnalysisSession;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session_id", &self.guard.id)
            .finish()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        touch(&self.touched);
    }
}

fn touch(touched: &StdMutex<Instant>) {
    if let Ok(mut at) = touched.lock() {
        *at = Instant::now();
    }
}

/// Shared map of in-flight sessions
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    expiry: Arc<dyn ExpiryPolicy>,
}

impl SessionStore {
    pub fn new(expiry: Arc<dyn ExpiryPolicy>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    /// Build the store from the configured idle TTL; `None` disables expiry
    pub fn with_idle_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => Self::new(Arc::new(IdleTimeout(ttl))),
            None => Self::new(Arc::new(NeverExpire)),
        }
    }

    /// Create a session and return it already locked, so no other request
    /// can touch it before the first run segment starts
    pub async fn create(
        &self,
        document_text: String,
        file_name: Option<String>,
        provider_config: ProviderConfig,
    ) -> SessionGuard {
        let id = format!("{}{}", SESSION_ID_PREFIX, Uuid::new_v4().simple());
        let session = Arc::new(Mutex::new(AnalysisSession::new(
            id.clone(),
            document_text,
            file_name,
            provider_config,
        )));
        let touched = Arc::new(StdMutex::new(Instant::now()));
        let guard = session.clone().lock_owned().await;

        self.sessions.write().await.insert(
            id.clone(),
            SessionEntry {
                session,
                touched: touched.clone(),
            },
        );

        tracing::debug!(session_id = %id, "Created session");
        SessionGuard { guard, touched }
    }

    /// Lock an existing session without waiting
    pub async fn acquire(&self, id: &str) -> Result<SessionGuard, SessionStoreError> {
        let (session, touched) = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(id)
                .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))?;
            (entry.session.clone(), entry.touched.clone())
        };

        let guard = session
            .try_lock_owned()
            .map_err(|_| SessionStoreError::Busy(id.to_string()))?;
        touch(&touched);

        Ok(SessionGuard { guard, touched })
    }

    /// Remove a session; returns whether it existed
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::debug!(session_id = %id, "Deleted session");
        }
        removed
    }

    /// Evict expired sessions that no run currently holds
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|id, entry| {
            if entry.session.try_lock().is_err() {
                return true;
            }
            let idle_for = entry
                .touched
                .lock()
                .map(|at| now.saturating_duration_since(*at))
                .unwrap_or_default();
            let expired = self.expiry.is_expired(idle_for);
            if expired {
                tracing::info!(session_id = %id, idle_secs = idle_for.as_secs(), "Evicting idle session");
            }
            !expired
        });

        before - sessions.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Hold the map's read lock, stalling every writer until dropped
    #[cfg(test)]
    pub(crate) async fn hold_reader(&self) -> impl Sized {
        self.sessions.read().await
    }
}
