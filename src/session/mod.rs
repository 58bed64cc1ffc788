//! Bulk sessions
//!
//! A session pairs a [`SessionCache`] with a [`SessionBatcher`]. The
//! [`SessionRegistry`] owns every open session, keyed by caller-chosen id, and is
//! handed to callers explicitly rather than reached through global state.

pub mod batcher;
pub mod cache;
mod mirror;

pub use batcher::{BatchFlush, SessionBatcher};
pub use cache::SessionCache;

use crate::error::StorageError;
use crate::events::EventPublisher;
use crate::store::TreeStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One open bulk session.
pub struct Session {
    id: String,
    cache: Arc<SessionCache>,
    batcher: SessionBatcher,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn batcher(&self) -> &SessionBatcher {
        &self.batcher
    }

    /// The cache as a plain tree store.
    pub fn tree(&self) -> Arc<dyn TreeStore> {
        Arc::clone(&self.cache) as Arc<dyn TreeStore>
    }

    /// Apply deferred ancestor updates and events, then drain the cache.
    ///
    /// Both steps run even if the first fails; the first error wins.
    pub fn flush(
        &self,
        publisher: &dyn EventPublisher,
        final_flush: bool,
    ) -> Result<BatchFlush, StorageError> {
        let batched = self.batcher.flush(self.cache.as_ref(), publisher);
        let drained = self.cache.flush(final_flush);
        let batched = batched?;
        drained?;
        info!(
            session = %self.id,
            final_flush,
            paths = batched.paths,
            events = batched.events,
            "Flushed session"
        );
        Ok(batched)
    }
}

/// Process-wide set of open sessions.
pub struct SessionRegistry {
    store: Arc<dyn TreeStore>,
    publisher: Arc<dyn EventPublisher>,
    buffer: usize,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn TreeStore>, publisher: Arc<dyn EventPublisher>, buffer: usize) -> Self {
        Self {
            store,
            publisher,
            buffer,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Session `id`, created if absent.
    pub fn open(&self, id: &str) -> Result<Arc<Session>, StorageError> {
        if id.is_empty() {
            return Err(StorageError::InvalidArgument("session id is empty".to_string()));
        }
        if let Some(session) = self.sessions.read().get(id) {
            return Ok(Arc::clone(session));
        }

        let mut sessions = self.sessions.write();
        // another caller may have created it between the two locks
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(Session {
            id: id.to_string(),
            cache: Arc::new(SessionCache::new(Arc::clone(&self.store), self.buffer)?),
            batcher: SessionBatcher::new(),
        });
        sessions.insert(id.to_string(), Arc::clone(&session));
        info!(session = %id, "Opened session");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn flush(&self, id: &str, final_flush: bool) -> Result<BatchFlush, StorageError> {
        let session = self
            .get(id)
            .ok_or_else(|| StorageError::NotFound(format!("no open session {:?}", id)))?;
        session.flush(self.publisher.as_ref(), final_flush)
    }

    /// Terminal flush, then forget the session.
    pub fn close(&self, id: &str) -> Result<BatchFlush, StorageError> {
        let session = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("no open session {:?}", id)))?;
        let result = session.flush(self.publisher.as_ref(), true);
        info!(session = %id, ok = result.is_ok(), "Closed session");
        result
    }

    /// Close every open session. Returns the failures by session id.
    pub fn shutdown(&self) -> Vec<(String, StorageError)> {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let mut failures = Vec::new();
        for session in sessions {
            if let Err(e) = session.flush(self.publisher.as_ref(), true) {
                warn!(session = %session.id, error = %e, "Session failed to flush on shutdown");
                failures.push((session.id.clone(), e));
            }
        }
        failures
    }
}
