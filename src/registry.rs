//! Session registry: the single source of truth for "is a session running
//! for this camera".
//!
//! Lookups only take the map's read lock. Creation is serialized per camera
//! identifier through a dedicated lock, so two concurrent requests for the
//! same camera spawn at most one encoder while unrelated cameras proceed in
//! parallel.

use crate::error::Result;
use crate::session::{ExitRecord, StreamSession};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<StreamSession>>>,
    /// Per-camera start/stop locks. Entries only live while someone holds
    /// or waits for them.
    camera_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Last crash per camera, cleared by the next successful start
    failures: RwLock<HashMap<String, ExitRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session for the camera, if any.
    pub async fn get(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().await.get(camera_id).cloned()
    }

    /// Serializes start/stop work for one camera. Held for the whole
    /// check-and-insert of [`create_if_absent`](Self::create_if_absent).
    pub async fn lock_camera(&self, camera_id: &str) -> CameraGuard<'_> {
        let guard = self.camera_lock(camera_id).lock_owned().await;
        CameraGuard {
            registry: self,
            camera_id: camera_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Returns the existing non-terminated session, or runs `factory` and
    /// registers what it builds. The bool is true when a new session was
    /// created.
    pub async fn create_if_absent<F, Fut>(
        &self,
        camera_id: &str,
        factory: F,
    ) -> Result<(Arc<StreamSession>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<StreamSession>>>,
    {
        let _guard = self.lock_camera(camera_id).await;

        if let Some(existing) = self.get(camera_id).await {
            if !existing.is_terminated() {
                debug!(camera_id = %camera_id, session = existing.id(), "Reusing session");
                return Ok((existing, false));
            }
            // Exit already observed; the watcher just has not reconciled yet
            self.remove_if_current(camera_id, existing.id()).await;
        }

        let session = factory().await?;
        {
            // Checked under the write lock: an exit recorded after this point
            // is reconciled against the inserted entry by the watcher.
            let mut sessions = self.sessions.write().await;
            if let Some(record) = session.exit_record() {
                drop(sessions);
                debug!(camera_id = %camera_id, "Session ended before registration");
                if record.is_crash() {
                    self.failures
                        .write()
                        .await
                        .insert(camera_id.to_string(), record);
                }
                return Ok((session, true));
            }
            sessions.insert(camera_id.to_string(), session.clone());
        }
        self.failures.write().await.remove(camera_id);

        info!(camera_id = %camera_id, session = session.id(), "Session registered");
        Ok((session, true))
    }

    /// Removes and returns the entry. Removing an absent key is a no-op.
    pub async fn remove(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.write().await.remove(camera_id)
    }

    /// Removes the entry only while it still holds `session`.
    pub async fn remove_session(&self, session: &StreamSession) -> bool {
        self.remove_if_current(session.camera_id(), session.id()).await
    }

    /// Called by the encoder supervisor once a session's process is gone.
    /// Only drops the entry if it still belongs to that session, so a newer
    /// session for the same camera is left alone.
    pub async fn reconcile_exit(&self, session: &StreamSession, record: &ExitRecord) {
        let camera_id = session.camera_id();
        let removed = self.remove_if_current(camera_id, session.id()).await;

        if !removed {
            return;
        }
        if record.is_crash() {
            warn!(
                camera_id = %camera_id,
                code = ?record.code,
                "Session terminated by encoder exit"
            );
            self.failures
                .write()
                .await
                .insert(camera_id.to_string(), record.clone());
        } else {
            info!(camera_id = %camera_id, "Session ended");
        }
    }

    pub async fn last_failure(&self, camera_id: &str) -> Option<ExitRecord> {
        self.failures.read().await.get(camera_id).cloned()
    }

    pub async fn failures(&self) -> HashMap<String, ExitRecord> {
        self.failures.read().await.clone()
    }

    pub async fn snapshot(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Empties the registry, handing every session to the caller for teardown.
    pub async fn drain(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }

    async fn remove_if_current(&self, camera_id: &str, session_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(camera_id).is_some_and(|s| s.id() == session_id) {
            sessions.remove(camera_id);
            true
        } else {
            false
        }
    }

    fn camera_lock(&self, camera_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.camera_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the camera's lock entry when nobody holds or waits for it.
    fn release_camera_lock(&self, camera_id: &str) {
        let mut locks = self.camera_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(camera_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(camera_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.camera_locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Exclusive start/stop access to one camera. Releasing it also forgets the
/// lock entry once no other task is queued on it.
pub struct CameraGuard<'a> {
    registry: &'a SessionRegistry,
    camera_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CameraGuard<'_> {
    fn drop(&mut self) {
        // The owned guard keeps its own Arc; drop it before counting
        self.guard.take();
        self.registry.release_camera_lock(&self.camera_id);
    }
}
