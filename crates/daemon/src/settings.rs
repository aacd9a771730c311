//! Shared, persisted capture schedule
//!
//! One writer at a time, any number of readers. Readers take a full snapshot
//! so a tick never sees a half-applied change.

use crate::config::{ScheduleConfig, SettingsStore, SettingsUpdate, StoreError};
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to the live schedule and the file backing it
#[derive(Clone)]
pub struct SharedSettings {
    current: Arc<RwLock<ScheduleConfig>>,
    store: Arc<SettingsStore>,
}

impl SharedSettings {
    /// Load the schedule from `store` (defaults if missing or corrupt)
    pub fn load(store: SettingsStore) -> Self {
        let initial = store.load();
        Self::new(store, initial)
    }

    pub fn new(store: SettingsStore, initial: ScheduleConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    /// Consistent copy of the current schedule
    pub async fn snapshot(&self) -> ScheduleConfig {
        self.current.read().await.clone()
    }

    /// Validate, persist and publish `update`
    pub async fn apply(&self, update: SettingsUpdate) -> Result<ScheduleConfig, StoreError> {
        self.apply_with(|_| Ok::<_, StoreError>(update)).await
    }

    /// Build an update from the current schedule and apply it atomically
    ///
    /// The write lock is held while the update is built and persisted, so
    /// read-modify-write changes such as appending a window cannot race.
    /// The file write runs on the blocking pool. In-memory state only
    /// changes once it succeeded.
    pub async fn apply_with<F, E>(&self, build: F) -> Result<ScheduleConfig, E>
    where
        F: FnOnce(&ScheduleConfig) -> Result<SettingsUpdate, E>,
        E: From<StoreError>,
    {
        let mut current = self.current.write().await;
        let update = build(&current)?;

        let store = self.store.clone();
        let base = current.clone();
        let merged = tokio::task::spawn_blocking(move || store.save(&base, &update))
            .await
            .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        *current = merged.clone();
        Ok(merged)
    }
}
