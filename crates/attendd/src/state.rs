use crate::config::Config;
use crate::engine::EngineHandle;
use attend_core::{AttendanceLog, StoreError, UserStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};

/// Registered users, reloaded from disk whenever the file changes.
pub struct Users {
    store: UserStore,
    loaded_mtime: Option<SystemTime>,
}

impl Users {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let loaded_mtime = mtime(&path);
        Ok(Self {
            store: UserStore::open(path)?,
            loaded_mtime,
        })
    }

    /// Load `path` again if its mtime differs from `loaded_mtime`.
    /// A file that fails to parse yields `None` so the previous registry stays.
    fn reload_if_changed(path: &Path, loaded_mtime: Option<SystemTime>) -> Option<Self> {
        let current = mtime(path);
        if current == loaded_mtime {
            return None;
        }
        match UserStore::open(path) {
            Ok(store) => {
                tracing::info!(count = store.len(), "users file changed; reloaded");
                Some(Self {
                    store,
                    loaded_mtime: current,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "users file changed but could not be reloaded");
                None
            }
        }
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Shared server state.
pub struct AppState {
    pub users: RwLock<Users>,
    pub attendance: Mutex<AttendanceLog>,
    pub engine: EngineHandle,
    pub match_threshold: f32,
}

impl AppState {
    pub fn open(config: &Config, engine: EngineHandle) -> Result<Arc<Self>, StoreError> {
        let users = Users::open(config.users_path())?;
        let attendance = AttendanceLog::open(config.attendance_path())?;
        Ok(Arc::new(Self {
            users: RwLock::new(users),
            attendance: Mutex::new(attendance),
            engine,
            match_threshold: config.match_threshold,
        }))
    }

    /// Pick up registrations made by the CLI while the server runs.
    /// File access happens on the blocking pool, not under the lock.
    pub async fn refresh_users(&self) {
        let (path, loaded_mtime) = {
            let users = self.users.read().await;
            (users.store.path().to_path_buf(), users.loaded_mtime)
        };

        let reloaded =
            tokio::task::spawn_blocking(move || Users::reload_if_changed(&path, loaded_mtime)).await;
        match reloaded {
            Ok(Some(users)) => *self.users.write().await = users,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "users reload task failed"),
        }
    }

    /// Refresh from disk if needed and return the user count.
    pub async fn user_count(&self) -> usize {
        self.refresh_users().await;
        self.users.read().await.store().len()
    }
}
