use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::capture::error::{CaptureError, Result};
use crate::settings::types::CaptureConfig;

/// Persistent capture configuration with debounced saving.
pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<CaptureConfig>,
    save_notify: Notify,
    is_dirty: AtomicBool,
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Config(format!("{}: {e}", path.display()))
}

impl ConfigStore {
    /// Create a new store, loading from disk if the file exists.
    ///
    /// An unreadable or invalid file falls back to the defaults.
    pub fn new(path: PathBuf) -> Self {
        let data = match Self::load(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Ignoring saved capture config: {e}");
                CaptureConfig::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
            save_notify: Notify::new(),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Load a config from a JSON file, returning the default on a missing file.
    pub fn load(path: &Path) -> Result<CaptureConfig> {
        if !path.exists() {
            return Ok(CaptureConfig::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| store_error(path, e))?;
        let config: CaptureConfig =
            serde_json::from_str(&contents).map_err(|e| store_error(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the current config to disk atomically (write .tmp then rename).
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().clone();
        let json = serde_json::to_string_pretty(&data).map_err(|e| store_error(&self.path, e))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| store_error(parent, e))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| store_error(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| store_error(&self.path, e))?;

        Ok(())
    }

    pub fn get(&self) -> CaptureConfig {
        self.data.lock().clone()
    }

    /// Apply `change` to a copy of the config and keep it if it validates.
    /// Triggers a debounced save.
    pub fn update(&self, change: impl FnOnce(&mut CaptureConfig)) -> Result<()> {
        {
            let mut data = self.data.lock();
            let mut next = data.clone();
            change(&mut next);
            next.validate()?;
            *data = next;
        }
        self.is_dirty.store(true, Ordering::Release);
        self.save_notify.notify_one();
        Ok(())
    }

    /// Start the debounce task: waits for a dirty notification, sleeps
    /// 500ms, then saves. Must be called inside a tokio runtime.
    ///
    /// The `AtomicBool` dirty flag keeps notifications that arrive between
    /// `save()` completing and `notified().await` re-registering.
    pub fn start_debounce_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.save_notify.notified().await;
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                if store.is_dirty.swap(false, Ordering::AcqRel) {
                    if let Err(e) = store.save() {
                        tracing::warn!("Failed to save capture config: {e}");
                    }
                }
            }
        })
    }
}
