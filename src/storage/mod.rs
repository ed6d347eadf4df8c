//! Persistence layer.
//!
//! Saves and loads the run checkpoint. `JsonFileStore` is the durable
//! implementation used by the binary; `MemoryStore` keeps everything
//! in-process and records every save, which is what tests and embedders
//! use to observe the checkpoint history.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{Checkpoint, ScovilleError};

/// Durable home of the single checkpoint record.
///
/// Implementations must serialise access internally; the engine is the only
/// writer but observers may read concurrently.
pub trait ProgressStore: Send + Sync {
    /// Return the stored checkpoint, or the default one if none exists.
    fn load(&self) -> Result<Checkpoint, ScovilleError>;

    /// Replace the stored checkpoint. Must not leave a partial record behind.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ScovilleError>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Pretty-printed JSON file, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the checkpoint file (external reset of a finished run).
    pub fn clear(&self) -> Result<(), ScovilleError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| self.persistence_error(e))?;
            info!(path = %self.path.display(), "Checkpoint cleared");
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persistence_error(&self, source: io::Error) -> ScovilleError {
        ScovilleError::Persistence {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn corrupt(&self, message: impl Into<String>) -> ScovilleError {
        ScovilleError::CorruptState {
            path: self.path.display().to_string(),
            message: message.into(),
        }
    }
}

impl ProgressStore for JsonFileStore {
    fn load(&self) -> Result<Checkpoint, ScovilleError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved progress found, starting fresh");
                return Ok(Checkpoint::default());
            }
            Err(e) => return Err(self.persistence_error(e)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&json).map_err(|e| self.corrupt(e.to_string()))?;

        if !checkpoint.total_spent.is_finite() || checkpoint.total_spent < 0.0 {
            return Err(self.corrupt(format!(
                "total_spent must be a non-negative number, got {}",
                checkpoint.total_spent
            )));
        }

        info!(
            path = %self.path.display(),
            phase = %checkpoint.phase,
            anchor_index = checkpoint.anchor_index,
            gap_fill_index = checkpoint.gap_fill_index,
            total_spent = format!("${:.2}", checkpoint.total_spent),
            paused = checkpoint.paused,
            "Progress loaded from disk"
        );

        Ok(checkpoint)
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ScovilleError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| self.persistence_error(e.into()))?;

        // Write-to-temp then rename: a crash leaves either the old or the new
        // record, never a truncated one.
        let temp = self.temp_path();
        let write = || -> io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&temp);
            return Err(self.persistence_error(e));
        }

        debug!(
            path = %self.path.display(),
            phase = %checkpoint.phase,
            total_spent = checkpoint.total_spent,
            "Checkpoint saved"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    current: Option<Checkpoint>,
    history: Vec<Checkpoint>,
    fail_on_save: Option<usize>,
    saves_attempted: usize,
}

/// In-process store that records every successful save.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing checkpoint, as if it had been loaded from disk.
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        let store = Self::default();
        store.lock().current = Some(checkpoint);
        store
    }

    /// Make the `n`th save attempt (1-based) and every one after it fail.
    pub fn fail_on_save(&self, n: usize) {
        self.lock().fail_on_save = Some(n);
    }

    /// Every checkpoint successfully saved, oldest first.
    pub fn history(&self) -> Vec<Checkpoint> {
        self.lock().history.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().history.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self) -> Result<Checkpoint, ScovilleError> {
        Ok(self.lock().current.clone().unwrap_or_default())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ScovilleError> {
        let mut inner = self.lock();
        inner.saves_attempted += 1;
        if let Some(n) = inner.fail_on_save {
            if inner.saves_attempted >= n {
                return Err(ScovilleError::Persistence {
                    path: "<memory>".to_string(),
                    source: io::Error::other("injected save failure"),
                });
            }
        }
        inner.current = Some(checkpoint.clone());
        inner.history.push(checkpoint.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
