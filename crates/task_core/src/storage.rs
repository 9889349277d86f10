use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::instance::{TaskId, TaskInstance};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The durable layer behind the task store. Assumed crash-consistent per
/// call; `create` and `update` are upserts so retrying after a reload is
/// safe.
pub trait DurableStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<TaskInstance>, StorageError>;
    fn create(&self, task: &TaskInstance) -> Result<(), StorageError>;
    fn update(&self, task: &TaskInstance) -> Result<(), StorageError>;
    fn delete(&self, id: TaskId) -> Result<(), StorageError>;
}

/// Persists the whole collection as one pretty-printed JSON document.
/// Writes go through a temp file and rename so readers never observe a
/// partial document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<TaskInstance>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, tasks: &[TaskInstance]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(tasks)?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DurableStore for JsonFileStore {
    fn get_all(&self) -> Result<Vec<TaskInstance>, StorageError> {
        self.load()
    }

    fn create(&self, task: &TaskInstance) -> Result<(), StorageError> {
        let mut tasks = self.load()?;
        match tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        self.save(&tasks)
    }

    fn update(&self, task: &TaskInstance) -> Result<(), StorageError> {
        self.create(task)
    }

    fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        let mut tasks = self.load()?;
        tasks.retain(|task| task.id != id);
        self.save(&tasks)
    }
}

/// In-memory durable layer for tests and embedders that manage their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Mutex<HashMap<TaskId, TaskInstance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get_all(&self) -> Result<Vec<TaskInstance>, StorageError> {
        Ok(self.tasks.lock().values().cloned().collect())
    }

    fn create(&self, task: &TaskInstance) -> Result<(), StorageError> {
        self.tasks.lock().insert(task.id, task.clone());
        Ok(())
    }

    fn update(&self, task: &TaskInstance) -> Result<(), StorageError> {
        self.tasks.lock().insert(task.id, task.clone());
        Ok(())
    }

    fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        self.tasks.lock().remove(&id);
        Ok(())
    }
}
