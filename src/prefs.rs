use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::Value;
use tracing::warn;

use crate::{AppError, AppResult};

/// Small durable key/value settings, the device-local equivalent of user defaults.
trait PrefsBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str) -> bool;
    fn entries(&self) -> BTreeMap<String, Value>;
    fn save(&self) -> anyhow::Result<()>;
}

struct JsonFileBackend {
    path: PathBuf,
    data: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileBackend {
    fn open(path: PathBuf) -> AppResult<Self> {
        let data = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                AppError::from(err).with_context("path", path.display().to_string())
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(AppError::from(err).with_context("path", path.display().to_string()))
            }
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }
}

impl PrefsBackend for JsonFileBackend {
    fn get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: Value) {
        let mut guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> bool {
        let mut guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key).is_some()
    }

    fn entries(&self) -> BTreeMap<String, Value> {
        self.data
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn save(&self) -> anyhow::Result<()> {
        let snapshot = self.entries();
        let serialized =
            serde_json::to_vec_pretty(&snapshot).context("serialize preferences")?;
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)
            .with_context(|| format!("create preferences dir {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(&serialized).context("write preferences")?;
        tmp.as_file().sync_all().context("sync preferences")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryBackend {
    data: Mutex<BTreeMap<String, Value>>,
}

impl PrefsBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: Value) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) -> bool {
        self.data
            .lock()
            .map(|mut guard| guard.remove(key).is_some())
            .unwrap_or(false)
    }

    fn entries(&self) -> BTreeMap<String, Value> {
        self.data
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct PrefsHandle {
    inner: Arc<dyn PrefsBackend>,
}

impl PrefsHandle {
    /// Opens (or lazily creates) a JSON preferences file.
    pub fn json_file(path: impl Into<PathBuf>) -> AppResult<Self> {
        Ok(Self {
            inner: Arc::new(JsonFileBackend::open(path.into())?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemoryBackend::default()),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner
            .get(key)
            .and_then(|value| value.as_str().map(str::to_owned))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.inner.get(key) {
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|value| value.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.get(key).is_some()
    }

    pub fn set_string(&self, key: &str, value: &str) {
        self.inner.set(key, Value::String(value.to_string()));
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.inner.set(key, Value::Bool(value));
    }

    pub fn set_string_list(&self, key: &str, values: &[String]) {
        let array = values.iter().cloned().map(Value::String).collect();
        self.inner.set(key, Value::Array(array));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(key)
    }

    /// Values currently stored under `keys`, skipping absent ones.
    pub fn snapshot(&self, keys: &[&str]) -> BTreeMap<String, Value> {
        let entries = self.inner.entries();
        keys.iter()
            .filter_map(|key| entries.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect()
    }

    pub fn persist(&self) -> AppResult<()> {
        self.inner.save().map_err(|err| {
            AppError::new("PREFS/SAVE_FAILED", "Could not save preferences")
                .with_cause(AppError::from(err))
        })
    }

    /// Persist, logging instead of failing; for callers whose in-memory state is
    /// already authoritative.
    pub fn persist_best_effort(&self, event: &'static str) {
        if let Err(err) = self.persist() {
            warn!(target: "spichr", event, error = %err);
        }
    }
}
