//! Durable store collaborator.
//!
//! Holds terminated-worker history and exported task records. Records are
//! plain JSON values; filters match top-level fields by equality.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Worker,
    Task,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Worker => "workers",
            RecordKind::Task => "tasks",
        }
    }
}

/// Top-level field equality filter. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    fields: BTreeMap<String, Value>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.fields
            .iter()
            .all(|(name, expected)| record.get(name) == Some(expected))
    }
}

pub trait DurableStore: Send + Sync {
    /// Insert or replace a record.
    fn put(&self, kind: RecordKind, id: &str, record: Value) -> Result<()>;

    fn get_all(&self, kind: RecordKind, filter: &RecordFilter) -> Result<Vec<Value>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKind, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, kind: RecordKind, id: &str, record: Value) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.entry(kind).or_default().insert(id.to_string(), record);
        Ok(())
    }

    fn get_all(&self, kind: RecordKind, filter: &RecordFilter) -> Result<Vec<Value>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&kind)
            .map(|m| m.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }
}

/// One pretty-printed JSON file per record under `<root>/<kind>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.as_str())
    }
}

impl DurableStore for JsonFileStore {
    fn put(&self, kind: RecordKind, id: &str, record: Value) -> Result<()> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", id));
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        debug!("JsonFileStore::put {}", path.display());
        Ok(())
    }

    fn get_all(&self, kind: RecordKind, filter: &RecordFilter) -> Result<Vec<Value>> {
        let dir = self.kind_dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut out = Vec::new();
        for path in paths {
            let record: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if filter.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }
}
