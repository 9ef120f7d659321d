//! Storage collaborators used by the orchestrator.
//!
//! Training only sees three narrow interfaces: a [`DatasetSource`] for raw
//! table bytes, an [`ArtifactStore`] for the model bundle and prediction
//! snapshot, and a [`MetadataStore`] for the `models` records. Filesystem and
//! in-memory implementations are provided; remote backends implement the same
//! traits.
//!
//! ```
//! use tabforge_learning::{InMemoryMetadataStore, MetadataStore};
//!
//! let store = InMemoryMetadataStore::new();
//! assert!(!store.model_name_exists("user-1", "churn_rf").unwrap());
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tabforge_processing::ProblemType;

use crate::config::ModelParams;
use crate::error::StorageError;
use crate::metrics::Metrics;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Interfaces
// ============================================================================

/// Source of uploaded datasets.
pub trait DatasetSource: Send + Sync {
    /// Raw bytes of a user's dataset.
    fn fetch_raw_table(&self, dataset_id: &str, user_id: &str) -> StorageResult<Vec<u8>>;

    fn download(&self, path: &str) -> StorageResult<Vec<u8>>;
}

/// Blob storage for trained artifacts.
pub trait ArtifactStore: Send + Sync {
    fn upload(&self, path: &str, bytes: &[u8], overwrite: bool) -> StorageResult<()>;

    fn download(&self, path: &str) -> StorageResult<Vec<u8>>;

    fn public_url(&self, path: &str) -> String;
}

/// A row of the `models` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Assigned by the store on insert.
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub dataset_id: String,
    pub model_name: String,
    pub model_type: String,
    pub problem_type: ProblemType,
    pub model_url: String,
    pub predictions_url: String,
    pub target_column: String,
    pub metrics: Metrics,
    pub training_time: f64,
    pub feature_columns: Vec<String>,
    pub parameters: ModelParams,
    pub status: String,
    pub description: String,
    pub created_at: String,
}

/// Persistence for model records.
///
/// Name checks are best effort: two concurrent jobs may both see a name as
/// free.
pub trait MetadataStore: Send + Sync {
    /// Store a new record and return it with its assigned id.
    fn insert_model(&self, record: ModelRecord) -> StorageResult<ModelRecord>;

    fn get_model(&self, id: &str) -> StorageResult<ModelRecord>;

    fn list_models(&self, user_id: &str) -> StorageResult<Vec<ModelRecord>>;

    /// Replace the record with the same id.
    fn update_model(&self, record: &ModelRecord) -> StorageResult<()>;

    fn model_name_exists(&self, user_id: &str, model_name: &str) -> StorageResult<bool>;
}

// ============================================================================
// Filesystem Implementations
// ============================================================================

/// Join a store-relative path onto `root`, refusing absolute paths and `..`.
fn resolve_path(root: &Path, path: &str) -> StorageResult<PathBuf> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(StorageError::Backend {
            path: path.to_string(),
            message: "path must be relative and stay inside the store".to_string(),
        });
    }
    Ok(root.join(relative))
}

fn read_file(root: &Path, path: &str) -> StorageResult<Vec<u8>> {
    let full = resolve_path(root, path)?;
    fs::read(&full).map_err(|e| StorageError::io(path, e))
}

/// Datasets laid out as `{root}/{user_id}/datasets/{dataset_id}.csv`.
#[derive(Debug, Clone)]
pub struct LocalDatasetSource {
    root: PathBuf,
}

impl LocalDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store-relative path of a dataset.
    pub fn dataset_path(dataset_id: &str, user_id: &str) -> String {
        format!("{user_id}/datasets/{dataset_id}.csv")
    }
}

impl DatasetSource for LocalDatasetSource {
    fn fetch_raw_table(&self, dataset_id: &str, user_id: &str) -> StorageResult<Vec<u8>> {
        let path = Self::dataset_path(dataset_id, user_id);
        read_file(&self.root, &path).map_err(|e| match e {
            StorageError::NotFound(_) => StorageError::NotFound(format!(
                "dataset '{dataset_id}' for user '{user_id}'"
            )),
            other => other,
        })
    }

    fn download(&self, path: &str) -> StorageResult<Vec<u8>> {
        read_file(&self.root, path)
    }
}

/// Artifacts stored as plain files under `root`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn upload(&self, path: &str, bytes: &[u8], overwrite: bool) -> StorageResult<()> {
        let full = resolve_path(&self.root, path)?;
        if !overwrite && full.exists() {
            return Err(StorageError::Backend {
                path: path.to_string(),
                message: "artifact already exists".to_string(),
            });
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(path, e))?;
        }
        fs::write(&full, bytes).map_err(|e| StorageError::io(path, e))?;
        tracing::debug!("Uploaded {} bytes to {}", bytes.len(), full.display());
        Ok(())
    }

    fn download(&self, path: &str) -> StorageResult<Vec<u8>> {
        read_file(&self.root, path)
    }

    fn public_url(&self, path: &str) -> String {
        format!("file://{}", self.root.join(path).display())
    }
}

// ============================================================================
// Metadata Stores
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordTable {
    next_id: u64,
    records: BTreeMap<String, ModelRecord>,
}

impl RecordTable {
    fn insert(&mut self, mut record: ModelRecord) -> ModelRecord {
        self.next_id += 1;
        record.id = format!("model-{:06}", self.next_id);
        self.records.insert(record.id.clone(), record.clone());
        record
    }

    fn get(&self, id: &str) -> StorageResult<ModelRecord> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("model '{id}'")))
    }

    fn list(&self, user_id: &str) -> Vec<ModelRecord> {
        self.records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn update(&mut self, record: &ModelRecord) -> StorageResult<()> {
        match self.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("model '{}'", record.id))),
        }
    }

    fn name_exists(&self, user_id: &str, model_name: &str) -> bool {
        self.records
            .values()
            .any(|r| r.user_id == user_id && r.model_name == model_name)
    }
}

/// Records kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    table: RwLock<RecordTable>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn insert_model(&self, record: ModelRecord) -> StorageResult<ModelRecord> {
        Ok(self.table.write().insert(record))
    }

    fn get_model(&self, id: &str) -> StorageResult<ModelRecord> {
        self.table.read().get(id)
    }

    fn list_models(&self, user_id: &str) -> StorageResult<Vec<ModelRecord>> {
        Ok(self.table.read().list(user_id))
    }

    fn update_model(&self, record: &ModelRecord) -> StorageResult<()> {
        self.table.write().update(record)
    }

    fn model_name_exists(&self, user_id: &str, model_name: &str) -> StorageResult<bool> {
        Ok(self.table.read().name_exists(user_id, model_name))
    }
}

/// Records persisted to a single JSON file, rewritten after every change.
#[derive(Debug)]
pub struct JsonFileMetadataStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> StorageResult<RecordTable> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Backend {
                path: self.label(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RecordTable::default()),
            Err(e) => Err(StorageError::io(self.label(), e)),
        }
    }

    fn save(&self, table: &RecordTable) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(table).map_err(|e| StorageError::Backend {
            path: self.label(),
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(self.label(), e))?;
        }
        fs::write(&self.path, json).map_err(|e| StorageError::io(self.label(), e))
    }
}

impl MetadataStore for JsonFileMetadataStore {
    fn insert_model(&self, record: ModelRecord) -> StorageResult<ModelRecord> {
        let _guard = self.lock.lock();
        let mut table = self.load()?;
        let record = table.insert(record);
        self.save(&table)?;
        Ok(record)
    }

    fn get_model(&self, id: &str) -> StorageResult<ModelRecord> {
        self.load()?.get(id)
    }

    fn list_models(&self, user_id: &str) -> StorageResult<Vec<ModelRecord>> {
        Ok(self.load()?.list(user_id))
    }

    fn update_model(&self, record: &ModelRecord) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let mut table = self.load()?;
        table.update(record)?;
        self.save(&table)
    }

    fn model_name_exists(&self, user_id: &str, model_name: &str) -> StorageResult<bool> {
        Ok(self.load()?.name_exists(user_id, model_name))
    }
}

static_assertions::assert_impl_all!(InMemoryMetadataStore: Send, Sync);
static_assertions::assert_impl_all!(JsonFileMetadataStore: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_record(user_id: &str, name: &str) -> ModelRecord {
        ModelRecord {
            id: String::new(),
            user_id: user_id.to_string(),
            dataset_id: "ds-1".to_string(),
            model_name: name.to_string(),
            model_type: "ridge".to_string(),
            problem_type: ProblemType::Regression,
            model_url: String::new(),
            predictions_url: String::new(),
            target_column: "price".to_string(),
            metrics: Metrics::default(),
            training_time: 0.5,
            feature_columns: vec!["size".to_string()],
            parameters: ModelParams::new(),
            status: "completed".to_string(),
            description: "Trained ridge model on price".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_in_memory_store_crud() {
        let store = InMemoryMetadataStore::new();
        let inserted = store.insert_model(sample_record("u1", "first")).unwrap();
        assert_eq!(inserted.id, "model-000001");
        assert!(store.model_name_exists("u1", "first").unwrap());
        assert!(!store.model_name_exists("u2", "first").unwrap());

        let mut updated = inserted.clone();
        updated.status = "archived".to_string();
        store.update_model(&updated).unwrap();
        assert_eq!(store.get_model(&inserted.id).unwrap().status, "archived");
        assert_eq!(store.list_models("u1").unwrap().len(), 1);
        assert!(matches!(store.get_model("nope"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_json_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta").join("models.json");

        let store = JsonFileMetadataStore::new(&path);
        store.insert_model(sample_record("u1", "a")).unwrap();
        let second = store.insert_model(sample_record("u1", "b")).unwrap();
        assert_eq!(second.id, "model-000002");

        let reopened = JsonFileMetadataStore::new(&path);
        assert!(reopened.model_name_exists("u1", "b").unwrap());
        assert_eq!(reopened.list_models("u1").unwrap().len(), 2);
    }

    #[test]
    fn test_artifact_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.upload("u1/models/m.json", b"{}", true).unwrap();
        assert_eq!(store.download("u1/models/m.json").unwrap(), b"{}");
        assert!(store.public_url("u1/models/m.json").starts_with("file://"));

        let err = store.upload("u1/models/m.json", b"[]", false).unwrap_err();
        assert!(matches!(err, StorageError::Backend { .. }));
        assert!(matches!(store.download("u1/missing.json"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_paths_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.upload("../outside.json", b"{}", true).is_err());
        assert!(store.upload("/etc/passwd", b"{}", true).is_err());
    }

    #[test]
    fn test_dataset_source_layout() {
        let dir = tempfile::tempdir().unwrap();
        let datasets = dir.path().join("u1").join("datasets");
        fs::create_dir_all(&datasets).unwrap();
        fs::write(datasets.join("ds-9.csv"), "a,b\n1,2\n").unwrap();

        let source = LocalDatasetSource::new(dir.path());
        assert_eq!(source.fetch_raw_table("ds-9", "u1").unwrap(), b"a,b\n1,2\n");
        let err = source.fetch_raw_table("ds-0", "u1").unwrap_err();
        assert!(err.to_string().contains("ds-0"));
    }
}
