//! Durable storage backends for deployment records.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use super::DeploymentRecord;
use crate::registry::is_path_safe;

/// Name of the lock file guarding a deployments directory.
pub const LOCK_FILENAME: &str = ".contrail.lock";

/// Key-value storage of records keyed by `(unit_name, network)`.
///
/// The only contract is durability: whatever `put` writes must be returned by
/// `get` and `list_all` in a later process.
pub trait ArtifactPersistence {
    fn get(&self, unit_name: &str, network: &str) -> Result<Option<DeploymentRecord>>;

    /// Insert or replace the record for `(record.unit_name, record.network)`.
    fn put(&mut self, record: &DeploymentRecord) -> Result<()>;

    fn list_all(&self) -> Result<Vec<DeploymentRecord>>;
}

/// In-memory persistence, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    records: BTreeMap<(String, String), DeploymentRecord>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing records, e.g. the ones loaded from disk for a dry run.
    pub fn seeded(records: impl IntoIterator<Item = DeploymentRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| ((r.unit_name.clone(), r.network.clone()), r))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ArtifactPersistence for MemoryPersistence {
    fn get(&self, unit_name: &str, network: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .records
            .get(&(unit_name.to_string(), network.to_string()))
            .cloned())
    }

    fn put(&mut self, record: &DeploymentRecord) -> Result<()> {
        self.records.insert(
            (record.unit_name.clone(), record.network.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<DeploymentRecord>> {
        Ok(self.records.values().cloned().collect())
    }
}

/// File-backed persistence.
///
/// Each record is stored as `{root}/{network}/{unit_name}.json`. A writer locks the
/// directory exclusively for the lifetime of the value so that two runs never write
/// the same deployments concurrently. Readers share the lock.
#[derive(Debug)]
pub struct FileArtifactPersistence {
    root: PathBuf,
    /// `None` for a reader of a directory no run has written yet.
    lock: Option<File>,
    read_only: bool,
}

impl FileArtifactPersistence {
    /// Open (and create if needed) a deployments directory, taking its lock.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).context(format!(
            "Failed to create deployments directory {}",
            root.display()
        ))?;

        let lock_path = root.join(LOCK_FILENAME);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context(format!("Failed to open lock file {}", lock_path.display()))?;

        FileExt::try_lock_exclusive(&lock).context(format!(
            "Deployments directory {} is locked by another run",
            root.display()
        ))?;

        tracing::debug!(root = %root.display(), "Opened deployments directory");
        Ok(Self {
            root,
            lock: Some(lock),
            read_only: false,
        })
    }

    /// Open a deployments directory for reading only.
    ///
    /// Nothing is created on disk. A missing directory reads as empty. Other
    /// readers may hold the lock at the same time, a running deployment may not.
    pub fn open_read_only(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let lock_path = root.join(LOCK_FILENAME);

        let lock = match File::open(&lock_path) {
            Ok(lock) => {
                FileExt::try_lock_shared(&lock).context(format!(
                    "Deployments directory {} is locked by a running deployment",
                    root.display()
                ))?;
                Some(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).context(format!("Failed to open lock file {}", lock_path.display()));
            }
        };

        tracing::debug!(root = %root.display(), "Opened deployments directory for reading");
        Ok(Self {
            root,
            lock,
            read_only: true,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, unit_name: &str, network: &str) -> Result<PathBuf> {
        if !is_path_safe(network) {
            anyhow::bail!("Invalid network name {:?}", network);
        }
        if !is_path_safe(unit_name) {
            anyhow::bail!("Invalid unit name {:?}", unit_name);
        }
        Ok(self.root.join(network).join(format!("{}.json", unit_name)))
    }

    fn read_record(path: &Path) -> Result<DeploymentRecord> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read deployment record {}", path.display()))?;
        serde_json::from_str(&content)
            .context(format!("Failed to parse deployment record {}", path.display()))
    }
}

impl ArtifactPersistence for FileArtifactPersistence {
    fn get(&self, unit_name: &str, network: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(unit_name, network)?;
        if !path.try_exists().context(format!("Failed to access {}", path.display()))? {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn put(&mut self, record: &DeploymentRecord) -> Result<()> {
        if self.read_only {
            anyhow::bail!(
                "Deployments directory {} is open read-only",
                self.root.display()
            );
        }

        let path = self.record_path(&record.unit_name, &record.network)?;
        let dir = self.root.join(&record.network);
        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create network directory {}", dir.display()))?;

        let content = serde_json::to_string_pretty(record)
            .context("Failed to serialize deployment record")?;

        // Write then rename so a crash never leaves a truncated record behind.
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .context(format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .context(format!("Failed to move record into place at {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Deployment record written");
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<DeploymentRecord>> {
        let mut records = Vec::new();
        if !self.root.is_dir() {
            return Ok(records);
        }

        for network_dir in std::fs::read_dir(&self.root)
            .context(format!("Failed to read {}", self.root.display()))?
        {
            let network_dir = network_dir.context("Failed to read directory entry")?.path();
            if !network_dir.is_dir() {
                continue;
            }

            for entry in std::fs::read_dir(&network_dir)
                .context(format!("Failed to read {}", network_dir.display()))?
            {
                let path = entry.context("Failed to read directory entry")?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    records.push(Self::read_record(&path)?);
                }
            }
        }

        records.sort_by(|a, b| {
            (a.network.as_str(), a.unit_name.as_str()).cmp(&(b.network.as_str(), b.unit_name.as_str()))
        });
        Ok(records)
    }
}

impl Drop for FileArtifactPersistence {
    fn drop(&mut self) {
        if let Some(lock) = &self.lock {
            if let Err(e) = FileExt::unlock(lock) {
                tracing::warn!(err = %e, root = %self.root.display(), "Failed to release deployments lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordKind;
    use alloy_core::primitives::{Address, TxHash};
    use serde_json::json;
    use tempdir::TempDir;

    fn record(unit: &str, network: &str, byte: u8) -> DeploymentRecord {
        DeploymentRecord::new(
            RecordKind::Deploy,
            unit,
            unit,
            network,
            Address::repeat_byte(byte),
            TxHash::repeat_byte(byte),
            vec![json!(byte)],
        )
    }

    #[test]
    fn test_memory_put_replaces() {
        let mut store = MemoryPersistence::new();
        store.put(&record("Staking", "localhost", 1)).unwrap();
        store.put(&record("Staking", "localhost", 2)).unwrap();
        store.put(&record("Staking", "rinkeby", 3)).unwrap();

        assert_eq!(store.len(), 2);
        let found = store.get("Staking", "localhost").unwrap().unwrap();
        assert_eq!(found.address, Address::repeat_byte(2));
        assert!(store.get("Staking", "mainnet").unwrap().is_none());
    }

    #[test]
    fn test_file_records_survive_reopen() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");

        {
            let mut store = FileArtifactPersistence::open(temp_dir.path()).unwrap();
            store.put(&record("Controller", "localhost", 1)).unwrap();
            store.put(&record("ASTOStorage", "localhost", 2)).unwrap();
            store.put(&record("Controller", "rinkeby", 3)).unwrap();
        }

        let store = FileArtifactPersistence::open(temp_dir.path()).unwrap();
        let found = store.get("Controller", "localhost").unwrap().unwrap();
        assert_eq!(found, record_with_time(&found, record("Controller", "localhost", 1)));

        let all = store.list_all().unwrap();
        let keys: Vec<(&str, &str)> = all
            .iter()
            .map(|r| (r.network.as_str(), r.unit_name.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("localhost", "ASTOStorage"),
                ("localhost", "Controller"),
                ("rinkeby", "Controller"),
            ]
        );
        assert!(temp_dir.path().join("localhost/Controller.json").exists());
    }

    fn record_with_time(found: &DeploymentRecord, mut expected: DeploymentRecord) -> DeploymentRecord {
        expected.recorded_at = found.recorded_at;
        expected
    }

    #[test]
    fn test_file_missing_record() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        let store = FileArtifactPersistence::open(temp_dir.path()).unwrap();
        assert!(store.get("Staking", "localhost").unwrap().is_none());
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_corrupted_record() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        let store = FileArtifactPersistence::open(temp_dir.path()).unwrap();

        std::fs::create_dir_all(temp_dir.path().join("localhost")).unwrap();
        std::fs::write(temp_dir.path().join("localhost/Staking.json"), "{ invalid json }")
            .expect("Failed to write corrupted file");

        assert!(store.get("Staking", "localhost").is_err());
        assert!(store.list_all().is_err());
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        let first = FileArtifactPersistence::open(temp_dir.path()).unwrap();

        let second = FileArtifactPersistence::open(temp_dir.path());
        assert!(second.is_err(), "Second open should fail while the lock is held");

        drop(first);
        assert!(FileArtifactPersistence::open(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_read_only_open_of_missing_directory() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        let root = temp_dir.path().join("deployments");

        let store = FileArtifactPersistence::open_read_only(&root).unwrap();
        assert!(store.get("Staking", "localhost").unwrap().is_none());
        assert!(store.list_all().unwrap().is_empty());
        assert!(!root.exists(), "Reading must not create the directory");
    }

    #[test]
    fn test_readers_share_the_lock() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        {
            let mut writer = FileArtifactPersistence::open(temp_dir.path()).unwrap();
            writer.put(&record("Controller", "localhost", 1)).unwrap();
        }

        let first = FileArtifactPersistence::open_read_only(temp_dir.path()).unwrap();
        let mut second = FileArtifactPersistence::open_read_only(temp_dir.path()).unwrap();
        assert_eq!(first.list_all().unwrap().len(), 1);
        assert!(second.get("Controller", "localhost").unwrap().is_some());
        assert!(second.put(&record("Staking", "localhost", 2)).is_err());

        assert!(
            FileArtifactPersistence::open(temp_dir.path()).is_err(),
            "A writer must wait for readers"
        );
        drop(first);
        drop(second);
        assert!(FileArtifactPersistence::open(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_network_names_stay_inside_root() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        let mut store = FileArtifactPersistence::open(temp_dir.path().join("deployments")).unwrap();

        for network in ["..", "../elsewhere", "a/b", ""] {
            assert!(store.get("Staking", network).is_err(), "{:?}", network);
            assert!(store.put(&record("Staking", network, 1)).is_err(), "{:?}", network);
        }
        assert!(!temp_dir.path().join("elsewhere").exists());
    }
}
