//! Persistence of intermediate delegation records, keyed per staker key.
//!
//! Records are read-modify-written without locking; a single user drives a
//! single store.

use super::IntermediateDelegation;
use crate::config::files::DELEGATIONS_FILE_SUFFIX;
use crate::error::{StakingError, StakingResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Storage for per-staker intermediate records
pub trait LocalStore {
    fn load(&self, staker_pk_hex: &str) -> StakingResult<Vec<IntermediateDelegation>>;
    fn save(&self, staker_pk_hex: &str, records: &[IntermediateDelegation]) -> StakingResult<()>;
}

/// One JSON file per staker key under a data directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, staker_pk_hex: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}", staker_pk_hex, DELEGATIONS_FILE_SUFFIX))
    }

    fn ensure_dir(path: &Path) -> StakingResult<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

impl LocalStore for JsonFileStore {
    fn load(&self, staker_pk_hex: &str) -> StakingResult<Vec<IntermediateDelegation>> {
        let path = self.path_for(staker_pk_hex);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, staker_pk_hex: &str, records: &[IntermediateDelegation]) -> StakingResult<()> {
        Self::ensure_dir(&self.dir)?;
        let path = self.path_for(staker_pk_hex);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(records)?)?;
        fs::rename(&temp_path, &path)?;
        log::debug!("Saved {} intermediate delegations to {}", records.len(), path.display());
        Ok(())
    }
}

/// In-memory store, counting writes
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<IntermediateDelegation>>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl LocalStore for MemoryStore {
    fn load(&self, staker_pk_hex: &str) -> StakingResult<Vec<IntermediateDelegation>> {
        let records = self
            .records
            .lock()
            .map_err(|_| StakingError::operation("memory_store", "lock poisoned"))?;
        Ok(records.get(staker_pk_hex).cloned().unwrap_or_default())
    }

    fn save(&self, staker_pk_hex: &str, records: &[IntermediateDelegation]) -> StakingResult<()> {
        let mut stored = self
            .records
            .lock()
            .map_err(|_| StakingError::operation("memory_store", "lock poisoned"))?;
        stored.insert(staker_pk_hex.to_string(), records.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
