//! Persisted allowlist state.
//!
//! Everything one regeneration derives is committed as a single [`Snapshot`]
//! blob. Blob writes replace the previous value atomically, so a reader sees
//! either the previous build or the new one in full.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::balance::{BalanceMap, BalanceMaps, Cohort, IngestReport, NameMap};
use crate::common::write_file_atomic;
use crate::error::{Error, Result};
use crate::tree::MerkleResult;

pub const SNAPSHOT_KEY: &str = "snapshot.json";

/// Whole-value key/blob storage.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the value under `key`; readers never observe a partial value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Stores each blob as a file under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::storage("blob key", format!("'{key}' is not a plain file name")));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        write_file_atomic(&self.path_for(key)?, value).map_err(|e| Error::storage(key, e))
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `put` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage(key, "writes disabled"));
        }
        self.blobs.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One committed build of both cohorts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generation: u64,
    pub private_map: BalanceMap,
    pub public_map: BalanceMap,
    pub names: NameMap,
    pub private_result: MerkleResult,
    pub public_result: MerkleResult,
    pub report: IngestReport,
}

impl Snapshot {
    pub fn new(
        generation: u64,
        maps: BalanceMaps,
        private_result: MerkleResult,
        public_result: MerkleResult,
        report: IngestReport,
    ) -> Self {
        Self {
            generation,
            private_map: maps.private,
            public_map: maps.public,
            names: maps.names,
            private_result,
            public_result,
            report,
        }
    }

    pub fn result(&self, cohort: Cohort) -> &MerkleResult {
        match cohort {
            Cohort::Private => &self.private_result,
            Cohort::Public => &self.public_result,
        }
    }

    pub fn balances(&self, cohort: Cohort) -> &BalanceMap {
        match cohort {
            Cohort::Private => &self.private_map,
            Cohort::Public => &self.public_map,
        }
    }
}

pub fn load_snapshot(store: &dyn BlobStore) -> Result<Option<Snapshot>> {
    store
        .get(SNAPSHOT_KEY)?
        .map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|e| Error::storage("decode snapshot", e))
        })
        .transpose()
}

pub fn commit_snapshot(store: &dyn BlobStore, snapshot: &Snapshot) -> Result<()> {
    let bytes = serde_json::to_vec(snapshot).map_err(|e| Error::storage("encode snapshot", e))?;
    store.put(SNAPSHOT_KEY, &bytes)
}
